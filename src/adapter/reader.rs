use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::{DelveError, DelveResult};

/// Content types the reader contract must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Html,
    Pdf,
    Json,
    Xml,
    Text,
    Markdown,
}

impl ContentType {
    /// Map a MIME type to a supported content type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.split(';').next().unwrap_or(mime).trim();
        match mime {
            "text/html" | "application/xhtml+xml" => Some(ContentType::Html),
            "application/pdf" => Some(ContentType::Pdf),
            "application/json" => Some(ContentType::Json),
            "application/xml" | "text/xml" => Some(ContentType::Xml),
            "text/plain" => Some(ContentType::Text),
            "text/markdown" => Some(ContentType::Markdown),
            _ => None,
        }
    }
}

/// Output of one page read. `text` is always UTF-8.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub text: String,
    pub bytes_read: usize,
    pub latency: Duration,
    pub content_type: ContentType,
}

/// Page reader contract.
#[async_trait]
pub trait PageReader: Send + Sync {
    async fn read(&self, url: &str) -> DelveResult<ReadResult>;
}

/// Default bound on bytes pulled per read.
const DEFAULT_MAX_BYTES: usize = 2 * 1024 * 1024;

/// HTTP reader that streams the response body and bounds memory per call.
/// Text extraction beyond raw UTF-8 decoding (HTML boilerplate removal,
/// PDF parsing) belongs to external collaborators; this reader hands the
/// raw text onward.
pub struct HttpPageReader {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpPageReader {
    pub fn new(timeout: Duration) -> DelveResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DelveError::Init(format!("http client: {e}")))?;
        Ok(Self {
            client,
            max_bytes: DEFAULT_MAX_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl PageReader for HttpPageReader {
    async fn read(&self, url: &str) -> DelveResult<ReadResult> {
        let start = Instant::now();
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DelveError::Timeout {
                    service: "reader".into(),
                    timeout_ms: 0,
                }
            } else {
                DelveError::Transient {
                    service: "reader".into(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DelveError::Transient {
                service: "reader".into(),
                message: format!("status {status} for {url}"),
            });
        }
        if !status.is_success() {
            return Err(DelveError::Permanent {
                service: "reader".into(),
                message: format!("status {status} for {url}"),
            });
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        let content_type =
            ContentType::from_mime(&mime).ok_or_else(|| DelveError::UnsupportedContent {
                url: url.to_string(),
                content_type: mime,
            })?;

        // Stream the body so one oversized page cannot balloon memory.
        let mut bytes_read = 0usize;
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DelveError::Transient {
                service: "reader".into(),
                message: e.to_string(),
            })?;
            bytes_read += chunk.len();
            let room = self.max_bytes.saturating_sub(buffer.len());
            if room > 0 {
                buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            if buffer.len() >= self.max_bytes {
                break;
            }
        }

        let text = String::from_utf8_lossy(&buffer).into_owned();
        Ok(ReadResult {
            text,
            bytes_read,
            latency: start.elapsed(),
            content_type,
        })
    }
}
