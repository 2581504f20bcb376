//! In-memory contract implementations for tests and offline runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    CodeSandbox, ContentType, EmbeddingContract, LlmAnswer, LlmContract, LlmDecision, PageReader,
    ReadResult, SandboxResult, SearchProvider, SearchResponse, SearchSnippet,
};
use crate::agent::{ActionPermissions, AgentAction, AgentPrompt};
use crate::error::{DelveError, DelveResult};
use crate::evaluate::{EvaluationJudgment, PromptPair};
use crate::types::{SerpQuery, TokenUsage};

// ─── LLM ─────────────────────────────────────────────────────────────────────

/// LLM that replays a scripted sequence of actions and judgments.
pub struct ScriptedLlm {
    actions: Mutex<VecDeque<AgentAction>>,
    judgments: Mutex<VecDeque<EvaluationJudgment>>,
    forced_answer: Mutex<Option<LlmAnswer>>,
    usage_per_call: TokenUsage,
}

impl ScriptedLlm {
    pub fn new(actions: Vec<AgentAction>) -> Self {
        Self {
            actions: Mutex::new(actions.into()),
            judgments: Mutex::new(VecDeque::new()),
            forced_answer: Mutex::new(None),
            usage_per_call: TokenUsage::new(100, 50),
        }
    }

    /// Charge this usage on every contract call.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage_per_call = usage;
        self
    }

    /// Queue judgments consumed in order by `judge`.
    pub fn with_judgments(self, judgments: Vec<EvaluationJudgment>) -> Self {
        *self.judgments.lock().unwrap() = judgments.into();
        self
    }

    /// Answer returned by `generate_answer` (beast mode).
    pub fn with_forced_answer(self, answer: impl Into<String>) -> Self {
        *self.forced_answer.lock().unwrap() = Some(LlmAnswer {
            answer: answer.into(),
            references: Vec::new(),
            usage: self.usage_per_call,
        });
        self
    }
}

#[async_trait]
impl LlmContract for ScriptedLlm {
    async fn decide_action(
        &self,
        _prompt: &AgentPrompt,
        _permissions: &ActionPermissions,
    ) -> DelveResult<LlmDecision> {
        let action = self.actions.lock().unwrap().pop_front().ok_or_else(|| {
            DelveError::ContractViolation {
                contract: "llm".into(),
                message: "scripted action sequence exhausted".into(),
            }
        })?;
        Ok(LlmDecision {
            action,
            usage: self.usage_per_call,
        })
    }

    async fn generate_answer(
        &self,
        _prompt: &AgentPrompt,
        _temperature: f32,
    ) -> DelveResult<LlmAnswer> {
        self.forced_answer
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DelveError::ContractViolation {
                contract: "llm".into(),
                message: "no forced answer scripted".into(),
            })
    }

    async fn judge(&self, _prompt: &PromptPair) -> DelveResult<EvaluationJudgment> {
        Ok(self
            .judgments
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(EvaluationJudgment::pass_default))
    }
}

// ─── Embeddings ──────────────────────────────────────────────────────────────

/// Deterministic bag-of-words embedder. Texts sharing words get similar
/// vectors, which is enough to exercise the dedup gate without a provider.
pub struct HashEmbedder {
    dimension: usize,
    fail: Mutex<bool>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: Mutex::new(false),
        }
    }

    /// Make subsequent `embed` calls fail, to exercise degraded mode.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingContract for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> DelveResult<Vec<Vec<f32>>> {
        if *self.fail.lock().unwrap() {
            return Err(DelveError::Transient {
                service: "embedding".into(),
                message: "provider unavailable".into(),
            });
        }

        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for word in text.to_lowercase().split_whitespace() {
                    let clean: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
                    if clean.is_empty() {
                        continue;
                    }
                    use std::collections::hash_map::DefaultHasher;
                    use std::hash::{Hash, Hasher};
                    let mut hasher = DefaultHasher::new();
                    clean.hash(&mut hasher);
                    vector[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
                }
                vector
            })
            .collect())
    }
}

// ─── Search ──────────────────────────────────────────────────────────────────

/// Search provider that returns the same snippets for every query and
/// counts calls.
pub struct StaticSearch {
    snippets: Vec<SearchSnippet>,
    calls: Mutex<Vec<SerpQuery>>,
}

impl StaticSearch {
    pub fn new(snippets: Vec<SearchSnippet>) -> Self {
        Self {
            snippets,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn queries_seen(&self) -> Vec<SerpQuery> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, query: &SerpQuery) -> DelveResult<SearchResponse> {
        self.calls.lock().unwrap().push(query.clone());
        Ok(SearchResponse {
            snippets: self.snippets.clone(),
            raw_latency: Duration::from_millis(1),
        })
    }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Reader serving canned page texts; listed URLs fail with a timeout.
pub struct StaticReader {
    pages: HashMap<String, String>,
    failing: HashSet<String>,
}

impl StaticReader {
    pub fn new(pages: HashMap<String, String>) -> Self {
        Self {
            pages,
            failing: HashSet::new(),
        }
    }

    pub fn with_failure(mut self, url: impl Into<String>) -> Self {
        self.failing.insert(url.into());
        self
    }
}

#[async_trait]
impl PageReader for StaticReader {
    async fn read(&self, url: &str) -> DelveResult<ReadResult> {
        if self.failing.contains(url) {
            return Err(DelveError::Timeout {
                service: "reader".into(),
                timeout_ms: 1,
            });
        }
        let text = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| DelveError::Permanent {
                service: "reader".into(),
                message: format!("404 for {url}"),
            })?;
        Ok(ReadResult {
            bytes_read: text.len(),
            text,
            latency: Duration::from_millis(1),
            content_type: ContentType::Html,
        })
    }
}

// ─── Sandbox ─────────────────────────────────────────────────────────────────

/// Sandbox that echoes its input as stdout.
pub struct EchoSandbox;

#[async_trait]
impl CodeSandbox for EchoSandbox {
    async fn execute(&self, code: &str) -> DelveResult<SandboxResult> {
        Ok(SandboxResult {
            stdout: code.to_string(),
            stderr: String::new(),
            exit_code: 0,
        })
    }
}
