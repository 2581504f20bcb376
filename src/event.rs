//! Progress/event bus.
//!
//! Every component reports progress through typed [`ProgressEvent`]s on a
//! per-session [`EventBus`]. The bus is sink-agnostic: a TUI, a logger or a
//! test can attach an [`EventSink`]. Emission never blocks; the built-in
//! ring buffer applies backpressure by dropping non-essential events before
//! essential ones (Error, RunFinished), and never reorders what it keeps.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Typed progress events emitted during a research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Info(String),
    Success(String),
    Warning(String),
    Error(String),
    StepChanged(u32),
    ActionChosen(String),
    Think(String),
    UrlCounts {
        total: usize,
        visited: usize,
    },
    TokenUsage(u64),
    PersonaStats {
        name: String,
        searches: usize,
        reads: usize,
        answers: usize,
        tokens: u64,
        active: bool,
    },
    VisitedUrl(String),
    BatchStart {
        batch_id: String,
        batch_type: String,
        task_count: usize,
    },
    TaskUpdate {
        task_id: String,
        batch_id: String,
        description: String,
        status: String,
        elapsed_ms: u64,
    },
    BatchEnd {
        batch_id: String,
        total_ms: u64,
        success_count: usize,
        fail_count: usize,
    },
    Dedup {
        original_count: usize,
        unique_count: usize,
        removed_count: usize,
        threshold: f32,
        degraded: bool,
    },
    ValidationStart {
        eval_types: Vec<String>,
    },
    ValidationStep {
        eval_type: String,
        passed: bool,
        confidence: f32,
        duration_ms: u64,
    },
    ValidationEnd {
        overall_passed: bool,
        failed_at: Option<String>,
    },
    RunFinished {
        success: bool,
    },
}

impl ProgressEvent {
    /// Essential events survive backpressure; everything else may be
    /// dropped when the buffer is full.
    pub fn is_essential(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Error(_) | ProgressEvent::RunFinished { .. }
        )
    }
}

/// Receives events as they are emitted. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn accept(&self, event: &ProgressEvent);
}

/// Sink that forwards events into a tokio channel, dropping on a full or
/// closed receiver rather than blocking.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn accept(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Default ring-buffer capacity of an event bus.
const DEFAULT_CAPACITY: usize = 1024;

/// Per-session event bus. Cheap to clone; clones share the same buffer and
/// sinks. Never a process-wide singleton, so independent sessions and tests
/// stay isolated.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    buffer: Mutex<VecDeque<ProgressEvent>>,
    capacity: usize,
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                buffer: Mutex::new(VecDeque::new()),
                capacity: capacity.max(1),
                sinks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Attach a sink. Sinks see every event regardless of buffer pressure.
    pub fn attach(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.lock().unwrap().push(sink);
    }

    /// Emit an event. Non-blocking: sinks are invoked inline and the event
    /// is appended to the ring buffer. When the buffer is full, the oldest
    /// non-essential event is evicted first; an incoming non-essential
    /// event is dropped outright if only essential events remain.
    pub fn emit(&self, event: ProgressEvent) {
        for sink in self.inner.sinks.lock().unwrap().iter() {
            sink.accept(&event);
        }

        let mut buffer = self.inner.buffer.lock().unwrap();
        if buffer.len() >= self.inner.capacity {
            if let Some(pos) = buffer.iter().position(|e| !e.is_essential()) {
                buffer.remove(pos);
            } else if !event.is_essential() {
                return;
            }
        }
        buffer.push_back(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Info(message.into()));
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Success(message.into()));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Warning(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Error(message.into()));
    }

    /// Drain all buffered events in emission order.
    pub fn drain(&self) -> Vec<ProgressEvent> {
        self.inner.buffer.lock().unwrap().drain(..).collect()
    }

    /// Number of currently buffered events.
    pub fn len(&self) -> usize {
        self.inner.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.buffer.lock().unwrap().is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
