//! # delve-core
//!
//! Deep-research reasoning engine: given a natural-language question and a
//! token budget, drive an iterative loop of web search, page reading,
//! reflection and answer generation, stopping when the answer passes a
//! multi-dimensional quality gate or the budget runs out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use delve_core::adapter::{HashEmbedder, ScriptedLlm, StaticReader, StaticSearch};
//! use delve_core::agent::ResearchAgent;
//! use delve_core::config::ResearchConfig;
//!
//! # async fn run() -> Result<(), delve_core::DelveError> {
//! let agent = ResearchAgent::new(
//!     Arc::new(ScriptedLlm::new(vec![])),
//!     Arc::new(StaticSearch::empty()),
//!     Arc::new(StaticReader::new(Default::default())),
//!     Arc::new(HashEmbedder::default()),
//!     ResearchConfig::new().with_budget(1_000_000),
//! );
//!
//! let outcome = agent.run("What is the fastest BSD-licensed database?").await?;
//! if outcome.success {
//!     println!("{}", outcome.answer.unwrap());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`agent`] | State machine: per-step action choice, execution, budget checks, beast mode |
//! | [`persona`] | Cognitive-persona query expansion on a work-stealing pool |
//! | [`dedup`] | Embedding-based query dedup gate with string-mode degradation |
//! | [`evaluate`] | Ordered fail-fast answer evaluation (definitive, freshness, plurality, completeness, strict) |
//! | [`similarity`] | Cosine kernel and batched dedup checks |
//! | [`store`] | Canonical URL store with deterministic scoring, ordered knowledge log, reference extraction |
//! | [`budget`] | Per-session token ledger with the 85% beast-mode threshold |
//! | [`adapter`] | Contracts over LLM, embeddings, search, reader and sandbox, plus retry/timeout |
//! | [`event`] | Typed progress events with non-blocking, drop-aware buffering |
//! | [`trace`] | Search/evaluation traces, latency percentiles, evidence reports |
//! | [`session`] | Session persistence format (JSON + banner text log) |
//! | [`config`] | Session configuration and startup-time environment loading |
//! | [`error`] | Error taxonomy: transient, permanent, contract violation, budget, fatal |
//!
//! ## Design
//!
//! The agent loop owns its context exclusively. Parallel sub-tasks receive
//! immutable snapshots and return values the loop merges back; the token
//! ledger, URL store and knowledge log are the only shared-mutable tables.
//! The ledger and event bus are per-session values, never process-wide, so
//! independent sessions and tests stay isolated.

pub mod adapter;
pub mod agent;
pub mod budget;
pub mod config;
pub mod dedup;
pub mod error;
pub mod evaluate;
pub mod event;
pub mod persona;
pub mod session;
pub mod similarity;
pub mod store;
pub mod trace;
pub mod types;

pub use error::{DelveError, DelveResult};
pub use types::*;
