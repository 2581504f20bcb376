//! The research agent state machine.
//!
//! One step: rotate the current question, compute permissions, ask the LLM
//! for an action, execute it, merge results into the context, and check
//! the budget. Search fans out through persona expansion and the dedup
//! gate; reads run in parallel; answers must survive the evaluation
//! pipeline. At 85% budget the agent enters beast mode and forces an
//! answer from what it has.

mod actions;
mod context;
mod permissions;
mod state;

pub use actions::*;
pub use context::*;
pub use permissions::*;
pub use state::*;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use uuid::Uuid;

use crate::adapter::{
    CallPolicy, CodeSandbox, EmbeddingContract, LlmContract, PageReader, SearchProvider,
};
use crate::budget::TokenLedger;
use crate::config::ResearchConfig;
use crate::dedup::QueryDedupGate;
use crate::error::{DelveError, DelveResult};
use crate::evaluate::{
    detect_topic, EvaluationContext, EvaluationPipeline, EvaluationType, RequiredEvals,
};
use crate::event::{EventBus, ProgressEvent};
use crate::persona::{PersonaOrchestrator, QueryContext};
use crate::store::{extract_references, validate_references, UrlCandidate};
use crate::trace::{
    EvaluationEvidenceReport, EvaluationTrace, QueryOrigin, SearchEvidenceReport, SearchTrace,
};
use crate::types::{KnowledgeItem, Question, Reference, SerpQuery, TokenUsage};

/// Per-persona activity counters, reported on the event bus and in the
/// session record.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonaTally {
    pub searches: usize,
    pub reads: usize,
    pub answers: usize,
    pub tokens: u64,
}

/// The deep-research agent. Owns its context exclusively; every external
/// dependency is a contract.
pub struct ResearchAgent {
    config: ResearchConfig,
    state: AgentState,
    context: AgentContext,
    llm: Arc<dyn LlmContract>,
    search: Arc<dyn SearchProvider>,
    reader: Arc<dyn PageReader>,
    sandbox: Option<Arc<dyn CodeSandbox>>,
    ledger: TokenLedger,
    bus: EventBus,
    orchestrator: PersonaOrchestrator,
    dedup_gate: QueryDedupGate,
    pipeline: EvaluationPipeline,
    required_evals: RequiredEvals,
    search_policy: CallPolicy,
    read_policy: CallPolicy,
    clock: NaiveDate,
    search_traces: Vec<SearchTrace>,
    eval_traces: Vec<EvaluationTrace>,
    persona_tallies: HashMap<String, PersonaTally>,
    timing: RunTiming,
    started: Instant,
    current_question: Question,
}

impl ResearchAgent {
    pub fn new(
        llm: Arc<dyn LlmContract>,
        search: Arc<dyn SearchProvider>,
        reader: Arc<dyn PageReader>,
        embedder: Arc<dyn EmbeddingContract>,
        config: ResearchConfig,
    ) -> Self {
        let bus = EventBus::new();
        let ledger = TokenLedger::new(config.token_budget, bus.clone());
        Self {
            state: AgentState::initial(),
            context: AgentContext::new(Question::original("")),
            pipeline: EvaluationPipeline::new(llm.clone()),
            required_evals: RequiredEvals::with_fallback(llm.clone()),
            dedup_gate: QueryDedupGate::new(embedder),
            orchestrator: PersonaOrchestrator::with_defaults(),
            search_policy: CallPolicy::default(),
            read_policy: CallPolicy::default(),
            clock: Utc::now().date_naive(),
            search_traces: Vec::new(),
            eval_traces: Vec::new(),
            persona_tallies: HashMap::new(),
            timing: RunTiming::default(),
            started: Instant::now(),
            current_question: Question::original(""),
            llm,
            search,
            reader,
            sandbox: None,
            ledger,
            bus,
            config,
        }
    }

    /// Replace the event bus (and rebind the ledger to it).
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.ledger = TokenLedger::new(self.config.token_budget, bus.clone());
        self.bus = bus;
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: PersonaOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// Inject a fixed date for deterministic persona and freshness
    /// behavior in tests.
    pub fn with_clock(mut self, date: NaiveDate) -> Self {
        self.clock = date;
        self
    }

    pub fn with_call_policies(mut self, search: CallPolicy, read: CallPolicy) -> Self {
        self.search_policy = search;
        self.read_policy = read;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn persona_tallies(&self) -> &HashMap<String, PersonaTally> {
        &self.persona_tallies
    }

    pub fn search_evidence(&self) -> SearchEvidenceReport {
        SearchEvidenceReport::from_traces(Uuid::new_v4(), self.search_traces.clone())
    }

    pub fn evaluation_evidence(&self) -> EvaluationEvidenceReport {
        EvaluationEvidenceReport::from_traces(Uuid::new_v4(), self.eval_traces.clone())
    }

    /// Run the research loop to a terminal state.
    ///
    /// Recoverable step errors are absorbed; only fatal errors
    /// (initialization, invariant violations) surface as `Err`.
    pub async fn run(mut self, question: impl Into<String>) -> DelveResult<ResearchOutcome> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(DelveError::Init("question must not be empty".into()));
        }

        self.started = Instant::now();
        self.context = AgentContext::new(Question::original(question.clone()));
        self.current_question = self.context.original_question.clone();
        self.bus.info(format!("starting research: {question}"));

        let deadline = self.started + Duration::from_millis(self.config.effective_deadline_ms());

        loop {
            match &self.state {
                AgentState::Processing { .. } if self.ledger.should_enter_beast_mode() => {
                    let message = format!(
                        "budget at {:.1}%, entering beast mode",
                        self.ledger.fraction_used() * 100.0
                    );
                    log::warn!("{message}");
                    self.bus.warning(message);
                    self.state = AgentState::BeastMode {
                        attempts: 0,
                        last_failure: "budget threshold reached".into(),
                    };
                }

                AgentState::Processing { .. } => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        self.bus.warning("deadline reached, entering beast mode");
                        self.state = AgentState::BeastMode {
                            attempts: 0,
                            last_failure: "deadline exceeded".into(),
                        };
                        continue;
                    }

                    // In-flight work past the deadline is dropped wholesale;
                    // its partial outputs never reach the context.
                    let step = tokio::time::timeout(remaining, self.execute_step()).await;
                    match step {
                        Ok(StepResult::Continue) => {}
                        Ok(StepResult::Completed(outcome)) => {
                            self.state = AgentState::Completed {
                                answer: outcome.answer,
                                references: outcome.references,
                                trivial: outcome.trivial,
                            };
                        }
                        Ok(StepResult::Error(message)) => {
                            log::error!("step error: {message}");
                            self.bus.error(message.clone());
                            self.context.diary.push(DiaryEntry::StepError { message });
                        }
                        Ok(StepResult::EnterBeastMode(reason)) => {
                            self.bus.warning(format!("forcing beast mode: {reason}"));
                            self.state = AgentState::BeastMode {
                                attempts: 0,
                                last_failure: reason,
                            };
                        }
                        Err(_) => {
                            self.bus
                                .warning("deadline cancelled the step, entering beast mode");
                            self.state = AgentState::BeastMode {
                                attempts: 0,
                                last_failure: "deadline exceeded".into(),
                            };
                        }
                    }
                }

                AgentState::BeastMode { attempts, .. }
                    if *attempts >= self.config.max_beast_attempts =>
                {
                    self.state = AgentState::Failed {
                        reason: "all beast mode attempts failed".into(),
                        partial_knowledge: self.context.knowledge.items().to_vec(),
                    };
                }

                AgentState::BeastMode { .. } => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let attempt = tokio::time::timeout(
                        remaining.max(Duration::from_millis(1)),
                        self.force_answer(),
                    )
                    .await;
                    match attempt {
                        Ok(Ok(outcome)) => {
                            self.state = AgentState::Completed {
                                answer: outcome.answer,
                                references: outcome.references,
                                trivial: false,
                            };
                        }
                        Ok(Err(e)) => {
                            if let AgentState::BeastMode {
                                attempts,
                                last_failure,
                            } = &mut self.state
                            {
                                *attempts += 1;
                                *last_failure = e.to_string();
                            }
                        }
                        Err(_) => {
                            self.state = AgentState::Failed {
                                reason: "deadline exceeded in beast mode".into(),
                                partial_knowledge: self.context.knowledge.items().to_vec(),
                            };
                        }
                    }
                }

                AgentState::Completed { .. } | AgentState::Failed { .. } => break,
            }
        }

        Ok(self.build_outcome())
    }

    async fn execute_step(&mut self) -> StepResult {
        self.context.total_step += 1;
        self.context.gap_questions_added_this_step = 0;

        let permissions = ActionPermissions::from_context(&self.context, &self.config);
        self.current_question = self.context.rotate_question();

        self.bus
            .emit(ProgressEvent::StepChanged(self.context.total_step));
        self.bus.emit(ProgressEvent::UrlCounts {
            total: self.context.urls.len(),
            visited: self.context.urls.visited_count(),
        });

        let mut prompt = self.build_prompt(&permissions);
        let mut decision = None;
        for attempt in 0..2 {
            let llm_start = Instant::now();
            let result = self.llm.decide_action(&prompt, &permissions).await;
            self.timing.llm_ms += llm_start.elapsed().as_millis() as u64;

            match result {
                Ok(d) => {
                    self.ledger
                        .record(&format!("decide_action:{}", d.action.name()), d.usage);
                    if permissions.is_allowed(d.action.name()) {
                        decision = Some(d);
                        break;
                    }
                    let violation = DelveError::DisallowedAction {
                        action: d.action.name().into(),
                        allowed: permissions.allowed_actions().join(", "),
                    };
                    if attempt == 1 {
                        return StepResult::EnterBeastMode(violation.to_string());
                    }
                    log::warn!("{violation}; re-prompting strictly");
                    self.bus.warning(violation.to_string());
                    prompt.system = format!(
                        "{}\n\nSTRICT: your previous action was not allowed. You MUST \
                         choose one of: {}.",
                        prompt.system,
                        permissions.allowed_actions().join(", ")
                    );
                }
                Err(e) if matches!(e, DelveError::ContractViolation { .. }) => {
                    if attempt == 1 {
                        return StepResult::EnterBeastMode(e.to_string());
                    }
                    log::warn!("{e}; re-prompting strictly");
                    prompt.system = format!(
                        "{}\n\nSTRICT: respond with exactly one well-formed action.",
                        prompt.system
                    );
                }
                Err(e) => return StepResult::Error(format!("action decision failed: {e}")),
            }
        }
        let Some(decision) = decision else {
            return StepResult::Error("no action decided".into());
        };

        let action = decision.action;
        self.bus
            .emit(ProgressEvent::ActionChosen(action.name().into()));
        self.bus.emit(ProgressEvent::Think(
            action.think().chars().take(200).collect(),
        ));
        log::info!(
            "step {} | action: {} | {}",
            self.context.total_step,
            action.name(),
            action.think().chars().take(120).collect::<String>()
        );

        let result = match action {
            AgentAction::Search { queries, think } => self.execute_search(queries, think).await,
            AgentAction::Read { urls, think } => self.execute_read(urls, think).await,
            AgentAction::Reflect {
                gap_questions,
                think,
            } => self.execute_reflect(gap_questions, think),
            AgentAction::Answer {
                answer,
                references,
                think,
            } => self.execute_answer(answer, references, think).await,
            AgentAction::Coding { code, think } => self.execute_coding(code, think).await,
        };

        if !matches!(result, StepResult::Error(_)) {
            self.context.step += 1;
        }
        self.sync_processing_state();
        result
    }

    fn sync_processing_state(&mut self) {
        if let AgentState::Processing {
            step,
            total_step,
            current_question,
            budget_used,
        } = &mut self.state
        {
            *step = self.context.step;
            *total_step = self.context.total_step;
            *current_question = self.current_question.text.clone();
            *budget_used = self.ledger.fraction_used();
        }
    }

    fn build_prompt(&self, permissions: &ActionPermissions) -> AgentPrompt {
        let mut system = String::from(
            "You are a deep research agent. Find accurate information efficiently \
             and answer when you know enough.\n\nAvailable actions:\n",
        );
        if permissions.search {
            system.push_str("- SEARCH: search the web for new information\n");
        }
        if permissions.read {
            system.push_str("- READ: read unvisited URLs from the list (pick new ones)\n");
        }
        if permissions.reflect {
            system.push_str("- REFLECT: add gap sub-questions (use sparingly)\n");
        }
        if permissions.answer {
            system.push_str("- ANSWER: give the final answer with references\n");
        }
        if permissions.coding {
            system.push_str("- CODING: run code to process collected data\n");
        }
        system.push_str("\nRespond with exactly one action from the list above.");

        let unvisited: Vec<String> = self
            .context
            .urls
            .top_unvisited(10)
            .iter()
            .map(|r| format!("- {} ({})", r.url, r.title))
            .collect();
        let urls_section = if unvisited.is_empty() {
            "No unvisited URLs available.".to_string()
        } else {
            format!("Unvisited URLs by score:\n{}", unvisited.join("\n"))
        };

        AgentPrompt {
            system,
            user: format!(
                "Original question: {}\nCurrent question: {}\n\n{}\n\nVisited URLs: {}\n\nKnowledge so far:\n{}",
                self.context.original_question.text,
                self.current_question.text,
                urls_section,
                self.context.urls.visited_count(),
                self.context.knowledge.format_for_prompt()
            ),
            diary: self.context.diary.iter().map(|d| d.format()).collect(),
        }
    }

    fn query_context(&self) -> QueryContext {
        QueryContext::new(self.context.original_question.text.clone(), self.clock)
            .with_topic(detect_topic(&self.context.original_question.text))
    }

    async fn execute_search(&mut self, queries: Vec<SerpQuery>, think: String) -> StepResult {
        let search_start = Instant::now();
        let query_context = self.query_context();
        let originals: Vec<String> = queries.into_iter().map(|q| q.q).collect();

        let expansion = self.orchestrator.expand_batch(&originals, &query_context);
        self.bus.info(format!(
            "expanded {} queries into {} via {} personas",
            originals.len(),
            expansion.queries.len(),
            self.orchestrator.persona_count()
        ));

        let mut weight_by_query: HashMap<String, (f32, String)> = HashMap::new();
        for wq in &expansion.queries {
            weight_by_query.insert(
                wq.query.normalized(),
                (wq.weight, wq.source_persona.clone()),
            );
        }

        let candidates: Vec<SerpQuery> =
            expansion.queries.iter().map(|wq| wq.query.clone()).collect();
        let outcome = self
            .dedup_gate
            .filter(
                candidates,
                &self.context.executed_queries,
                &self.context.executed_embeddings,
                &self.bus,
            )
            .await;

        let accepted = outcome.accepted;
        let executed_texts: Vec<String> = accepted.iter().map(|q| q.q.clone()).collect();

        // Fan the surviving queries out concurrently; each gets its own
        // retry policy and trace.
        let futures: Vec<_> = accepted
            .iter()
            .map(|query| {
                let search = self.search.clone();
                let policy = self.search_policy.clone();
                let query = query.clone();
                async move {
                    policy
                        .run("search", || {
                            let search = search.clone();
                            let query = query.clone();
                            async move { search.search(&query).await }
                        })
                        .await
                }
            })
            .collect();
        let results = join_all(futures).await;

        let mut success_count = 0usize;
        let mut error_count = 0usize;
        let mut estimated_tokens = 0u64;

        for (query, result) in accepted.iter().zip(results) {
            let (weight, persona) = weight_by_query
                .get(&query.normalized())
                .cloned()
                .unwrap_or((1.0, "direct".to_string()));
            let mut trace = SearchTrace::start(
                query.clone(),
                QueryOrigin::Persona {
                    name: persona.clone(),
                },
                "search",
            );

            match result {
                Ok(response) => {
                    let bytes: usize = response
                        .snippets
                        .iter()
                        .map(|s| s.excerpt.len() + s.title.len())
                        .sum();
                    trace.complete(response.snippets.len(), bytes, response.snippets.len());
                    estimated_tokens += (bytes as f64 / 4.0 * self.config.search_token_scaler)
                        .round() as u64;

                    let mut excerpts = Vec::new();
                    for snippet in &response.snippets {
                        if let Err(e) = self.context.urls.add(
                            UrlCandidate::new(&snippet.url, &snippet.title, &snippet.excerpt),
                            weight,
                            self.context.total_step,
                        ) {
                            if e.is_fatal() {
                                log::error!("dropping malformed search hit: {e}");
                            }
                            continue;
                        }
                        if excerpts.len() < 3 && !snippet.excerpt.is_empty() {
                            excerpts.push(format!("{}: {}", snippet.title, snippet.excerpt));
                        }
                    }
                    if !excerpts.is_empty() {
                        self.context.knowledge.push(KnowledgeItem::SideInfo {
                            question: query.q.clone(),
                            answer: excerpts.join("\n"),
                            source_url: response.snippets.first().map(|s| s.url.clone()),
                        });
                    }

                    let tally = self.persona_tallies.entry(persona).or_default();
                    tally.searches += 1;
                    success_count += 1;
                }
                Err(e) => {
                    trace.fail(e.to_string());
                    error_count += 1;
                }
            }
            self.search_traces.push(trace);
        }

        if estimated_tokens > 0 {
            self.ledger
                .record("search", TokenUsage::new(estimated_tokens, 0));
        }
        self.context
            .record_executed_queries(executed_texts, outcome.embeddings);

        self.timing.search_ms += search_start.elapsed().as_millis() as u64;
        self.bus.success(format!(
            "search: {} queries, {} ok, {} failed, {} URLs known",
            accepted.len(),
            success_count,
            error_count,
            self.context.urls.len()
        ));
        self.emit_persona_stats();

        self.context.diary.push(DiaryEntry::Search {
            queries: accepted,
            think,
            urls_found: self.context.urls.len(),
        });
        StepResult::Continue
    }

    async fn execute_read(&mut self, urls: Vec<String>, think: String) -> StepResult {
        let read_start = Instant::now();

        // Keep only known, unvisited URLs from the LLM's selection.
        let mut targets: Vec<String> = urls
            .into_iter()
            .filter(|u| {
                self.context
                    .urls
                    .get(u)
                    .map(|r| !r.visited)
                    .unwrap_or(false)
            })
            .take(MAX_URLS_PER_STEP)
            .collect();

        // The LLM picked nothing usable: rerank the best unvisited
        // candidates, falling back to plain score order.
        if targets.is_empty() {
            let candidates: Vec<String> = self
                .context
                .urls
                .top_unvisited(MAX_URLS_PER_STEP * 2)
                .iter()
                .map(|r| r.url.clone())
                .collect();
            if candidates.is_empty() {
                return StepResult::Error("no unvisited URLs available to read".into());
            }
            targets = match self
                .search
                .rerank(&self.context.original_question.text, &candidates)
                .await
            {
                Ok(ranked) => ranked.into_iter().take(MAX_URLS_PER_STEP).collect(),
                Err(_) => candidates.into_iter().take(MAX_URLS_PER_STEP).collect(),
            };
        }

        let batch_id = Uuid::new_v4().to_string();
        self.bus.emit(ProgressEvent::BatchStart {
            batch_id: batch_id.clone(),
            batch_type: "read".into(),
            task_count: targets.len(),
        });

        let futures: Vec<_> = targets
            .iter()
            .map(|url| {
                let reader = self.reader.clone();
                let policy = self.read_policy.clone();
                let url = url.clone();
                async move {
                    let started = Instant::now();
                    let result = policy
                        .run("read", || {
                            let reader = reader.clone();
                            let url = url.clone();
                            async move { reader.read(&url).await }
                        })
                        .await;
                    (url, result, started.elapsed())
                }
            })
            .collect();
        let results = join_all(futures).await;

        let mut success_count = 0usize;
        let mut fail_count = 0usize;
        for (url, result, elapsed) in results {
            let task_id = Uuid::new_v4().to_string();
            match result {
                Ok(read) => {
                    // Visited flips only on a successful read; failures
                    // stay eligible for future attempts.
                    self.context.urls.mark_visited(&url);
                    let excerpt: String = read.text.chars().take(1500).collect();
                    self.context.knowledge.push(KnowledgeItem::SideInfo {
                        question: self.current_question.text.clone(),
                        answer: excerpt,
                        source_url: Some(url.clone()),
                    });
                    self.ledger.record(
                        "read",
                        TokenUsage::new((read.text.len() / 4) as u64, 0),
                    );
                    self.bus.emit(ProgressEvent::VisitedUrl(url.clone()));
                    self.bus.emit(ProgressEvent::TaskUpdate {
                        task_id,
                        batch_id: batch_id.clone(),
                        description: url,
                        status: "completed".into(),
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                    success_count += 1;
                }
                Err(e) => {
                    log::warn!("read failed for {url}: {e}");
                    self.bus.emit(ProgressEvent::TaskUpdate {
                        task_id,
                        batch_id: batch_id.clone(),
                        description: url,
                        status: format!("failed: {e}"),
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                    fail_count += 1;
                }
            }
        }

        self.bus.emit(ProgressEvent::BatchEnd {
            batch_id,
            total_ms: read_start.elapsed().as_millis() as u64,
            success_count,
            fail_count,
        });
        self.timing.read_ms += read_start.elapsed().as_millis() as u64;

        self.context.diary.push(DiaryEntry::Read {
            urls: targets,
            think,
        });
        StepResult::Continue
    }

    fn execute_reflect(&mut self, gap_questions: Vec<String>, think: String) -> StepResult {
        let mut added = Vec::new();
        for question in gap_questions {
            if self.context.gap_questions_added_this_step >= MAX_REFLECT_PER_STEP {
                break;
            }
            if self.context.enqueue_gap_question(&question) {
                added.push(question);
            }
        }

        if added.is_empty() {
            log::info!("reflection produced no new questions (all duplicates)");
            self.bus.info("reflection was a no-op: all questions were duplicates");
        } else {
            self.bus
                .info(format!("reflection added {} gap questions", added.len()));
        }

        self.context.diary.push(DiaryEntry::Reflect {
            questions_added: added,
            think,
        });
        StepResult::Continue
    }

    async fn execute_answer(
        &mut self,
        answer: String,
        references: Vec<Reference>,
        _think: String,
    ) -> StepResult {
        // First-step direct answers skip evaluation entirely.
        if self.context.total_step == 1 && self.config.allow_direct_answer {
            self.bus.success("trivial direct answer accepted");
            let refs = validate_references(references, &self.context.urls);
            return StepResult::Completed(AnswerOutcome {
                answer,
                references: refs,
                trivial: true,
            });
        }

        let is_original = self.current_question.is_original();
        let mut required = match self.required_evals.determine(&self.current_question.text).await
        {
            Ok(required) => required,
            Err(_) => vec![EvaluationType::Definitive],
        };
        if is_original && !required.contains(&EvaluationType::Strict) {
            required.push(EvaluationType::Strict);
        }

        self.bus.emit(ProgressEvent::ValidationStart {
            eval_types: required.iter().map(|t| t.as_str().to_string()).collect(),
        });

        let eval_context = EvaluationContext {
            topic: detect_topic(&self.context.original_question.text),
            current_date: self.clock,
            knowledge: self.context.knowledge.items().to_vec(),
            question_is_original: is_original,
            ledger: Some(self.ledger.clone()),
        };

        let eval_start = Instant::now();
        let outcome = self
            .pipeline
            .evaluate_sequential(&self.current_question.text, &answer, &eval_context, &required)
            .await;
        self.timing.llm_ms += eval_start.elapsed().as_millis() as u64;

        for result in &outcome.results {
            let now = Utc::now();
            self.eval_traces.push(EvaluationTrace::record(
                result.eval_type,
                &self.current_question.text,
                &answer,
                now - chrono::Duration::milliseconds(result.duration.as_millis() as i64),
                now,
                0,
                result.passed,
                result.confidence,
                result.reasoning.len(),
            ));
            self.bus.emit(ProgressEvent::ValidationStep {
                eval_type: result.eval_type.as_str().into(),
                passed: result.passed,
                confidence: result.confidence,
                duration_ms: result.duration.as_millis() as u64,
            });
        }
        self.bus.emit(ProgressEvent::ValidationEnd {
            overall_passed: outcome.overall_passed,
            failed_at: outcome.failed_at.map(|t| t.as_str().to_string()),
        });

        if outcome.overall_passed {
            let mut refs = validate_references(references, &self.context.urls);
            for extracted in
                extract_references(&answer, &self.context.knowledge, &self.context.urls)
            {
                if !refs.iter().any(|r| r.source_url == extracted.source_url) {
                    refs.push(extracted);
                }
            }
            self.bus
                .success(format!("answer accepted with {} references", refs.len()));
            return StepResult::Completed(AnswerOutcome {
                answer,
                references: refs,
                trivial: false,
            });
        }

        // Rejection feeds back as knowledge; the loop continues.
        let failed_at = outcome.failed_at.unwrap_or(EvaluationType::Definitive);
        let failure = outcome.failure();
        let reason = failure.map(|r| r.reasoning.clone()).unwrap_or_default();
        let suggestions = failure.map(|r| r.suggestions.clone()).unwrap_or_default();

        self.bus.warning(format!(
            "answer rejected by {failed_at}: {}",
            reason.chars().take(120).collect::<String>()
        ));
        self.context.knowledge.push(KnowledgeItem::Error {
            question: self.current_question.text.clone(),
            attempted_answer: answer.clone(),
            eval_type_failed: failed_at.as_str().into(),
            reason: reason.clone(),
            suggestions,
        });
        self.context.diary.push(DiaryEntry::FailedAnswer {
            eval_type: failed_at.as_str().into(),
            reason,
        });
        StepResult::Continue
    }

    async fn execute_coding(&mut self, code: String, think: String) -> StepResult {
        let Some(sandbox) = self.sandbox.clone() else {
            return StepResult::Error("coding requested but no sandbox is configured".into());
        };

        match sandbox.execute(&code).await {
            Ok(result) => {
                let output = if result.stdout.is_empty() {
                    result.stderr.clone()
                } else {
                    result.stdout.clone()
                };
                self.context.knowledge.push(KnowledgeItem::SideInfo {
                    question: self.current_question.text.clone(),
                    answer: output,
                    source_url: None,
                });
                self.context.diary.push(DiaryEntry::Coding {
                    think,
                    exit_code: result.exit_code,
                });
                StepResult::Continue
            }
            Err(e) => StepResult::Error(format!("sandbox execution failed: {e}")),
        }
    }

    async fn force_answer(&mut self) -> DelveResult<AnswerOutcome> {
        let prompt = AgentPrompt {
            system: "You MUST provide an answer now. No more searching or reflecting. \
                     Be pragmatic and use the knowledge you already have."
                .into(),
            user: format!(
                "Question: {}\n\nKnowledge:\n{}\n\nProvide your best answer.",
                self.context.original_question.text,
                self.context.knowledge.format_for_prompt()
            ),
            diary: self.context.diary.iter().map(|d| d.format()).collect(),
        };

        let llm_start = Instant::now();
        let response = self.llm.generate_answer(&prompt, 0.9).await?;
        self.timing.llm_ms += llm_start.elapsed().as_millis() as u64;
        self.ledger.record("force_answer", response.usage);

        Ok(AnswerOutcome {
            answer: response.answer,
            references: validate_references(response.references, &self.context.urls),
            trivial: false,
        })
    }

    fn emit_persona_stats(&self) {
        for (name, tally) in &self.persona_tallies {
            self.bus.emit(ProgressEvent::PersonaStats {
                name: name.clone(),
                searches: tally.searches,
                reads: tally.reads,
                answers: tally.answers,
                tokens: tally.tokens,
                active: false,
            });
        }
    }

    fn build_outcome(mut self) -> ResearchOutcome {
        self.timing.total_ms = self.started.elapsed().as_millis() as u64;
        let success = matches!(self.state, AgentState::Completed { .. });
        self.bus.emit(ProgressEvent::RunFinished { success });

        match self.state {
            AgentState::Completed {
                answer,
                references,
                trivial,
            } => ResearchOutcome {
                success: true,
                answer: Some(answer),
                references,
                trivial,
                token_usage: self.ledger.total_usage(),
                visited_urls: self.context.urls.visited_urls(),
                error: None,
                steps: self.context.total_step,
                urls_found: self.context.urls.len(),
                timing: self.timing,
            },
            AgentState::Failed { reason, .. } => ResearchOutcome {
                success: false,
                answer: None,
                references: Vec::new(),
                trivial: false,
                token_usage: self.ledger.total_usage(),
                visited_urls: self.context.urls.visited_urls(),
                error: Some(reason),
                steps: self.context.total_step,
                urls_found: self.context.urls.len(),
                timing: self.timing,
            },
            _ => unreachable!("outcome built in non-terminal state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{
        EchoSandbox, HashEmbedder, ScriptedLlm, SearchSnippet, StaticReader, StaticSearch,
    };
    use crate::evaluate::EvaluationJudgment;
    use std::collections::HashMap as StdHashMap;

    fn snippets(n: usize) -> Vec<SearchSnippet> {
        (0..n)
            .map(|i| SearchSnippet {
                title: format!("Result {i}"),
                url: format!("https://site{i}.example.com/docs/"),
                excerpt: format!("excerpt about topic number {i}"),
            })
            .collect()
    }

    fn agent_with(llm: ScriptedLlm, search: StaticSearch, reader: StaticReader) -> ResearchAgent {
        ResearchAgent::new(
            Arc::new(llm),
            Arc::new(search),
            Arc::new(reader),
            Arc::new(HashEmbedder::new(128)),
            ResearchConfig::default(),
        )
        .with_call_policies(CallPolicy::immediate(), CallPolicy::immediate())
        .with_clock(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap())
    }

    #[tokio::test]
    async fn empty_question_is_fatal() {
        let agent = agent_with(
            ScriptedLlm::new(vec![]),
            StaticSearch::empty(),
            StaticReader::new(StdHashMap::new()),
        );
        let err = agent.run("   ").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn trivial_direct_answer_completes_without_search() {
        let llm = ScriptedLlm::new(vec![AgentAction::Answer {
            answer: "4".into(),
            references: vec![],
            think: "arithmetic".into(),
        }]);
        let search = StaticSearch::empty();
        let agent = ResearchAgent::new(
            Arc::new(llm),
            Arc::new(search),
            Arc::new(StaticReader::new(StdHashMap::new())),
            Arc::new(HashEmbedder::new(128)),
            ResearchConfig::default().with_direct_answer(true),
        );

        let outcome = agent.run("What is 2+2?").await.unwrap();
        assert!(outcome.success);
        assert!(outcome.trivial);
        assert_eq!(outcome.answer.as_deref(), Some("4"));
        assert_eq!(outcome.steps, 1);
    }

    #[tokio::test]
    async fn search_populates_store_and_knowledge() {
        let llm = ScriptedLlm::new(vec![
            AgentAction::Search {
                queries: vec![SerpQuery::new("bsd databases")],
                think: "look around".into(),
            },
            AgentAction::Answer {
                answer: "Answer with enough detail to pass everything.".into(),
                references: vec![],
                think: "done".into(),
            },
        ])
        .with_judgments(vec![
            EvaluationJudgment::pass(0.95, "fine"),
            EvaluationJudgment::pass(0.95, "deep"),
        ]);

        let agent = agent_with(
            llm,
            StaticSearch::new(snippets(4)),
            StaticReader::new(StdHashMap::new()),
        );
        let outcome = agent.run("bsd databases").await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.urls_found, 4);
        assert!(outcome.steps >= 2);
    }

    #[tokio::test]
    async fn two_disallowed_actions_enter_beast_mode() {
        // Direct answer off and step 1: answer is disallowed, twice.
        let llm = ScriptedLlm::new(vec![
            AgentAction::Answer {
                answer: "early".into(),
                references: vec![],
                think: "too early".into(),
            },
            AgentAction::Answer {
                answer: "early again".into(),
                references: vec![],
                think: "still too early".into(),
            },
        ])
        .with_forced_answer("forced from knowledge");

        let agent = agent_with(
            llm,
            StaticSearch::empty(),
            StaticReader::new(StdHashMap::new()),
        );
        let outcome = agent.run("hard question").await.unwrap();

        // Beast mode produced the forced answer.
        assert!(outcome.success);
        assert_eq!(outcome.answer.as_deref(), Some("forced from knowledge"));
        assert!(!outcome.trivial);
    }

    #[tokio::test]
    async fn failed_reads_leave_urls_eligible() {
        let mut pages = StdHashMap::new();
        pages.insert(
            "https://site0.example.com/docs/".to_string(),
            "content zero".to_string(),
        );
        pages.insert(
            "https://site1.example.com/docs/".to_string(),
            "content one".to_string(),
        );
        let reader = StaticReader::new(pages).with_failure("https://site2.example.com/docs/");

        let llm = ScriptedLlm::new(vec![
            AgentAction::Search {
                queries: vec![SerpQuery::new("topic")],
                think: "find urls".into(),
            },
            AgentAction::Read {
                urls: vec![
                    "https://site0.example.com/docs/".into(),
                    "https://site1.example.com/docs/".into(),
                    "https://site2.example.com/docs/".into(),
                ],
                think: "read them".into(),
            },
            AgentAction::Answer {
                answer: "Detailed answer drawn from the two readable pages.".into(),
                references: vec![],
                think: "enough".into(),
            },
        ])
        .with_judgments(vec![
            EvaluationJudgment::pass(0.95, "fine"),
            EvaluationJudgment::pass(0.95, "deep"),
        ]);

        let agent = agent_with(llm, StaticSearch::new(snippets(3)), reader);
        let outcome = agent.run("topic").await.unwrap();

        assert!(outcome.success);
        // Two successes marked visited; the timed-out one stays unvisited.
        assert_eq!(outcome.visited_urls.len(), 2);
        assert!(!outcome
            .visited_urls
            .contains(&"https://site2.example.com/docs/".to_string()));
    }

    #[tokio::test]
    async fn reflect_dedup_makes_noop() {
        let llm = ScriptedLlm::new(vec![
            AgentAction::Reflect {
                gap_questions: vec!["what about performance?".into()],
                think: "dig in".into(),
            },
            AgentAction::Reflect {
                gap_questions: vec!["What about performance".into()],
                think: "same gap again".into(),
            },
            AgentAction::Answer {
                answer: "An answer covering performance in depth.".into(),
                references: vec![],
                think: "enough".into(),
            },
        ])
        .with_judgments(vec![
            EvaluationJudgment::pass(0.95, "fine"),
            EvaluationJudgment::pass(0.95, "deep"),
        ]);

        let agent = agent_with(
            llm,
            StaticSearch::empty(),
            StaticReader::new(StdHashMap::new()),
        );
        let outcome = agent.run("how fast is it?").await.unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn budget_exhaustion_forces_beast_mode() {
        // Every decide_action call costs 30% of a tiny budget; after three
        // steps the 85% threshold trips.
        let llm = ScriptedLlm::new(vec![
            AgentAction::Reflect {
                gap_questions: vec!["a?".into()],
                think: "1".into(),
            },
            AgentAction::Reflect {
                gap_questions: vec!["b?".into()],
                think: "2".into(),
            },
            AgentAction::Reflect {
                gap_questions: vec!["c?".into()],
                think: "3".into(),
            },
        ])
        .with_usage(TokenUsage::new(200, 100))
        .with_forced_answer("best effort from partial knowledge");

        let agent = ResearchAgent::new(
            Arc::new(llm),
            Arc::new(StaticSearch::empty()),
            Arc::new(StaticReader::new(StdHashMap::new())),
            Arc::new(HashEmbedder::new(128)),
            ResearchConfig::default().with_budget(1000),
        );

        let outcome = agent.run("unanswerable question").await.unwrap();
        assert!(outcome.success);
        assert_eq!(
            outcome.answer.as_deref(),
            Some("best effort from partial knowledge")
        );
        assert!(outcome.token_usage.total() >= 850);
    }

    #[tokio::test]
    async fn beast_mode_exhaustion_fails() {
        // No forced answer scripted: every beast attempt errors.
        let llm = ScriptedLlm::new(vec![]).with_usage(TokenUsage::new(900, 0));

        let agent = ResearchAgent::new(
            Arc::new(llm),
            Arc::new(StaticSearch::empty()),
            Arc::new(StaticReader::new(StdHashMap::new())),
            Arc::new(HashEmbedder::new(128)),
            ResearchConfig::default().with_budget(100),
        );

        let outcome = agent.run("question").await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn coding_output_becomes_knowledge() {
        let llm = ScriptedLlm::new(vec![
            AgentAction::Coding {
                code: "2+2".into(),
                think: "compute".into(),
            },
            AgentAction::Answer {
                answer: "The computed result is well established.".into(),
                references: vec![],
                think: "done".into(),
            },
        ])
        .with_judgments(vec![
            EvaluationJudgment::pass(0.95, "fine"),
            EvaluationJudgment::pass(0.95, "deep"),
        ]);

        let agent = agent_with(
            llm,
            StaticSearch::empty(),
            StaticReader::new(StdHashMap::new()),
        )
        .with_sandbox(Arc::new(EchoSandbox));

        let config_enabled = ResearchConfig::default().with_coding(true);
        let agent = ResearchAgent {
            config: config_enabled,
            ..agent
        };

        let outcome = agent.run("compute something").await.unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn failed_evaluation_becomes_error_knowledge_then_continues() {
        let llm = ScriptedLlm::new(vec![
            AgentAction::Reflect {
                gap_questions: vec!["warmup".into()],
                think: "start".into(),
            },
            AgentAction::Answer {
                answer: "first shallow attempt".into(),
                references: vec![],
                think: "try".into(),
            },
            AgentAction::Answer {
                answer: "Second attempt with real depth and specifics.".into(),
                references: vec![],
                think: "retry".into(),
            },
        ])
        .with_judgments(vec![
            // First answer: definitive passes, strict rejects
            EvaluationJudgment::pass(0.9, "fine"),
            EvaluationJudgment::fail(0.8, "no depth", vec!["add specifics".into()]),
            // Second answer passes both
            EvaluationJudgment::pass(0.9, "fine"),
            EvaluationJudgment::pass(0.9, "deep now"),
        ]);

        let agent = agent_with(
            llm,
            StaticSearch::empty(),
            StaticReader::new(StdHashMap::new()),
        );
        let outcome = agent.run("a real question").await.unwrap();
        assert!(outcome.success);
        assert_eq!(
            outcome.answer.as_deref(),
            Some("Second attempt with real depth and specifics.")
        );
    }
}
