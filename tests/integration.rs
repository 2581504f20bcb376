//! End-to-end runs of the research loop against in-memory contracts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::mpsc;

use delve_core::adapter::{
    CallPolicy, HashEmbedder, ScriptedLlm, SearchSnippet, StaticReader, StaticSearch,
};
use delve_core::agent::{AgentAction, ResearchAgent};
use delve_core::config::ResearchConfig;
use delve_core::evaluate::EvaluationJudgment;
use delve_core::event::{ChannelSink, EventBus, ProgressEvent};
use delve_core::persona::{CognitivePersona, PersonaOrchestrator, PersonaRegistry, QueryContext};
use delve_core::types::{Reference, SerpQuery, TokenUsage};

/// Persona that passes queries through unchanged, so tests control the
/// exact strings reaching the dedup gate and the search provider.
struct EchoPersona;

impl CognitivePersona for EchoPersona {
    fn name(&self) -> &str {
        "Echo"
    }
    fn focus(&self) -> &str {
        "verbatim passthrough for tests"
    }
    fn expand(&self, original: &str, _ctx: &QueryContext) -> SerpQuery {
        SerpQuery::new(original)
    }
}

fn echo_orchestrator() -> PersonaOrchestrator {
    let mut registry = PersonaRegistry::new();
    registry.register(Arc::new(EchoPersona)).unwrap();
    PersonaOrchestrator::new(registry)
}

fn db_snippets(n: usize) -> Vec<SearchSnippet> {
    (0..n)
        .map(|i| SearchSnippet {
            title: format!("Database {i}"),
            url: format!("https://db{i}.example.com/"),
            excerpt: format!("an open source database engine number {i}"),
        })
        .collect()
}

fn fixed_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
}

fn collect_events(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// Scenario: a trivial question answered directly on step one, with no
// search or read and without the strict evaluator.
#[tokio::test]
async fn trivial_direct_answer() {
    let llm = ScriptedLlm::new(vec![AgentAction::Answer {
        answer: "4".into(),
        references: vec![],
        think: "arithmetic needs no research".into(),
    }]);
    let search = Arc::new(StaticSearch::empty());

    let agent = ResearchAgent::new(
        Arc::new(llm),
        search.clone(),
        Arc::new(StaticReader::new(HashMap::new())),
        Arc::new(HashEmbedder::default()),
        ResearchConfig::new()
            .with_budget(1_000_000)
            .with_direct_answer(true),
    );

    let outcome = agent.run("What is 2+2?").await.unwrap();

    assert!(outcome.success);
    assert!(outcome.trivial);
    assert_eq!(outcome.answer.as_deref(), Some("4"));
    assert_eq!(outcome.steps, 1);
    assert_eq!(search.call_count(), 0);
    assert!(outcome.visited_urls.is_empty());
}

// Scenario: the first answer offers 3 of the requested 5 items and is
// rejected by plurality; the second offers 5 and completes with exactly
// the five visited URLs as references.
#[tokio::test]
async fn plurality_failure_then_success() {
    let question = "List 5 open-source BSD-licensed databases.";
    let urls: Vec<String> = (0..5).map(|i| format!("https://db{i}.example.com/")).collect();
    let pages: HashMap<String, String> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| (url.clone(), format!("details about database {i}")))
        .collect();

    let final_refs: Vec<Reference> = urls
        .iter()
        .map(|url| Reference::new("supporting excerpt", url))
        .collect();

    let llm = ScriptedLlm::new(vec![
        AgentAction::Search {
            queries: vec![SerpQuery::new("bsd licensed databases")],
            think: "find candidates".into(),
        },
        AgentAction::Read {
            urls: urls.clone(),
            think: "verify licenses".into(),
        },
        AgentAction::Answer {
            answer: "1. SQLite\n2. PostgreSQL\n3. DuckDB".into(),
            references: vec![],
            think: "first attempt".into(),
        },
        AgentAction::Answer {
            answer: "1. SQLite\n2. PostgreSQL\n3. DuckDB\n4. Firebird\n5. LMDB".into(),
            references: final_refs,
            think: "all five now".into(),
        },
    ])
    .with_judgments(vec![
        // First answer: definitive passes, then plurality fails locally
        EvaluationJudgment::pass(0.9, "states facts plainly"),
        // Second answer: definitive and strict pass
        EvaluationJudgment::pass(0.9, "states facts plainly"),
        EvaluationJudgment::pass(0.85, "specific and grounded"),
    ]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let bus = EventBus::new();
    bus.attach(Arc::new(ChannelSink::new(tx)));

    let agent = ResearchAgent::new(
        Arc::new(llm),
        Arc::new(StaticSearch::new(db_snippets(7))),
        Arc::new(StaticReader::new(pages)),
        Arc::new(HashEmbedder::default()),
        ResearchConfig::default(),
    )
    .with_bus(bus)
    .with_orchestrator(echo_orchestrator())
    .with_clock(fixed_date())
    .with_call_policies(CallPolicy::immediate(), CallPolicy::immediate());

    let outcome = agent.run(question).await.unwrap();

    assert!(outcome.success);
    assert!(!outcome.trivial);
    assert_eq!(outcome.urls_found, 7);
    assert_eq!(outcome.visited_urls.len(), 5);
    assert_eq!(outcome.references.len(), 5);
    let ref_urls: Vec<&str> = outcome
        .references
        .iter()
        .map(|r| r.source_url.as_str())
        .collect();
    for url in &urls {
        assert!(ref_urls.contains(&url.as_str()), "missing reference {url}");
    }

    // The plurality rejection is visible in the event stream.
    let events = collect_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::ValidationEnd {
            overall_passed: false,
            failed_at: Some(t),
        } if t == "plurality"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::ValidationEnd {
            overall_passed: true,
            ..
        }
    )));
}

// Scenario: a small budget burns to 85% and the run is finished by beast
// mode with no further searching.
#[tokio::test]
async fn budget_exhaustion_triggers_beast_mode() {
    let llm = ScriptedLlm::new(vec![
        AgentAction::Reflect {
            gap_questions: vec!["aspect one?".into()],
            think: "expand".into(),
        },
        AgentAction::Reflect {
            gap_questions: vec!["aspect two?".into()],
            think: "expand more".into(),
        },
        AgentAction::Reflect {
            gap_questions: vec!["aspect three?".into()],
            think: "keep going".into(),
        },
    ])
    .with_usage(TokenUsage::new(20_000, 10_000))
    .with_forced_answer("Synthesis of what was gathered before the budget ran out.");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let bus = EventBus::new();
    bus.attach(Arc::new(ChannelSink::new(tx)));

    let search = Arc::new(StaticSearch::empty());
    let agent = ResearchAgent::new(
        Arc::new(llm),
        search.clone(),
        Arc::new(StaticReader::new(HashMap::new())),
        Arc::new(HashEmbedder::default()),
        ResearchConfig::new().with_budget(100_000),
    )
    .with_bus(bus);

    let outcome = agent.run("a question strict never accepts").await.unwrap();

    assert!(outcome.success);
    assert_eq!(
        outcome.answer.as_deref(),
        Some("Synthesis of what was gathered before the budget ran out.")
    );
    assert_eq!(search.call_count(), 0);
    assert!(outcome.token_usage.total() >= 85_000);

    let events = collect_events(&mut rx);
    assert!(events.iter().any(
        |e| matches!(e, ProgressEvent::Warning(m) if m.contains("beast mode"))
    ));
}

// Scenario: two queries that differ only in stop-words; the dedup gate
// lets one search through and reports the other as removed.
#[tokio::test]
async fn dedup_drops_near_duplicate_queries() {
    let llm = ScriptedLlm::new(vec![
        AgentAction::Search {
            queries: vec![
                SerpQuery::new("rust web frameworks comparison"),
                SerpQuery::new("the rust web frameworks comparison"),
            ],
            think: "two phrasings".into(),
        },
        AgentAction::Answer {
            answer: "A grounded comparison of rust web frameworks.".into(),
            references: vec![],
            think: "enough".into(),
        },
    ])
    .with_judgments(vec![
        EvaluationJudgment::pass(0.9, "plain"),
        EvaluationJudgment::pass(0.85, "specific"),
    ]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let bus = EventBus::new();
    bus.attach(Arc::new(ChannelSink::new(tx)));

    let search = Arc::new(StaticSearch::new(db_snippets(2)));
    let agent = ResearchAgent::new(
        Arc::new(llm),
        search.clone(),
        Arc::new(StaticReader::new(HashMap::new())),
        Arc::new(HashEmbedder::default()),
        ResearchConfig::default(),
    )
    .with_bus(bus)
    .with_orchestrator(echo_orchestrator())
    .with_clock(fixed_date())
    .with_call_policies(CallPolicy::immediate(), CallPolicy::immediate());

    let outcome = agent.run("rust web frameworks").await.unwrap();

    assert!(outcome.success);
    // Only one search reached the provider.
    assert_eq!(search.call_count(), 1);

    let events = collect_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Dedup {
            removed_count: 1,
            unique_count: 1,
            ..
        }
    )));
}

// Scenario: of three URLs selected for reading, one times out; the two
// successes are marked visited, the failure stays unvisited and readable
// later.
#[tokio::test]
async fn failed_read_leaves_url_eligible() {
    let urls: Vec<String> = (0..3).map(|i| format!("https://db{i}.example.com/")).collect();
    let mut pages = HashMap::new();
    pages.insert(urls[0].clone(), "content zero".to_string());
    pages.insert(urls[1].clone(), "content one".to_string());
    let reader = StaticReader::new(pages).with_failure(urls[2].clone());

    let llm = ScriptedLlm::new(vec![
        AgentAction::Search {
            queries: vec![SerpQuery::new("databases")],
            think: "collect urls".into(),
        },
        AgentAction::Read {
            urls: urls.clone(),
            think: "read all three".into(),
        },
        AgentAction::Answer {
            answer: "Grounded in the two pages that loaded.".into(),
            references: vec![],
            think: "enough".into(),
        },
    ])
    .with_judgments(vec![
        EvaluationJudgment::pass(0.9, "plain"),
        EvaluationJudgment::pass(0.85, "specific"),
    ]);

    let agent = ResearchAgent::new(
        Arc::new(llm),
        Arc::new(StaticSearch::new(db_snippets(3))),
        Arc::new(reader),
        Arc::new(HashEmbedder::default()),
        ResearchConfig::default(),
    )
    .with_orchestrator(echo_orchestrator())
    .with_clock(fixed_date())
    .with_call_policies(CallPolicy::immediate(), CallPolicy::immediate());

    let outcome = agent.run("databases").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.visited_urls.len(), 2);
    assert!(!outcome.visited_urls.contains(&urls[2]));
}

// Scenario: the store fills to 50 URLs, search becomes disallowed, and
// two insistent search actions in one step force beast mode.
#[tokio::test]
async fn search_disabled_at_url_cap_forces_beast_mode() {
    let llm = ScriptedLlm::new(vec![
        AgentAction::Search {
            queries: vec![SerpQuery::new("wide net")],
            think: "gather everything".into(),
        },
        // Both of these are disallowed once 50 URLs are known.
        AgentAction::Search {
            queries: vec![SerpQuery::new("even more")],
            think: "more".into(),
        },
        AgentAction::Search {
            queries: vec![SerpQuery::new("still more")],
            think: "more again".into(),
        },
    ])
    .with_forced_answer("Answer assembled from the fifty collected sources.");

    let search = Arc::new(StaticSearch::new(db_snippets(50)));
    let agent = ResearchAgent::new(
        Arc::new(llm),
        search.clone(),
        Arc::new(StaticReader::new(HashMap::new())),
        Arc::new(HashEmbedder::default()),
        ResearchConfig::default(),
    )
    .with_orchestrator(echo_orchestrator())
    .with_clock(fixed_date())
    .with_call_policies(CallPolicy::immediate(), CallPolicy::immediate());

    let outcome = agent.run("everything about databases").await.unwrap();

    assert!(outcome.success);
    assert_eq!(
        outcome.answer.as_deref(),
        Some("Answer assembled from the fifty collected sources.")
    );
    assert_eq!(outcome.urls_found, 50);
    // Only the first search action reached the provider.
    assert_eq!(search.call_count(), 1);
}

// A gap-reflection question is evaluated without the strict gate, so a
// workmanlike answer to a sub-question can complete the rotation.
#[tokio::test]
async fn full_rotation_with_gap_questions() {
    let llm = ScriptedLlm::new(vec![
        AgentAction::Reflect {
            gap_questions: vec!["what about replication?".into()],
            think: "find the gaps".into(),
        },
        AgentAction::Search {
            queries: vec![SerpQuery::new("database replication")],
            think: "fill the gap".into(),
        },
        AgentAction::Answer {
            answer: "Replication copies committed writes to follower nodes.".into(),
            references: vec![],
            think: "answer the original".into(),
        },
    ])
    .with_judgments(vec![
        EvaluationJudgment::pass(0.9, "plain"),
        EvaluationJudgment::pass(0.85, "specific"),
    ]);

    let agent = ResearchAgent::new(
        Arc::new(llm),
        Arc::new(StaticSearch::new(db_snippets(2))),
        Arc::new(StaticReader::new(HashMap::new())),
        Arc::new(HashEmbedder::default()),
        ResearchConfig::default(),
    )
    .with_orchestrator(echo_orchestrator())
    .with_clock(fixed_date())
    .with_call_policies(CallPolicy::immediate(), CallPolicy::immediate());

    let outcome = agent.run("how do databases replicate?").await.unwrap();
    assert!(outcome.success);
    assert!(outcome.steps >= 3);
}
