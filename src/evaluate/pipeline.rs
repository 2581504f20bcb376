use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;

use super::{
    question_aspects, requested_item_count, EvaluationContext, EvaluationResult, EvaluationType,
    PromptPair,
};
use crate::adapter::LlmContract;
use crate::error::DelveResult;

/// One evaluation dimension. `evaluate` may suspend while awaiting the LLM
/// contract; the deterministic evaluators never do.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn eval_type(&self) -> EvaluationType;

    fn prompt(&self, question: &str, answer: &str) -> PromptPair;

    async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        context: &EvaluationContext,
    ) -> DelveResult<EvaluationResult>;
}

// ─── Definitive ──────────────────────────────────────────────────────────────

const HEDGING_MARKERS: [&str; 8] = [
    "i think",
    "i believe",
    "maybe",
    "perhaps",
    "probably",
    "might be",
    "not sure",
    "it depends",
];

/// Rejects empty and non-committal answers. Always applicable.
pub struct DefinitiveEvaluator {
    llm: Arc<dyn LlmContract>,
}

impl DefinitiveEvaluator {
    pub fn new(llm: Arc<dyn LlmContract>) -> Self {
        Self { llm }
    }

    fn has_hedging(answer: &str) -> bool {
        let lower = answer.to_lowercase();
        HEDGING_MARKERS.iter().any(|m| lower.contains(m))
    }
}

#[async_trait]
impl Evaluator for DefinitiveEvaluator {
    fn eval_type(&self) -> EvaluationType {
        EvaluationType::Definitive
    }

    fn prompt(&self, question: &str, answer: &str) -> PromptPair {
        PromptPair {
            system: "You are an evaluator checking whether an answer is DEFINITIVE. \
                     A definitive answer states facts confidently, avoids habitual hedging \
                     (\"I think\", \"maybe\", \"probably\"), and gives concrete information \
                     rather than vague generalities. Respond with passed, confidence, \
                     reasoning and suggestions."
                .into(),
            user: format!("Question: {question}\n\nAnswer to evaluate:\n{answer}"),
        }
    }

    async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        context: &EvaluationContext,
    ) -> DelveResult<EvaluationResult> {
        if answer.trim().is_empty() {
            return Ok(EvaluationResult::failure(
                EvaluationType::Definitive,
                0.0,
                "empty answer",
                vec!["Provide an actual answer".into()],
            ));
        }

        let judgment = self.llm.judge(&self.prompt(question, answer)).await?;
        if let Some(ledger) = &context.ledger {
            ledger.record("evaluate:definitive", judgment.usage);
        }

        if !judgment.passed {
            return Ok(EvaluationResult::failure(
                EvaluationType::Definitive,
                judgment.confidence,
                judgment.reasoning,
                judgment.suggestions,
            ));
        }
        if Self::has_hedging(answer) && judgment.confidence < 0.7 {
            return Ok(EvaluationResult::failure(
                EvaluationType::Definitive,
                judgment.confidence,
                "answer hedges without the confidence to back it",
                vec!["Remove hedging language or state the uncertainty precisely".into()],
            ));
        }
        Ok(EvaluationResult::success(
            EvaluationType::Definitive,
            judgment.confidence,
            judgment.reasoning,
        ))
    }
}

// ─── Freshness ───────────────────────────────────────────────────────────────

/// Fails when dated information in the answer is older than the
/// topic-derived threshold. Purely deterministic.
pub struct FreshnessEvaluator;

impl FreshnessEvaluator {
    /// Most recent date mentioned in the text. Bare years resolve to
    /// December 31 so a mention of the current year is never stale.
    fn most_recent_date(text: &str) -> Option<NaiveDate> {
        let iso = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap();
        let mut best: Option<NaiveDate> = None;

        for caps in iso.captures_iter(text) {
            let (y, m, d) = (
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            );
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                best = Some(best.map_or(date, |b| b.max(date)));
            }
        }

        let year = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();
        for caps in year.captures_iter(text) {
            let y: i32 = caps[1].parse().ok()?;
            if let Some(date) = NaiveDate::from_ymd_opt(y, 12, 31) {
                best = Some(best.map_or(date, |b| b.max(date)));
            }
        }

        best
    }
}

#[async_trait]
impl Evaluator for FreshnessEvaluator {
    fn eval_type(&self) -> EvaluationType {
        EvaluationType::Freshness
    }

    fn prompt(&self, question: &str, answer: &str) -> PromptPair {
        PromptPair {
            system: "Check whether the answer's dated information is recent enough for \
                     the question's topic. Respond with passed, confidence, reasoning \
                     and the detected date."
                .into(),
            user: format!("Question: {question}\n\nAnswer to evaluate:\n{answer}"),
        }
    }

    async fn evaluate(
        &self,
        _question: &str,
        answer: &str,
        context: &EvaluationContext,
    ) -> DelveResult<EvaluationResult> {
        let Some(threshold) = EvaluationType::freshness_threshold(&context.topic) else {
            return Ok(EvaluationResult::success(
                EvaluationType::Freshness,
                1.0,
                "topic has no staleness bound",
            ));
        };

        let Some(detected) = Self::most_recent_date(answer) else {
            return Ok(EvaluationResult::success(
                EvaluationType::Freshness,
                0.8,
                "no dated information detected",
            ));
        };

        let age = context.current_date.signed_duration_since(detected);
        let age_secs = age.num_seconds().max(0) as u64;
        if age_secs > threshold.as_secs() {
            let days = age_secs / 86_400;
            return Ok(EvaluationResult::failure(
                EvaluationType::Freshness,
                0.9,
                format!("most recent dated information is {days} days old, beyond the topic threshold"),
                vec!["Search for more recent sources".into()],
            ));
        }

        Ok(EvaluationResult::success(
            EvaluationType::Freshness,
            0.9,
            "dated information is within the topic threshold",
        ))
    }
}

// ─── Plurality ───────────────────────────────────────────────────────────────

/// When the question asks for N items, the answer must present at least N
/// distinct items. Purely deterministic.
pub struct PluralityEvaluator;

impl PluralityEvaluator {
    /// Count distinct items: numbered/bulleted lines first, then the
    /// longest comma enumeration as a fallback.
    pub fn count_items(answer: &str) -> usize {
        let marker = Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+\S").unwrap();
        let listed = answer.lines().filter(|line| marker.is_match(line)).count();
        if listed > 0 {
            return listed;
        }

        answer
            .split(['.', '\n'])
            .map(|sentence| {
                let normalized = sentence.replace(", and ", ", ").replace(" and ", ", ");
                normalized
                    .split(',')
                    .filter(|part| !part.trim().is_empty())
                    .count()
            })
            .max()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Evaluator for PluralityEvaluator {
    fn eval_type(&self) -> EvaluationType {
        EvaluationType::Plurality
    }

    fn prompt(&self, question: &str, answer: &str) -> PromptPair {
        PromptPair {
            system: "Count the distinct items in the answer and compare against the \
                     number the question asks for. Respond with passed, item_count and \
                     expected_count."
                .into(),
            user: format!("Question: {question}\n\nAnswer to evaluate:\n{answer}"),
        }
    }

    async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        _context: &EvaluationContext,
    ) -> DelveResult<EvaluationResult> {
        let Some(expected) = requested_item_count(question) else {
            return Ok(EvaluationResult::success(
                EvaluationType::Plurality,
                1.0,
                "question does not request a specific count",
            ));
        };

        let found = Self::count_items(answer);
        if found < expected {
            return Ok(EvaluationResult::failure(
                EvaluationType::Plurality,
                0.9,
                format!("answer presents {found} items but the question asks for {expected}"),
                vec![format!(
                    "Add {} more distinct items",
                    expected - found
                )],
            ));
        }

        Ok(EvaluationResult::success(
            EvaluationType::Plurality,
            0.9,
            format!("answer presents {found} items, {expected} required"),
        ))
    }
}

// ─── Completeness ────────────────────────────────────────────────────────────

/// When the question decomposes into multiple aspects, coverage must reach
/// 0.8. Purely deterministic.
pub struct CompletenessEvaluator;

impl CompletenessEvaluator {
    const COVERAGE_THRESHOLD: f32 = 0.8;

    fn aspect_covered(aspect: &str, answer_lower: &str) -> bool {
        aspect
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .any(|word| {
                let clean = word
                    .to_lowercase()
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_string();
                !clean.is_empty() && answer_lower.contains(&clean)
            })
    }
}

#[async_trait]
impl Evaluator for CompletenessEvaluator {
    fn eval_type(&self) -> EvaluationType {
        EvaluationType::Completeness
    }

    fn prompt(&self, question: &str, answer: &str) -> PromptPair {
        PromptPair {
            system: "Identify the aspects of the question and check whether each is \
                     addressed. Respond with passed, aspects_found, aspects_covered and \
                     coverage_ratio."
                .into(),
            user: format!("Question: {question}\n\nAnswer to evaluate:\n{answer}"),
        }
    }

    async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        _context: &EvaluationContext,
    ) -> DelveResult<EvaluationResult> {
        let aspects = question_aspects(question);
        if aspects.len() < 2 {
            return Ok(EvaluationResult::success(
                EvaluationType::Completeness,
                1.0,
                "question has a single aspect",
            ));
        }

        let answer_lower = answer.to_lowercase();
        let missing: Vec<&String> = aspects
            .iter()
            .filter(|a| !Self::aspect_covered(a, &answer_lower))
            .collect();
        let coverage = 1.0 - missing.len() as f32 / aspects.len() as f32;

        if coverage < Self::COVERAGE_THRESHOLD {
            return Ok(EvaluationResult::failure(
                EvaluationType::Completeness,
                0.85,
                format!(
                    "coverage {:.0}% below the 80% requirement",
                    coverage * 100.0
                ),
                missing
                    .iter()
                    .map(|a| format!("Address: {a}"))
                    .collect(),
            ));
        }

        Ok(EvaluationResult::success(
            EvaluationType::Completeness,
            0.85,
            format!("coverage {:.0}%", coverage * 100.0),
        ))
    }
}

// ─── Strict ──────────────────────────────────────────────────────────────────

/// Bias-to-reject check of depth, specificity and insight. The pipeline
/// only runs it for answers targeting the original question.
pub struct StrictEvaluator {
    llm: Arc<dyn LlmContract>,
}

impl StrictEvaluator {
    pub fn new(llm: Arc<dyn LlmContract>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Evaluator for StrictEvaluator {
    fn eval_type(&self) -> EvaluationType {
        EvaluationType::Strict
    }

    fn prompt(&self, question: &str, answer: &str) -> PromptPair {
        PromptPair {
            system: "You are a brutal evaluator whose job is to REJECT mediocre answers. \
                     Pass an answer only if it shows depth beyond surface information, \
                     non-obvious insight, and concrete specifics. If the answer is merely \
                     good enough, it fails. Respond with passed, confidence, reasoning \
                     and specific improvement suggestions."
                .into(),
            user: format!("Question: {question}\n\nAnswer to evaluate:\n{answer}"),
        }
    }

    async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        context: &EvaluationContext,
    ) -> DelveResult<EvaluationResult> {
        let judgment = self.llm.judge(&self.prompt(question, answer)).await?;
        if let Some(ledger) = &context.ledger {
            ledger.record("evaluate:strict", judgment.usage);
        }

        if judgment.passed {
            Ok(EvaluationResult::success(
                EvaluationType::Strict,
                judgment.confidence,
                judgment.reasoning,
            ))
        } else {
            Ok(EvaluationResult::failure(
                EvaluationType::Strict,
                judgment.confidence,
                judgment.reasoning,
                judgment.suggestions,
            ))
        }
    }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Outcome of a full pipeline run.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub overall_passed: bool,
    pub results: Vec<EvaluationResult>,
    pub failed_at: Option<EvaluationType>,
}

impl PipelineOutcome {
    /// The failing result, when the pipeline rejected the answer.
    pub fn failure(&self) -> Option<&EvaluationResult> {
        self.results.last().filter(|r| !r.passed)
    }
}

/// Ordered fail-fast evaluation pipeline.
pub struct EvaluationPipeline {
    evaluators: Vec<Box<dyn Evaluator>>,
}

impl EvaluationPipeline {
    /// Standard pipeline with all five evaluators in canonical order.
    pub fn new(llm: Arc<dyn LlmContract>) -> Self {
        Self {
            evaluators: vec![
                Box::new(DefinitiveEvaluator::new(llm.clone())),
                Box::new(FreshnessEvaluator),
                Box::new(PluralityEvaluator),
                Box::new(CompletenessEvaluator),
                Box::new(StrictEvaluator::new(llm)),
            ],
        }
    }

    /// Run the required evaluators in canonical order, returning on the
    /// first failure. Strict is skipped unless the answer targets the
    /// original question. An evaluator error counts as a failure of that
    /// evaluator.
    pub async fn evaluate_sequential(
        &self,
        question: &str,
        answer: &str,
        context: &EvaluationContext,
        required_types: &[EvaluationType],
    ) -> PipelineOutcome {
        let mut results = Vec::new();

        for evaluator in &self.evaluators {
            let eval_type = evaluator.eval_type();
            if !required_types.contains(&eval_type) {
                continue;
            }
            if eval_type == EvaluationType::Strict && !context.question_is_original {
                continue;
            }

            let start = Instant::now();
            let result = match evaluator.evaluate(question, answer, context).await {
                Ok(result) => result.with_duration(start.elapsed()),
                Err(e) => EvaluationResult::failure(
                    eval_type,
                    0.0,
                    format!("evaluation error: {e}"),
                    vec!["Retry the evaluation".into()],
                )
                .with_duration(start.elapsed()),
            };

            let passed = result.passed;
            results.push(result);
            if !passed {
                return PipelineOutcome {
                    overall_passed: false,
                    results,
                    failed_at: Some(eval_type),
                };
            }
        }

        PipelineOutcome {
            overall_passed: true,
            results,
            failed_at: None,
        }
    }
}
