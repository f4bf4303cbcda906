//! # Default Stages
//!
//! Deterministic default implementations of the four core stages. They use
//! simple lexical heuristics so the pipeline is usable out of the box; real
//! deployments register their own implementations under the same ids.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{QualityReport, Stage, StageContext, StageId, StageInput, StageOutput, StageRegistry};
use crate::error::{OrchestratorResult, StageError};
use crate::models::{Dependency, DependencyStrength, ResourceUsage};

const MAX_MESSAGE_CHARS: usize = 8_000;

const INJECTION_MARKERS: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous",
    "disregard the system prompt",
    "you are now",
    "pretend to be",
];

const HEDGE_MARKERS: &[&str] = &["i think", "probably", "i believe", "as an ai", "i'm not sure"];

const ABSOLUTE_MARKERS: &[&str] = &["always", "never", "guaranteed", "100%", "definitely"];

/// Register the four core stages with their default dependency edges
pub fn register_defaults(registry: &mut StageRegistry) -> OrchestratorResult<()> {
    registry.register(Arc::new(InputValidationStage))?;
    registry.register(Arc::new(ContextAssemblyStage))?;
    registry.register(Arc::new(ResponseValidationStage))?;
    registry.register(Arc::new(FeedbackLearningStage::default()))?;
    Ok(())
}

fn text_field<'a>(payload: &'a Value, field: &str) -> Result<&'a str, StageError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| StageError::InvalidInput(format!("payload field '{field}' is missing or empty")))
}

fn markers_in(text: &str, markers: &[&str]) -> Vec<String> {
    let lowered = text.to_lowercase();
    markers
        .iter()
        .filter(|marker| lowered.contains(*marker))
        .map(|marker| marker.to_string())
        .collect()
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > 3)
        .map(str::to_lowercase)
        .collect()
}

fn usage_for(text_len: usize) -> ResourceUsage {
    ResourceUsage {
        cpu_ms: (text_len / 1_000) as u64,
        memory_kb: (text_len / 512) as u64 + 1,
        cost_units: text_len as f64 / 1_000.0,
    }
}

/// Checks the user message for emptiness, size and prompt-injection markers
#[derive(Debug, Default)]
pub struct InputValidationStage;

#[async_trait]
impl Stage for InputValidationStage {
    fn id(&self) -> StageId {
        StageId::INPUT_VALIDATION
    }

    fn name(&self) -> &str {
        "input_validation"
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn run(&self, _ctx: &StageContext, input: &StageInput) -> Result<StageOutput, StageError> {
        let message = text_field(&input.payload, "message")?;

        let mut flags = markers_in(message, INJECTION_MARKERS);
        if message.chars().count() > MAX_MESSAGE_CHARS {
            flags.push("too_long".to_string());
        }

        let quality = 1.0 - 0.25 * flags.len() as f64;
        Ok(StageOutput::new(
            json!({
                "message": message,
                "message_length": message.chars().count(),
                "flags": flags,
            }),
            QualityReport::new(quality, quality).with_resource_usage(usage_for(message.len())),
        ))
    }
}

/// Collects the system, environment and user context sections
#[derive(Debug, Default)]
pub struct ContextAssemblyStage;

#[async_trait]
impl Stage for ContextAssemblyStage {
    fn id(&self) -> StageId {
        StageId::CONTEXT_ASSEMBLY
    }

    fn name(&self) -> &str {
        "context_assembly"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::new(
            self.id(),
            [StageId::INPUT_VALIDATION],
            DependencyStrength::Strong,
            true,
        )]
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn run(&self, _ctx: &StageContext, input: &StageInput) -> Result<StageOutput, StageError> {
        let sections = [
            ("system", &input.context.system),
            ("environment", &input.context.environment),
            ("user", &input.context.user),
        ];

        let is_present = |value: &Value| match value {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            Value::String(text) => !text.is_empty(),
            _ => true,
        };

        let (present, missing): (Vec<_>, Vec<_>) =
            sections.iter().partition(|(_, value)| is_present(*value));
        let coverage = present.len() as f64 / sections.len() as f64;

        let message = input
            .upstream(StageId::INPUT_VALIDATION)
            .and_then(|output| output.get("message"))
            .cloned()
            .unwrap_or(Value::Null);

        let assembled: serde_json::Map<String, Value> = present
            .iter()
            .map(|(name, value)| (name.to_string(), (*value).clone()))
            .collect();

        Ok(StageOutput::new(
            json!({
                "sections": present.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
                "missing": missing.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
                "message": message,
                "context": assembled,
            }),
            QualityReport::new(coverage, 1.0),
        ))
    }
}

/// Scores a draft response for grounding in the message and for risky phrasing
#[derive(Debug, Default)]
pub struct ResponseValidationStage;

#[async_trait]
impl Stage for ResponseValidationStage {
    fn id(&self) -> StageId {
        StageId::RESPONSE_VALIDATION
    }

    fn name(&self) -> &str {
        "response_validation"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::new(
            self.id(),
            [StageId::CONTEXT_ASSEMBLY],
            DependencyStrength::Critical,
            true,
        )]
    }

    async fn run(&self, ctx: &StageContext, input: &StageInput) -> Result<StageOutput, StageError> {
        let response = text_field(&input.payload, "response")?;

        let message = input
            .upstream(StageId::CONTEXT_ASSEMBLY)
            .and_then(|output| output.get("message"))
            .and_then(Value::as_str)
            .or_else(|| input.payload.get("message").and_then(Value::as_str))
            .unwrap_or_default();

        let message_keywords = keywords(message);
        let grounding = if message_keywords.is_empty() {
            0.5
        } else {
            let response_keywords = keywords(response);
            message_keywords.intersection(&response_keywords).count() as f64
                / message_keywords.len() as f64
        };

        let hedges = markers_in(response, HEDGE_MARKERS);
        let absolutes = markers_in(response, ABSOLUTE_MARKERS);
        let penalty = 0.1 * hedges.len() as f64 + 0.15 * absolutes.len() as f64;

        let quality = (0.5 * grounding + 0.5 * (1.0 - penalty)).clamp(0.0, 1.0);
        let accuracy = (1.0 - 0.15 * absolutes.len() as f64).clamp(0.0, 1.0);
        let passed = quality >= ctx.validation_strictness;

        Ok(StageOutput::new(
            json!({
                "passed": passed,
                "quality": quality,
                "grounding": grounding,
                "hedges": hedges,
                "absolutes": absolutes,
                "strictness": ctx.validation_strictness,
            }),
            QualityReport::new(quality, accuracy).with_resource_usage(usage_for(response.len())),
        ))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FeedbackStats {
    observations: u64,
    cumulative_quality: f64,
}

/// Accumulates validated response quality across requests
#[derive(Debug, Default)]
pub struct FeedbackLearningStage {
    stats: Mutex<FeedbackStats>,
}

impl FeedbackLearningStage {
    pub fn observations(&self) -> u64 {
        self.stats.lock().observations
    }
}

#[async_trait]
impl Stage for FeedbackLearningStage {
    fn id(&self) -> StageId {
        StageId::FEEDBACK_LEARNING
    }

    fn name(&self) -> &str {
        "feedback_learning"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::new(
            self.id(),
            [StageId::RESPONSE_VALIDATION],
            DependencyStrength::Weak,
            false,
        )]
    }

    async fn run(&self, _ctx: &StageContext, input: &StageInput) -> Result<StageOutput, StageError> {
        let observed = input
            .upstream(StageId::RESPONSE_VALIDATION)
            .and_then(|output| output.get("quality"))
            .and_then(Value::as_f64);

        let stats = {
            let mut stats = self.stats.lock();
            if let Some(quality) = observed {
                stats.observations += 1;
                stats.cumulative_quality += quality;
            }
            *stats
        };

        let mean = if stats.observations > 0 {
            Some(stats.cumulative_quality / stats.observations as f64)
        } else {
            None
        };

        Ok(StageOutput::new(
            json!({
                "recorded": observed.is_some(),
                "observations": stats.observations,
                "mean_observed_quality": mean,
            }),
            QualityReport::new(1.0, 1.0),
        ))
    }
}
