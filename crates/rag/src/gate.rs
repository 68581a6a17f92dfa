use citerag_core::GateConfig;
use serde::Serialize;

use crate::retriever::RetrievalMetrics;

pub const ABSTAIN_TEXT: &str =
    "I don't have enough information to answer from the provided document.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Proceed,
    Abstain(AbstainReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstainReason {
    WeakBestMatch,
    WeakTopMatches,
}

impl GateDecision {
    pub fn is_abstain(&self) -> bool {
        matches!(self, GateDecision::Abstain(_))
    }
}

/// Abstains when the best match or the mean of the top three falls below
/// its threshold. Pure; touches nothing outside its arguments.
pub fn evaluate(metrics: &RetrievalMetrics, config: &GateConfig) -> GateDecision {
    if metrics.max_sim < config.sim_threshold_max {
        GateDecision::Abstain(AbstainReason::WeakBestMatch)
    } else if metrics.avg_top3 < config.sim_threshold_avg {
        GateDecision::Abstain(AbstainReason::WeakTopMatches)
    } else {
        GateDecision::Proceed
    }
}
