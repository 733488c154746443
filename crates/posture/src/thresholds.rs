//! Scoring thresholds and baselines for posture evaluation.

use serde::{Deserialize, Serialize};

/// Baselines performance metrics are normalized against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBaselines {
    /// Expected throughput in requests per second
    #[serde(default = "default_throughput")]
    pub throughput: f64,

    /// Expected concurrent requests in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: f64,

    /// Queue depth at which the queue sub-score reaches zero
    #[serde(default = "default_queue_depth")]
    pub queue_depth: f64,

    /// Processing time at which the latency sub-score reaches zero
    #[serde(default = "default_processing_time_ms")]
    pub processing_time_ms: f64,
}

const fn default_throughput() -> f64 {
    100.0
}

const fn default_concurrency() -> f64 {
    50.0
}

const fn default_queue_depth() -> f64 {
    100.0
}

const fn default_processing_time_ms() -> f64 {
    500.0
}

impl Default for PerformanceBaselines {
    fn default() -> Self {
        Self {
            throughput: default_throughput(),
            concurrency: default_concurrency(),
            queue_depth: default_queue_depth(),
            processing_time_ms: default_processing_time_ms(),
        }
    }
}

/// Sub-score bars below which issues are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IssueBars {
    /// Sub-scores below this bar emit a medium-severity issue
    pub emit_below: f64,
    /// Sub-scores below this bar escalate to high severity
    pub high_below: f64,
}

/// All tunable scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringThresholds {
    /// Baselines for performance normalization
    #[serde(default)]
    pub performance: PerformanceBaselines,

    /// Issue bars for the health and performance dimensions
    #[serde(default = "default_operational_issues")]
    pub operational_issues: IssueBars,

    /// Issue bars for the security and compliance dimensions
    #[serde(default = "default_strict_issues")]
    pub strict_issues: IssueBars,

    /// Dimension score at or above which the best tier applies
    #[serde(default = "default_tier_best")]
    pub tier_best: f64,

    /// Dimension score at or above which the middle tier applies
    #[serde(default = "default_tier_middle")]
    pub tier_middle: f64,
}

const fn default_operational_issues() -> IssueBars {
    IssueBars {
        emit_below: 50.0, // alert once a sub-score drops under half
        high_below: 30.0, // escalate when it nears exhaustion
    }
}

const fn default_strict_issues() -> IssueBars {
    IssueBars {
        emit_below: 80.0, // security and compliance alert early
        high_below: 60.0,
    }
}

const fn default_tier_best() -> f64 {
    80.0
}

const fn default_tier_middle() -> f64 {
    60.0
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            performance: PerformanceBaselines::default(),
            operational_issues: default_operational_issues(),
            strict_issues: default_strict_issues(),
            tier_best: default_tier_best(),
            tier_middle: default_tier_middle(),
        }
    }
}
