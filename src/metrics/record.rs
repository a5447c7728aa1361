// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::{Config, KeywordRule, WatchSpec};

/// Identity under which one rule's aggregate accumulates.
///
/// Built from the watch spec's root path and filename pattern rather than the
/// resolved file, so rotation mid-interval keeps folding into the same
/// record. Distinct specs with colliding rule tags stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub path: String,
    pub pattern: String,
    pub tag: String,
}

impl MetricKey {
    pub fn new(spec: &WatchSpec, rule: &KeywordRule) -> Self {
        Self {
            path: spec.path.display().to_string(),
            pattern: spec.pattern.clone(),
            tag: rule.tag.clone(),
        }
    }
}

/// One reading in the agent push schema. Every record is a gauge: the agent
/// stores the reported value as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub metric: String,
    pub endpoint: String,
    /// Unix seconds at record creation.
    pub timestamp: i64,
    pub value: f64,
    /// Reporting period in seconds.
    pub step: u64,
    #[serde(rename = "counterType")]
    pub counter_type: &'static str,
    /// Comma-joined key=value pairs.
    pub tags: String,
    /// Matches folded so far; drives the running mean for `avg`. Zero marks
    /// a fill-in record that has not yet absorbed a real match.
    #[serde(skip)]
    pub samples: u64,
}

impl MetricRecord {
    /// A record seeded with `value` from a real match, stamped with the
    /// current time.
    pub fn gauge(cfg: &Config, rule: &KeywordRule, value: f64) -> Self {
        Self {
            metric: cfg.metric.clone(),
            endpoint: cfg.host.clone(),
            timestamp: unix_now(),
            value,
            step: cfg.timer,
            counter_type: "GAUGE",
            tags: format!("tag={},exp={}", rule.tag, rule.fixed_exp),
            samples: 1,
        }
    }

    /// A zero reading for an interval where `rule` saw no traffic. Carries
    /// no samples, so a match folding in before the drain still seeds the
    /// aggregate instead of averaging against the placeholder.
    pub fn zero(cfg: &Config, rule: &KeywordRule) -> Self {
        Self {
            samples: 0,
            ..Self::gauge(cfg, rule, 0.0)
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
