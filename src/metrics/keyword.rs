// SPDX-License-Identifier: Apache-2.0

//! Keyword matching: folds each delivered line into the metric store under
//! every rule of the owning watch spec.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{AggKind, Config, KeywordRule, WatchSpec};

use super::record::{MetricKey, MetricRecord};
use super::store::MetricStore;

/// Evaluates a watch spec's keyword rules against incoming lines.
///
/// One aggregator exists per tailer, and a tailer is the sole producer for
/// its spec's metric keys, so matches for the same rule always fold in
/// append order.
pub struct KeywordAggregator {
    cfg: Arc<Config>,
    spec: Arc<WatchSpec>,
    store: Arc<MetricStore>,
}

impl KeywordAggregator {
    pub fn new(cfg: Arc<Config>, spec: Arc<WatchSpec>, store: Arc<MetricStore>) -> Self {
        Self { cfg, spec, store }
    }

    /// Evaluate every rule of the spec against `line`.
    pub fn apply_line(&self, line: &str) {
        for rule in &self.spec.keywords {
            self.apply_rule(rule, line);
        }
    }

    fn apply_rule(&self, rule: &KeywordRule, line: &str) {
        let key = MetricKey::new(&self.spec, rule);

        match rule.kind {
            AggKind::Count => {
                // Non-matching lines still touch the record: an interval
                // with traffic but no matches reports zero, not absence.
                let hit = if rule.regex.is_match(line) { 1.0 } else { 0.0 };
                self.store.fold(
                    key,
                    || MetricRecord::gauge(&self.cfg, rule, hit),
                    |r| r.value += hit,
                );
            }
            AggKind::Sum => {
                let Some(v) = self.capture_value(rule, line) else {
                    return;
                };
                self.store.fold(
                    key,
                    || MetricRecord::gauge(&self.cfg, rule, v),
                    |r| r.value += v,
                );
            }
            AggKind::Min => {
                let Some(v) = self.capture_value(rule, line) else {
                    return;
                };
                self.store.fold(
                    key,
                    || MetricRecord::gauge(&self.cfg, rule, v),
                    |r| {
                        // A zero-sample record is a fill-in placeholder; its
                        // 0.0 must not pin the extremum.
                        if r.samples == 0 || v < r.value {
                            r.value = v;
                        }
                        r.samples += 1;
                    },
                );
            }
            AggKind::Max => {
                let Some(v) = self.capture_value(rule, line) else {
                    return;
                };
                self.store.fold(
                    key,
                    || MetricRecord::gauge(&self.cfg, rule, v),
                    |r| {
                        if r.samples == 0 || v > r.value {
                            r.value = v;
                        }
                        r.samples += 1;
                    },
                );
            }
            AggKind::Avg => {
                let Some(v) = self.capture_value(rule, line) else {
                    return;
                };
                self.store.fold(
                    key,
                    || MetricRecord::gauge(&self.cfg, rule, v),
                    |r| {
                        r.value = (r.value * r.samples as f64 + v) / (r.samples as f64 + 1.0);
                        r.samples += 1;
                    },
                );
            }
        }
    }

    /// Extract and parse capture group 1 for a numeric rule. Lines that do
    /// not match, or whose capture does not parse as a float, are skipped.
    fn capture_value(&self, rule: &KeywordRule, line: &str) -> Option<f64> {
        let caps = match rule.regex.captures(line) {
            Some(caps) => caps,
            None => {
                debug!(tag = %rule.tag, "line does not match numeric rule, skipping");
                return None;
            }
        };

        // Group 1 existence is enforced at validation time.
        let matched = caps.get(1)?.as_str();
        match matched.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(
                    tag = %rule.tag,
                    value = matched,
                    "captured value is not a number, skipping line"
                );
                None
            }
        }
    }
}
