//! Threshold monitoring with an edge-triggered alert ledger
//!
//! Only points handed over at admission time are evaluated; the buffer is
//! never re-scanned. The ledger remembers which `(point_key, metric)` pairs
//! already fired and is pruned together with the window, so it stays bounded
//! by the buffer size.

use super::error::EngineError;
use super::types::{Alert, Direction, Point};
use super::windows::WindowBuffer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

fn default_enabled() -> bool {
    true
}

/// Accepted range for one metric; values outside `[min, max]` alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub metric_key: String,
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ThresholdRule {
    pub fn new(metric_key: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            metric_key: metric_key.into(),
            min,
            max,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn check(&self, value: f64) -> Option<(Direction, f64)> {
        if value < self.min {
            Some((Direction::Below, self.min))
        } else if value > self.max {
            Some((Direction::Above, self.max))
        } else {
            None
        }
    }
}

/// Rules plus a global switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub rules: Vec<ThresholdRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self {
            enabled: true,
            rules,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Every enabled rule needs finite bounds with `min < max`
    pub fn validate(&self) -> Result<(), EngineError> {
        for rule in self.rules.iter().filter(|r| r.enabled) {
            if !rule.min.is_finite() || !rule.max.is_finite() {
                return Err(EngineError::InvalidConfig(format!(
                    "rule for '{}' has non-finite bounds",
                    rule.metric_key
                )));
            }
            if rule.min >= rule.max {
                return Err(EngineError::InvalidConfig(format!(
                    "rule for '{}' has min {} >= max {}",
                    rule.metric_key, rule.min, rule.max
                )));
            }
        }
        Ok(())
    }

    fn active(&self) -> impl Iterator<Item = &ThresholdRule> {
        let enabled = self.enabled;
        self.rules.iter().filter(move |r| enabled && r.enabled)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Ledger entry for one buffered point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub point_key: String,
    pub flagged_metrics: BTreeSet<String>,
    /// Age reference; the point's own timestamp so pruning tracks eviction
    pub admitted_at_ms: i64,
}

#[derive(Debug, Default)]
pub struct ThresholdMonitor {
    rules: RuleSet,
    ledger: HashMap<String, NotificationRecord>,
}

impl ThresholdMonitor {
    pub fn new(rules: RuleSet) -> Result<Self, EngineError> {
        rules.validate()?;
        Ok(Self {
            rules,
            ledger: HashMap::new(),
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Replace the rule set wholesale
    ///
    /// Returns `Ok(true)` when the rules changed (ledger cleared) and
    /// `Ok(false)` when they were identical. On error nothing changes.
    pub fn set_thresholds(&mut self, rules: RuleSet) -> Result<bool, EngineError> {
        rules.validate()?;
        if rules == self.rules {
            return Ok(false);
        }
        self.rules = rules;
        self.ledger.clear();
        Ok(true)
    }

    /// Evaluate newly admitted points; returns one alert per new
    /// `(point_key, metric)` violation
    pub fn evaluate_incremental(&mut self, points: &[Point], cutoff_ms: i64) -> Vec<Alert> {
        self.prune_older_than(cutoff_ms);

        let mut alerts = Vec::new();
        for point in points {
            for rule in self.rules.active() {
                let Some(value) = point.metric(&rule.metric_key) else {
                    continue;
                };
                let Some((direction, bound)) = rule.check(value) else {
                    continue;
                };

                let record = self
                    .ledger
                    .entry(point.key())
                    .or_insert_with(|| NotificationRecord {
                        point_key: point.key(),
                        flagged_metrics: BTreeSet::new(),
                        admitted_at_ms: point.timestamp_ms,
                    });

                if record.flagged_metrics.insert(rule.metric_key.clone()) {
                    alerts.push(Alert {
                        timestamp_ms: point.timestamp_ms,
                        metric_key: rule.metric_key.clone(),
                        value,
                        direction,
                        bound,
                    });
                }
            }
        }

        alerts
    }

    /// Drop entries whose point aged out of the window
    pub fn prune_older_than(&mut self, cutoff_ms: i64) -> usize {
        let before = self.ledger.len();
        self.ledger.retain(|_, record| record.admitted_at_ms >= cutoff_ms);
        before - self.ledger.len()
    }

    /// Drop entries whose point is no longer buffered (count-cap trims)
    pub fn retain_buffered(&mut self, buffer: &WindowBuffer) -> usize {
        let before = self.ledger.len();
        self.ledger
            .retain(|_, record| buffer.contains_timestamp(record.admitted_at_ms));
        before - self.ledger.len()
    }

    pub fn is_flagged(&self, point_key: &str, metric_key: &str) -> bool {
        self.ledger
            .get(point_key)
            .is_some_and(|record| record.flagged_metrics.contains(metric_key))
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }
}
