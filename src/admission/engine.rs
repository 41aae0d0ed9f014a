//! # In-Memory Admission Engine
//!
//! A process-local [`AdmissionEngine`] implementation so flowgate runs and
//! tests end-to-end without an external flow-control backend. Two strategies:
//!
//! - **QPS**: fixed one-second window counter per resource; a request is
//!   admitted while the window count is below `threshold + burst`.
//! - **Concurrency**: in-flight gauge per resource; a request is admitted while
//!   the gauge is below `threshold`.
//!
//! When several rules target the same resource the most restrictive limit of
//! each kind wins. A resource with no rule is always admitted. The engine also
//! keeps per-resource error counters fed by `trace_error`, and an in-flight
//! gauge for every admitted request regardless of strategy, for accounting.
//!
//! Counter state is bounded by the loaded rule set: `load_rules` drops window
//! and error counters for resources the new set no longer names, and a gauge
//! entry with no backing rule is removed once its last permit is released.
//! Synthetic route ids change on every refresh, so without this pruning each
//! refresh would strand the previous generation's counters forever.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::{AdmissionDecision, AdmissionEngine, AdmissionPermit, FlowRule, FlowStrategy};

/// Per-resource fixed-window counter state
#[derive(Debug)]
struct Window {
    start_secs: u64,
    count: u64,
}

/// Effective limits for a resource, folded over all its rules
#[derive(Debug, Clone, Copy)]
struct Limits {
    /// threshold + burst, minimum over QPS rules
    qps: Option<f64>,
    /// threshold, minimum over concurrency rules
    concurrent: Option<f64>,
}

/// In-memory admission engine
pub struct InMemoryAdmissionEngine {
    /// Loaded rule set, in load order
    rules: RwLock<Vec<FlowRule>>,

    /// Effective per-resource limits, rebuilt on every `load_rules`
    limits: RwLock<HashMap<String, Limits>>,

    /// Fixed-window counters (QPS)
    windows: DashMap<String, Window>,

    /// In-flight gauge per resource
    in_flight: DashMap<String, u64>,

    /// Downstream-fault counters per resource
    errors: DashMap<String, u64>,
}

impl InMemoryAdmissionEngine {
    /// Create an engine with an empty rule set
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            limits: RwLock::new(HashMap::new()),
            windows: DashMap::new(),
            in_flight: DashMap::new(),
            errors: DashMap::new(),
        }
    }

    /// Current in-flight count for a resource
    pub fn in_flight(&self, resource: &str) -> u64 {
        self.in_flight.get(resource).map(|v| *v).unwrap_or(0)
    }

    /// Downstream faults recorded against a resource
    pub fn error_count(&self, resource: &str) -> u64 {
        self.errors.get(resource).map(|v| *v).unwrap_or(0)
    }

    /// Number of distinct resources with live counter state
    pub fn tracked_resources(&self) -> usize {
        let mut resources: std::collections::HashSet<String> = std::collections::HashSet::new();
        resources.extend(self.windows.iter().map(|e| e.key().clone()));
        resources.extend(self.in_flight.iter().map(|e| e.key().clone()));
        resources.extend(self.errors.iter().map(|e| e.key().clone()));
        resources.len()
    }

    fn current_second() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn fold_limits(rules: &[FlowRule]) -> HashMap<String, Limits> {
        let mut limits: HashMap<String, Limits> = HashMap::new();
        for rule in rules {
            let entry = limits.entry(rule.resource.clone()).or_insert(Limits {
                qps: None,
                concurrent: None,
            });
            match rule.strategy {
                FlowStrategy::Qps => {
                    let limit = rule.threshold + rule.burst as f64;
                    entry.qps = Some(entry.qps.map_or(limit, |l: f64| l.min(limit)));
                }
                FlowStrategy::Concurrency => {
                    entry.concurrent = Some(
                        entry
                            .concurrent
                            .map_or(rule.threshold, |l: f64| l.min(rule.threshold)),
                    );
                }
            }
        }
        limits
    }

    /// Check and consume one slot in the resource's current one-second window
    fn try_take_window_slot(&self, resource: &str, limit: f64) -> bool {
        let now = Self::current_second();
        let mut entry = self.windows.entry(resource.to_string()).or_insert(Window {
            start_secs: now,
            count: 0,
        });
        if entry.start_secs != now {
            entry.start_secs = now;
            entry.count = 0;
        }
        if (entry.count as f64) < limit {
            entry.count += 1;
            true
        } else {
            false
        }
    }
}

impl Default for InMemoryAdmissionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionEngine for InMemoryAdmissionEngine {
    fn rules(&self) -> Vec<FlowRule> {
        self.rules.read().clone()
    }

    fn load_rules(&self, rules: Vec<FlowRule>) {
        let limits = Self::fold_limits(&rules);
        // Take both locks write-side so readers never observe rules and limits
        // from different generations
        let mut rules_guard = self.rules.write();
        let mut limits_guard = self.limits.write();
        debug!(rule_count = rules.len(), "Loading admission rule set");
        *rules_guard = rules;
        // Drop counters for resources the new set no longer names; a nonzero
        // gauge stays until its outstanding permits are released
        self.windows
            .retain(|resource, _| limits.contains_key(resource));
        self.errors
            .retain(|resource, _| limits.contains_key(resource));
        self.in_flight
            .retain(|resource, count| *count > 0 || limits.contains_key(resource));
        *limits_guard = limits;
    }

    fn admit(&self, resource: &str) -> AdmissionDecision {
        let limits = self.limits.read().get(resource).copied();

        // The gauge entry is held for the whole check-and-increment so two
        // concurrent admits cannot both pass a concurrency check and then
        // both increment past the limit
        let mut gauge = self.in_flight.entry(resource.to_string()).or_insert(0);
        if let Some(limits) = limits {
            if let Some(limit) = limits.concurrent {
                if (*gauge as f64) >= limit {
                    return AdmissionDecision::Blocked;
                }
            }
            if let Some(limit) = limits.qps {
                if !self.try_take_window_slot(resource, limit) {
                    return AdmissionDecision::Blocked;
                }
            }
        }
        *gauge += 1;
        AdmissionDecision::Allowed(AdmissionPermit {
            resource: resource.to_string(),
        })
    }

    fn release(&self, permit: AdmissionPermit) {
        let has_rule = self.limits.read().contains_key(&permit.resource);
        let mut drained = false;
        if let Some(mut gauge) = self.in_flight.get_mut(&permit.resource) {
            *gauge = gauge.saturating_sub(1);
            drained = *gauge == 0;
        }
        // A drained gauge with no backing rule is dead state; the re-check
        // under the entry lock keeps a concurrent admit's increment alive
        if drained && !has_rule {
            self.in_flight.remove_if(&permit.resource, |_, count| *count == 0);
        }
    }

    fn trace_error(&self, resource: &str, error: &dyn std::fmt::Display) {
        debug!(resource, %error, "Downstream fault recorded");
        self.errors
            .entry(resource.to_string())
            .and_modify(|v| *v += 1)
            .or_insert(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrestricted_resource_is_admitted() {
        let engine = InMemoryAdmissionEngine::new();
        let decision = engine.admit("free");
        assert!(!decision.is_blocked());
    }

    #[test]
    fn test_qps_threshold_blocks_within_window() {
        let engine = InMemoryAdmissionEngine::new();
        engine.load_rules(vec![FlowRule::qps("r1", 1.0)]);

        match engine.admit("r1") {
            AdmissionDecision::Allowed(permit) => engine.release(permit),
            AdmissionDecision::Blocked => panic!("first request should pass"),
        }
        assert!(engine.admit("r1").is_blocked());
    }

    #[test]
    fn test_burst_extends_qps_limit() {
        let engine = InMemoryAdmissionEngine::new();
        engine.load_rules(vec![FlowRule {
            resource: "r1".to_string(),
            threshold: 1.0,
            strategy: FlowStrategy::Qps,
            burst: 1,
        }]);

        assert!(!engine.admit("r1").is_blocked());
        assert!(!engine.admit("r1").is_blocked());
        assert!(engine.admit("r1").is_blocked());
    }

    #[test]
    fn test_concurrency_frees_slot_on_release() {
        let engine = InMemoryAdmissionEngine::new();
        engine.load_rules(vec![FlowRule::concurrency("r1", 1.0)]);

        let permit = match engine.admit("r1") {
            AdmissionDecision::Allowed(permit) => permit,
            AdmissionDecision::Blocked => panic!("first entry should pass"),
        };
        assert!(engine.admit("r1").is_blocked());

        engine.release(permit);
        assert!(!engine.admit("r1").is_blocked());
    }

    #[test]
    fn test_most_restrictive_rule_wins() {
        let engine = InMemoryAdmissionEngine::new();
        engine.load_rules(vec![FlowRule::qps("r1", 10.0), FlowRule::qps("r1", 1.0)]);

        assert!(!engine.admit("r1").is_blocked());
        assert!(engine.admit("r1").is_blocked());
    }

    #[test]
    fn test_load_rules_replaces_full_set() {
        let engine = InMemoryAdmissionEngine::new();
        engine.load_rules(vec![FlowRule::qps("a", 1.0), FlowRule::qps("b", 1.0)]);
        engine.load_rules(vec![FlowRule::qps("b", 2.0)]);

        let rules = engine.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].resource, "b");
        // "a" no longer restricted
        assert!(!engine.admit("a").is_blocked());
        assert!(!engine.admit("a").is_blocked());
    }

    #[test]
    fn test_trace_error_accumulates() {
        let engine = InMemoryAdmissionEngine::new();
        engine.trace_error("r1", &"boom");
        engine.trace_error("r1", &"boom again");
        assert_eq!(engine.error_count("r1"), 2);
        assert_eq!(engine.error_count("other"), 0);
    }

    #[test]
    fn test_concurrent_admits_respect_concurrency_limit() {
        use std::sync::{Arc, Barrier};

        let engine = Arc::new(InMemoryAdmissionEngine::new());
        engine.load_rules(vec![FlowRule::concurrency("r1", 2.0)]);

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    matches!(engine.admit("r1"), AdmissionDecision::Allowed(_))
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, 2);
        assert_eq!(engine.in_flight("r1"), 2);
    }

    #[test]
    fn test_gauge_never_exceeds_limit_under_contention() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let engine = Arc::new(InMemoryAdmissionEngine::new());
        engine.load_rules(vec![FlowRule::concurrency("r1", 1.0)]);
        let max_seen = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let max_seen = max_seen.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if let AdmissionDecision::Allowed(permit) = engine.admit("r1") {
                            max_seen.fetch_max(engine.in_flight("r1"), Ordering::Relaxed);
                            engine.release(permit);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(max_seen.load(Ordering::Relaxed) <= 1);
    }

    #[test]
    fn test_reload_prunes_counters_for_dropped_resources() {
        let engine = InMemoryAdmissionEngine::new();
        engine.load_rules(vec![FlowRule::qps("a", 5.0)]);

        match engine.admit("a") {
            AdmissionDecision::Allowed(permit) => engine.release(permit),
            AdmissionDecision::Blocked => panic!("should admit"),
        }
        engine.trace_error("a", &"boom");
        assert!(engine.tracked_resources() >= 1);

        engine.load_rules(vec![FlowRule::qps("b", 5.0)]);
        assert_eq!(engine.error_count("a"), 0);
        assert_eq!(engine.tracked_resources(), 0);
    }

    #[test]
    fn test_outstanding_permit_survives_reload_until_release() {
        let engine = InMemoryAdmissionEngine::new();
        engine.load_rules(vec![FlowRule::concurrency("a", 1.0)]);
        let permit = match engine.admit("a") {
            AdmissionDecision::Allowed(permit) => permit,
            AdmissionDecision::Blocked => panic!("should admit"),
        };

        engine.load_rules(Vec::new());
        assert_eq!(engine.in_flight("a"), 1);

        engine.release(permit);
        assert_eq!(engine.in_flight("a"), 0);
        assert_eq!(engine.tracked_resources(), 0);
    }

    #[test]
    fn test_rule_less_gauge_removed_on_release() {
        let engine = InMemoryAdmissionEngine::new();
        let permit = match engine.admit("free") {
            AdmissionDecision::Allowed(permit) => permit,
            AdmissionDecision::Blocked => panic!("should admit"),
        };
        assert_eq!(engine.in_flight("free"), 1);

        engine.release(permit);
        assert_eq!(engine.tracked_resources(), 0);
    }
}
