//! # Admission Control Interface
//!
//! This module defines the interface flowgate uses to talk to an admission
//! (flow-control) engine, plus the rule types loaded into it. The engine is an
//! external collaborator behind the [`AdmissionEngine`] trait: the core never
//! assumes a particular quota algorithm, it only loads rule sets wholesale and
//! asks allow/deny per resource id.
//!
//! The engine's rule set is a single shared resource. Only the snapshot manager
//! writes to it, and only via filter-and-replace: query the full set, drop the
//! rules owned by the previous route generation (identified by the synthetic id
//! prefix), union in the new generation, and load the result in one call.
//! Incremental remove-then-add would leave a window with zero or duplicate
//! rules for a route.

pub mod engine;

pub use engine::InMemoryAdmissionEngine;

use serde::{Deserialize, Serialize};

/// Admission strategy for a flow rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStrategy {
    /// Limit requests per second (fixed one-second window)
    #[default]
    Qps,
    /// Limit concurrent in-flight requests
    Concurrency,
}

/// An admission rule as loaded into the engine
///
/// For route-owned rules the `resource` is always the route's synthetic id;
/// rules registered by other subsystems carry their own resource names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRule {
    /// Resource id this rule applies to
    pub resource: String,

    /// Admission threshold (requests/second or concurrent entries)
    pub threshold: f64,

    /// Admission strategy
    #[serde(default)]
    pub strategy: FlowStrategy,

    /// Extra burst allowance on top of the threshold (QPS only)
    #[serde(default)]
    pub burst: u32,
}

impl FlowRule {
    /// Create a QPS rule
    pub fn qps<S: Into<String>>(resource: S, threshold: f64) -> Self {
        Self {
            resource: resource.into(),
            threshold,
            strategy: FlowStrategy::Qps,
            burst: 0,
        }
    }

    /// Create a concurrency rule
    pub fn concurrency<S: Into<String>>(resource: S, threshold: f64) -> Self {
        Self {
            resource: resource.into(),
            threshold,
            strategy: FlowStrategy::Concurrency,
            burst: 0,
        }
    }
}

/// Tracking handle returned by a successful admission check
///
/// Must be released exactly once; the dispatcher wraps it in an RAII guard so
/// release happens on every exit path.
#[derive(Debug)]
pub struct AdmissionPermit {
    /// Resource id the permit was issued for
    pub resource: String,
}

/// Result of an admission check
#[derive(Debug)]
pub enum AdmissionDecision {
    /// The request may proceed; the permit must be released when it finishes
    Allowed(AdmissionPermit),
    /// The request must be short-circuited
    Blocked,
}

impl AdmissionDecision {
    /// True if the check denied the request
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked)
    }
}

/// Interface to the admission-control engine
///
/// All operations are synchronous and expected to be fast and non-blocking.
/// Implementations must be safe to share across request-handling threads.
pub trait AdmissionEngine: Send + Sync {
    /// The full current rule set
    fn rules(&self) -> Vec<FlowRule>;

    /// Replace the full rule set
    fn load_rules(&self, rules: Vec<FlowRule>);

    /// Check admission for a resource and begin tracking on success
    ///
    /// A resource with no loaded rule is always admitted.
    fn admit(&self, resource: &str) -> AdmissionDecision;

    /// End tracking for a previously issued permit
    fn release(&self, permit: AdmissionPermit);

    /// Record a downstream processing fault against a resource
    fn trace_error(&self, resource: &str, error: &dyn std::fmt::Display);
}
