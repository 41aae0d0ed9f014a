//! # Request Dispatcher
//!
//! The per-request entry point: test routes in order against a single
//! consistent snapshot, first match wins, then run the admission check for the
//! matched route's resource id.
//!
//! The admission permit is wrapped in an RAII [`AdmissionGuard`] so tracking is
//! released exactly once on every exit path, including error propagation. The
//! guard's `Drop` is this crate's rendition of a `finally` block around the
//! downstream handler.

use std::fmt;
use std::sync::Arc;

use crate::admission::{AdmissionDecision, AdmissionEngine, AdmissionPermit};
use crate::core::types::{DispatchOutcome, IncomingRequest};
use crate::routing::SnapshotManager;

/// Fixed plain-text body sent with a blocked response
pub const BLOCKED_MESSAGE: &str = "blocked by flowgate";

/// RAII tracking handle for an admitted request
///
/// Releases the underlying permit exactly once when dropped. Downstream faults
/// are recorded through [`record_error`](Self::record_error) before the guard
/// goes out of scope.
pub struct AdmissionGuard {
    engine: Arc<dyn AdmissionEngine>,
    permit: Option<AdmissionPermit>,
    resource: String,
}

impl AdmissionGuard {
    fn new(engine: Arc<dyn AdmissionEngine>, permit: AdmissionPermit) -> Self {
        let resource = permit.resource.clone();
        Self {
            engine,
            permit: Some(permit),
            resource,
        }
    }

    /// Resource id the guard tracks
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Record a downstream processing fault against the tracked resource
    ///
    /// The fault is accounted for and must still be propagated by the caller;
    /// recording never swallows it.
    pub fn record_error(&self, error: &dyn fmt::Display) {
        self.engine.trace_error(&self.resource, error);
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.engine.release(permit);
        }
    }
}

impl fmt::Debug for AdmissionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGuard")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// Result of matching and admission-checking one request
#[derive(Debug)]
pub enum DispatchDecision {
    /// No route matched; the request proceeds untouched
    Pass,
    /// A route matched and its admission check denied the request
    Blocked {
        /// Synthetic resource id of the denying route
        resource: String,
    },
    /// A route matched and the request was admitted; hold the guard for the
    /// duration of downstream processing
    Admitted(AdmissionGuard),
}

/// Scans routes and performs admission checks, one call per request
pub struct Dispatcher {
    snapshots: Arc<SnapshotManager>,
    engine: Arc<dyn AdmissionEngine>,
}

impl Dispatcher {
    /// Create a dispatcher over a snapshot manager and its engine
    pub fn new(snapshots: Arc<SnapshotManager>, engine: Arc<dyn AdmissionEngine>) -> Self {
        Self { snapshots, engine }
    }

    /// Match the request and check admission
    ///
    /// Reads the current snapshot once; the scan and the admission check both
    /// work against that consistent view even if a refresh lands concurrently.
    pub fn decide(&self, request: &IncomingRequest) -> DispatchDecision {
        let snapshot = self.snapshots.current_snapshot();
        for route in &snapshot.routes {
            if !(route.predicate)(request) {
                continue;
            }
            return match self.engine.admit(&route.id) {
                AdmissionDecision::Allowed(permit) => {
                    DispatchDecision::Admitted(AdmissionGuard::new(self.engine.clone(), permit))
                }
                AdmissionDecision::Blocked => DispatchDecision::Blocked {
                    resource: route.id.clone(),
                },
            };
        }
        DispatchDecision::Pass
    }

    /// Dispatch a request around a synchronous downstream handler
    ///
    /// `next` runs when the request is unmatched or admitted. A downstream
    /// error is recorded against the matched resource and returned unchanged;
    /// admission tracking is released on every path.
    pub fn dispatch<T, E, F>(
        &self,
        request: &IncomingRequest,
        next: F,
    ) -> Result<DispatchOutcome<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        match self.decide(request) {
            DispatchDecision::Pass => next().map(DispatchOutcome::Pass),
            DispatchDecision::Blocked { resource } => Ok(DispatchOutcome::Blocked { resource }),
            DispatchDecision::Admitted(guard) => {
                let result = next();
                if let Err(error) = &result {
                    guard.record_error(error);
                }
                result.map(DispatchOutcome::Pass)
                // guard dropped here: tracking released exactly once
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method, Version};

    use crate::admission::InMemoryAdmissionEngine;
    use crate::core::config::{FlowgateConfig, RouteDefinition};
    use crate::predicates::PredicateRegistry;

    fn request(uri: &str) -> IncomingRequest {
        IncomingRequest::new(
            Method::GET,
            uri.parse().unwrap(),
            Version::HTTP_11,
            HeaderMap::new(),
            None,
        )
    }

    fn routes(yaml: &str) -> Vec<RouteDefinition> {
        serde_yaml::from_str::<FlowgateConfig>(yaml).unwrap().routes
    }

    fn dispatcher(yaml: &str) -> (Dispatcher, Arc<InMemoryAdmissionEngine>) {
        let engine = Arc::new(InMemoryAdmissionEngine::new());
        let manager = Arc::new(SnapshotManager::new(
            Arc::new(PredicateRegistry::with_defaults()),
            engine.clone(),
        ));
        manager.initialize(&routes(yaml)).unwrap();
        (Dispatcher::new(manager, engine.clone()), engine)
    }

    #[test]
    fn test_unmatched_request_passes() {
        let (dispatcher, _) =
            dispatcher("routes: [{predicates: ['path=/a'], rules: [{threshold: 0}]}]");
        let outcome: Result<DispatchOutcome<&str>, &str> =
            dispatcher.dispatch(&request("/b"), || Ok("handled"));
        assert_eq!(outcome.unwrap(), DispatchOutcome::Pass("handled"));
    }

    #[test]
    fn test_matched_request_blocked_at_threshold_zero() {
        let (dispatcher, _) =
            dispatcher("routes: [{predicates: ['path=/a'], rules: [{threshold: 0}]}]");
        let outcome: Result<DispatchOutcome<&str>, &str> =
            dispatcher.dispatch(&request("/a"), || Ok("handled"));
        assert!(outcome.unwrap().is_blocked());
    }

    #[test]
    fn test_first_match_wins() {
        let (dispatcher, _) = dispatcher(
            "routes:\n  - predicates: ['path=/a']\n    rules: [{threshold: 0}]\n  - rules: [{threshold: 100}]\n",
        );
        // /a hits the first route (blocked); anything else falls to the
        // catch-all second route (admitted)
        let blocked: Result<DispatchOutcome<()>, &str> =
            dispatcher.dispatch(&request("/a"), || Ok(()));
        assert!(blocked.unwrap().is_blocked());

        let passed: Result<DispatchOutcome<()>, &str> =
            dispatcher.dispatch(&request("/other"), || Ok(()));
        assert!(!passed.unwrap().is_blocked());
    }

    #[test]
    fn test_tracking_released_after_dispatch() {
        let (dispatcher, engine) =
            dispatcher("routes: [{predicates: ['path=/a'], rules: [{threshold: 100}]}]");
        let resource = {
            let decision = dispatcher.decide(&request("/a"));
            match &decision {
                DispatchDecision::Admitted(guard) => {
                    let resource = guard.resource().to_string();
                    assert_eq!(engine.in_flight(&resource), 1);
                    resource
                }
                other => panic!("unexpected decision: {other:?}"),
            }
            // decision (and guard) dropped here
        };
        assert_eq!(engine.in_flight(&resource), 0);
    }

    #[test]
    fn test_downstream_error_recorded_and_propagated() {
        let (dispatcher, engine) =
            dispatcher("routes: [{predicates: ['path=/a'], rules: [{threshold: 100}]}]");
        let resource = match dispatcher.decide(&request("/a")) {
            DispatchDecision::Admitted(guard) => guard.resource().to_string(),
            other => panic!("unexpected decision: {other:?}"),
        };

        let result: Result<DispatchOutcome<()>, &str> =
            dispatcher.dispatch(&request("/a"), || Err("downstream exploded"));
        assert_eq!(result.unwrap_err(), "downstream exploded");
        assert_eq!(engine.error_count(&resource), 1);
        // Tracking fully released despite the error
        assert_eq!(engine.in_flight(&resource), 0);
    }

    #[test]
    fn test_blocked_does_not_run_downstream() {
        let (dispatcher, _) =
            dispatcher("routes: [{predicates: ['path=/a'], rules: [{threshold: 0}]}]");
        let mut ran = false;
        let outcome: Result<DispatchOutcome<()>, &str> = dispatcher.dispatch(&request("/a"), || {
            ran = true;
            Ok(())
        });
        assert!(outcome.unwrap().is_blocked());
        assert!(!ran);
    }
}
