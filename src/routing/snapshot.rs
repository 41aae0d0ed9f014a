//! # Route Snapshot Manager
//!
//! Holds the currently active compiled routes and keeps the admission engine's
//! rule set in step with them across configuration refreshes.
//!
//! The active route set is an immutable [`RouteSnapshot`] published by a single
//! atomic reference swap, never mutated in place. A dispatcher therefore always
//! observes an internally consistent route list: it clones the `Arc` once and
//! works against that view for the whole request, even if a refresh lands
//! concurrently. Calls already in flight finish against the old snapshot, which
//! is dropped when its last reader is done.
//!
//! ## Refresh protocol
//! 1. Compile every route definition; any failure aborts the refresh and
//!    leaves both the snapshot and the engine rule set untouched.
//! 2. Read the engine's full rule set and drop every rule whose resource
//!    carries the synthetic prefix: those belong to the previous route
//!    generation. What remains is owned by other subsystems and must survive.
//! 3. Union the remainder with the new routes' rules and load it wholesale.
//!    The engine only offers replace-all, and filter-by-prefix is the only
//!    cheap, collision-free way to tell "ours" from "theirs".
//! 4. Publish the new snapshot.
//!
//! Refreshes are serialized by a mutex; dispatchers never block on a refresh.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

use crate::admission::{AdmissionEngine, FlowRule};
use crate::core::config::RouteDefinition;
use crate::core::error::{FlowgateError, FlowgateResult};
use crate::predicates::PredicateRegistry;
use crate::routing::compiler::{
    compile_routes, CompiledRoute, RouteIdGenerator, GENERATED_RESOURCE_PREFIX,
};

/// An immutable, atomically published view of the active compiled routes
///
/// `source` is the route definition list the snapshot was compiled from; the
/// manager compares it against incoming definitions to detect no-op refreshes.
#[derive(Debug)]
pub struct RouteSnapshot {
    /// Compiled routes in declaration order (first match wins)
    pub routes: Vec<Arc<CompiledRoute>>,

    /// The definitions this snapshot was compiled from
    pub source: Vec<RouteDefinition>,
}

impl RouteSnapshot {
    fn empty() -> Self {
        Self {
            routes: Vec::new(),
            source: Vec::new(),
        }
    }
}

/// Owner of the active snapshot and the route-owned engine rules
pub struct SnapshotManager {
    registry: Arc<PredicateRegistry>,
    engine: Arc<dyn AdmissionEngine>,
    id_gen: RouteIdGenerator,
    snapshot: RwLock<Arc<RouteSnapshot>>,
    refresh_lock: Mutex<()>,
    initialized: RwLock<bool>,
}

impl SnapshotManager {
    /// Create a manager in the uninitialized state
    pub fn new(registry: Arc<PredicateRegistry>, engine: Arc<dyn AdmissionEngine>) -> Self {
        Self {
            registry,
            engine,
            id_gen: RouteIdGenerator::new(),
            snapshot: RwLock::new(Arc::new(RouteSnapshot::empty())),
            refresh_lock: Mutex::new(()),
            initialized: RwLock::new(false),
        }
    }

    /// The currently published snapshot
    ///
    /// Cheap: clones one `Arc` under a briefly held read lock.
    pub fn current_snapshot(&self) -> Arc<RouteSnapshot> {
        self.snapshot.read().clone()
    }

    /// First-time setup: compile and publish unconditionally
    ///
    /// Transitions the manager from `Uninitialized` to `Active`. Calling it
    /// again behaves like an unconditional refresh.
    pub fn initialize(&self, definitions: &[RouteDefinition]) -> FlowgateResult<()> {
        let result = self.apply(definitions, false);
        if result.is_ok() {
            *self.initialized.write() = true;
        }
        result
    }

    /// Replace the active configuration
    ///
    /// Element-wise-equal definitions are a no-op: no recompilation, no rule
    /// reload, ids unchanged. All-or-nothing on failure: the previous snapshot
    /// keeps serving and the error is reported to the operator.
    pub fn refresh(&self, definitions: &[RouteDefinition]) -> FlowgateResult<()> {
        if !*self.initialized.read() {
            return Err(FlowgateError::config(
                "Refresh called before initialization",
            ));
        }
        self.apply(definitions, true)
    }

    /// True once `initialize` has succeeded
    pub fn is_initialized(&self) -> bool {
        *self.initialized.read()
    }

    fn apply(&self, definitions: &[RouteDefinition], check_noop: bool) -> FlowgateResult<()> {
        // Serialize refreshes; a concurrent caller queues here
        let _guard = self.refresh_lock.lock();

        if check_noop && self.current_snapshot().source == definitions {
            debug!("Route definitions unchanged, skipping refresh");
            return Ok(());
        }

        // All-or-nothing: nothing below runs unless every route compiled
        let compiled = compile_routes(definitions, &self.registry, &self.id_gen)?;

        // Keep rules owned by other subsystems, drop our previous generation
        let mut rules: Vec<FlowRule> = self
            .engine
            .rules()
            .into_iter()
            .filter(|rule| !rule.resource.starts_with(GENERATED_RESOURCE_PREFIX))
            .collect();
        let route_rule_count: usize = compiled.iter().map(|route| route.rules.len()).sum();
        rules.extend(compiled.iter().flat_map(|route| route.rules.iter().cloned()));
        self.engine.load_rules(rules);

        let new_snapshot = Arc::new(RouteSnapshot {
            routes: compiled,
            source: definitions.to_vec(),
        });
        *self.snapshot.write() = new_snapshot;

        info!(
            "Loaded {} flow rules for {} routes",
            route_rule_count,
            definitions.len()
        );
        Ok(())
    }
}
