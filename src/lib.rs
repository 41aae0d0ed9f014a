//! # Flowgate Library
//!
//! A dynamic request-routing and admission-control layer. Incoming requests
//! are matched against an ordered, hot-reloadable set of routes, each route an
//! AND-combination of named predicates; a match triggers an admission check
//! against a flow-control engine keyed by a synthetic resource id unique to
//! that route. The whole route/rule configuration can be replaced at runtime
//! without restarting the process and without disturbing flow rules registered
//! by other subsystems.
//!
//! ## Architecture
//!
//! - `core`: error types, the unified request view, and configuration
//!   structures with hot reloading
//! - `predicates`: named predicate factories (path, header, query), argument
//!   binding, and the factory registry
//! - `routing`: the route compiler (synthetic ids, AND-combined predicates,
//!   rule rewriting) and the snapshot manager that atomically publishes
//!   compiled route sets on refresh
//! - `admission`: the flow-control engine interface and an in-memory engine
//! - `dispatch`: per-request matching and admission checks with RAII tracking
//! - `middleware`: the axum adapter answering blocked requests with a fixed
//!   429 response

/// Error types, request view, and configuration management
pub mod core;

/// Admission-control engine interface and the bundled in-memory engine
pub mod admission;

/// Route predicate factories, argument binding, and the registry
pub mod predicates;

/// Route compilation and snapshot publication
pub mod routing;

/// Per-request dispatching with RAII admission tracking
pub mod dispatch;

/// Axum request-pipeline integration
pub mod middleware;

// Re-export the types most users need at the crate root

/// Main error and result types
pub use crate::core::error::{FlowgateError, FlowgateResult};

/// Configuration structures and the hot-reloading manager
pub use crate::core::config::{
    ConfigManager, FlowgateConfig, PredicateDefinition, RouteDefinition, RuleDefinition,
};

/// Unified request view and dispatch outcome
pub use crate::core::types::{DispatchOutcome, IncomingRequest};

/// Engine interface, rule types, and the in-memory engine
pub use crate::admission::{AdmissionEngine, FlowRule, FlowStrategy, InMemoryAdmissionEngine};

/// Predicate registry
pub use crate::predicates::PredicateRegistry;

/// Snapshot management
pub use crate::routing::{RouteSnapshot, SnapshotManager};

/// Request dispatching
pub use crate::dispatch::{DispatchDecision, Dispatcher};
