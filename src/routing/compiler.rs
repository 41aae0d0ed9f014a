//! # Route Compiler
//!
//! Turns declarative [`RouteDefinition`]s into executable [`CompiledRoute`]s:
//! each predicate reference is looked up, bound, and compiled, the results are
//! AND-combined in declaration order, a synthetic resource id is allocated, and
//! the route's admission rules are rewritten to that id.
//!
//! Compilation of a route list is all-or-nothing: the first lookup or bind
//! failure aborts the whole batch so a refresh never publishes a partially
//! valid configuration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::admission::FlowRule;
use crate::core::config::RouteDefinition;
use crate::core::error::{FlowgateError, FlowgateResult};
use crate::core::types::IncomingRequest;
use crate::predicates::{PredicateRegistry, RequestPredicate};

/// Prefix of synthetic route resource ids
///
/// The leading `#` keeps generated ids out of the space of user-declared
/// resource names, and the full prefix makes route-owned rules trivially
/// filterable from the engine's rule list on refresh.
pub const GENERATED_RESOURCE_PREFIX: &str = "#flowgate-route-";

/// Allocator for synthetic route ids
///
/// The counter is strictly increasing for the process lifetime; ids are never
/// reused across refreshes, so rules from different route generations can
/// never collide.
#[derive(Debug, Default)]
pub struct RouteIdGenerator {
    counter: AtomicU64,
}

impl RouteIdGenerator {
    /// Create a generator starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next synthetic id
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", GENERATED_RESOURCE_PREFIX, n)
    }
}

/// An immutable compiled route
///
/// Owned by the snapshot manager; the dispatcher only ever reads shared
/// references. Every rule's `resource` equals `id` (1:1 route to rule-group
/// binding).
pub struct CompiledRoute {
    /// Synthetic resource id
    pub id: String,

    /// AND-combination of the route's predicates
    pub predicate: RequestPredicate,

    /// Admission rules rewritten to `resource == id`
    pub rules: Vec<FlowRule>,
}

impl fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("id", &self.id)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

/// Compile a single route definition
pub fn compile_route(
    definition: &RouteDefinition,
    registry: &PredicateRegistry,
    id_gen: &RouteIdGenerator,
) -> FlowgateResult<CompiledRoute> {
    let predicate = combine_predicates(definition, registry)?;
    let id = id_gen.next_id();

    let rules = definition
        .rules
        .iter()
        .map(|rule| {
            if let Some(declared) = &rule.resource {
                // Resource names are generated so stale rules can be removed
                // by prefix on the next refresh; user-declared names would leak
                warn!(
                    "Please don't set resource, it will be automatically generated; \
                     resource '{}' will be overwritten",
                    declared
                );
            }
            FlowRule {
                resource: id.clone(),
                threshold: rule.threshold,
                strategy: rule.strategy,
                burst: rule.burst,
            }
        })
        .collect();

    Ok(CompiledRoute {
        id,
        predicate,
        rules,
    })
}

/// Compile a full route list, all-or-nothing
///
/// Ids are allocated per successfully compiled route; a failure later in the
/// batch abandons the earlier routes of the batch entirely (their ids are
/// simply never published).
pub fn compile_routes(
    definitions: &[RouteDefinition],
    registry: &PredicateRegistry,
    id_gen: &RouteIdGenerator,
) -> FlowgateResult<Vec<Arc<CompiledRoute>>> {
    definitions
        .iter()
        .enumerate()
        .map(|(index, definition)| {
            compile_route(definition, registry, id_gen)
                .map(Arc::new)
                .map_err(|e| FlowgateError::compile(index, e))
        })
        .collect()
}

/// AND-combine a route's predicates in declaration order
///
/// Short-circuits left to right; an empty predicate list compiles to the
/// always-true test, so a route with no predicates matches every request.
fn combine_predicates(
    definition: &RouteDefinition,
    registry: &PredicateRegistry,
) -> FlowgateResult<RequestPredicate> {
    let mut compiled = Vec::with_capacity(definition.predicates.len());
    for predicate_def in &definition.predicates {
        let factory = registry.lookup(&predicate_def.name)?;
        compiled.push(factory.compile(predicate_def)?);
    }

    if compiled.is_empty() {
        return Ok(Arc::new(|_: &IncomingRequest| true));
    }
    Ok(Arc::new(move |request: &IncomingRequest| {
        compiled.iter().all(|predicate| predicate(request))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method, Version};

    use crate::admission::FlowStrategy;
    use crate::core::config::FlowgateConfig;

    fn request(uri: &str, headers: &[(&str, &str)]) -> IncomingRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        IncomingRequest::new(
            Method::GET,
            uri.parse().unwrap(),
            Version::HTTP_11,
            map,
            None,
        )
    }

    fn routes(yaml: &str) -> Vec<RouteDefinition> {
        serde_yaml::from_str::<FlowgateConfig>(yaml).unwrap().routes
    }

    #[test]
    fn test_id_generator_monotonic() {
        let id_gen = RouteIdGenerator::new();
        assert_eq!(id_gen.next_id(), "#flowgate-route-0");
        assert_eq!(id_gen.next_id(), "#flowgate-route-1");
    }

    #[test]
    fn test_rules_rewritten_to_route_id() {
        let registry = PredicateRegistry::with_defaults();
        let id_gen = RouteIdGenerator::new();
        let defs = routes(
            "routes:\n  - predicates: ['path=/a']\n    rules:\n      - resource: user-named\n        threshold: 3\n      - threshold: 5\n        strategy: concurrency\n",
        );

        let route = compile_route(&defs[0], &registry, &id_gen).unwrap();
        assert_eq!(route.rules.len(), 2);
        for rule in &route.rules {
            assert_eq!(rule.resource, route.id);
        }
        assert_eq!(route.rules[0].threshold, 3.0);
        assert_eq!(route.rules[1].strategy, FlowStrategy::Concurrency);
    }

    #[test]
    fn test_predicates_and_combined() {
        let registry = PredicateRegistry::with_defaults();
        let id_gen = RouteIdGenerator::new();
        let defs = routes("routes:\n  - predicates: ['path=/a', 'header=x-canary']\n");

        let route = compile_route(&defs[0], &registry, &id_gen).unwrap();
        assert!((route.predicate)(&request("/a", &[("x-canary", "on")])));
        assert!(!(route.predicate)(&request("/a", &[])));
        assert!(!(route.predicate)(&request("/b", &[("x-canary", "on")])));
    }

    #[test]
    fn test_empty_predicate_list_matches_everything() {
        let registry = PredicateRegistry::with_defaults();
        let id_gen = RouteIdGenerator::new();
        let defs = routes("routes:\n  - rules:\n      - threshold: 1\n");

        let route = compile_route(&defs[0], &registry, &id_gen).unwrap();
        assert!((route.predicate)(&request("/anything", &[])));
    }

    #[test]
    fn test_unknown_predicate_aborts_whole_batch() {
        let registry = PredicateRegistry::with_defaults();
        let id_gen = RouteIdGenerator::new();
        let defs = routes("routes:\n  - predicates: ['path=/a']\n  - predicates: ['cookie=x']\n");

        let err = compile_routes(&defs, &registry, &id_gen).unwrap_err();
        match err {
            FlowgateError::Compile {
                route_index,
                source,
            } => {
                assert_eq!(route_index, 1);
                assert!(matches!(*source, FlowgateError::UnknownPredicate { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
