//! # Route Predicate Factories
//!
//! A predicate is a boolean test over an [`IncomingRequest`], built by a named
//! factory from a small typed configuration. The registry maps predicate names
//! (case-insensitive) to factories; it is populated once at startup and treated
//! as read-only for the process lifetime, so no synchronization is needed
//! beyond publication before use.
//!
//! Built-in factories:
//! - `path`: request path against one or more patterns
//! - `header`: header presence, optionally value regex
//! - `query`: query parameter presence, optionally value regex

pub mod binding;
pub mod header;
pub mod path;
pub mod query;

pub use binding::{BoundArgs, ShortcutType};
pub use header::HeaderPredicateFactory;
pub use path::PathPredicateFactory;
pub use query::QueryPredicateFactory;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::config::PredicateDefinition;
use crate::core::error::{FlowgateError, FlowgateResult};
use crate::core::types::IncomingRequest;

/// A compiled boolean test over a request
///
/// Cheap to clone and share; the dispatcher evaluates these on every request.
pub type RequestPredicate = Arc<dyn Fn(&IncomingRequest) -> bool + Send + Sync>;

/// Factory that builds a request predicate from raw route arguments
///
/// Factories are stateless: `compile` binds the raw arguments into the
/// factory's typed config and produces the predicate in one step. Repeated
/// compilation with identical input yields an equivalent predicate.
pub trait RoutePredicateFactory: Send + Sync {
    /// Registry name, matched case-insensitively
    fn name(&self) -> &'static str;

    /// Field names positional shortcut arguments map onto, in order
    fn shortcut_field_order(&self) -> &'static [&'static str];

    /// How positional shortcut arguments are interpreted
    fn shortcut_type(&self) -> ShortcutType {
        ShortcutType::Default
    }

    /// Bind the definition's arguments and compile the predicate
    fn compile(&self, definition: &PredicateDefinition) -> FlowgateResult<RequestPredicate>;

    /// Normalize the definition's raw arguments for this factory
    fn bind_args(&self, definition: &PredicateDefinition) -> FlowgateResult<BoundArgs> {
        BoundArgs::bind(
            self.name(),
            &definition.args,
            self.shortcut_field_order(),
            self.shortcut_type(),
        )
    }
}

/// Registry of predicate factories keyed by lower-cased name
pub struct PredicateRegistry {
    factories: HashMap<String, Arc<dyn RoutePredicateFactory>>,
}

impl PredicateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry populated with the built-in factories
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PathPredicateFactory));
        registry.register(Arc::new(HeaderPredicateFactory));
        registry.register(Arc::new(QueryPredicateFactory));
        info!(
            "Loaded route predicate factories: {:?}",
            registry.names().collect::<Vec<_>>()
        );
        registry
    }

    /// Register a factory; a duplicate name is overwritten with a warning
    /// (last registration wins)
    pub fn register(&mut self, factory: Arc<dyn RoutePredicateFactory>) {
        let key = factory.name().to_lowercase();
        if self.factories.contains_key(&key) {
            warn!(
                "A route predicate factory named '{}' already exists. It will be overwritten.",
                factory.name()
            );
        }
        self.factories.insert(key, factory);
    }

    /// Look up a factory by name (case-insensitive)
    pub fn lookup(&self, name: &str) -> FlowgateResult<Arc<dyn RoutePredicateFactory>> {
        self.factories
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| FlowgateError::unknown_predicate(name))
    }

    /// Registered factory names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FlowgateError;

    struct ConstFactory {
        name: &'static str,
        value: bool,
    }

    impl RoutePredicateFactory for ConstFactory {
        fn name(&self) -> &'static str {
            self.name
        }

        fn shortcut_field_order(&self) -> &'static [&'static str] {
            &[]
        }

        fn compile(&self, _definition: &PredicateDefinition) -> FlowgateResult<RequestPredicate> {
            let value = self.value;
            Ok(Arc::new(move |_: &IncomingRequest| value))
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = PredicateRegistry::with_defaults();
        assert!(registry.lookup("Path").is_ok());
        assert!(registry.lookup("HEADER").is_ok());
        assert!(registry.lookup("query").is_ok());
    }

    #[test]
    fn test_unknown_predicate() {
        let registry = PredicateRegistry::with_defaults();
        let err = registry.lookup("cookie").err().unwrap();
        assert!(matches!(err, FlowgateError::UnknownPredicate { name } if name == "cookie"));
    }

    #[test]
    fn test_duplicate_registration_last_wins() {
        let mut registry = PredicateRegistry::new();
        registry.register(Arc::new(ConstFactory {
            name: "const",
            value: false,
        }));
        registry.register(Arc::new(ConstFactory {
            name: "CONST",
            value: true,
        }));

        let factory = registry.lookup("const").unwrap();
        let definition = PredicateDefinition::new("const", Default::default());
        let predicate = factory.compile(&definition).unwrap();
        let request = crate::core::types::IncomingRequest::new(
            axum::http::Method::GET,
            "/".parse().unwrap(),
            axum::http::Version::HTTP_11,
            axum::http::HeaderMap::new(),
            None,
        );
        assert!(predicate(&request));
    }
}
