//! # Query Predicate
//!
//! Matches when a query parameter is present and, if a regular expression is
//! configured, when at least one of its decoded values matches it in full.
//!
//! Shortcut form: `query=env,canary|beta`.

use serde::Deserialize;
use std::sync::Arc;

use super::header::compile_value_regex;
use super::{RequestPredicate, RoutePredicateFactory};
use crate::core::config::PredicateDefinition;
use crate::core::error::{FlowgateError, FlowgateResult};
use crate::core::types::IncomingRequest;

/// Typed configuration for the query predicate
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Query parameter name
    pub param: String,

    /// Optional full-match regular expression over parameter values
    #[serde(default)]
    pub regexp: Option<String>,
}

/// Factory for the `query` predicate
pub struct QueryPredicateFactory;

impl RoutePredicateFactory for QueryPredicateFactory {
    fn name(&self) -> &'static str {
        "query"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["param", "regexp"]
    }

    fn compile(&self, definition: &PredicateDefinition) -> FlowgateResult<RequestPredicate> {
        let config: QueryConfig = self.bind_args(definition)?.deserialize_into(self.name())?;
        if config.param.trim().is_empty() {
            return Err(FlowgateError::bind(
                self.name(),
                "Query parameter name must not be empty",
            ));
        }
        let regex = compile_value_regex(self.name(), &config.regexp)?;
        let param = config.param;

        Ok(Arc::new(move |request: &IncomingRequest| {
            let pairs = request.query_pairs();
            let mut values = pairs
                .iter()
                .filter(|(key, _)| key == &param)
                .map(|(_, value)| value.as_str())
                .peekable();
            if values.peek().is_none() {
                return false;
            }
            match &regex {
                Some(regex) => values.any(|value| regex.is_match(value)),
                None => true,
            }
        }))
    }
}
