//! # Header Predicate
//!
//! Matches when a named header is present and, if a regular expression is
//! configured, when at least one of its (comma-separated) values matches it in
//! full. With no regexp, presence alone is enough.
//!
//! Shortcut form: `header=x-request-id,\d+`.

use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

use super::{RequestPredicate, RoutePredicateFactory};
use crate::core::config::PredicateDefinition;
use crate::core::error::{FlowgateError, FlowgateResult};
use crate::core::types::IncomingRequest;

/// Typed configuration for the header predicate
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderConfig {
    /// Header name, matched case-insensitively
    pub header: String,

    /// Optional full-match regular expression over header values
    #[serde(default)]
    pub regexp: Option<String>,
}

/// Factory for the `header` predicate
pub struct HeaderPredicateFactory;

/// Compile an optional value regexp, anchoring it for full-match semantics
pub(crate) fn compile_value_regex(
    predicate: &str,
    regexp: &Option<String>,
) -> FlowgateResult<Option<Regex>> {
    match regexp.as_deref().filter(|r| !r.trim().is_empty()) {
        Some(raw) => {
            let anchored = format!("^(?:{})$", raw);
            let regex = Regex::new(&anchored).map_err(|e| {
                FlowgateError::bind(predicate, format!("Invalid regexp '{}': {}", raw, e))
            })?;
            Ok(Some(regex))
        }
        None => Ok(None),
    }
}

impl RoutePredicateFactory for HeaderPredicateFactory {
    fn name(&self) -> &'static str {
        "header"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["header", "regexp"]
    }

    fn compile(&self, definition: &PredicateDefinition) -> FlowgateResult<RequestPredicate> {
        let config: HeaderConfig = self.bind_args(definition)?.deserialize_into(self.name())?;
        if config.header.trim().is_empty() {
            return Err(FlowgateError::bind(self.name(), "Header name must not be empty"));
        }
        let regex = compile_value_regex(self.name(), &config.regexp)?;
        let header = config.header;

        Ok(Arc::new(move |request: &IncomingRequest| {
            let values = request.header_values(&header);
            if values.is_empty() {
                return false;
            }
            match &regex {
                Some(regex) => values.iter().any(|value| regex.is_match(value)),
                // A value exists and no regexp is configured: presence suffices
                None => true,
            }
        }))
    }
}
