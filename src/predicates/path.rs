//! # Path Predicate
//!
//! Matches the request path against one or more patterns using a `matchit`
//! radix tree, which keeps matching fast even with many patterns. Patterns use
//! `matchit` syntax: literal segments, `:name` parameters, and `*rest`
//! catch-alls (e.g. `/api/orders/:id`, `/static/*path`).
//!
//! Shortcut form gathers every positional value into `patterns`, with an
//! optional trailing `true`/`false` controlling `match_trailing_slash`:
//! `path=/a,/b,false`.

use matchit::Router as PatternRouter;
use serde::Deserialize;
use std::sync::Arc;

use super::binding::{flexible_bool, string_or_vec, ShortcutType};
use super::{RequestPredicate, RoutePredicateFactory};
use crate::core::config::PredicateDefinition;
use crate::core::error::{FlowgateError, FlowgateResult};
use crate::core::types::IncomingRequest;

fn default_true() -> bool {
    true
}

/// Typed configuration for the path predicate
#[derive(Debug, Clone, Deserialize)]
pub struct PathConfig {
    /// Patterns to match, in `matchit` syntax; a single comma-separated
    /// string is also accepted in the named-argument form
    #[serde(deserialize_with = "string_or_vec")]
    pub patterns: Vec<String>,

    /// Whether `/a` also matches `/a/` and vice versa
    #[serde(default = "default_true", deserialize_with = "flexible_bool")]
    pub match_trailing_slash: bool,
}

/// Factory for the `path` predicate
pub struct PathPredicateFactory;

impl RoutePredicateFactory for PathPredicateFactory {
    fn name(&self) -> &'static str {
        "path"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["patterns", "match_trailing_slash"]
    }

    fn shortcut_type(&self) -> ShortcutType {
        ShortcutType::GatherListTailFlag
    }

    fn compile(&self, definition: &PredicateDefinition) -> FlowgateResult<RequestPredicate> {
        let config: PathConfig = self.bind_args(definition)?.deserialize_into(self.name())?;
        if config.patterns.is_empty() {
            return Err(FlowgateError::bind(
                self.name(),
                "At least one pattern is required",
            ));
        }

        let mut router: PatternRouter<()> = PatternRouter::new();
        for pattern in &config.patterns {
            router.insert(pattern, ()).map_err(|e| {
                FlowgateError::bind(self.name(), format!("Invalid pattern '{}': {}", pattern, e))
            })?;
        }

        let match_trailing_slash = config.match_trailing_slash;
        Ok(Arc::new(move |request: &IncomingRequest| {
            let path = request.path();
            if router.at(path).is_ok() {
                return true;
            }
            if !match_trailing_slash {
                return false;
            }
            // Tolerate a trailing-slash mismatch in either direction
            if let Some(stripped) = path.strip_suffix('/') {
                if !stripped.is_empty() && router.at(stripped).is_ok() {
                    return true;
                }
            } else {
                let with_slash = format!("{}/", path);
                if router.at(&with_slash).is_ok() {
                    return true;
                }
            }
            false
        }))
    }
}
