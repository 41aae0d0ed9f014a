//! # Predicate Argument Binding
//!
//! Converts the raw key/value arguments of a [`PredicateDefinition`] into the
//! typed configuration a predicate factory needs. Two input shapes are
//! supported:
//!
//! - a named map of field name to string value, used by the structured
//!   configuration form;
//! - a positional shortcut list (values stored under `_genkey_N` keys by the
//!   compact-text parser), mapped onto the factory's declared
//!   `shortcut_field_order`.
//!
//! Binding is pure: the same input always yields the same bound arguments, and
//! nothing outside the returned value is touched. Failures carry the predicate
//! name and a detail message so the operator can locate the bad route.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::core::config::GENERATED_ARG_PREFIX;
use crate::core::error::{FlowgateError, FlowgateResult};

/// How a factory interprets positional shortcut arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutType {
    /// One positional value per declared field, in order
    Default,
    /// All positional values gather into the first (list) field; if the last
    /// value parses as a boolean it is bound to the second field instead
    GatherListTailFlag,
}

/// Raw arguments normalized onto a factory's declared fields
///
/// Internally a JSON object so typed configs can be produced with serde.
#[derive(Debug, Clone)]
pub struct BoundArgs {
    fields: Map<String, Value>,
}

impl BoundArgs {
    /// Normalize `raw_args` for a factory
    ///
    /// If any key carries the generated positional prefix the whole argument
    /// set is treated as a shortcut list; otherwise keys are taken as field
    /// names verbatim.
    pub fn bind(
        predicate: &str,
        raw_args: &BTreeMap<String, String>,
        field_order: &[&str],
        shortcut_type: ShortcutType,
    ) -> FlowgateResult<Self> {
        let is_shortcut = raw_args.keys().any(|k| k.starts_with(GENERATED_ARG_PREFIX));
        let fields = if is_shortcut {
            Self::bind_shortcut(predicate, raw_args, field_order, shortcut_type)?
        } else {
            raw_args
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect()
        };
        Ok(Self { fields })
    }

    fn bind_shortcut(
        predicate: &str,
        raw_args: &BTreeMap<String, String>,
        field_order: &[&str],
        shortcut_type: ShortcutType,
    ) -> FlowgateResult<Map<String, Value>> {
        // Recover declaration order: `_genkey_10` sorts before `_genkey_2`
        // lexically, so sort by the numeric suffix
        let mut positional: Vec<(usize, &str)> = Vec::new();
        for (key, value) in raw_args {
            let Some(suffix) = key.strip_prefix(GENERATED_ARG_PREFIX) else {
                return Err(FlowgateError::bind(
                    predicate,
                    format!("Cannot mix positional and named argument '{}'", key),
                ));
            };
            let index: usize = suffix.parse().map_err(|_| {
                FlowgateError::bind(predicate, format!("Invalid positional key '{}'", key))
            })?;
            positional.push((index, value.as_str()));
        }
        positional.sort_by_key(|(index, _)| *index);
        let values: Vec<&str> = positional.into_iter().map(|(_, v)| v).collect();

        let mut fields = Map::new();
        match shortcut_type {
            ShortcutType::Default => {
                if values.len() > field_order.len() {
                    return Err(FlowgateError::bind(
                        predicate,
                        format!(
                            "{} positional arguments supplied but only {} fields declared",
                            values.len(),
                            field_order.len()
                        ),
                    ));
                }
                for (field, value) in field_order.iter().zip(values) {
                    fields.insert((*field).to_string(), Value::String(value.to_string()));
                }
            }
            ShortcutType::GatherListTailFlag => {
                let (list_field, flag_field) = match field_order {
                    [list, flag, ..] => (*list, Some(*flag)),
                    [list] => (*list, None),
                    [] => {
                        return Err(FlowgateError::bind(
                            predicate,
                            "Factory declares no shortcut fields",
                        ))
                    }
                };

                let mut values = values;
                if let (Some(flag_field), Some(last)) = (flag_field, values.last()) {
                    if values.len() > 1 && matches!(*last, "true" | "false") {
                        fields.insert(flag_field.to_string(), Value::Bool(*last == "true"));
                        values.pop();
                    }
                }
                let list: Vec<Value> = values
                    .into_iter()
                    .map(|v| Value::String(v.to_string()))
                    .collect();
                fields.insert(list_field.to_string(), Value::Array(list));
            }
        }
        Ok(fields)
    }

    /// Bind into a factory's typed config
    ///
    /// Missing required fields and coercion failures surface as `Bind` errors
    /// carrying the predicate name.
    pub fn deserialize_into<C: DeserializeOwned>(&self, predicate: &str) -> FlowgateResult<C> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| FlowgateError::bind(predicate, e.to_string()))
    }
}

/// Deserialize a bool from either a JSON bool or the strings "true"/"false"
///
/// Named-map arguments arrive as strings; shortcut flags arrive as booleans.
pub fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Text(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Text(s) => match s.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected 'true' or 'false', got '{}'",
                other
            ))),
        },
    }
}

/// Deserialize a `Vec<String>` from either a JSON array or a single
/// comma-separated string
///
/// Lets list-valued fields be declared through the flat named-argument map,
/// which can only carry strings.
pub fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum VecOrString {
        Vec(Vec<String>),
        Text(String),
    }

    match VecOrString::deserialize(deserializer)? {
        VecOrString::Vec(v) => Ok(v),
        VecOrString::Text(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect()),
    }
}
