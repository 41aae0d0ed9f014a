//! # Configuration Management
//!
//! This module defines the declarative route configuration consumed by the
//! route compiler, and a configuration manager with hot reloading.
//!
//! ## Key Features
//! - Route definitions with predicates in compact text form (`path=/a,/b`) or
//!   structured form (`{ name, args }`)
//! - YAML and JSON configuration files
//! - Hot reloading using a `notify` file system watcher
//! - Broadcast channel notifying subscribers of configuration changes
//!
//! Definition types derive structural equality; the snapshot manager compares
//! the incoming route list against the one backing the current snapshot to
//! decide whether a refresh is a no-op. This replaces a serialize-and-clone
//! deep diff with a plain value comparison.

use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use crate::admission::FlowStrategy;
use crate::core::error::{FlowgateError, FlowgateResult};

/// Prefix for positional (shortcut) argument keys
///
/// When a predicate is declared in compact `name=v1,v2` form, the values are
/// stored under `_genkey_0`, `_genkey_1`, ... so declaration order survives the
/// round-trip through a map. The binder maps them back onto the factory's
/// declared field order.
pub const GENERATED_ARG_PREFIX: &str = "_genkey_";

/// A reference to a named predicate factory plus its raw arguments
///
/// Produced either by parsing the compact text form or supplied structurally.
/// Immutable once parsed. `args` is a `BTreeMap` so equality and iteration
/// order are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredicateDefinition {
    /// Name of the predicate factory (matched case-insensitively)
    pub name: String,

    /// Raw arguments: named fields, or `_genkey_N` positional entries
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl PredicateDefinition {
    /// Create a definition with named arguments
    pub fn new<S: Into<String>>(name: S, args: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Parse the compact text form `name=v1,v2,...`
    ///
    /// The values end up under generated positional keys in declaration order.
    /// Text without a `=` after at least one name character is rejected.
    pub fn parse(text: &str) -> FlowgateResult<Self> {
        let eq_idx = match text.find('=') {
            Some(idx) if idx > 0 => idx,
            _ => {
                return Err(FlowgateError::parse(format!(
                    "Unable to parse predicate text '{}', must be of the form name=value",
                    text
                )))
            }
        };

        let name = text[..eq_idx].trim().to_string();
        let mut args = BTreeMap::new();
        for (i, value) in text[eq_idx + 1..].split(',').enumerate() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            args.insert(format!("{}{}", GENERATED_ARG_PREFIX, i), value.to_string());
        }

        Ok(Self { name, args })
    }
}

impl std::str::FromStr for PredicateDefinition {
    type Err = FlowgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Accept both the compact string form and the structured form
impl<'de> Deserialize<'de> for PredicateDefinition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Structured {
                name: String,
                #[serde(default)]
                args: BTreeMap<String, String>,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => {
                PredicateDefinition::parse(&text).map_err(serde::de::Error::custom)
            }
            Repr::Structured { name, args } => Ok(PredicateDefinition { name, args }),
        }
    }
}

/// An admission-rule template attached to a route
///
/// The `resource` field is a template placeholder only: the route compiler
/// always overwrites it with the route's synthetic id, warning if a value was
/// supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Ignored if set; the compiler generates the resource id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Admission threshold (requests per second for QPS, concurrent entries
    /// for the concurrency strategy)
    pub threshold: f64,

    /// Admission strategy
    #[serde(default)]
    pub strategy: FlowStrategy,

    /// Extra burst allowance on top of the threshold (QPS strategy only)
    #[serde(default)]
    pub burst: u32,
}

/// A declarative route: ordered predicates plus its admission rules
///
/// A route with zero predicates matches every request. Declaration order of
/// routes is significant: the dispatcher uses first-match-wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Predicates AND-combined in declaration order
    #[serde(default)]
    pub predicates: Vec<PredicateDefinition>,

    /// Admission rules bound to this route's synthetic resource id
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// Top-level flowgate configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowgateConfig {
    /// Ordered route definitions
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
}

impl FlowgateConfig {
    /// Load configuration from a YAML or JSON file (decided by extension)
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> FlowgateResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration before it is applied
    ///
    /// Validation failures abort the load/reload; the previously applied
    /// configuration keeps serving.
    pub fn validate(&self) -> FlowgateResult<()> {
        for (i, route) in self.routes.iter().enumerate() {
            for predicate in &route.predicates {
                if predicate.name.trim().is_empty() {
                    return Err(FlowgateError::config(format!(
                        "Route {} has a predicate with an empty name",
                        i
                    )));
                }
            }
            for rule in &route.rules {
                if rule.threshold < 0.0 {
                    return Err(FlowgateError::config(format!(
                        "Route {} has a rule with negative threshold {}",
                        i, rule.threshold
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Event emitted when the configuration changes
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    /// Path of the configuration file that changed
    pub file_path: PathBuf,

    /// The freshly loaded and validated configuration
    pub config: FlowgateConfig,
}

/// Configuration manager with hot reloading
///
/// Loads the initial configuration, watches the file's parent directory for
/// changes (watching the directory rather than the file survives editors that
/// write via rename), and broadcasts validated updates to subscribers. An
/// invalid file on reload is logged and skipped; the last good configuration
/// keeps serving.
pub struct ConfigManager {
    current_config: Arc<RwLock<FlowgateConfig>>,
    config_path: PathBuf,
    _watcher: Option<notify::RecommendedWatcher>,
    change_sender: broadcast::Sender<ConfigChangeEvent>,
}

impl ConfigManager {
    /// Create a manager, loading the initial configuration and starting the
    /// file watcher
    pub async fn new<P: AsRef<Path>>(config_path: P) -> FlowgateResult<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = FlowgateConfig::load_from_file(&config_path).await?;

        let (change_sender, _) = broadcast::channel(16);

        let mut manager = Self {
            current_config: Arc::new(RwLock::new(config)),
            config_path,
            _watcher: None,
            change_sender,
        };
        manager.setup_file_watcher()?;
        Ok(manager)
    }

    /// Get a clone of the current configuration
    pub async fn get_config(&self) -> FlowgateConfig {
        self.current_config.read().await.clone()
    }

    /// Subscribe to configuration change events
    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_sender.subscribe()
    }

    /// Manually reload configuration from the file
    pub async fn reload_config(&self) -> FlowgateResult<()> {
        tracing::info!("Reloading configuration from {:?}", self.config_path);
        let new_config = FlowgateConfig::load_from_file(&self.config_path).await?;
        Self::apply_update(
            &self.current_config,
            &self.change_sender,
            &self.config_path,
            new_config,
        )
        .await;
        Ok(())
    }

    /// Atomically apply a validated configuration and notify subscribers
    async fn apply_update(
        current: &Arc<RwLock<FlowgateConfig>>,
        sender: &broadcast::Sender<ConfigChangeEvent>,
        path: &Path,
        new_config: FlowgateConfig,
    ) {
        {
            let mut config = current.write().await;
            *config = new_config.clone();
        }
        // Ignore send errors; no subscribers is fine
        let _ = sender.send(ConfigChangeEvent {
            file_path: path.to_path_buf(),
            config: new_config,
        });
        tracing::info!("Configuration updated");
    }

    /// Set up the file system watcher driving hot reloads
    fn setup_file_watcher(&mut self) -> FlowgateResult<()> {
        let config_path = self.config_path.clone();
        let current_config = Arc::clone(&self.current_config);
        let change_sender = self.change_sender.clone();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| FlowgateError::config(format!("Failed to create file watcher: {}", e)))?;

        if let Some(parent_dir) = config_path.parent() {
            watcher
                .watch(parent_dir, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    FlowgateError::config(format!("Failed to watch config directory: {}", e))
                })?;
        }
        self._watcher = Some(watcher);

        let config_file_name = config_path
            .file_name()
            .ok_or_else(|| FlowgateError::config("Invalid config file path"))?
            .to_owned();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let is_config_file_event = event
                    .paths
                    .iter()
                    .any(|path| path.file_name() == Some(&config_file_name));
                if !is_config_file_event {
                    continue;
                }

                match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) => {
                        tracing::info!("Configuration file changed, reloading...");
                        // Small delay so the writer finishes before we read
                        tokio::time::sleep(Duration::from_millis(100)).await;

                        match FlowgateConfig::load_from_file(&config_path).await {
                            Ok(new_config) => {
                                Self::apply_update(
                                    &current_config,
                                    &change_sender,
                                    &config_path,
                                    new_config,
                                )
                                .await;
                            }
                            Err(e) => {
                                tracing::error!("Failed to reload configuration: {}", e);
                            }
                        }
                    }
                    _ => {}
                }
            }
        });

        tracing::info!("File watcher set up for configuration hot reloading");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compact_predicate() {
        let def = PredicateDefinition::parse("path=/a,/b").unwrap();
        assert_eq!(def.name, "path");
        assert_eq!(def.args.get("_genkey_0"), Some(&"/a".to_string()));
        assert_eq!(def.args.get("_genkey_1"), Some(&"/b".to_string()));
    }

    #[test]
    fn test_parse_rejects_missing_equals() {
        assert!(PredicateDefinition::parse("path").is_err());
        assert!(PredicateDefinition::parse("=value").is_err());
    }

    #[test]
    fn test_deserialize_both_shapes() {
        let yaml = r#"
routes:
  - predicates:
      - "path=/api/orders"
      - name: header
        args:
          header: x-canary
          regexp: "on"
    rules:
      - threshold: 5
"#;
        let config: FlowgateConfig = serde_yaml::from_str(yaml).unwrap();
        let route = &config.routes[0];
        assert_eq!(route.predicates.len(), 2);
        assert_eq!(route.predicates[0].name, "path");
        assert_eq!(
            route.predicates[0].args.get("_genkey_0"),
            Some(&"/api/orders".to_string())
        );
        assert_eq!(route.predicates[1].name, "header");
        assert_eq!(
            route.predicates[1].args.get("header"),
            Some(&"x-canary".to_string())
        );
        assert_eq!(route.rules[0].threshold, 5.0);
        assert_eq!(route.rules[0].strategy, FlowStrategy::Qps);
    }

    #[test]
    fn test_structural_equality_for_no_op_detection() {
        let a: FlowgateConfig = serde_yaml::from_str("routes: [{predicates: ['path=/a']}]").unwrap();
        let b: FlowgateConfig = serde_yaml::from_str("routes: [{predicates: ['path=/a']}]").unwrap();
        let c: FlowgateConfig = serde_yaml::from_str("routes: [{predicates: ['path=/b']}]").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_validate_rejects_negative_threshold() {
        let config: FlowgateConfig =
            serde_yaml::from_str("routes: [{rules: [{threshold: -1}]}]").unwrap();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowgate.yaml");
        tokio::fs::write(
            &path,
            "routes:\n  - predicates: ['path=/a']\n    rules:\n      - threshold: 1\n",
        )
        .await
        .unwrap();

        let config = FlowgateConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].rules[0].threshold, 1.0);
    }
}
