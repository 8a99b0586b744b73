// src/core/registry.rs

//! The strategy registry: the key namespace engines publish their strategies in.
//!
//! - `moonship.engines`: set of engine names
//! - `moonship.<engine>.strategies`: set of strategy names
//! - `moonship.<engine>.strategies.<name>`: map of strategy attributes
//! - `moonship.<engine>.strategies.<name>.config`: map of strategy configuration
//!
//! The `markets` configuration field is stored as one comma-separated string.

use crate::core::MoonshipError;
use crate::core::cache::SharedCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

pub const ENGINES_KEY: &str = "moonship.engines";
const MARKETS_FIELD: &str = "markets";
const MARKETS_DELIMITER: char = ',';

pub fn strategies_key(engine: &str) -> String {
    format!("moonship.{engine}.strategies")
}

pub fn strategy_key(engine: &str, name: &str) -> String {
    format!("moonship.{engine}.strategies.{name}")
}

pub fn strategy_config_key(engine: &str, name: &str) -> String {
    format!("{}.config", strategy_key(engine, name))
}

/// A configuration value: plain text, or a list for fields stored delimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Text(String),
    List(Vec<String>),
}

impl ConfigValue {
    fn from_stored(field: &str, value: String) -> Self {
        if field == MARKETS_FIELD {
            ConfigValue::List(value.split(MARKETS_DELIMITER).map(str::to_string).collect())
        } else {
            ConfigValue::Text(value)
        }
    }

    fn to_stored(&self) -> String {
        match self {
            ConfigValue::Text(text) => text.clone(),
            ConfigValue::List(items) => items.join(&MARKETS_DELIMITER.to_string()),
        }
    }
}

/// A strategy as published by its engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub name: String,
    pub engine: String,
    /// Free-form attributes such as `status`.
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
    pub config: BTreeMap<String, ConfigValue>,
}

impl StrategyRecord {
    pub fn new(engine: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: engine.into(),
            attributes: BTreeMap::new(),
            config: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(field.into(), value.into());
        self
    }

    pub fn with_config(mut self, field: impl Into<String>, value: ConfigValue) -> Self {
        self.config.insert(field.into(), value);
        self
    }

    pub fn to_json(&self) -> Result<serde_json::Value, MoonshipError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Typed access to the registry keys through the shared cache.
pub struct StrategyRegistry {
    cache: Arc<dyn SharedCache>,
}

impl StrategyRegistry {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { cache }
    }

    /// Engine names, sorted.
    pub async fn list_engines(&self) -> Result<Vec<String>, MoonshipError> {
        let mut engines: Vec<String> = self
            .cache
            .set_get_elements(ENGINES_KEY)
            .await?
            .into_iter()
            .collect();
        engines.sort();
        Ok(engines)
    }

    /// Every strategy of every engine, ordered by engine then name. Names listed
    /// without a stored attribute map are skipped.
    pub async fn list_strategies(&self) -> Result<Vec<StrategyRecord>, MoonshipError> {
        let mut strategies = Vec::new();
        for engine in self.list_engines().await? {
            let mut names: Vec<String> = self
                .cache
                .set_get_elements(&strategies_key(&engine))
                .await?
                .into_iter()
                .collect();
            names.sort();
            for name in names {
                if let Some(strategy) = self.get_strategy(&name, &engine).await? {
                    strategies.push(strategy);
                }
            }
        }
        Ok(strategies)
    }

    /// Fetches one strategy. An empty attribute map means there is no such strategy.
    pub async fn get_strategy(
        &self,
        name: &str,
        engine: &str,
    ) -> Result<Option<StrategyRecord>, MoonshipError> {
        let mut attributes = self.cache.map_get_entries(&strategy_key(engine, name)).await?;
        if attributes.is_empty() {
            return Ok(None);
        }
        attributes.remove("name");
        attributes.remove("engine");
        attributes.remove("config");

        let config = self
            .cache
            .map_get_entries(&strategy_config_key(engine, name))
            .await?
            .into_iter()
            .map(|(field, value)| {
                let value = ConfigValue::from_stored(&field, value);
                (field, value)
            })
            .collect();

        Ok(Some(StrategyRecord {
            name: name.to_string(),
            engine: engine.to_string(),
            attributes: attributes.into_iter().collect(),
            config,
        }))
    }

    /// Publishes a strategy, replacing any previous attributes and configuration,
    /// in one transactional commit.
    pub async fn register_strategy(&self, strategy: &StrategyRecord) -> Result<(), MoonshipError> {
        let key = strategy_key(&strategy.engine, &strategy.name);
        let config_key = strategy_config_key(&strategy.engine, &strategy.name);
        let attributes: HashMap<String, String> = strategy
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let config: HashMap<String, String> = strategy
            .config
            .iter()
            .map(|(k, v)| (k.clone(), v.to_stored()))
            .collect();

        self.cache
            .start_bulk(true)
            .set_add(ENGINES_KEY, &strategy.engine)
            .set_add(&strategies_key(&strategy.engine), &strategy.name)
            .delete(&key)
            .map_put(&key, &attributes)
            .delete(&config_key)
            .map_put(&config_key, &config)
            .execute()
            .await?;
        info!(
            "Strategy '{}' registered for engine '{}'.",
            strategy.name, strategy.engine
        );
        Ok(())
    }

    /// Merges attribute updates (e.g. a new `status`) into a published strategy.
    pub async fn update_attributes(
        &self,
        engine: &str,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), MoonshipError> {
        self.cache
            .map_put(&strategy_key(engine, name), attributes, true)
            .await
    }

    /// Removes a strategy and its configuration in one transactional commit.
    /// The engine stays listed.
    pub async fn unregister_strategy(&self, engine: &str, name: &str) -> Result<(), MoonshipError> {
        self.cache
            .start_bulk(true)
            .set_remove(&strategies_key(engine), name)
            .delete(&strategy_key(engine, name))
            .delete(&strategy_config_key(engine, name))
            .execute()
            .await?;
        info!("Strategy '{}' unregistered from engine '{}'.", name, engine);
        Ok(())
    }
}
