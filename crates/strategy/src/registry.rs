//! Strategy registry.
//!
//! Maps a strategy name to a factory that builds a fresh, unfitted instance.
//! The backtest engine calls the factory once per fold so folds never share
//! model state.

use crate::base_rate::BaseRateStrategy;
use crate::ma_crossover::MaCrossoverStrategy;
use anyhow::{anyhow, Result};
use btc_predictor_core::{Strategy, StrategyFactory};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in strategies.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(crate::ma_crossover::NAME, || {
            Box::new(MaCrossoverStrategy::default())
        });
        registry.register(crate::base_rate::NAME, || Box::new(BaseRateStrategy::default()));
        registry
    }

    /// Registers a factory under `name`, replacing any existing entry.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Returns the factory registered under `name`.
    ///
    /// # Errors
    /// Returns an error listing the known names if `name` is not registered.
    pub fn get(&self, name: &str) -> Result<StrategyFactory> {
        self.factories.get(name).cloned().ok_or_else(|| {
            anyhow!(
                "unknown strategy '{name}', available: {}",
                self.names().join(", ")
            )
        })
    }

    /// Builds a new instance of `name`.
    ///
    /// # Errors
    /// Returns an error if `name` is not registered.
    pub fn create(&self, name: &str) -> Result<Box<dyn Strategy>> {
        let factory = self.get(name)?;
        Ok(factory())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["base_rate", "ma_crossover"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_create_builds_named_strategy() {
        let registry = StrategyRegistry::with_defaults();
        let strategy = registry.create("base_rate").unwrap();
        assert_eq!(strategy.name(), "base_rate");
        assert!(strategy.requires_fitting());
    }

    #[test]
    fn test_unknown_name_lists_available() {
        let registry = StrategyRegistry::with_defaults();
        let err = registry.get("xgboost_v9").err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("xgboost_v9"));
        assert!(msg.contains("ma_crossover"));
    }

    #[test]
    fn test_factory_builds_independent_instances() {
        use btc_predictor_core::Candle;
        use chrono::{Duration, TimeZone, Utc};

        let registry = StrategyRegistry::with_defaults();
        let factory = registry.get("base_rate").unwrap();
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let history: Vec<Candle> = (0..200)
            .map(|i| {
                let c = f64::from(i);
                Candle::new(start + Duration::minutes(i64::from(i)), c, c, c, c, 1.0)
            })
            .collect();

        let mut fitted = factory();
        fitted.fit(&history, 5).unwrap();
        let fresh = factory();

        assert!(fitted.predict(&history, 5).is_ok());
        assert!(fresh.predict(&history, 5).is_err());
    }
}
