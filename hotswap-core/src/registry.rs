use crate::{SqlDriver, Strategy};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

struct DriverInstance {
    driver: Arc<dyn SqlDriver>,
    options: BTreeMap<String, String>,
}

/// Name-keyed registrations of wrapped drivers and watch strategies.
///
/// The registry is an explicit object built once at process start and
/// handed to [`crate::HotswapDriver`], so tests stay hermetic. Duplicate
/// registration panics: it is a wiring mistake made exactly once, at
/// startup, and should fail fast rather than at first use.
pub struct Registry {
    drivers: RwLock<HashMap<String, Arc<DriverInstance>>>,
    strategies: RwLock<HashMap<String, Arc<dyn Strategy>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
        }
    }

    /// Makes a database driver available under the provided name.
    ///
    /// # Panics
    /// Panics if the name is already registered.
    pub fn register_sql_driver(&self, name: &str, driver: Arc<dyn SqlDriver>) {
        self.register_sql_driver_with_options(name, driver, BTreeMap::new());
    }

    /// Like [`Self::register_sql_driver`], with fixed query parameters that
    /// are appended to every DSN opened through this driver. The underlying
    /// driver must support URL-style connection strings.
    pub fn register_sql_driver_with_options(
        &self,
        name: &str,
        driver: Arc<dyn SqlDriver>,
        options: BTreeMap<String, String>,
    ) {
        let mut drivers = self.drivers.write().expect("driver registry lock poisoned");
        if drivers.contains_key(name) {
            panic!("hotswap: register_sql_driver called twice for driver {name}");
        }
        drivers.insert(name.to_string(), Arc::new(DriverInstance { driver, options }));
    }

    /// Makes a watch strategy available under the provided scheme name.
    ///
    /// # Panics
    /// Panics if the name is already registered.
    pub fn register_strategy(&self, name: &str, strategy: Arc<dyn Strategy>) {
        let mut strategies = self
            .strategies
            .write()
            .expect("strategy registry lock poisoned");
        if strategies.contains_key(name) {
            panic!("hotswap: register_strategy called twice for strategy {name}");
        }
        strategies.insert(name.to_string(), strategy);
    }

    /// Removes and closes the named strategy. Does nothing when the name is
    /// not registered. Intended for test teardown.
    pub async fn unregister_strategy(&self, name: &str) {
        let removed = self
            .strategies
            .write()
            .expect("strategy registry lock poisoned")
            .remove(name);
        if let Some(strategy) = removed {
            strategy.close().await;
        }
    }

    /// Sorted names of the registered drivers.
    pub fn sql_drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .drivers
            .read()
            .expect("driver registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Sorted names of the registered strategies.
    pub fn strategies(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .strategies
            .read()
            .expect("strategy registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub(crate) fn sql_driver(
        &self,
        name: &str,
    ) -> Option<(Arc<dyn SqlDriver>, BTreeMap<String, String>)> {
        self.drivers
            .read()
            .expect("driver registry lock poisoned")
            .get(name)
            .map(|instance| (instance.driver.clone(), instance.options.clone()))
    }

    pub(crate) fn strategy(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies
            .read()
            .expect("strategy registry lock poisoned")
            .get(name)
            .cloned()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Registry;
    use crate::{Conn, Result, SqlDriver};
    use async_trait::async_trait;
    use std::{collections::BTreeMap, sync::Arc};

    struct DeadDriver;

    #[async_trait]
    impl SqlDriver for DeadDriver {
        async fn open(&self, _dsn: &str) -> Result<Box<dyn Conn>> {
            Err(anyhow::anyhow!("not implemented"))
        }
    }

    #[test]
    fn lists_drivers_sorted() {
        let registry = Registry::new();
        registry.register_sql_driver("postgres", Arc::new(DeadDriver));
        registry.register_sql_driver("mysql", Arc::new(DeadDriver));
        assert_eq!(registry.sql_drivers(), vec!["mysql", "postgres"]);
    }

    #[test]
    fn keeps_driver_options() {
        let registry = Registry::new();
        let options: BTreeMap<String, String> =
            [("a".to_string(), "b".to_string())].into_iter().collect();
        registry.register_sql_driver_with_options("postgres", Arc::new(DeadDriver), options);
        let (_, stored) = registry.sql_driver("postgres").unwrap();
        assert_eq!(stored.get("a").map(String::as_str), Some("b"));
    }

    #[test]
    #[should_panic(expected = "called twice")]
    fn rejects_duplicate_driver() {
        let registry = Registry::new();
        registry.register_sql_driver("postgres", Arc::new(DeadDriver));
        registry.register_sql_driver("postgres", Arc::new(DeadDriver));
    }

    #[tokio::test]
    async fn unregistering_an_unknown_strategy_is_a_no_op() {
        let registry = Registry::new();
        registry.unregister_strategy("nope").await;
        assert!(registry.strategies().is_empty());
    }
}
