//! Named drivers, created on first use.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use rwsplit_core::ConfigError;
use tracing::debug;

use crate::config::DbConfig;
use crate::connector::{Connector, MySqlConnector};
use crate::driver::{Driver, DriverOptions};
use crate::selector::{RandomSelector, ReplicaSelector};

/// Name used by [`Registry::default_instance`].
pub const DEFAULT_INSTANCE: &str = "default";

type SelectorFactory = Box<dyn Fn() -> Box<dyn ReplicaSelector> + Send>;

/// Holds at most one [`Driver`] per name, all built from the same
/// configuration.
///
/// The registry is owned by the caller. Dropping it, or calling
/// [`clear`](Self::clear) or [`remove`](Self::remove), drops the affected
/// drivers and closes their connections.
pub struct Registry<C: Connector + Clone = MySqlConnector> {
    config: DbConfig,
    connector: C,
    selectors: Option<SelectorFactory>,
    options: DriverOptions,
    drivers: HashMap<String, Driver<C>>,
}

impl<C: Connector + Clone> std::fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Registry")
            .field("active", &self.config.active)
            .field("drivers", &names)
            .finish_non_exhaustive()
    }
}

impl Registry<MySqlConnector> {
    pub fn new(config: DbConfig) -> Self {
        Self::with_connector(config, MySqlConnector::new())
    }
}

impl<C: Connector + Clone> Registry<C> {
    pub fn with_connector(config: DbConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            selectors: None,
            options: DriverOptions::default(),
            drivers: HashMap::new(),
        }
    }

    /// Give every driver created from now on its own selector from `factory`
    /// instead of a [`RandomSelector`].
    pub fn selector_factory(
        mut self,
        factory: impl Fn() -> Box<dyn ReplicaSelector> + Send + 'static,
    ) -> Self {
        self.selectors = Some(Box::new(factory));
        self
    }

    /// Options for drivers created from now on.
    pub fn driver_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// The driver named `name`, creating it on first use.
    ///
    /// Creation only validates the configuration; no connection is opened
    /// until a statement needs one.
    pub fn instance(&mut self, name: &str) -> Result<&mut Driver<C>, ConfigError> {
        match self.drivers.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let selector: Box<dyn ReplicaSelector> = match &self.selectors {
                    Some(factory) => factory(),
                    None => Box::new(RandomSelector::new()),
                };
                let driver =
                    Driver::with_selector(name, &self.config, self.connector.clone(), selector)?
                        .with_options(self.options);
                debug!(driver = name, "Registered driver");
                Ok(entry.insert(driver))
            }
        }
    }

    /// The driver named [`DEFAULT_INSTANCE`].
    pub fn default_instance(&mut self) -> Result<&mut Driver<C>, ConfigError> {
        self.instance(DEFAULT_INSTANCE)
    }

    pub fn get(&self, name: &str) -> Option<&Driver<C>> {
        self.drivers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Driver<C>> {
        self.drivers.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Take a driver out of the registry; the next `instance` call for the
    /// name builds a new one.
    pub fn remove(&mut self, name: &str) -> Option<Driver<C>> {
        self.drivers.remove(name)
    }

    /// Drop every driver.
    pub fn clear(&mut self) {
        debug!(count = self.drivers.len(), "Clearing registry");
        self.drivers.clear();
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}
