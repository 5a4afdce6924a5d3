//! bf-registry - string-keyed component constructors for batchflow.
//!
//! A [`Registry`] maps a type name from configuration (`"synthetic"`,
//! `"checksum"`) to a constructor. Registries are plain values: build one at
//! startup, register what the binary ships, and hand it to whatever needs to
//! construct components. Tests build their own registries with fakes.
//!
//! # Example
//!
//! ```
//! use bf_registry::Registry;
//!
//! let mut registry: Registry<String, u32> = Registry::new("greeting");
//! registry
//!     .register("hello", |n: &u32| Ok(format!("hello x{n}")))
//!     .unwrap();
//!
//! assert_eq!(registry.create("hello", &2).unwrap(), "hello x2");
//! assert!(registry.create("bye", &2).is_err());
//! ```

use bf_error::{RegistryError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Constructor stored in a [`Registry`].
pub type Constructor<T, C> = Box<dyn Fn(&C) -> Result<T> + Send + Sync>;

/// Mapping from a type name to a constructor taking a configuration `C`.
///
/// Keys are kept sorted so listings are stable.
pub struct Registry<T, C> {
    /// Kind of component, used in error messages ("producer", "step").
    kind: String,

    /// Registered constructors by key.
    constructors: BTreeMap<String, Constructor<T, C>>,
}

impl<T, C> Registry<T, C> {
    /// Creates an empty registry for components of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            constructors: BTreeMap::new(),
        }
    }

    /// Kind of component this registry constructs.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Registers a constructor under `key`.
    ///
    /// Fails with [`RegistryError::Duplicate`] if the key is taken; each type
    /// can only be registered once.
    pub fn register<F>(&mut self, key: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(&C) -> Result<T> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.constructors.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                kind: self.kind.clone(),
                key,
            }
            .into());
        }
        self.constructors.insert(key, Box::new(constructor));
        Ok(())
    }

    /// Constructs the component registered under `key`.
    ///
    /// Fails with [`RegistryError::Unknown`] listing the known keys when
    /// nothing is registered under `key`.
    pub fn create(&self, key: &str, config: &C) -> Result<T> {
        let constructor = self.constructors.get(key).ok_or_else(|| RegistryError::Unknown {
            kind: self.kind.clone(),
            key: key.to_string(),
            known: self.keys().join(", "),
        })?;

        debug!(kind = %self.kind, key, "Creating component");
        constructor(config)
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Returns true if `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    /// Number of registered constructors.
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl<T, C> std::fmt::Debug for Registry<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("keys", &self.keys())
            .finish()
    }
}
