//! Protocol registry.
//!
//! Maps `(name, version)` to a factory. The registry is an ordinary value
//! handed to accounts at construction; nothing registers itself globally.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use tracing::debug;

use onegate_core::{BoxedProtocol, ProtocolFactory};

use crate::error::{RuntimeError, RuntimeResult};

/// Builds the `name.version` key.
pub fn protocol_key(name: &str, version: &str) -> String {
    format!("{name}.{version}")
}

/// Splits a `name.version` key.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('.')
        .filter(|(name, version)| !name.is_empty() && !version.is_empty())
}

/// Registry of protocol factories.
#[derive(Default)]
pub struct ProtocolRegistry {
    factories: RwLock<BTreeMap<String, ProtocolFactory>>,
}

impl ProtocolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the same key.
    pub fn register(&self, name: &str, version: &str, factory: ProtocolFactory) -> &Self {
        let key = protocol_key(name, version);
        debug!(protocol = %name, version = %version, "Registered protocol");
        self.factories.write().insert(key, factory);
        self
    }

    /// Creates a protocol handle.
    pub fn create(&self, name: &str, version: &str) -> RuntimeResult<BoxedProtocol> {
        self.create_by_key(&protocol_key(name, version))
    }

    /// Creates a protocol handle from a `name.version` key.
    pub fn create_by_key(&self, key: &str) -> RuntimeResult<BoxedProtocol> {
        let factories = self.factories.read();
        let factory = factories
            .get(key)
            .ok_or_else(|| RuntimeError::UnknownProtocol(key.to_string()))?;
        Ok(factory())
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.factories
            .read()
            .contains_key(&protocol_key(name, version))
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestProtocol;

    #[test]
    fn test_register_and_create() {
        let registry = ProtocolRegistry::new();
        registry.register("test", "v1", TestProtocol::factory());

        assert!(registry.contains("test", "v1"));
        assert!(!registry.contains("test", "v2"));
        assert_eq!(registry.keys(), vec!["test.v1".to_string()]);

        let protocol = registry.create("test", "v1").unwrap();
        assert_eq!(protocol.key(), "test.v1");
        assert!(registry.create_by_key("test.v1").is_ok());
    }

    #[test]
    fn test_unknown_protocol() {
        let registry = ProtocolRegistry::new();
        assert!(matches!(
            registry.create("onebot", "v13"),
            Err(RuntimeError::UnknownProtocol(key)) if key == "onebot.v13"
        ));
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("onebot.v11"), Some(("onebot", "v11")));
        assert_eq!(split_key("onebot"), None);
        assert_eq!(split_key(".v11"), None);
    }
}
