// ============================================================
// Layer 6: Registry
// ============================================================
// A name → factory map for one pluggable family (losses, metrics,
// monitors, callbacks, models). Registries are plain values owned
// by whoever builds them at start-up and handed to pipelines; there
// is no process-wide mutable table.
//
// Factories receive the component's JSON config so every family
// shares one construction signature:
//
//   registry.register("mae", |cfg| Ok(Box::new(Mae::from_config(cfg)?)))?;
//   let loss = registry.create("mae", &json!({}))?;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};

pub type Factory<T> = Box<dyn Fn(&Value) -> Result<T> + Send + Sync>;

pub struct Registry<T> {
    kind:      &'static str,
    factories: BTreeMap<String, Factory<T>>,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self { kind, factories: BTreeMap::new() }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register `factory` under `name`. Names are unique per registry.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&Value) -> Result<T> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(Error::config(
                format!("{}.{}", self.kind, name),
                "already registered",
            ));
        }
        self.factories.insert(name.to_string(), Box::new(factory));
        tracing::debug!("Registered {} '{}'", self.kind, name);
        Ok(())
    }

    pub fn create(&self, name: &str, config: &Value) -> Result<T> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::config(
                format!("{}.{}", self.kind, name),
                format!("not registered (known: {})", self.names().join(", ")),
            )
        })?;
        factory(config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}
