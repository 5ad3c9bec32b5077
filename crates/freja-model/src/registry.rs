// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Driver registry: provider metadata plus the factory table that maps a
//! `(provider, model)` pair to a live [`ModelDriver`].
//!
//! Wire-level driver implementations live with their host applications;
//! the core registers them here at startup.  The registry ships with the
//! mock provider so tests and dry runs work without any wiring.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{catalog, mock::MockDriver, ModelDescriptor, ModelDriver};

/// Metadata describing a registered provider.
#[derive(Debug, Clone)]
pub struct DriverMeta {
    /// Unique provider id used in `<provider>/<model>` references.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// Default environment variable that holds the API key.
    /// `None` for providers that require no key.
    pub default_api_key_env: Option<&'static str>,
}

/// Providers the registry knows about.
pub static DRIVERS: &[DriverMeta] = &[
    DriverMeta {
        id: "anthropic",
        name: "Anthropic",
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
    },
    DriverMeta {
        id: "openai",
        name: "OpenAI",
        default_api_key_env: Some("OPENAI_API_KEY"),
    },
    DriverMeta {
        id: "mock",
        name: "Mock",
        default_api_key_env: None,
    },
];

/// Look up provider metadata by id.  Returns `None` for unknown ids.
pub fn get_driver_meta(id: &str) -> Option<&'static DriverMeta> {
    DRIVERS.iter().find(|d| d.id == id)
}

/// Constructs drivers for one provider.
pub trait DriverFactory: Send + Sync {
    fn create(&self, model_id: &str) -> anyhow::Result<Arc<dyn ModelDriver>>;
}

impl<F> DriverFactory for F
where
    F: Fn(&str) -> anyhow::Result<Arc<dyn ModelDriver>> + Send + Sync,
{
    fn create(&self, model_id: &str) -> anyhow::Result<Arc<dyn ModelDriver>> {
        self(model_id)
    }
}

/// Maps provider ids to driver factories and resolves models against the
/// catalog.
pub struct DriverRegistry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// Empty registry with only the built-in mock provider.
    pub fn new() -> Self {
        let mut reg = Self {
            factories: HashMap::new(),
        };
        reg.register("mock", |model_id: &str| {
            Ok(Arc::new(MockDriver::named(model_id)) as Arc<dyn ModelDriver>)
        });
        reg
    }

    /// Register (or replace) the factory for a provider.
    pub fn register<F: DriverFactory + 'static>(&mut self, provider: impl Into<String>, f: F) {
        self.factories.insert(provider.into(), Arc::new(f));
    }

    /// Resolve `(provider, model)` to a descriptor and a streaming driver.
    ///
    /// Fails with a user-presentable message when the provider has no
    /// registered factory or the model is not in the catalog.
    pub fn resolve(
        &self,
        provider: &str,
        model_id: &str,
    ) -> anyhow::Result<(ModelDescriptor, Arc<dyn ModelDriver>)> {
        let factory = self.factories.get(provider).ok_or_else(|| {
            anyhow::anyhow!("unknown provider '{provider}' (no driver registered)")
        })?;
        let entry = catalog::lookup(provider, model_id)
            .ok_or_else(|| anyhow::anyhow!("unknown model '{provider}/{model_id}'"))?;
        let driver = factory.create(model_id)?;
        Ok((ModelDescriptor::from(entry), driver))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for d in DRIVERS {
            assert!(seen.insert(d.id), "duplicate provider id: {}", d.id);
        }
    }

    #[test]
    fn get_driver_meta_finds_known_ids() {
        assert_eq!(get_driver_meta("anthropic").unwrap().name, "Anthropic");
        assert!(get_driver_meta("no-such").is_none());
    }

    #[test]
    fn new_registry_resolves_mock_models() {
        let reg = DriverRegistry::new();
        let (desc, driver) = reg.resolve("mock", "mock-model").unwrap();
        assert_eq!(desc.provider, "mock");
        assert_eq!(driver.model_id(), "mock-model");
    }

    #[test]
    fn resolve_unknown_provider_names_it() {
        let reg = DriverRegistry::new();
        let err = match reg.resolve("nonexistent", "x") {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("unknown provider 'nonexistent'"));
    }

    #[test]
    fn resolve_unknown_model_names_it() {
        let reg = DriverRegistry::new();
        let err = match reg.resolve("mock", "no-such-model") {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("unknown model 'mock/no-such-model'"));
    }

    #[test]
    fn registered_factory_replaces_builtin() {
        let mut reg = DriverRegistry::new();
        reg.register("mock", |_: &str| {
            Ok(Arc::new(MockDriver::named("replaced")) as Arc<dyn ModelDriver>)
        });
        let (_, driver) = reg.resolve("mock", "mock-model").unwrap();
        assert_eq!(driver.model_id(), "replaced");
    }
}
