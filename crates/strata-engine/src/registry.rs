//! Provider registry
//!
//! Built once at process start and passed to the controller builder; there is no
//! global provider table.

use std::collections::HashMap;
use std::sync::Arc;

use strata_common::crd::EngineKind;
use strata_common::Error;

use crate::provider::Provider;

/// Providers available to this process, keyed by engine
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<EngineKind, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under the engine it reports
    ///
    /// Registering two providers for the same engine is an error.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<(), Error> {
        let engine = provider.engine();
        if self.providers.contains_key(&engine) {
            return Err(Error::internal_with_context(
                "registry",
                format!("provider for engine {engine} is already registered"),
            ));
        }
        self.providers.insert(engine, provider);
        Ok(())
    }

    /// Chaining form of [`register`](Self::register)
    pub fn with(mut self, provider: Arc<dyn Provider>) -> Result<Self, Error> {
        self.register(provider)?;
        Ok(self)
    }

    /// Look up the provider for an engine
    pub fn get(&self, engine: EngineKind) -> Result<Arc<dyn Provider>, Error> {
        self.providers.get(&engine).cloned().ok_or_else(|| {
            Error::internal_with_context(
                "registry",
                format!("no provider registered for engine {engine}"),
            )
        })
    }

    /// Engines with a registered provider, sorted by name
    pub fn engines(&self) -> Vec<EngineKind> {
        let mut engines: Vec<_> = self.providers.keys().copied().collect();
        engines.sort_by_key(|e| e.as_str());
        engines
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}
