//! Provider lookup by name.

use crate::error::ProviderError;
use crate::providers::echo::EchoProvider;
use crate::traits::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Providers available to llm-call steps, keyed by [`Provider::name`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing only the offline echo provider.
    pub fn with_echo() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoProvider));
        registry
    }

    /// Register a provider. Replaces any existing provider with the same name.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers.get(name).cloned().ok_or_else(|| {
            debug!(provider = name, known = ?self.names(), "provider not registered");
            ProviderError::UnknownProvider(name.to_string())
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let registry = ProviderRegistry::with_echo();
        assert!(registry.has("echo"));
        assert_eq!(registry.get("echo").unwrap().name(), "echo");
        assert!(matches!(
            registry.get("anthropic"),
            Err(ProviderError::UnknownProvider(_))
        ));
        assert_eq!(registry.names(), vec!["echo"]);
    }
}
