use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Dryrun,
    Fal,
    Gemini,
    Veo,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dryrun => "dryrun",
            Self::Fal => "fal",
            Self::Gemini => "gemini",
            Self::Veo => "veo",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a provider answers inline or hands back a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Sync,
    Async,
}

/// How a provider wants reference images delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetTransport {
    Hosted,
    Inline,
}

pub trait NamedProvider {
    fn name(&self) -> ProviderKind;
}

/// Provider lookup keyed by [`ProviderKind`], keeping registration order.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

impl<T: NamedProvider> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    /// Replaces any provider already registered under the same name.
    pub fn register(&mut self, provider: T) {
        let name = provider.name();
        self.providers.retain(|existing| existing.name() != name);
        self.providers.push(provider);
    }

    pub fn get(&self, name: ProviderKind) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
    }

    pub fn list(&self) -> Vec<ProviderKind> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name())
            .collect::<Vec<ProviderKind>>();
        names.sort();
        names
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::{NamedProvider, ProviderKind, ProviderRegistry};

    #[derive(Clone, Debug)]
    struct DummyProvider {
        name: ProviderKind,
        tag: &'static str,
    }

    impl NamedProvider for DummyProvider {
        fn name(&self) -> ProviderKind {
            self.name
        }
    }

    #[test]
    fn registry_lists_sorted_but_keeps_registration_order() {
        let registry = ProviderRegistry::new(vec![
            DummyProvider {
                name: ProviderKind::Veo,
                tag: "v",
            },
            DummyProvider {
                name: ProviderKind::Dryrun,
                tag: "d",
            },
            DummyProvider {
                name: ProviderKind::Fal,
                tag: "f",
            },
        ]);
        assert_eq!(
            registry.list(),
            vec![ProviderKind::Dryrun, ProviderKind::Fal, ProviderKind::Veo]
        );
        assert_eq!(
            registry
                .providers()
                .iter()
                .map(|provider| provider.tag)
                .collect::<Vec<&str>>(),
            vec!["v", "d", "f"]
        );
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = ProviderRegistry::default();
        registry.register(DummyProvider {
            name: ProviderKind::Fal,
            tag: "old",
        });
        registry.register(DummyProvider {
            name: ProviderKind::Fal,
            tag: "new",
        });
        assert_eq!(registry.providers().len(), 1);
        assert_eq!(registry.get(ProviderKind::Fal).map(|p| p.tag), Some("new"));
        assert!(registry.get(ProviderKind::Gemini).is_none());
    }
}
