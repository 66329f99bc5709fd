//! Category/name keyed registry for pluggable provider implementations.
//!
//! Providers are heterogeneous: the registry imposes no shared interface
//! beyond "constructible, carries a category and a unique name within it".
//! Instances are stored type-erased and downcast on lookup.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{ComponentDescriptor, MarkerKind};

/// Closed set of provider categories. Adding a category is a code change,
/// never a runtime registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    TextGeneration,
    Storage,
    Messaging,
    Tool,
    Memory,
    Queue,
    Evaluation,
    Orchestration,
}

impl ProviderCategory {
    pub const ALL: &'static [ProviderCategory] = &[
        ProviderCategory::TextGeneration,
        ProviderCategory::Storage,
        ProviderCategory::Messaging,
        ProviderCategory::Tool,
        ProviderCategory::Memory,
        ProviderCategory::Queue,
        ProviderCategory::Evaluation,
        ProviderCategory::Orchestration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderCategory::TextGeneration => "text_generation",
            ProviderCategory::Storage => "storage",
            ProviderCategory::Messaging => "messaging",
            ProviderCategory::Tool => "tool",
            ProviderCategory::Memory => "memory",
            ProviderCategory::Queue => "queue",
            ProviderCategory::Evaluation => "evaluation",
            ProviderCategory::Orchestration => "orchestration",
        }
    }
}

impl fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderCategory {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ProviderError::UnknownCategory {
                input: s.to_string(),
            })
    }
}

/// Structured errors for provider registration and lookup.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no provider registered under {category}/{name}")]
    NotFound { category: ProviderCategory, name: String },
    #[error("unknown provider category '{input}', expected one of: {}",
        ProviderCategory::ALL.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", "))]
    UnknownCategory { input: String },
    #[error("'{type_name}' does not carry a provider marker")]
    NotAProvider { type_name: &'static str },
    #[error("provider '{type_name}' has no name; provider markers require one")]
    Unnamed { type_name: &'static str },
}

struct ProviderSlot {
    instance: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    metadata: HashMap<String, String>,
}

/// Two-level provider map: category → name → instance. Storage is a sharded
/// concurrent map keyed by (category, name), so lookups in one category never
/// contend with writes in another.
#[derive(Default)]
pub struct ProviderRegistry {
    slots: DashMap<(ProviderCategory, String), ProviderSlot>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for entry in self.slots.iter() {
            *counts.entry(entry.key().0.as_str()).or_default() += 1;
        }
        f.debug_struct("ProviderRegistry")
            .field("categories", &counts)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the slot at (category, name). Replacement is logged,
    /// never silent.
    pub fn register<T: Send + Sync + 'static>(
        &self,
        category: ProviderCategory,
        name: impl Into<String>,
        instance: Arc<T>,
    ) {
        self.register_slot(
            category,
            name.into(),
            instance,
            type_name::<T>(),
            HashMap::new(),
        );
    }

    /// Register a discovered provider, deriving category, name, and opaque
    /// metadata from its descriptor.
    pub fn register_from_descriptor(
        &self,
        descriptor: &ComponentDescriptor,
        instance: Arc<dyn Any + Send + Sync>,
    ) -> Result<(), ProviderError> {
        let MarkerKind::Provider(category) = descriptor.marker else {
            return Err(ProviderError::NotAProvider {
                type_name: descriptor.type_name,
            });
        };
        let name = descriptor.name.ok_or(ProviderError::Unnamed {
            type_name: descriptor.type_name,
        })?;
        let metadata = descriptor
            .metadata
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.register_slot(
            category,
            name.to_string(),
            instance,
            descriptor.type_name,
            metadata,
        );
        Ok(())
    }

    fn register_slot(
        &self,
        category: ProviderCategory,
        name: String,
        instance: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
        metadata: HashMap<String, String>,
    ) {
        use dashmap::mapref::entry::Entry;
        let slot = ProviderSlot {
            instance,
            type_name,
            metadata,
        };
        match self.slots.entry((category, name)) {
            Entry::Occupied(mut occupied) => {
                let (category, name) = occupied.key().clone();
                tracing::warn!(
                    category = %category,
                    name = %name,
                    previous = occupied.get().type_name,
                    replacement = type_name,
                    "replacing provider registration"
                );
                occupied.insert(slot);
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(
                    category = %vacant.key().0,
                    name = %vacant.key().1,
                    provider = type_name,
                    "provider registered"
                );
                vacant.insert(slot);
            }
        }
    }

    /// Lookup by (category, name). A miss is `None`, never an error.
    pub fn get(
        &self,
        category: ProviderCategory,
        name: &str,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        self.slots
            .get(&(category, name.to_string()))
            .map(|slot| slot.instance.clone())
    }

    /// Typed lookup; `None` covers both "absent" and "registered under a
    /// different concrete type".
    pub fn get_as<T: Send + Sync + 'static>(
        &self,
        category: ProviderCategory,
        name: &str,
    ) -> Option<Arc<T>> {
        self.get(category, name).and_then(|i| i.downcast::<T>().ok())
    }

    /// Lookup for callers that treat a miss as fatal.
    pub fn get_required(
        &self,
        category: ProviderCategory,
        name: &str,
    ) -> Result<Arc<dyn Any + Send + Sync>, ProviderError> {
        self.get(category, name).ok_or_else(|| ProviderError::NotFound {
            category,
            name: name.to_string(),
        })
    }

    /// Point-in-time snapshot of one category; later registrations do not
    /// show up in a snapshot already taken.
    pub fn all_in_category(
        &self,
        category: ProviderCategory,
    ) -> HashMap<String, Arc<dyn Any + Send + Sync>> {
        self.slots
            .iter()
            .filter(|entry| entry.key().0 == category)
            .map(|entry| (entry.key().1.clone(), entry.value().instance.clone()))
            .collect()
    }

    pub fn count_in_category(&self, category: ProviderCategory) -> usize {
        self.slots.iter().filter(|entry| entry.key().0 == category).count()
    }

    /// Opaque marker metadata captured at registration, if any.
    pub fn metadata(
        &self,
        category: ProviderCategory,
        name: &str,
    ) -> Option<HashMap<String, String>> {
        self.slots
            .get(&(category, name.to_string()))
            .map(|slot| slot.metadata.clone())
    }

    /// The concrete type id behind a slot, mostly useful in diagnostics.
    pub fn instance_type(&self, category: ProviderCategory, name: &str) -> Option<TypeId> {
        self.slots
            .get(&(category, name.to_string()))
            .map(|slot| slot.instance.as_ref().type_id())
    }
}
