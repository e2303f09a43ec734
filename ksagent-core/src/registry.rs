//! Action registry: (resource kind, verb) to handler
//!
//! The registry is assembled once through [`RegistryBuilder`] and is read-only
//! afterwards. It is shared behind an `Arc` and lookups take no lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{DispatchError, RegistryError};
use crate::handler::ActionHandler;
use crate::protocol::Verb;

type VerbTable = BTreeMap<Verb, Arc<dyn ActionHandler>>;

/// Immutable handler table
#[derive(Default)]
pub struct ActionRegistry {
    kinds: BTreeMap<String, VerbTable>,
}

impl ActionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Handler registered for (kind, verb)
    pub fn lookup(&self, kind: &str, verb: Verb) -> Option<&Arc<dyn ActionHandler>> {
        self.kinds.get(kind)?.get(&verb)
    }

    /// Resolve wire strings to a handler
    ///
    /// An unknown kind, an unknown verb spelling, or a verb the kind does not
    /// support are all the same `UnsupportedAction`.
    pub fn resolve(&self, kind: &str, action: &str) -> Result<&Arc<dyn ActionHandler>, DispatchError> {
        Verb::parse(action)
            .and_then(|verb| self.lookup(kind, verb))
            .ok_or_else(|| DispatchError::UnsupportedAction {
                kind: kind.to_string(),
                action: action.to_string(),
            })
    }

    /// Registered resource kinds, sorted
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Verbs supported by one kind, in wire-table order
    pub fn verbs(&self, kind: &str) -> Vec<Verb> {
        self.kinds
            .get(kind)
            .map(|verbs| verbs.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of registered (kind, verb) pairs
    pub fn len(&self) -> usize {
        self.kinds.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (kind, verbs) in &self.kinds {
            map.entry(kind, &verbs.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}

/// Collects registrations; a (kind, verb) pair may be registered once
#[derive(Default)]
pub struct RegistryBuilder {
    kinds: BTreeMap<String, VerbTable>,
}

impl RegistryBuilder {
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        verb: Verb,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<&mut Self, RegistryError> {
        let kind = kind.into();
        let verbs = self.kinds.entry(kind.clone()).or_default();
        if verbs.contains_key(&verb) {
            return Err(RegistryError::DuplicateAction { kind, verb });
        }
        verbs.insert(verb, handler);
        Ok(self)
    }

    /// Register several verbs of one kind against the same handler
    pub fn register_all(
        &mut self,
        kind: &str,
        verbs: &[Verb],
        handler: Arc<dyn ActionHandler>,
    ) -> Result<&mut Self, RegistryError> {
        for verb in verbs {
            self.register(kind, *verb, Arc::clone(&handler))?;
        }
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry { kinds: self.kinds }
    }
}
