//! Runtime registry for tool descriptors.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use crate::descriptor::ToolDescriptor;
use crate::handler::{ToolError, ToolResult};

#[derive(Default)]
struct RegistryState {
    // Registration order, so snapshots are deterministic.
    order: Vec<String>,
    entries: HashMap<String, ToolDescriptor>,
}

/// Registry that stores tool descriptors keyed by name.
///
/// The registry is the only object shared between concurrent conversation
/// loops; it is cheap to share behind an `Arc`. Entries are never removed:
/// re-registering a name replaces the descriptor in place, keeping its
/// original position in the registration order.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryState>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect("tool registry poisoned");
        f.debug_struct("ToolRegistry")
            .field("registered", &inner.order)
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, replacing any existing tool with the same
    /// name. Readers observe the descriptor fully or not at all.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn register(&self, descriptor: ToolDescriptor) {
        let mut inner = self.inner.write().expect("tool registry poisoned");
        let name = descriptor.name().as_str().to_owned();
        let replaced = inner.entries.insert(name.clone(), descriptor).is_some();
        if !replaced {
            inner.order.push(name.clone());
        }
        info!(tool = %name, replaced, "tool registered");
    }

    /// Returns the descriptor registered under the supplied name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] when no tool carries that name.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn lookup(&self, name: &str) -> ToolResult<ToolDescriptor> {
        let inner = self.inner.read().expect("tool registry poisoned");
        inner
            .entries
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::not_found(name))
    }

    /// Returns all descriptors in registration order.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ToolDescriptor> {
        let inner = self.inner.read().expect("tool registry poisoned");
        inner
            .order
            .iter()
            .filter_map(|name| inner.entries.get(name).cloned())
            .collect()
    }

    /// Returns the number of registered tools.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("tool registry poisoned").order.len()
    }

    /// Returns `true` when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
