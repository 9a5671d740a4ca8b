//! Process-wide name-to-module mapping, in its two phases of life.
//!
//! A library name maps to at most one [`ModuleDescriptor`] while the graph
//! is being discovered and, once linked, to at most one [`LinkedObject`].
//! An object becomes visible to symbol lookups only after every one of its
//! relocations has been applied; no partially linked object is ever
//! reachable from here.

use crate::{
    Result, link_error,
    module::{ExportedSymbol, LinkedObject, ModuleDescriptor},
};
use alloc::{format, string::String, vec::Vec};
use hashbrown::HashMap;

/// The two-phase module registry.
#[derive(Default)]
pub struct Registry {
    descriptors: HashMap<String, ModuleDescriptor>,
    /// Linked objects in the order they finished linking. Symbol precedence
    /// is defined by this order, so it is kept explicitly.
    loaded: Vec<LinkedObject>,
    loaded_index: HashMap<String, usize>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` has a mapping-phase descriptor.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Inserts a descriptor. Registering a name twice is a no-op; callers
    /// check [`contains`](Self::contains) first.
    pub fn register(&mut self, descriptor: ModuleDescriptor) {
        if self.descriptors.contains_key(descriptor.name()) {
            return;
        }
        self.descriptors
            .insert(descriptor.name().into(), descriptor);
    }

    /// The descriptor for `name`. Names handed to the loader are always
    /// resolvable, so absence is an error at every call site.
    pub fn get(&self, name: &str) -> Result<&ModuleDescriptor> {
        self.descriptors
            .get(name)
            .ok_or_else(|| link_error(format!("{} is not registered", name)))
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut ModuleDescriptor> {
        self.descriptors
            .get_mut(name)
            .ok_or_else(|| link_error(format!("{} is not registered", name)))
    }

    /// Iterates over the mapping-phase descriptors.
    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.descriptors.values()
    }

    /// Whether `name` has finished linking.
    #[inline]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded_index.contains_key(name)
    }

    /// Publishes a fully linked object, making it visible to subsequent
    /// symbol lookups. Must only be called once every relocation of the
    /// object has been applied.
    pub fn promote(&mut self, object: LinkedObject) {
        debug_assert!(!self.is_loaded(object.name()));
        self.loaded_index
            .insert(object.name().into(), self.loaded.len());
        self.loaded.push(object);
    }

    /// Linked objects in the order they were published.
    #[inline]
    pub fn loaded(&self) -> &[LinkedObject] {
        &self.loaded
    }

    /// The linked object for `name`, if it has been published.
    pub fn get_loaded(&self, name: &str) -> Option<&LinkedObject> {
        self.loaded_index.get(name).map(|&idx| &self.loaded[idx])
    }

    /// Global symbol lookup shared by every module being linked: scans the
    /// loaded objects in insertion order and returns the first definition.
    pub fn lookup_symbol(&self, name: &str) -> Option<(&LinkedObject, &ExportedSymbol)> {
        self.loaded
            .iter()
            .find_map(|obj| obj.lookup(name).map(|sym| (obj, sym)))
    }

    /// Drops every remaining descriptor along with its inspection mapping
    /// and file handle. Called once all modules are linked.
    pub fn clear_descriptors(&mut self) {
        self.descriptors.clear();
    }
}
