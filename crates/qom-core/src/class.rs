//! Class objects and virtual-dispatch slot tables
//!
//! A [`Class`] is built once per registered type and cached forever. Its
//! [`VTable`] replaces byte-copied class storage with an explicit merge: a
//! derived class starts from a clone of its parent's resolved table and the
//! type's own `class_init` (and every ancestor's `base_init`) override slots
//! one by one.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::registry::TypeHandle;

/// Insertion-ordered table of named virtual slots.
///
/// Slots are type-erased; they are written and read back as concrete `fn`
/// pointer types. Inherited slots keep the parent's function pointers until
/// a subclass explicitly replaces them.
#[derive(Clone, Default)]
pub struct VTable {
    slots: IndexMap<&'static str, Rc<dyn Any>>,
}

impl VTable {
    /// Create an empty slot table
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or override a slot. `f` is usually a plain `fn` pointer.
    pub fn insert<F: Copy + 'static>(&mut self, slot: &'static str, f: F) {
        self.slots.insert(slot, Rc::new(f));
    }

    /// Read a slot back as `F`.
    ///
    /// An absent slot, or a slot holding a different function signature,
    /// reads as `None`.
    pub fn get<F: Copy + 'static>(&self, slot: &str) -> Option<F> {
        self.slots.get(slot)?.downcast_ref::<F>().copied()
    }

    /// Whether a slot with this name has been set
    pub fn contains(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    /// Number of populated slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot has been populated
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot names in insertion order
    pub fn slot_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.keys().copied()
    }
}

impl fmt::Debug for VTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.keys()).finish()
    }
}

/// Lazily built per-type class object.
///
/// At most one `Class` exists per registered type for the lifetime of its
/// registry; repeated build requests return the cached object.
#[derive(Clone)]
pub struct Class {
    ty: TypeHandle,
    name: String,
    vtable: VTable,
}

impl Class {
    pub(crate) fn new(ty: TypeHandle, name: String, vtable: VTable) -> Self {
        Self { ty, name, vtable }
    }

    /// Handle of the type this class was built for
    pub fn type_handle(&self) -> TypeHandle {
        self.ty
    }

    /// Name of the type this class was built for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved virtual slot table
    pub fn vtable(&self) -> &VTable {
        &self.vtable
    }

    /// Mutable slot table, for `class_init`/`base_init` hooks
    pub fn vtable_mut(&mut self) -> &mut VTable {
        &mut self.vtable
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("type", &self.ty)
            .field("vtable", &self.vtable)
            .finish()
    }
}
