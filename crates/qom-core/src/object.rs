//! Live object instances and interface shims

use std::fmt;

use crate::property::Property;
use crate::registry::TypeHandle;

/// Identifier of a live object inside an [`ObjectTree`](crate::ObjectTree)
/// slab. Ids are never reused, so a stale id held across a delete resolves
/// to nothing instead of aliasing a recycled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub(crate) usize);

/// Stateless per-instance stand-in for one declared interface.
///
/// A shim carries only the handle of its synthesized interface type; the
/// back-reference to the owning object is structural, since shims live in
/// their owner's interface list and are addressed as
/// [`ObjectRef::Interface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceShim {
    pub(crate) ty: TypeHandle,
}

impl InterfaceShim {
    /// Handle of the anonymous interface type this shim instantiates
    pub fn type_handle(&self) -> TypeHandle {
        self.ty
    }
}

/// Reference to either a concrete object or one of its interface shims.
///
/// Dynamic casts hand out shim references as differently-typed views of
/// the same logical object; [`ObjectRef::owner`] recovers the concrete
/// object either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    /// The object itself
    Object(ObjectId),
    /// The `index`-th interface shim attached to `owner`
    Interface {
        /// Concrete object the shim belongs to
        owner: ObjectId,
        /// Position in the owner's interface list
        index: usize,
    },
}

impl ObjectRef {
    /// The concrete object this reference ultimately belongs to
    pub fn owner(&self) -> ObjectId {
        match *self {
            ObjectRef::Object(id) => id,
            ObjectRef::Interface { owner, .. } => owner,
        }
    }
}

/// A live instance of a registered type.
///
/// Instance state lives in `payload`, a zero-initialized byte block of the
/// type's effective instance size; `instance_init` hooks and property
/// accessors interpret it. Properties are an ordered list: insertion order
/// is significant for iteration and for first-match lookup.
pub struct Object {
    pub(crate) class: TypeHandle,
    pub(crate) parent: Option<ObjectId>,
    pub(crate) interfaces: Vec<InterfaceShim>,
    pub(crate) properties: Vec<Property>,
    pub(crate) payload: Vec<u8>,
}

impl Object {
    pub(crate) fn new(class: TypeHandle, payload_size: usize) -> Self {
        Self {
            class,
            parent: None,
            interfaces: Vec::new(),
            properties: Vec::new(),
            payload: vec![0; payload_size],
        }
    }

    /// Handle of this object's concrete type
    pub fn type_handle(&self) -> TypeHandle {
        self.class
    }

    /// The owning parent, or `None` for the tree root and free-floating
    /// objects
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// Attached interface shims, in attachment order (root-most ancestor's
    /// interfaces first)
    pub fn interfaces(&self) -> &[InterfaceShim] {
        &self.interfaces
    }

    /// Property records in insertion order
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Instance storage; zero beyond whatever `instance_init` wrote
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Mutable instance storage
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Read a little-endian u32 field from the payload
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.payload[offset..offset + 4]);
        u32::from_le_bytes(bytes)
    }

    /// Write a little-endian u32 field into the payload
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.payload[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class)
            .field("parent", &self.parent)
            .field("interfaces", &self.interfaces.len())
            .field("properties", &self.properties)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
