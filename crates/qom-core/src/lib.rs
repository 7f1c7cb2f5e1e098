//! Dynamic object model runtime
//!
//! This crate provides a string-keyed runtime type system:
//! - Type registry with single-inheritance class descriptors
//! - Lazily built, memoized classes with slot-merge vtable inheritance
//! - Stateless multiple-inheritance via interface shims
//! - Dynamic cast / capability queries over instances and classes
//! - Property records forming a live, path-addressable composition tree
//!
//! The model is not thread-safe: type registration and first use are
//! expected to happen on a single logical thread, before any concurrent
//! access begins.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cast;
pub mod class;
pub mod object;
pub mod path;
pub mod property;
pub mod registry;
pub mod tree;

pub use class::{Class, VTable};
pub use object::{InterfaceShim, Object, ObjectId, ObjectRef};
pub use property::{
    LegacyProperty, LegacyPropertyInfo, Property, PropertyGet, PropertyKind, PropertyRelease,
    PropertySet, LEGACY_BUFFER_MAX,
};
pub use registry::{
    BaseInitFn, ClassData, ClassInitFn, InstanceFinalizeFn, InstanceInitFn, InterfaceInfo,
    TypeHandle, TypeInfo, TypeRegistry, TYPE_CONTAINER, TYPE_INTERFACE,
};
pub use tree::ObjectTree;

/// Object model errors.
///
/// Only user/configuration failures are reported through this enum; all of
/// them leave the object graph unchanged. Programming errors (unregistered
/// type names, abstract instantiation, failed cast assertions, attaching a
/// child twice) panic instead: they are bugs in the registering module, not
/// recoverable runtime conditions.
#[derive(Debug, thiserror::Error)]
pub enum QomError {
    /// No property with this name exists on the object
    #[error("Property '{name}' not found on '{typename}'")]
    PropertyNotFound {
        /// Concrete type name of the object that was queried
        typename: String,
        /// Property name that failed to resolve
        name: String,
    },

    /// The property exists but has no accessor for the requested direction
    #[error("Property '{name}' does not allow this access")]
    PermissionDenied {
        /// Property name
        name: String,
    },

    /// A link property was assigned an object of the wrong concrete type
    #[error("Invalid type for link '{name}': expected '{expected}'")]
    InvalidLinkType {
        /// Link property name
        name: String,
        /// Concrete type name the link was declared with
        expected: String,
    },

    /// A path did not resolve to any object
    #[error("Object not found: '{path}'")]
    ObjectNotFound {
        /// The path that failed to resolve
        path: String,
    },

    /// A partial path matched more than one node in the tree
    #[error("Path '{path}' is ambiguous")]
    AmbiguousPath {
        /// The offending partial path
        path: String,
    },

    /// A property setter rejected the supplied value
    #[error("Invalid value '{value}' for property '{name}'")]
    InvalidValue {
        /// Property name
        name: String,
        /// The rejected input
        value: String,
    },
}

/// Object model result
pub type QomResult<T> = Result<T, QomError>;
