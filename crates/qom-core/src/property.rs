//! Property records: scalars, owned children, non-owning links, and the
//! legacy string bridge
//!
//! Each live object carries an ordered list of named properties. Names are
//! unique per object by convention but duplicates are not guarded against;
//! lookup is a linear first-match scan in insertion order. The forward
//! slash is reserved as the path separator and rejected in names.
//!
//! Child and link properties are tagged-union variants rather than opaque
//! accessor pairs, so the composition tree and the link type gate work on
//! ids and type handles instead of parsing type-tag strings. The string
//! tag (`child<T>`, `link<T>`, `legacy<Info>`) is still recorded on every
//! record for introspection.

use std::fmt;

use crate::object::{Object, ObjectId};
use crate::QomResult;

/// Size of the text buffer legacy property values round-trip through.
/// Longer values are truncated at a character boundary.
pub const LEGACY_BUFFER_MAX: usize = 1024;

/// Scalar getter: render the property value as a string
pub type PropertyGet = Box<dyn Fn(&Object) -> QomResult<String>>;

/// Scalar setter: parse and store the given string value
pub type PropertySet = Box<dyn FnMut(&mut Object, &str) -> QomResult<()>>;

/// Cleanup hook, run when the property is removed or its owner finalized
pub type PropertyRelease = Box<dyn FnOnce(&mut Object)>;

/// Descriptor shared by all legacy properties of one format.
///
/// Legacy values are always processed as strings; the meaning of the
/// string depends on the descriptor's print/parse pair.
pub struct LegacyPropertyInfo {
    /// Format name, used in the `legacy<...>` tag
    pub name: &'static str,
    /// Tag-name override for formats renamed over time
    pub legacy_name: Option<&'static str>,
    /// Render the backing field as text
    pub print: Option<fn(&Object, &LegacyProperty) -> String>,
    /// Parse text into the backing field
    pub parse: Option<fn(&mut Object, &LegacyProperty, &str) -> QomResult<()>>,
}

/// One bridged legacy property
pub struct LegacyProperty {
    /// Base name; the property registers as `legacy-<name>`
    pub name: String,
    /// Shared format descriptor
    pub info: &'static LegacyPropertyInfo,
    /// Byte offset of the backing field inside the instance payload
    pub offset: usize,
}

/// Payload of a property record
pub enum PropertyKind {
    /// Accessor-backed scalar; either side may be absent, making the
    /// property write-only or read-only
    Scalar {
        /// Render the value, if readable
        get: Option<PropertyGet>,
        /// Store a value, if writable
        set: Option<PropertySet>,
    },
    /// Owned child; these records form the composition tree
    Child {
        /// The owned object
        child: ObjectId,
    },
    /// Non-owning reference, assigned by path with an exact concrete-type
    /// gate. Never cleared when the target is destroyed; a stale target
    /// simply resolves to nothing afterwards.
    Link {
        /// Declared concrete type name of permissible targets
        expected: String,
        /// Current target, if set
        target: Option<ObjectId>,
    },
    /// Bridged legacy scalar
    Legacy {
        /// The legacy record
        prop: LegacyProperty,
    },
}

/// Named property attached to a live object
pub struct Property {
    pub(crate) name: String,
    pub(crate) type_tag: String,
    pub(crate) kind: PropertyKind,
    pub(crate) release: Option<PropertyRelease>,
}

impl Property {
    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type tag: `child<T>`, `link<T>`, `legacy<Info>`, or the tag the
    /// scalar was registered with
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The record's payload
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("type", &self.type_tag)
            .finish()
    }
}

/// Truncate to the legacy buffer size, backing off to a char boundary
pub(crate) fn clamp_to_buffer(mut value: String) -> String {
    if value.len() > LEGACY_BUFFER_MAX {
        let mut end = LEGACY_BUFFER_MAX;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

/// Borrowing counterpart of [`clamp_to_buffer`] for setter input
pub(crate) fn clamp_str(value: &str) -> &str {
    if value.len() <= LEGACY_BUFFER_MAX {
        return value;
    }
    let mut end = LEGACY_BUFFER_MAX;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

impl Object {
    /// Register a scalar property with the given tag and accessors.
    ///
    /// Panics if the name contains `/`.
    pub fn property_add(
        &mut self,
        name: &str,
        type_tag: &str,
        get: Option<PropertyGet>,
        set: Option<PropertySet>,
        release: Option<PropertyRelease>,
    ) {
        assert!(
            !name.contains('/'),
            "property name '{}' contains the path separator",
            name
        );
        self.properties.push(Property {
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            kind: PropertyKind::Scalar { get, set },
            release,
        });
    }

    /// Convenience string scalar under the `string` tag
    pub fn property_add_str(
        &mut self,
        name: &str,
        get: Option<Box<dyn Fn(&Object) -> String>>,
        set: Option<PropertySet>,
    ) {
        let get = get.map(|g| -> PropertyGet { Box::new(move |obj| Ok(g(obj))) });
        self.property_add(name, "string", get, set, None);
    }

    /// Register an unset link property with tag `link<type_name>`. The
    /// link is assigned later through the tree's `property_set`, which
    /// enforces the concrete-type gate.
    pub fn property_add_link(&mut self, name: &str, type_name: &str) {
        assert!(
            !name.contains('/'),
            "property name '{}' contains the path separator",
            name
        );
        self.properties.push(Property {
            name: name.to_string(),
            type_tag: format!("link<{}>", type_name),
            kind: PropertyKind::Link {
                expected: type_name.to_string(),
                target: None,
            },
            release: None,
        });
    }

    /// Bridge a legacy record; it registers as `legacy-<name>` with tag
    /// `legacy<Info>`.
    pub fn property_add_legacy(&mut self, prop: LegacyProperty) {
        assert!(
            !prop.name.contains('/'),
            "property name '{}' contains the path separator",
            prop.name
        );
        let tag = format!(
            "legacy<{}>",
            prop.info.legacy_name.unwrap_or(prop.info.name)
        );
        let name = format!("legacy-{}", prop.name);
        self.properties.push(Property {
            name,
            type_tag: tag,
            kind: PropertyKind::Legacy { prop },
            release: None,
        });
    }

    /// Remove a property by name, running its release hook. Returns
    /// whether a record was removed.
    ///
    /// Child properties cannot be removed this way; delete the child
    /// object instead, which detaches the record as a side effect.
    pub fn property_del(&mut self, name: &str) -> bool {
        let Some(index) = self.find_property(name) else {
            return false;
        };
        assert!(
            !matches!(self.properties[index].kind, PropertyKind::Child { .. }),
            "child property '{}' is removed by deleting the child object",
            name
        );
        let mut prop = self.properties.remove(index);
        if let Some(release) = prop.release.take() {
            release(self);
        }
        true
    }

    /// Type tag of a property, if present
    pub fn property_type(&self, name: &str) -> Option<&str> {
        self.find_property(name)
            .map(|i| self.properties[i].type_tag.as_str())
    }

    /// First-match scan in insertion order
    pub(crate) fn find_property(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}
