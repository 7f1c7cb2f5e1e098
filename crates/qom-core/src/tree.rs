//! The composition tree: object storage and lifecycle
//!
//! All instances live in a slab owned by [`ObjectTree`], addressed by
//! [`ObjectId`]. The tree owns a [`TypeRegistry`] (injected or fresh) and
//! a root `container` object; child properties attached under the root
//! form the composition tree that canonical paths and path resolution
//! operate on.
//!
//! Everything here is single-threaded, synchronous, in-memory computation;
//! callers serialize access.

use crate::class::Class;
use crate::object::{InterfaceShim, Object, ObjectId};
use crate::property::{clamp_str, clamp_to_buffer, Property, PropertyKind};
use crate::registry::{TypeRegistry, TYPE_CONTAINER};
use crate::{QomError, QomResult};

/// Object storage plus the composition tree rooted at a built-in
/// `container` object.
pub struct ObjectTree {
    registry: TypeRegistry,
    objects: Vec<Option<Object>>,
    root: ObjectId,
}

impl ObjectTree {
    /// Create a tree over a fresh registry holding only the built-in types
    pub fn new() -> Self {
        Self::with_registry(TypeRegistry::new())
    }

    /// Create a tree over a caller-populated registry
    pub fn with_registry(registry: TypeRegistry) -> Self {
        let mut tree = Self {
            registry,
            objects: Vec::new(),
            root: ObjectId(0),
        };
        tree.root = tree.new_object(TYPE_CONTAINER);
        tree
    }

    /// The type registry backing this tree
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Mutable registry access, for registering types after construction
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// The composition-tree root
    pub fn root(&self) -> ObjectId {
        self.root
    }

    /// Borrow a live object. Panics if the id was deleted.
    pub fn object(&self, id: ObjectId) -> &Object {
        self.objects[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("object {:?} is not alive", id))
    }

    /// Mutably borrow a live object. Panics if the id was deleted.
    pub fn object_mut(&mut self, id: ObjectId) -> &mut Object {
        self.objects[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("object {:?} is not alive", id))
    }

    /// Non-panicking probe; `None` for deleted or never-issued ids
    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Concrete type name of a live object
    pub fn typename(&self, id: ObjectId) -> &str {
        self.registry.name(self.object(id).class)
    }

    /// The object's class; always built by the time an instance exists
    pub fn class_of(&self, id: ObjectId) -> &Class {
        self.registry
            .class(self.object(id).class)
            .expect("class is built at instantiation")
    }

    /// Allocate and initialize an instance of a registered concrete type.
    ///
    /// Forces class construction, then initializes ancestors root-first:
    /// at each level one interface shim per interface declared there is
    /// attached, then that level's `instance_init` runs, so a subclass
    /// constructor can rely on inherited state being ready.
    ///
    /// Panics if the type is unknown or abstract.
    pub fn new_object(&mut self, typename: &str) -> ObjectId {
        let handle = self
            .registry
            .lookup(typename)
            .unwrap_or_else(|| panic!("unknown type '{}'", typename));
        self.registry.ensure_class(handle);
        assert!(
            !self.registry.is_abstract(handle),
            "cannot instantiate abstract type '{}'",
            typename
        );

        let size = self.registry.instance_size_of(handle);
        let id = ObjectId(self.objects.len());
        self.objects.push(Some(Object::new(handle, size)));
        tracing::trace!(typename, id = id.0, "new object");

        for level in self.registry.chain_of(handle) {
            for shim_type in self.registry.interfaces_of(level) {
                // shim classes are built eagerly so capability queries can
                // hand out a populated interface vtable
                self.registry.ensure_class(shim_type);
                self.objects[id.0]
                    .as_mut()
                    .unwrap()
                    .interfaces
                    .push(InterfaceShim { ty: shim_type });
            }
            if let Some(init) = self.registry.instance_init_of(level) {
                init(self.objects[id.0].as_mut().unwrap());
            }
        }
        id
    }

    /// Run destructors without freeing the slot: `instance_finalize`
    /// hooks child-type-first (reverse of construction), then shims are
    /// dropped, then every property is released in insertion order. A
    /// child property recursively deletes the owned child, so destruction
    /// of a subtree is top-down.
    pub fn finalize_object(&mut self, id: ObjectId) {
        let handle = self.object(id).class;
        for level in self.registry.chain_of(handle).iter().rev() {
            if let Some(finalize) = self.registry.instance_finalize_of(*level) {
                finalize(self.objects[id.0].as_mut().unwrap());
            }
        }

        let obj = self.objects[id.0].as_mut().unwrap();
        obj.interfaces.clear();
        let properties = std::mem::take(&mut obj.properties);
        for mut prop in properties {
            if let Some(release) = prop.release.take() {
                release(self.objects[id.0].as_mut().unwrap());
            }
            if let PropertyKind::Child { child } = prop.kind {
                self.delete_object(child);
            }
        }
    }

    /// Finalize and free the slot. Ids are never reused; links left
    /// pointing at the deleted object resolve to nothing afterwards.
    pub fn delete_object(&mut self, id: ObjectId) {
        tracing::trace!(id = id.0, "delete object");
        // detach from the parent's child property, if still attached
        if let Some(parent) = self.object(id).parent {
            if let Some(parent_obj) = self.objects[parent.0].as_mut() {
                parent_obj
                    .properties
                    .retain(|p| !matches!(p.kind, PropertyKind::Child { child } if child == id));
            }
            self.objects[id.0].as_mut().unwrap().parent = None;
        }
        self.finalize_object(id);
        self.objects[id.0] = None;
    }

    /// Attach `child` under `parent` as an owned child property with tag
    /// `child<ConcreteType>`. Children are readable (the getter reports
    /// the child's canonical path) but have no setter.
    ///
    /// Panics if the child already has a parent: a given instance is owned
    /// by exactly one child property.
    pub fn property_add_child(&mut self, parent: ObjectId, name: &str, child: ObjectId) {
        assert!(
            !name.contains('/'),
            "property name '{}' contains the path separator",
            name
        );
        assert!(parent != child, "object cannot own itself");
        let tag = format!("child<{}>", self.typename(child));
        {
            let child_obj = self.object_mut(child);
            assert!(
                child_obj.parent.is_none(),
                "cannot attach '{}': object already has a parent",
                name
            );
            child_obj.parent = Some(parent);
        }
        self.object_mut(parent).properties.push(Property {
            name: name.to_string(),
            type_tag: tag,
            kind: PropertyKind::Child { child },
            release: None,
        });
    }

    /// Read a property value as a string.
    ///
    /// Child properties report the child's canonical path; links report
    /// the target's canonical path, or `""` when unset or when the target
    /// has been deleted; scalars and legacy records dispatch to their
    /// accessors.
    pub fn property_get(&self, id: ObjectId, name: &str) -> QomResult<String> {
        let obj = self.object(id);
        let index = obj.find_property(name).ok_or_else(|| QomError::PropertyNotFound {
            typename: self.typename(id).to_string(),
            name: name.to_string(),
        })?;

        match &obj.properties[index].kind {
            PropertyKind::Child { child } => Ok(self.canonical_path(*child)),
            // a deleted target reads the same as an unset link
            PropertyKind::Link { target, .. } => Ok(target
                .and_then(|t| self.get(t).map(|_| self.canonical_path(t)))
                .unwrap_or_default()),
            PropertyKind::Scalar { get: Some(get), .. } => get(obj),
            PropertyKind::Scalar { get: None, .. } => Err(QomError::PermissionDenied {
                name: name.to_string(),
            }),
            PropertyKind::Legacy { prop } => match prop.info.print {
                Some(print) => Ok(clamp_to_buffer(print(obj, prop))),
                None => Err(QomError::PermissionDenied {
                    name: name.to_string(),
                }),
            },
        }
    }

    /// Write a property value from a string.
    ///
    /// Setting a link resolves `value` as a path (the empty string clears
    /// the link) and stores the target only if its concrete type name
    /// matches the link's declared type exactly; on any failure the stored
    /// target is left untouched. Children are never writable.
    pub fn property_set(&mut self, id: ObjectId, name: &str, value: &str) -> QomResult<()> {
        enum Action {
            Deny,
            Scalar,
            Legacy,
            Link { expected: String },
        }

        let index = self.object(id).find_property(name).ok_or_else(|| {
            QomError::PropertyNotFound {
                typename: self.typename(id).to_string(),
                name: name.to_string(),
            }
        })?;

        let action = match &self.object(id).properties[index].kind {
            PropertyKind::Child { .. } => Action::Deny,
            PropertyKind::Scalar { set: None, .. } => Action::Deny,
            PropertyKind::Scalar { set: Some(_), .. } => Action::Scalar,
            PropertyKind::Link { expected, .. } => Action::Link {
                expected: expected.clone(),
            },
            PropertyKind::Legacy { prop } if prop.info.parse.is_some() => Action::Legacy,
            PropertyKind::Legacy { .. } => Action::Deny,
        };

        match action {
            Action::Deny => Err(QomError::PermissionDenied {
                name: name.to_string(),
            }),
            Action::Link { expected } => {
                let new_target = if value.is_empty() {
                    None
                } else {
                    let target = self.resolve_path(value)?;
                    if self.typename(target) != expected {
                        return Err(QomError::InvalidLinkType {
                            name: name.to_string(),
                            expected,
                        });
                    }
                    Some(target)
                };
                match &mut self.object_mut(id).properties[index].kind {
                    PropertyKind::Link { target, .. } => *target = new_target,
                    _ => unreachable!("link record changed kind"),
                }
                Ok(())
            }
            Action::Scalar => {
                // take the record out so the setter can borrow the object
                let mut prop = self.object_mut(id).properties.remove(index);
                let result = match &mut prop.kind {
                    PropertyKind::Scalar { set: Some(set), .. } => {
                        set(self.objects[id.0].as_mut().unwrap(), value)
                    }
                    _ => unreachable!("scalar record changed kind"),
                };
                self.object_mut(id).properties.insert(index, prop);
                result
            }
            Action::Legacy => {
                let prop = self.object_mut(id).properties.remove(index);
                let result = match &prop.kind {
                    PropertyKind::Legacy { prop: legacy } => {
                        let parse = legacy.info.parse.unwrap();
                        parse(
                            self.objects[id.0].as_mut().unwrap(),
                            legacy,
                            clamp_str(value),
                        )
                    }
                    _ => unreachable!("legacy record changed kind"),
                };
                self.object_mut(id).properties.insert(index, prop);
                result
            }
        }
    }

    /// Type tag of a property on a live object
    pub fn property_type(&self, id: ObjectId, name: &str) -> QomResult<String> {
        self.object(id)
            .property_type(name)
            .map(str::to_string)
            .ok_or_else(|| QomError::PropertyNotFound {
                typename: self.typename(id).to_string(),
                name: name.to_string(),
            })
    }
}

impl Default for ObjectTree {
    fn default() -> Self {
        Self::new()
    }
}
