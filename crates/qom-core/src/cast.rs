//! Instance-level capability queries and dynamic casts
//!
//! A cast takes an [`ObjectRef`] and a target type name and yields a
//! possibly different reference to the same logical object: casting to an
//! ancestor of the reference's own type returns the reference unchanged,
//! casting a concrete object to an interface it implements returns a shim
//! reference, and casting a shim back toward the concrete hierarchy
//! returns the owning object.

use crate::class::Class;
use crate::object::ObjectRef;
use crate::registry::TypeHandle;
use crate::tree::ObjectTree;

impl ObjectTree {
    /// Type of the referenced view: the concrete type for an object
    /// reference, the anonymous shim type for an interface reference
    pub fn type_of_ref(&self, r: ObjectRef) -> TypeHandle {
        match r {
            ObjectRef::Object(id) => self.object(id).type_handle(),
            ObjectRef::Interface { owner, index } => self.object(owner).interfaces()[index].ty,
        }
    }

    /// Whether the reference's own type chain reaches `typename`, without
    /// consulting the owner's other views
    fn is_type_direct(&self, r: ObjectRef, typename: &str) -> bool {
        match self.registry().lookup(typename) {
            Some(target) => self.registry().is_ancestor(self.type_of_ref(r), target),
            None => false,
        }
    }

    /// Whether the referenced object can be cast to `typename` through any
    /// of its views
    pub fn is_type(&self, r: ObjectRef, typename: &str) -> bool {
        self.dynamic_cast(r, typename).is_some()
    }

    /// Cast to `typename`, or `None` if the object has no view of that
    /// type. An unknown type name never matches.
    pub fn dynamic_cast(&self, r: ObjectRef, typename: &str) -> Option<ObjectRef> {
        // fast path: the reference already is the requested type
        if self.is_type_direct(r, typename) {
            return Some(r);
        }

        let owner = r.owner();

        // through-cast from a shim back into the concrete hierarchy
        if self.is_type_direct(ObjectRef::Object(owner), typename) {
            return Some(ObjectRef::Object(owner));
        }

        // sideways: any shim attached to the owner
        let target = self.registry().lookup(typename)?;
        self.object(owner)
            .interfaces()
            .iter()
            .position(|shim| self.registry().is_ancestor(shim.ty, target))
            .map(|index| ObjectRef::Interface { owner, index })
    }

    /// Cast that panics on failure; for call sites where the type is an
    /// invariant rather than an input
    pub fn dynamic_cast_assert(&self, r: ObjectRef, typename: &str) -> ObjectRef {
        self.dynamic_cast(r, typename).unwrap_or_else(|| {
            panic!(
                "object of type '{}' is not an instance of type '{}'",
                self.registry().name(self.type_of_ref(r)),
                typename
            )
        })
    }

    /// Class of the referenced view. Shim classes are built when the shim
    /// is attached, so this never forces construction.
    pub fn class_of_ref(&self, r: ObjectRef) -> &Class {
        self.registry()
            .class(self.type_of_ref(r))
            .expect("class is built before instances or shims exist")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::registry::{ClassData, InterfaceInfo, TypeInfo, TypeRegistry, TYPE_INTERFACE};

    fn print_widget(_obj: &Object) -> &'static str {
        "widget"
    }

    type PrintFn = fn(&Object) -> &'static str;

    fn printable_shim_init(class: &mut Class, _data: Option<&ClassData>) {
        class.vtable_mut().insert("print", print_widget as PrintFn);
    }

    fn tree_with_widget() -> ObjectTree {
        let mut registry = TypeRegistry::new();
        registry.register(TypeInfo {
            name: "printable".into(),
            parent: Some(TYPE_INTERFACE.into()),
            is_abstract: true,
            ..Default::default()
        });
        registry.register(TypeInfo {
            name: "widget".into(),
            interfaces: vec![InterfaceInfo {
                name: "printable".into(),
                init: Some(printable_shim_init),
            }],
            ..Default::default()
        });
        registry.register(TypeInfo {
            name: "button".into(),
            parent: Some("widget".into()),
            ..Default::default()
        });
        ObjectTree::with_registry(registry)
    }

    #[test]
    fn test_cast_to_own_type_and_ancestor_is_identity() {
        let mut tree = tree_with_widget();
        let obj = ObjectRef::Object(tree.new_object("button"));

        assert_eq!(tree.dynamic_cast(obj, "button"), Some(obj));
        assert_eq!(tree.dynamic_cast(obj, "widget"), Some(obj));
        assert!(tree.is_type(obj, "widget"));
    }

    #[test]
    fn test_cast_to_interface_yields_shim() {
        let mut tree = tree_with_widget();
        let id = tree.new_object("button");
        let obj = ObjectRef::Object(id);

        let shim = tree.dynamic_cast(obj, "printable").unwrap();
        assert!(matches!(shim, ObjectRef::Interface { owner, .. } if owner == id));

        // the shim's class carries the interface vtable
        let class = tree.class_of_ref(shim);
        assert_eq!(
            class.vtable().get::<PrintFn>("print"),
            Some(print_widget as PrintFn)
        );
    }

    #[test]
    fn test_cast_from_shim_back_to_concrete_type() {
        let mut tree = tree_with_widget();
        let id = tree.new_object("button");
        let shim = tree
            .dynamic_cast(ObjectRef::Object(id), "printable")
            .unwrap();

        assert_eq!(tree.dynamic_cast(shim, "widget"), Some(ObjectRef::Object(id)));
        assert_eq!(tree.dynamic_cast(shim, "button"), Some(ObjectRef::Object(id)));
        // shim to its own interface type stays a shim
        assert_eq!(tree.dynamic_cast(shim, "printable"), Some(shim));
    }

    #[test]
    fn test_cast_to_unrelated_or_unknown_type_fails() {
        let mut tree = tree_with_widget();
        let obj = ObjectRef::Object(tree.new_object("widget"));

        assert_eq!(tree.dynamic_cast(obj, "container"), None);
        assert_eq!(tree.dynamic_cast(obj, "no-such-type"), None);
        assert!(!tree.is_type(obj, "button"));
    }

    #[test]
    #[should_panic(expected = "is not an instance of type")]
    fn test_cast_assert_panics() {
        let mut tree = tree_with_widget();
        let obj = ObjectRef::Object(tree.new_object("widget"));
        tree.dynamic_cast_assert(obj, "button");
    }
}
