//! Type registry and lazy class construction
//!
//! Types are registered by name together with a parent name, an instance
//! size and lifecycle hooks, and are addressed afterwards through cheap
//! [`TypeHandle`]s. Parent names are resolved to handles once, on first
//! use, so registration order does not matter as long as every parent is
//! registered before the type is first instantiated or cast against.
//!
//! Classes are built lazily: the first request for a type's class builds
//! the parent class, clones its vtable, runs every ancestor's `base_init`
//! root-down, synthesizes one anonymous type per declared interface, and
//! finally runs the type's own `class_init`. The result is memoized for
//! the lifetime of the registry.

use std::any::Any;
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use rustc_hash::FxHashMap;

use crate::class::{Class, VTable};
use crate::object::Object;

/// Abstract root of every interface type.
pub const TYPE_INTERFACE: &str = "interface";

/// Built-in concrete empty type; used for the composition-tree root and
/// for plain grouping nodes.
pub const TYPE_CONTAINER: &str = "container";

/// Handle to a registered type.
///
/// Handles are only meaningful within the registry that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle(pub(crate) usize);

/// Opaque payload handed to a type's `class_init` hook
pub type ClassData = Rc<dyn Any>;

/// Class initializer, run once when the type's class is built
pub type ClassInitFn = fn(&mut Class, Option<&ClassData>);

/// Per-ancestor class hook, run during class composition for every
/// descendant class being built
pub type BaseInitFn = fn(&mut Class);

/// Per-level instance constructor
pub type InstanceInitFn = fn(&mut Object);

/// Per-level instance destructor
pub type InstanceFinalizeFn = fn(&mut Object);

/// Interface declaration carried by a [`TypeInfo`].
#[derive(Clone)]
pub struct InterfaceInfo {
    /// Name of the interface type; must itself be registered (with
    /// [`TYPE_INTERFACE`] as an ancestor) before this type's class is built
    pub name: String,
    /// Hook populating the synthesized interface class's vtable
    pub init: Option<ClassInitFn>,
}

/// Registration record for a type.
///
/// Construct with struct-update syntax; `..Default::default()` leaves the
/// hooks unset:
///
/// ```
/// use qom_core::{TypeInfo, TypeRegistry};
///
/// let mut registry = TypeRegistry::new();
/// registry.register(TypeInfo {
///     name: "serial".into(),
///     parent: Some("container".into()),
///     instance_size: 16,
///     ..Default::default()
/// });
/// ```
#[derive(Default, Clone)]
pub struct TypeInfo {
    /// Unique type name
    pub name: String,
    /// Parent type name; `None` makes this a root type
    pub parent: Option<String>,
    /// Instance payload size in bytes; 0 inherits the parent's size
    pub instance_size: usize,
    /// Abstract types cannot be instantiated directly
    pub is_abstract: bool,
    /// Run once for this type's class, after inheritance and `base_init`
    pub class_init: Option<ClassInitFn>,
    /// Registered for symmetry; classes are never torn down, so this hook
    /// is currently never invoked
    pub class_finalize: Option<ClassInitFn>,
    /// Opaque payload passed to `class_init`
    pub class_data: Option<ClassData>,
    /// Run on every descendant class being built, root-down
    pub base_init: Option<BaseInitFn>,
    /// Registered for symmetry; never invoked (see `class_finalize`)
    pub base_finalize: Option<BaseInitFn>,
    /// Per-level constructor, run parent-first during instance init
    pub instance_init: Option<InstanceInitFn>,
    /// Per-level destructor, run child-first during finalize
    pub instance_finalize: Option<InstanceFinalizeFn>,
    /// Interfaces implemented at this level
    pub interfaces: Vec<InterfaceInfo>,
}

struct InterfaceImpl {
    name: String,
    init: Option<ClassInitFn>,
    /// Anonymous shim type, assigned when the declaring class is built
    resolved: OnceCell<TypeHandle>,
}

struct TypeImpl {
    name: String,
    parent: Option<String>,
    parent_handle: OnceCell<TypeHandle>,
    instance_size: usize,
    is_abstract: bool,
    class_init: Option<ClassInitFn>,
    #[allow(dead_code)]
    class_finalize: Option<ClassInitFn>,
    class_data: Option<ClassData>,
    base_init: Option<BaseInitFn>,
    #[allow(dead_code)]
    base_finalize: Option<BaseInitFn>,
    instance_init: Option<InstanceInitFn>,
    instance_finalize: Option<InstanceFinalizeFn>,
    interfaces: Vec<InterfaceImpl>,
    class: Option<Class>,
}

/// Process-lifetime table of registered types and their memoized classes.
///
/// The registry is an explicit object rather than global state so tests
/// (and embedders) can construct a fresh one. It is not thread-safe;
/// callers serialize access.
pub struct TypeRegistry {
    types: Vec<TypeImpl>,
    by_name: FxHashMap<String, TypeHandle>,
    anon_count: usize,
}

impl TypeRegistry {
    /// Create a registry pre-seeded with the built-in `interface` and
    /// `container` types.
    pub fn new() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            by_name: FxHashMap::default(),
            anon_count: 0,
        };
        registry.register(TypeInfo {
            name: TYPE_INTERFACE.into(),
            is_abstract: true,
            ..Default::default()
        });
        registry.register(TypeInfo {
            name: TYPE_CONTAINER.into(),
            ..Default::default()
        });
        registry
    }

    /// Register a type. Panics if the name is empty or already taken.
    pub fn register(&mut self, info: TypeInfo) -> TypeHandle {
        assert!(!info.name.is_empty(), "type name must not be empty");
        assert!(
            !self.by_name.contains_key(&info.name),
            "type '{}' registered twice",
            info.name
        );
        self.insert(info)
    }

    /// Register the same descriptor under a second name.
    pub fn register_alias(&mut self, info: &TypeInfo, alias: &str) -> TypeHandle {
        let mut info = info.clone();
        info.name = alias.to_string();
        self.register(info)
    }

    /// Register under a generated `<anonymous-N>` name, unique within this
    /// registry. Used for synthesized interface shim types.
    pub(crate) fn register_anonymous(&mut self, mut info: TypeInfo) -> TypeHandle {
        info.name = format!("<anonymous-{}>", self.anon_count);
        self.anon_count += 1;
        self.insert(info)
    }

    fn insert(&mut self, info: TypeInfo) -> TypeHandle {
        let handle = TypeHandle(self.types.len());
        tracing::debug!(
            name = %info.name,
            parent = info.parent.as_deref().unwrap_or("-"),
            "registered type"
        );
        self.by_name.insert(info.name.clone(), handle);
        self.types.push(TypeImpl {
            name: info.name,
            parent: info.parent,
            parent_handle: OnceCell::new(),
            instance_size: info.instance_size,
            is_abstract: info.is_abstract,
            class_init: info.class_init,
            class_finalize: info.class_finalize,
            class_data: info.class_data,
            base_init: info.base_init,
            base_finalize: info.base_finalize,
            instance_init: info.instance_init,
            instance_finalize: info.instance_finalize,
            interfaces: info
                .interfaces
                .into_iter()
                .map(|i| InterfaceImpl {
                    name: i.name,
                    init: i.init,
                    resolved: OnceCell::new(),
                })
                .collect(),
            class: None,
        });
        handle
    }

    /// Find a type by name
    pub fn lookup(&self, name: &str) -> Option<TypeHandle> {
        self.by_name.get(name).copied()
    }

    /// Name of a registered type
    pub fn name(&self, handle: TypeHandle) -> &str {
        &self.types[handle.0].name
    }

    /// Whether the type was registered abstract
    pub fn is_abstract(&self, handle: TypeHandle) -> bool {
        self.types[handle.0].is_abstract
    }

    /// Resolved parent handle, or `None` for a root type.
    ///
    /// The name-to-handle resolution happens once and is cached, turning
    /// ancestor-chain walks into plain handle follows. Panics if the parent
    /// name was never registered.
    pub fn parent_of(&self, handle: TypeHandle) -> Option<TypeHandle> {
        let ti = &self.types[handle.0];
        let parent_name = ti.parent.as_deref()?;
        Some(*ti.parent_handle.get_or_init(|| {
            self.lookup(parent_name).unwrap_or_else(|| {
                panic!(
                    "type '{}' has unregistered parent '{}'",
                    ti.name, parent_name
                )
            })
        }))
    }

    /// Effective instance payload size: the first nonzero `instance_size`
    /// walking up the parent chain, or 0 at the root.
    pub fn instance_size_of(&self, handle: TypeHandle) -> usize {
        let ti = &self.types[handle.0];
        if ti.instance_size != 0 {
            return ti.instance_size;
        }
        match self.parent_of(handle) {
            Some(parent) => self.instance_size_of(parent),
            None => 0,
        }
    }

    /// Whether `ancestor` appears in `ty`'s ancestor chain (inclusive)
    pub fn is_ancestor(&self, mut ty: TypeHandle, ancestor: TypeHandle) -> bool {
        loop {
            if ty == ancestor {
                return true;
            }
            match self.parent_of(ty) {
                Some(parent) => ty = parent,
                None => return false,
            }
        }
    }

    /// Ancestor chain of `handle`, root first, ending with `handle` itself
    pub(crate) fn chain_of(&self, handle: TypeHandle) -> Vec<TypeHandle> {
        let mut chain = vec![handle];
        let mut cur = self.parent_of(handle);
        while let Some(parent) = cur {
            chain.push(parent);
            cur = self.parent_of(parent);
        }
        chain.reverse();
        chain
    }

    /// Build the type's class if it has not been built yet. Idempotent;
    /// the built class is cached for the lifetime of the registry.
    pub fn ensure_class(&mut self, handle: TypeHandle) -> &Class {
        if self.types[handle.0].class.is_none() {
            self.build_class(handle);
        }
        self.types[handle.0].class.as_ref().unwrap()
    }

    /// The memoized class, if it has been built
    pub fn class(&self, handle: TypeHandle) -> Option<&Class> {
        self.types[handle.0].class.as_ref()
    }

    /// Look up a type by name and force its class construction
    pub fn class_by_name(&mut self, name: &str) -> Option<&Class> {
        let handle = self.lookup(name)?;
        Some(self.ensure_class(handle))
    }

    fn build_class(&mut self, handle: TypeHandle) {
        let parent = self.parent_of(handle);

        // Parent class first; a derived vtable starts as a clone of the
        // parent's resolved table.
        let vtable = match parent {
            Some(p) => {
                self.ensure_class(p);
                self.types[p.0].class.as_ref().unwrap().vtable().clone()
            }
            None => VTable::new(),
        };

        let name = self.types[handle.0].name.clone();
        tracing::trace!(name = %name, "building class");
        let mut class = Class::new(handle, name, vtable);

        // base_init of every ancestor, root-down, excluding this type
        let mut ancestors = Vec::new();
        let mut cur = parent;
        while let Some(p) = cur {
            ancestors.push(p);
            cur = self.parent_of(p);
        }
        for ancestor in ancestors.iter().rev() {
            if let Some(hook) = self.types[ancestor.0].base_init {
                hook(&mut class);
            }
        }

        // One anonymous abstract type per interface declared at this level.
        // The shim type's parent is the interface type itself, so a shim
        // is-a the interface through the ordinary ancestor walk.
        for i in 0..self.types[handle.0].interfaces.len() {
            let (iface_name, iface_init) = {
                let entry = &self.types[handle.0].interfaces[i];
                (entry.name.clone(), entry.init)
            };
            assert!(
                self.by_name.contains_key(&iface_name),
                "type '{}' declares unregistered interface '{}'",
                self.types[handle.0].name,
                iface_name
            );
            let shim_type = self.register_anonymous(TypeInfo {
                parent: Some(iface_name),
                is_abstract: true,
                class_init: iface_init,
                ..Default::default()
            });
            self.types[handle.0].interfaces[i]
                .resolved
                .set(shim_type)
                .expect("interface resolved twice");
        }

        if let Some(hook) = self.types[handle.0].class_init {
            let data = self.types[handle.0].class_data.clone();
            hook(&mut class, data.as_ref());
        }

        self.types[handle.0].class = Some(class);
    }

    /// Force class construction for every non-abstract registered type and
    /// invoke `f` on each class.
    pub fn each_class(&mut self, mut f: impl FnMut(&Class)) {
        let mut i = 0;
        // interface synthesis may append anonymous (abstract) types while
        // we iterate, so re-check the length every round
        while i < self.types.len() {
            if !self.types[i].is_abstract {
                let handle = TypeHandle(i);
                self.ensure_class(handle);
                f(self.types[i].class.as_ref().unwrap());
            }
            i += 1;
        }
    }

    /// Class-level ancestry query: whether `class` is the class of
    /// `typename` or of one of its descendants. Interfaces are attached to
    /// instances, so no interface traversal happens here.
    pub fn class_is_type(&self, class: &Class, typename: &str) -> bool {
        match self.lookup(typename) {
            Some(target) => self.is_ancestor(class.type_handle(), target),
            None => false,
        }
    }

    /// Class-level cast: `class` unchanged if it is-a `typename`
    pub fn class_dynamic_cast<'a>(&self, class: &'a Class, typename: &str) -> Option<&'a Class> {
        if self.class_is_type(class, typename) {
            Some(class)
        } else {
            None
        }
    }

    /// Class-level cast that panics on failure
    pub fn class_dynamic_cast_assert<'a>(&self, class: &'a Class, typename: &str) -> &'a Class {
        self.class_dynamic_cast(class, typename).unwrap_or_else(|| {
            panic!(
                "class '{}' is not a subclass of type '{}'",
                class.name(),
                typename
            )
        })
    }

    /// Resolved shim type handles for interfaces declared directly by this
    /// type. Only valid once the type's class has been built.
    pub(crate) fn interfaces_of(&self, handle: TypeHandle) -> Vec<TypeHandle> {
        self.types[handle.0]
            .interfaces
            .iter()
            .map(|i| {
                *i.resolved
                    .get()
                    .expect("interface queried before class was built")
            })
            .collect()
    }

    pub(crate) fn instance_init_of(&self, handle: TypeHandle) -> Option<InstanceInitFn> {
        self.types[handle.0].instance_init
    }

    pub(crate) fn instance_finalize_of(&self, handle: TypeHandle) -> Option<InstanceFinalizeFn> {
        self.types[handle.0].instance_finalize
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    static WIDGET_CLASS_INITS: AtomicUsize = AtomicUsize::new(0);
    static BASE_INIT_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    fn describe_base(_obj: &Object) -> &'static str {
        "base"
    }

    fn describe_derived(_obj: &Object) -> &'static str {
        "derived"
    }

    type DescribeFn = fn(&Object) -> &'static str;

    fn base_class_init(class: &mut Class, _data: Option<&ClassData>) {
        class.vtable_mut().insert("describe", describe_base as DescribeFn);
    }

    fn derived_class_init(class: &mut Class, _data: Option<&ClassData>) {
        class
            .vtable_mut()
            .insert("describe", describe_derived as DescribeFn);
    }

    fn counting_class_init(_class: &mut Class, _data: Option<&ClassData>) {
        WIDGET_CLASS_INITS.fetch_add(1, Ordering::SeqCst);
    }

    fn log_base(_class: &mut Class) {
        BASE_INIT_LOG.lock().unwrap().push("base");
    }

    fn log_mid(_class: &mut Class) {
        BASE_INIT_LOG.lock().unwrap().push("mid");
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TypeRegistry::new();
        let handle = registry.register(TypeInfo {
            name: "device".into(),
            ..Default::default()
        });

        assert_eq!(registry.lookup("device"), Some(handle));
        assert_eq!(registry.name(handle), "device");
        assert_eq!(registry.lookup("nonexistent"), None);
    }

    #[test]
    fn test_builtins_are_seeded() {
        let registry = TypeRegistry::new();
        assert!(registry.lookup(TYPE_INTERFACE).is_some());
        assert!(registry.lookup(TYPE_CONTAINER).is_some());
        assert!(registry.is_abstract(registry.lookup(TYPE_INTERFACE).unwrap()));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_name_panics() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeInfo {
            name: "device".into(),
            ..Default::default()
        });
        registry.register(TypeInfo {
            name: "device".into(),
            ..Default::default()
        });
    }

    #[test]
    fn test_register_alias_shares_shape() {
        let mut registry = TypeRegistry::new();
        let info = TypeInfo {
            name: "uart".into(),
            instance_size: 24,
            ..Default::default()
        };
        registry.register(info.clone());
        let alias = registry.register_alias(&info, "serial");

        assert_eq!(registry.name(alias), "serial");
        assert_eq!(registry.instance_size_of(alias), 24);
    }

    #[test]
    fn test_anonymous_names_are_unique() {
        let mut registry = TypeRegistry::new();
        let a = registry.register_anonymous(TypeInfo::default());
        let b = registry.register_anonymous(TypeInfo::default());

        assert_ne!(registry.name(a), registry.name(b));
        assert!(registry.name(a).starts_with("<anonymous-"));
    }

    #[test]
    fn test_instance_size_inherited_when_zero() {
        let mut registry = TypeRegistry::new();
        let base = registry.register(TypeInfo {
            name: "base".into(),
            instance_size: 16,
            ..Default::default()
        });
        let mid = registry.register(TypeInfo {
            name: "mid".into(),
            parent: Some("base".into()),
            ..Default::default()
        });
        let leaf = registry.register(TypeInfo {
            name: "leaf".into(),
            parent: Some("mid".into()),
            instance_size: 48,
            ..Default::default()
        });

        assert_eq!(registry.instance_size_of(base), 16);
        assert_eq!(registry.instance_size_of(mid), 16);
        assert_eq!(registry.instance_size_of(leaf), 48);
    }

    #[test]
    fn test_is_ancestor_walks_chain() {
        let mut registry = TypeRegistry::new();
        let base = registry.register(TypeInfo {
            name: "base".into(),
            ..Default::default()
        });
        let mid = registry.register(TypeInfo {
            name: "mid".into(),
            parent: Some("base".into()),
            ..Default::default()
        });
        let leaf = registry.register(TypeInfo {
            name: "leaf".into(),
            parent: Some("mid".into()),
            ..Default::default()
        });

        assert!(registry.is_ancestor(leaf, base));
        assert!(registry.is_ancestor(leaf, leaf));
        assert!(!registry.is_ancestor(base, leaf));
        assert_eq!(registry.chain_of(leaf), vec![base, mid, leaf]);
    }

    #[test]
    #[should_panic(expected = "unregistered parent")]
    fn test_missing_parent_is_fatal_on_first_use() {
        let mut registry = TypeRegistry::new();
        let orphan = registry.register(TypeInfo {
            name: "orphan".into(),
            parent: Some("ghost".into()),
            ..Default::default()
        });
        registry.ensure_class(orphan);
    }

    #[test]
    fn test_class_built_once() {
        let mut registry = TypeRegistry::new();
        let widget = registry.register(TypeInfo {
            name: "counting-widget".into(),
            class_init: Some(counting_class_init),
            ..Default::default()
        });

        WIDGET_CLASS_INITS.store(0, Ordering::SeqCst);
        registry.ensure_class(widget);
        registry.ensure_class(widget);
        registry.ensure_class(widget);

        assert_eq!(WIDGET_CLASS_INITS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_vtable_inherited_and_overridden() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeInfo {
            name: "base".into(),
            class_init: Some(base_class_init),
            ..Default::default()
        });
        let plain = registry.register(TypeInfo {
            name: "plain".into(),
            parent: Some("base".into()),
            ..Default::default()
        });
        let custom = registry.register(TypeInfo {
            name: "custom".into(),
            parent: Some("base".into()),
            class_init: Some(derived_class_init),
            ..Default::default()
        });

        let inherited = registry.ensure_class(plain).vtable().get::<DescribeFn>("describe");
        assert_eq!(inherited, Some(describe_base as DescribeFn));

        let overridden = registry.ensure_class(custom).vtable().get::<DescribeFn>("describe");
        assert_eq!(overridden, Some(describe_derived as DescribeFn));
    }

    #[test]
    fn test_base_init_runs_root_down() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeInfo {
            name: "base".into(),
            base_init: Some(log_base),
            ..Default::default()
        });
        registry.register(TypeInfo {
            name: "mid".into(),
            parent: Some("base".into()),
            base_init: Some(log_mid),
            ..Default::default()
        });
        let leaf = registry.register(TypeInfo {
            name: "leaf".into(),
            parent: Some("mid".into()),
            ..Default::default()
        });

        // Build the ancestors first so the leaf build is the only one
        // left to log.
        registry.class_by_name("mid");
        BASE_INIT_LOG.lock().unwrap().clear();

        registry.ensure_class(leaf);
        assert_eq!(*BASE_INIT_LOG.lock().unwrap(), vec!["base", "mid"]);
    }

    #[test]
    fn test_interface_synthesis_registers_anonymous_type() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeInfo {
            name: "printable".into(),
            parent: Some(TYPE_INTERFACE.into()),
            is_abstract: true,
            ..Default::default()
        });
        let widget = registry.register(TypeInfo {
            name: "widget".into(),
            interfaces: vec![InterfaceInfo {
                name: "printable".into(),
                init: None,
            }],
            ..Default::default()
        });

        registry.ensure_class(widget);
        let shims = registry.interfaces_of(widget);
        assert_eq!(shims.len(), 1);
        assert!(registry.name(shims[0]).starts_with("<anonymous-"));
        assert!(registry.is_abstract(shims[0]));

        let printable = registry.lookup("printable").unwrap();
        let interface = registry.lookup(TYPE_INTERFACE).unwrap();
        assert!(registry.is_ancestor(shims[0], printable));
        assert!(registry.is_ancestor(shims[0], interface));
    }

    #[test]
    fn test_each_class_builds_non_abstract_types() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeInfo {
            name: "widget".into(),
            ..Default::default()
        });
        registry.register(TypeInfo {
            name: "template".into(),
            is_abstract: true,
            ..Default::default()
        });

        let mut names = Vec::new();
        registry.each_class(|class| names.push(class.name().to_string()));

        assert!(names.contains(&"widget".to_string()));
        assert!(names.contains(&TYPE_CONTAINER.to_string()));
        assert!(!names.contains(&"template".to_string()));
        assert!(!names.contains(&TYPE_INTERFACE.to_string()));
    }

    #[test]
    fn test_class_level_casts() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeInfo {
            name: "base".into(),
            ..Default::default()
        });
        let leaf = registry.register(TypeInfo {
            name: "leaf".into(),
            parent: Some("base".into()),
            ..Default::default()
        });

        registry.ensure_class(leaf);
        let class = registry.class(leaf).unwrap().clone();
        assert!(registry.class_is_type(&class, "base"));
        assert!(registry.class_dynamic_cast(&class, "base").is_some());
        assert!(registry.class_dynamic_cast(&class, "container").is_none());
    }

    #[test]
    #[should_panic(expected = "is not a subclass")]
    fn test_class_cast_assert_panics_on_unrelated_type() {
        let mut registry = TypeRegistry::new();
        let widget = registry.register(TypeInfo {
            name: "widget".into(),
            ..Default::default()
        });
        registry.ensure_class(widget);
        let class = registry.class(widget).unwrap().clone();
        registry.class_dynamic_cast_assert(&class, TYPE_CONTAINER);
    }
}
