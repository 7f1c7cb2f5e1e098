//! Path naming and resolution over the composition tree
//!
//! Every object attached under the tree root has a canonical path, built
//! from the child property names on the way down. Resolution accepts two
//! forms: absolute paths (leading `/`) walk from the root through child
//! and link properties, and partial paths (no leading `/`) search the
//! whole tree for a unique node the remaining components resolve from.
//! A partial path matching more than one node fails loudly rather than
//! picking one.

use crate::object::ObjectId;
use crate::property::PropertyKind;
use crate::tree::ObjectTree;
use crate::{QomError, QomResult};

impl ObjectTree {
    /// Canonical absolute path of an attached object; `"/"` for the root.
    ///
    /// Panics if the object is not reachable from the root through child
    /// properties, since an unattached object has no name.
    pub fn canonical_path(&self, id: ObjectId) -> String {
        if id == self.root() {
            return "/".to_string();
        }

        let mut segments = Vec::new();
        let mut cur = id;
        while cur != self.root() {
            let parent = self
                .object(cur)
                .parent()
                .unwrap_or_else(|| panic!("object {:?} is not attached to the tree", cur));
            segments.push(self.child_name_in(parent, cur));
            cur = parent;
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    /// Name of the child property on `parent` that owns `child`
    fn child_name_in(&self, parent: ObjectId, child: ObjectId) -> &str {
        self.object(parent)
            .properties()
            .iter()
            .find(|p| matches!(p.kind(), PropertyKind::Child { child: c } if *c == child))
            .map(|p| p.name())
            .expect("parented object has a child property record")
    }

    /// Resolve a path to an object.
    ///
    /// `""` and `"/"` name the root. Anything else with a leading `/` is
    /// walked from the root; other paths are resolved partially and must
    /// match exactly one node anywhere in the tree.
    pub fn resolve_path(&self, path: &str) -> QomResult<ObjectId> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return Ok(self.root());
        }

        if path.starts_with('/') {
            return self
                .resolve_abs(self.root(), &parts)
                .ok_or_else(|| QomError::ObjectNotFound {
                    path: path.to_string(),
                });
        }

        let mut ambiguous = false;
        match self.resolve_partial(self.root(), &parts, &mut ambiguous) {
            _ if ambiguous => Err(QomError::AmbiguousPath {
                path: path.to_string(),
            }),
            Some(id) => Ok(id),
            None => Err(QomError::ObjectNotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Walk components down from `from`, following child and link
    /// properties. A dangling link ends the walk with no match.
    fn resolve_abs(&self, from: ObjectId, parts: &[&str]) -> Option<ObjectId> {
        let mut cur = from;
        for part in parts {
            let obj = self.object(cur);
            let index = obj.find_property(part)?;
            cur = match obj.properties()[index].kind() {
                PropertyKind::Child { child } => *child,
                PropertyKind::Link { target, .. } => {
                    let target = (*target)?;
                    // a link may outlive its target
                    self.get(target)?;
                    target
                }
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Try the components from every node of the subtree under `from`.
    /// Sets `ambiguous` and returns `None` when two distinct nodes match.
    fn resolve_partial(
        &self,
        from: ObjectId,
        parts: &[&str],
        ambiguous: &mut bool,
    ) -> Option<ObjectId> {
        let mut found = self.resolve_abs(from, parts);

        for prop in self.object(from).properties() {
            if let PropertyKind::Child { child } = prop.kind() {
                if let Some(hit) = self.resolve_partial(*child, parts, ambiguous) {
                    if found.is_some() && found != Some(hit) {
                        *ambiguous = true;
                        return None;
                    }
                    found = Some(hit);
                }
                if *ambiguous {
                    return None;
                }
            }
        }
        found
    }
}
