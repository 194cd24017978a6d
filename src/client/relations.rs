//! Relation bookkeeping over the pool's entity store
//!
//! A child whose many-to-one field names a parent that is not pooled yet is parked in the
//! [`OrphanIndex`] under the parent's key and joins the parent's collection once the parent
//! arrives.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::client::entity::Entity;
use crate::client::schema::ModelKind;

pub type EntityKey = (ModelKind, String);

pub(crate) type Store = HashMap<ModelKind, IndexMap<String, Entity>>;

/// A child's reference to its parent through a many-to-one field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentLink {
    pub field: &'static str,
    pub parent: EntityKey,
    pub collection: &'static str,
}

pub fn parent_links(entity: &Entity) -> Vec<ParentLink> {
    entity
        .kind()
        .schema()
        .many_to_one()
        .filter_map(|(field, target, collection)| {
            entity.get_str(field).map(|id| ParentLink {
                field,
                parent: (target, id.to_string()),
                collection,
            })
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct OrphanIndex {
    waiting: HashMap<EntityKey, IndexSet<EntityKey>>,
}

impl OrphanIndex {
    pub fn park(&mut self, parent: EntityKey, child: EntityKey) {
        self.waiting.entry(parent).or_default().insert(child);
    }

    /// Take every child waiting on `parent`.
    pub fn adopt(&mut self, parent: &EntityKey) -> Vec<EntityKey> {
        self.waiting
            .remove(parent)
            .map(|children| children.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn forget(&mut self, child: &EntityKey) {
        self.waiting.retain(|_, children| {
            children.shift_remove(child);
            !children.is_empty()
        });
    }

    pub fn waiting_on(&self, parent: &EntityKey) -> usize {
        self.waiting.get(parent).map_or(0, IndexSet::len)
    }

    pub fn len(&self) -> usize {
        self.waiting.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn clear(&mut self) {
        self.waiting.clear();
    }
}

pub(crate) fn lookup<'a>(store: &'a Store, key: &EntityKey) -> Option<&'a Entity> {
    store.get(&key.0).and_then(|entities| entities.get(&key.1))
}

pub(crate) fn lookup_mut<'a>(store: &'a mut Store, key: &EntityKey) -> Option<&'a mut Entity> {
    store.get_mut(&key.0).and_then(|entities| entities.get_mut(&key.1))
}

/// Add `child` to the collections of its parents, parking it for parents not yet pooled.
pub(crate) fn bind(store: &mut Store, orphans: &mut OrphanIndex, child: &EntityKey) {
    let links = match lookup(store, child) {
        Some(entity) => parent_links(entity),
        None => return,
    };

    for link in links {
        match lookup_mut(store, &link.parent) {
            Some(parent) => {
                if let Some(members) = parent.collection_mut(link.collection) {
                    members.insert(child.1.clone());
                }
            }
            None => orphans.park(link.parent, child.clone()),
        }
    }
}

/// Drop `child` from its parents' collections and from the orphan index.
pub(crate) fn unbind(store: &mut Store, orphans: &mut OrphanIndex, child: &EntityKey) {
    orphans.forget(child);

    let links = match lookup(store, child) {
        Some(entity) => parent_links(entity),
        None => return,
    };

    for link in links {
        if let Some(members) =
            lookup_mut(store, &link.parent).and_then(|parent| parent.collection_mut(link.collection))
        {
            members.shift_remove(&child.1);
        }
    }
}

/// Park the remaining members of a parent that is leaving the pool.
pub(crate) fn release_children(parent: &Entity, orphans: &mut OrphanIndex) {
    let key = parent.key();
    for def in parent.kind().schema().collections {
        if let Some(members) = parent.collection(def.name) {
            for id in members {
                orphans.park(key.clone(), (def.child, id.clone()));
            }
        }
    }
}

/// `root` followed by everything reachable through cascading collections, depth first.
pub(crate) fn cascade_keys(store: &Store, root: &EntityKey) -> Vec<EntityKey> {
    let mut keys = Vec::new();
    let mut stack = vec![root.clone()];

    while let Some(key) = stack.pop() {
        let Some(entity) = lookup(store, &key) else {
            continue;
        };
        for def in entity.kind().schema().collections.iter().filter(|def| def.cascade) {
            if let Some(members) = entity.collection(def.name) {
                for id in members.iter().rev() {
                    stack.push((def.child, id.clone()));
                }
            }
        }
        keys.push(key);
    }

    keys
}
