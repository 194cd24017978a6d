//! Identity map of every entity the client has loaded
//!
//! The pool holds at most one [`Entity`] per `(model, id)`. Entities refer to each other by
//! id; collections and lazy relations are resolved against the pool. Every structural change
//! is published on a broadcast channel as a [`PoolEvent`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::client::entity::{Entity, PendingChange};
use crate::client::relations::{self, EntityKey, OrphanIndex, Store};
use crate::client::schema::ModelKind;
use crate::errors::{ClientError, ClientResult};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub enum PoolEvent {
    Added {
        kind: ModelKind,
        id: String,
    },
    Removed {
        kind: ModelKind,
        id: String,
    },
    Changed {
        kind: ModelKind,
        id: String,
        fields: Vec<&'static str>,
    },
    Cleared {
        kind: ModelKind,
    },
}

pub type SharedPool = Arc<Mutex<ObjectPool>>;

/// Lock a shared pool. A poisoned lock still guards consistent data since no pool method
/// panics midway.
pub fn lock(pool: &Mutex<ObjectPool>) -> MutexGuard<'_, ObjectPool> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct ObjectPool {
    entities: Store,
    orphans: OrphanIndex,
    events: broadcast::Sender<PoolEvent>,
    closed: bool,
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectPool {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entities: Store::new(),
            orphans: OrphanIndex::default(),
            events,
            closed: false,
        }
    }

    pub fn shared() -> SharedPool {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get(&self, kind: ModelKind, id: &str) -> Option<&Entity> {
        self.entities.get(&kind).and_then(|entities| entities.get(id))
    }

    pub fn contains(&self, kind: ModelKind, id: &str) -> bool {
        self.get(kind, id).is_some()
    }

    /// Entities of `kind` in insertion order.
    pub fn all(&self, kind: ModelKind) -> impl Iterator<Item = &Entity> {
        self.entities.get(&kind).into_iter().flat_map(|entities| entities.values())
    }

    pub fn len(&self, kind: ModelKind) -> usize {
        self.entities.get(&kind).map_or(0, IndexMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.values().all(IndexMap::is_empty)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn add(&mut self, entity: Entity) -> ClientResult<()> {
        self.add_many(vec![entity])
    }

    /// Register a batch of entities. All identities are checked before any is inserted, and
    /// relations are bound only once the whole batch is present.
    pub fn add_many(&mut self, entities: Vec<Entity>) -> ClientResult<()> {
        self.ensure_open()?;

        let mut batch: IndexMap<EntityKey, Entity> = IndexMap::with_capacity(entities.len());
        for entity in entities {
            let key = entity.key();
            if self.contains(key.0, &key.1) || batch.contains_key(&key) {
                return Err(ClientError::DuplicateIdentity {
                    model: key.0.name().to_string(),
                    id: key.1,
                });
            }
            batch.insert(key, entity);
        }

        let keys: Vec<EntityKey> = batch.keys().cloned().collect();
        for ((kind, id), mut entity) in batch {
            entity.seal();
            entity.clear_collections();
            self.entities.entry(kind).or_default().insert(id, entity);
        }

        for key in &keys {
            relations::bind(&mut self.entities, &mut self.orphans, key);
        }
        for key in &keys {
            for child in self.orphans.adopt(key) {
                relations::bind(&mut self.entities, &mut self.orphans, &child);
            }
        }

        for (kind, id) in keys {
            self.emit(PoolEvent::Added { kind, id });
        }
        Ok(())
    }

    /// Remove an entity and everything its cascading collections reach. Returns the removed
    /// entities, root first.
    pub fn remove(&mut self, kind: ModelKind, id: &str) -> ClientResult<Vec<Entity>> {
        self.ensure_open()?;
        if !self.contains(kind, id) {
            return Err(not_in_pool(kind, id));
        }

        let keys = relations::cascade_keys(&self.entities, &(kind, id.to_string()));
        let mut removed = Vec::with_capacity(keys.len());

        for key in keys.iter().rev() {
            relations::unbind(&mut self.entities, &mut self.orphans, key);
            let entity = self
                .entities
                .get_mut(&key.0)
                .and_then(|entities| entities.shift_remove(&key.1));
            if let Some(entity) = entity {
                relations::release_children(&entity, &mut self.orphans);
                self.emit(PoolEvent::Removed {
                    kind: key.0,
                    id: key.1.clone(),
                });
                removed.push(entity);
            }
        }

        removed.reverse();
        debug!("Removed {} entities rooted at {} '{}'", removed.len(), kind, id);
        Ok(removed)
    }

    /// Put previously removed entities back. Identities already present again are skipped.
    pub fn restore(&mut self, entities: Vec<Entity>) -> ClientResult<usize> {
        let missing: Vec<Entity> = entities
            .into_iter()
            .filter(|entity| !self.contains(entity.kind(), entity.id()))
            .collect();
        let count = missing.len();
        self.add_many(missing)?;
        Ok(count)
    }

    /// Resolve a lazy relation of an entity.
    pub fn relation(&self, kind: ModelKind, id: &str, name: &str) -> ClientResult<&Entity> {
        let entity = self.get(kind, id).ok_or_else(|| not_in_pool(kind, id))?;
        let def = kind
            .schema()
            .relation(name)
            .ok_or_else(|| ClientError::UnknownField {
                model: kind.name().to_string(),
                field: name.to_string(),
            })?;

        let target_id = entity.get_str(def.id_field).unwrap_or_default();
        self.get(def.target, target_id)
            .ok_or_else(|| ClientError::RelationUnresolved {
                model: def.target.name().to_string(),
                id: target_id.to_string(),
            })
    }

    /// Members of a one-to-many collection, in the order they joined it.
    pub fn children(&self, kind: ModelKind, id: &str, collection: &str) -> ClientResult<Vec<&Entity>> {
        let entity = self.get(kind, id).ok_or_else(|| not_in_pool(kind, id))?;
        let def = kind
            .schema()
            .collection(collection)
            .ok_or_else(|| ClientError::UnknownField {
                model: kind.name().to_string(),
                field: collection.to_string(),
            })?;

        Ok(entity
            .collection(def.name)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|child| self.get(def.child, child))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Buffer a field write on a pooled entity.
    pub fn stage(&mut self, kind: ModelKind, id: &str, field: &str, value: Value) -> ClientResult<()> {
        self.ensure_open()?;
        self.entities
            .get_mut(&kind)
            .and_then(|entities| entities.get_mut(id))
            .ok_or_else(|| not_in_pool(kind, id))?
            .set(field, value)
    }

    /// Apply an entity's buffered writes, stamping `updatedAt`. Returns what was applied so
    /// the caller can reverse it.
    pub fn apply_pending(
        &mut self,
        kind: ModelKind,
        id: &str,
        now: DateTime<Utc>,
    ) -> ClientResult<IndexMap<&'static str, PendingChange>> {
        self.ensure_open()?;
        let key = (kind, id.to_string());
        let entity = relations::lookup_mut(&mut self.entities, &key)
            .ok_or_else(|| not_in_pool(kind, id))?;

        let mut changes = entity.take_pending();
        if changes.is_empty() {
            return Ok(changes);
        }
        if kind.schema().has_field("updatedAt") {
            let old = match changes.get("updatedAt") {
                Some(staged) => staged.old.clone(),
                None => entity.get("updatedAt").cloned().unwrap_or(Value::Null),
            };
            let new = Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true));
            changes.insert("updatedAt", PendingChange { old, new });
        }

        let values = changes
            .iter()
            .map(|(field, change)| (*field, change.new.clone()))
            .collect();
        self.write_fields(&key, values);
        Ok(changes)
    }

    /// Undo applied changes, leaving alone any field that has moved on since.
    pub fn restore_fields(
        &mut self,
        kind: ModelKind,
        id: &str,
        changes: &IndexMap<&'static str, PendingChange>,
    ) -> ClientResult<Vec<&'static str>> {
        self.ensure_open()?;
        let key = (kind, id.to_string());
        let entity = relations::lookup(&self.entities, &key).ok_or_else(|| not_in_pool(kind, id))?;

        let values: Vec<(&'static str, Value)> = changes
            .iter()
            .filter(|(field, change)| entity.get(field) == Some(&change.new))
            .map(|(field, change)| (*field, change.old.clone()))
            .collect();
        let fields = values.iter().map(|(field, _)| *field).collect();
        self.write_fields(&key, values);
        Ok(fields)
    }

    /// Merge remote state: known identities are refreshed in place, new ones are added.
    pub fn upsert_many(&mut self, entities: Vec<Entity>) -> ClientResult<()> {
        self.ensure_open()?;

        let mut fresh: IndexMap<EntityKey, Entity> = IndexMap::new();
        for entity in entities {
            let key = entity.key();
            if !self.contains(key.0, &key.1) {
                fresh.insert(key, entity);
                continue;
            }

            relations::unbind(&mut self.entities, &mut self.orphans, &key);
            let changed = relations::lookup_mut(&mut self.entities, &key)
                .map(|existing| existing.refresh_from(&entity))
                .unwrap_or_default();
            relations::bind(&mut self.entities, &mut self.orphans, &key);

            if !changed.is_empty() {
                self.emit(PoolEvent::Changed {
                    kind: key.0,
                    id: key.1,
                    fields: changed,
                });
            }
        }

        self.add_many(fresh.into_values().collect())
    }

    /// Drop every entity of one model without cascading. Their children wait as orphans for
    /// the parents to be loaded again.
    pub fn clear_kind(&mut self, kind: ModelKind) {
        let keys: Vec<EntityKey> = self.all(kind).map(Entity::key).collect();
        for key in &keys {
            relations::unbind(&mut self.entities, &mut self.orphans, key);
        }
        if let Some(entities) = self.entities.remove(&kind) {
            for entity in entities.values() {
                relations::release_children(entity, &mut self.orphans);
            }
        }
        self.emit(PoolEvent::Cleared { kind });
    }

    pub fn clear(&mut self) {
        let kinds: Vec<ModelKind> = self.entities.keys().copied().collect();
        self.entities.clear();
        self.orphans.clear();
        for kind in kinds {
            self.emit(PoolEvent::Cleared { kind });
        }
    }

    /// Empty the pool and refuse further changes.
    pub fn close(&mut self) {
        self.clear();
        self.closed = true;
    }

    fn write_fields(&mut self, key: &EntityKey, values: Vec<(&'static str, Value)>) {
        if values.is_empty() {
            return;
        }

        relations::unbind(&mut self.entities, &mut self.orphans, key);
        let mut fields = Vec::with_capacity(values.len());
        if let Some(entity) = relations::lookup_mut(&mut self.entities, key) {
            for (field, value) in values {
                entity.write(field, value);
                fields.push(field);
            }
        }
        relations::bind(&mut self.entities, &mut self.orphans, key);

        self.emit(PoolEvent::Changed {
            kind: key.0,
            id: key.1.clone(),
            fields,
        });
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed {
            Err(ClientError::PoolClosed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: PoolEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

fn not_in_pool(kind: ModelKind, id: &str) -> ClientError {
    ClientError::NotInPool {
        model: kind.name().to_string(),
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issue(id: &str) -> Entity {
        let mut entity = Entity::new(ModelKind::Issue, id);
        entity.set("title", json!("Bug")).unwrap();
        entity.set("status", json!("TODO")).unwrap();
        entity.set("workspaceId", json!("W1")).unwrap();
        entity.set("descriptionId", json!(id)).unwrap();
        entity
    }

    fn comment(id: &str, issue_id: &str) -> Entity {
        let mut entity = Entity::new(ModelKind::Comment, id);
        entity.set("body", json!("hi")).unwrap();
        entity.set("issueId", json!(issue_id)).unwrap();
        entity
    }

    fn pool() -> ObjectPool {
        let mut pool = ObjectPool::new();
        pool.add(Entity::workspace("W1")).unwrap();
        pool
    }

    fn comment_ids(pool: &ObjectPool, issue_id: &str) -> Vec<String> {
        pool.children(ModelKind::Issue, issue_id, "comments")
            .unwrap()
            .into_iter()
            .map(|entity| entity.id().to_string())
            .collect()
    }

    #[test]
    fn test_add_rejects_duplicate_identity() {
        let mut pool = pool();
        pool.add(issue("I1")).unwrap();
        let err = pool.add(issue("I1")).unwrap_err();
        assert!(matches!(err, ClientError::DuplicateIdentity { .. }));
        assert_eq!(pool.len(ModelKind::Issue), 1);
    }

    #[test]
    fn test_add_seals_entity() {
        let mut pool = pool();
        pool.add(issue("I1")).unwrap();
        assert!(pool.get(ModelKind::Issue, "I1").unwrap().is_sealed());
    }

    #[test]
    fn test_child_added_before_parent_is_adopted() {
        let mut pool = pool();
        pool.add(comment("C1", "I1")).unwrap();
        assert_eq!(pool.orphan_count(), 1);

        pool.add(issue("I1")).unwrap();
        assert_eq!(pool.orphan_count(), 0);
        assert_eq!(comment_ids(&pool, "I1"), vec!["C1"]);
    }

    #[test]
    fn test_add_many_binds_within_batch() {
        let mut pool = pool();
        pool.add_many(vec![comment("C1", "I1"), issue("I1"), comment("C2", "I1")])
            .unwrap();
        assert_eq!(comment_ids(&pool, "I1"), vec!["C1", "C2"]);
        assert_eq!(pool.orphan_count(), 0);
        assert_eq!(
            pool.children(ModelKind::Workspace, "W1", "issues").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_remove_cascades_to_comments() {
        let mut pool = pool();
        pool.add_many(vec![issue("I1"), comment("C1", "I1"), comment("C2", "I1")])
            .unwrap();

        let removed = pool.remove(ModelKind::Issue, "I1").unwrap();
        let ids: Vec<&str> = removed.iter().map(Entity::id).collect();
        assert_eq!(ids, vec!["I1", "C1", "C2"]);
        assert_eq!(pool.len(ModelKind::Comment), 0);
        assert!(pool
            .children(ModelKind::Workspace, "W1", "issues")
            .unwrap()
            .is_empty());
        assert_eq!(pool.orphan_count(), 0);
    }

    #[test]
    fn test_restore_after_remove() {
        let mut pool = pool();
        pool.add_many(vec![issue("I1"), comment("C1", "I1")]).unwrap();

        let removed = pool.remove(ModelKind::Issue, "I1").unwrap();
        assert_eq!(pool.restore(removed).unwrap(), 2);
        assert_eq!(comment_ids(&pool, "I1"), vec!["C1"]);
    }

    #[test]
    fn test_remove_missing_entity() {
        let mut pool = pool();
        assert!(matches!(
            pool.remove(ModelKind::Comment, "C9"),
            Err(ClientError::NotInPool { .. })
        ));
    }

    #[test]
    fn test_relation_resolution() {
        let mut pool = pool();
        pool.add_many(vec![issue("I1"), comment("C1", "I1")]).unwrap();

        let parent = pool.relation(ModelKind::Comment, "C1", "issue").unwrap();
        assert_eq!(parent.id(), "I1");

        let err = pool.relation(ModelKind::Issue, "I1", "description").unwrap_err();
        assert_eq!(
            err,
            ClientError::RelationUnresolved {
                model: "description".to_string(),
                id: "I1".to_string(),
            }
        );
    }

    #[test]
    fn test_apply_pending_moves_comment_between_issues() {
        let mut pool = pool();
        pool.add_many(vec![issue("I1"), issue("I2"), comment("C1", "I1")])
            .unwrap();

        pool.stage(ModelKind::Comment, "C1", "issueId", json!("I2")).unwrap();
        let applied = pool
            .apply_pending(ModelKind::Comment, "C1", Utc::now())
            .unwrap();

        assert!(applied.contains_key("issueId"));
        assert!(applied.contains_key("updatedAt"));
        assert!(comment_ids(&pool, "I1").is_empty());
        assert_eq!(comment_ids(&pool, "I2"), vec!["C1"]);

        pool.restore_fields(ModelKind::Comment, "C1", &applied).unwrap();
        assert_eq!(comment_ids(&pool, "I1"), vec!["C1"]);
    }

    #[test]
    fn test_apply_pending_overrides_staged_updated_at() {
        let mut pool = pool();
        let original = json!("2024-01-01T12:00:00.000Z");
        let mut entity = issue("I1");
        entity.set("updatedAt", original.clone()).unwrap();
        pool.add(entity).unwrap();

        pool.stage(ModelKind::Issue, "I1", "updatedAt", json!("1999-01-01T00:00:00.000Z"))
            .unwrap();
        pool.stage(ModelKind::Issue, "I1", "title", json!("Renamed")).unwrap();
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 6, 1, 9, 30, 0).unwrap();
        let applied = pool.apply_pending(ModelKind::Issue, "I1", now).unwrap();

        let stamped = json!("2024-06-01T09:30:00.000Z");
        assert_eq!(applied["updatedAt"].new, stamped);
        assert_eq!(applied["updatedAt"].old, original);
        assert_eq!(
            pool.get(ModelKind::Issue, "I1").unwrap().get("updatedAt"),
            Some(&stamped)
        );

        pool.restore_fields(ModelKind::Issue, "I1", &applied).unwrap();
        assert_eq!(
            pool.get(ModelKind::Issue, "I1").unwrap().get("updatedAt"),
            Some(&original)
        );
    }

    #[test]
    fn test_restore_fields_skips_fields_changed_since() {
        let mut pool = pool();
        pool.add(issue("I1")).unwrap();

        pool.stage(ModelKind::Issue, "I1", "status", json!("DONE")).unwrap();
        let applied = pool.apply_pending(ModelKind::Issue, "I1", Utc::now()).unwrap();

        pool.stage(ModelKind::Issue, "I1", "status", json!("CANCELLED")).unwrap();
        pool.apply_pending(ModelKind::Issue, "I1", Utc::now()).unwrap();

        let restored = pool.restore_fields(ModelKind::Issue, "I1", &applied).unwrap();
        assert!(!restored.contains(&"status"));
        assert_eq!(
            pool.get(ModelKind::Issue, "I1").unwrap().get_str("status"),
            Some("CANCELLED")
        );
    }

    #[test]
    fn test_upsert_refreshes_existing_entities() {
        let mut pool = pool();
        pool.add(issue("I1")).unwrap();
        let mut events = pool.subscribe();

        let mut incoming = issue("I1");
        incoming.set("status", json!("DONE")).unwrap();
        pool.upsert_many(vec![incoming, issue("I2")]).unwrap();

        assert_eq!(
            pool.get(ModelKind::Issue, "I1").unwrap().get_str("status"),
            Some("DONE")
        );
        assert_eq!(pool.len(ModelKind::Issue), 2);
        assert_eq!(
            events.try_recv().unwrap(),
            PoolEvent::Changed {
                kind: ModelKind::Issue,
                id: "I1".to_string(),
                fields: vec!["status"],
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            PoolEvent::Added {
                kind: ModelKind::Issue,
                id: "I2".to_string(),
            }
        );
    }

    #[test]
    fn test_clear_kind_orphans_children() {
        let mut pool = pool();
        pool.add_many(vec![issue("I1"), comment("C1", "I1")]).unwrap();

        pool.clear_kind(ModelKind::Issue);
        assert_eq!(pool.len(ModelKind::Issue), 0);
        assert_eq!(pool.len(ModelKind::Comment), 1);
        assert_eq!(pool.orphan_count(), 1);

        pool.add(issue("I1")).unwrap();
        assert_eq!(comment_ids(&pool, "I1"), vec!["C1"]);
    }

    #[test]
    fn test_closed_pool_rejects_changes() {
        let mut pool = pool();
        pool.close();
        assert!(pool.is_closed());
        assert!(pool.is_empty());
        assert_eq!(pool.add(issue("I1")), Err(ClientError::PoolClosed));
    }
}
