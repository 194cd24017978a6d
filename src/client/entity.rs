use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::schema::{FieldKind, ModelKind};
use crate::errors::{ClientError, ClientResult};
use crate::model::{Comment, Description, Issue};

/// A buffered write awaiting `save`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub old: Value,
    pub new: Value,
}

/// A pooled domain object.
///
/// Fields are addressed by their wire name. Until [`Entity::seal`] every field may be written;
/// afterwards immutable fields reject writes and observed fields buffer them in the pending
/// change buffer. One-to-many collections hold child ids and are maintained by the pool.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    kind: ModelKind,
    id: String,
    fields: IndexMap<&'static str, Value>,
    pending: IndexMap<&'static str, PendingChange>,
    collections: IndexMap<&'static str, IndexSet<String>>,
    sealed: bool,
}

impl Entity {
    pub fn new(kind: ModelKind, id: impl Into<String>) -> Self {
        let schema = kind.schema();
        let id = id.into();

        let mut fields = IndexMap::new();
        for field in schema.fields {
            fields.insert(field.name, Value::Null);
        }
        fields.insert("id", Value::String(id.clone()));

        let collections = schema
            .collections
            .iter()
            .map(|collection| (collection.name, IndexSet::new()))
            .collect();

        Self {
            kind,
            id,
            fields,
            pending: IndexMap::new(),
            collections,
            sealed: false,
        }
    }

    pub fn workspace(id: impl Into<String>) -> Self {
        let mut entity = Self::new(ModelKind::Workspace, id);
        entity.seal();
        entity
    }

    /// Issues carry the workspace they were synced into and point at their description.
    pub fn issue(issue: &Issue, workspace_id: &str) -> ClientResult<Self> {
        let mut entity = Self::unsealed_from(ModelKind::Issue, &issue.id, issue)?;
        entity.set("workspaceId", Value::String(workspace_id.to_string()))?;
        entity.set("descriptionId", Value::String(issue.id.clone()))?;
        entity.seal();
        Ok(entity)
    }

    pub fn comment(comment: &Comment) -> ClientResult<Self> {
        let mut entity = Self::unsealed_from(ModelKind::Comment, &comment.id, comment)?;
        entity.seal();
        Ok(entity)
    }

    pub fn description(description: &Description) -> ClientResult<Self> {
        let mut entity =
            Self::unsealed_from(ModelKind::Description, &description.issue_id, description)?;
        entity.seal();
        Ok(entity)
    }

    fn unsealed_from<T: Serialize>(kind: ModelKind, id: &str, record: &T) -> ClientResult<Self> {
        let mut entity = Self::new(kind, id);
        let value = serde_json::to_value(record)?;
        let object = value
            .as_object()
            .ok_or_else(|| ClientError::Decode(format!("{} record is not an object", kind)))?;

        for (name, value) in object {
            if name != "id" && kind.schema().has_field(name) {
                entity.set(name, value.clone())?;
            }
        }
        Ok(entity)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> (ModelKind, String) {
        (self.kind, self.id.clone())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Mark construction finished. Immutable fields are frozen from here on.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Write a field through the model's access rules.
    pub fn set(&mut self, field: &str, value: Value) -> ClientResult<()> {
        let def = self
            .kind
            .schema()
            .field(field)
            .ok_or_else(|| ClientError::UnknownField {
                model: self.kind.name().to_string(),
                field: field.to_string(),
            })?;

        if !self.sealed {
            self.fields.insert(def.name, value);
            return Ok(());
        }

        match def.kind {
            FieldKind::Immutable => Err(ClientError::ImmutableField {
                model: self.kind.name().to_string(),
                field: field.to_string(),
            }),
            FieldKind::Property | FieldKind::ManyToOne { .. } => {
                let old = self.fields.get(def.name).cloned().unwrap_or(Value::Null);
                self.pending.insert(def.name, PendingChange { old, new: value });
                Ok(())
            }
        }
    }

    /// Write bypassing the pending buffer. Used while applying a save or a remote change.
    pub(crate) fn write(&mut self, field: &'static str, value: Value) {
        self.fields.insert(field, value);
    }

    pub fn pending(&self) -> &IndexMap<&'static str, PendingChange> {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn take_pending(&mut self) -> IndexMap<&'static str, PendingChange> {
        std::mem::take(&mut self.pending)
    }

    pub fn collection(&self, name: &str) -> Option<&IndexSet<String>> {
        self.collections.get(name)
    }

    pub(crate) fn collection_mut(&mut self, name: &str) -> Option<&mut IndexSet<String>> {
        self.collections.get_mut(name)
    }

    pub(crate) fn clear_collections(&mut self) {
        for members in self.collections.values_mut() {
            members.clear();
        }
    }

    /// The wire record: every field marked for the wire, in schema order.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        for field in self.kind.schema().fields.iter().filter(|field| field.wire) {
            let value = self.fields.get(field.name).cloned().unwrap_or(Value::Null);
            object.insert(field.name.to_string(), value);
        }
        Value::Object(object)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(serde_json::from_value(self.to_value())?)
    }

    /// Copy observed field values from a fresher copy of the same entity. Returns the names
    /// of fields whose value changed.
    pub(crate) fn refresh_from(&mut self, other: &Entity) -> Vec<&'static str> {
        let mut changed = Vec::new();
        for field in self.kind.schema().fields {
            if field.is_immutable() {
                continue;
            }
            if let Some(value) = other.fields.get(field.name) {
                if self.fields.get(field.name) != Some(value) {
                    self.fields.insert(field.name, value.clone());
                    changed.push(field.name);
                }
            }
        }
        changed
    }
}
