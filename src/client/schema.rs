//! Static model metadata consulted by the pool
//!
//! Each model declares its fields, the one-to-many collections it owns and the lazy relations
//! it can navigate. Relation bookkeeping and cascade deletes are driven from these tables.

use std::fmt;

use crate::model::EntityType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelKind {
    Workspace,
    Issue,
    Comment,
    Description,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Workspace => "workspace",
            ModelKind::Issue => "issue",
            ModelKind::Comment => "comment",
            ModelKind::Description => "description",
        }
    }

    pub fn schema(&self) -> &'static ModelSchema {
        match self {
            ModelKind::Workspace => &WORKSPACE,
            ModelKind::Issue => &ISSUE,
            ModelKind::Comment => &COMMENT,
            ModelKind::Description => &DESCRIPTION,
        }
    }

    /// Log entity type backing this model; the workspace exists only on the client.
    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            ModelKind::Workspace => None,
            ModelKind::Issue => Some(EntityType::Issue),
            ModelKind::Comment => Some(EntityType::Comment),
            ModelKind::Description => Some(EntityType::Description),
        }
    }
}

impl From<EntityType> for ModelKind {
    fn from(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Issue => ModelKind::Issue,
            EntityType::Comment => ModelKind::Comment,
            EntityType::Description => ModelKind::Description,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Written once, before the entity is sealed
    Immutable,
    /// Observed; writes after sealing are buffered until saved
    Property,
    /// Observed id of a parent; membership in the parent's collection follows its value
    ManyToOne {
        target: ModelKind,
        collection: &'static str,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Part of the wire record; client-only fields are derived on ingest
    pub wire: bool,
}

impl FieldDef {
    const fn new(name: &'static str, kind: FieldKind, wire: bool) -> Self {
        Self { name, kind, wire }
    }

    pub fn is_immutable(&self) -> bool {
        matches!(self.kind, FieldKind::Immutable)
    }
}

/// One-to-many collection, filled by children whose `via` field names the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectionDef {
    pub name: &'static str,
    pub child: ModelKind,
    pub via: &'static str,
    pub cascade: bool,
}

/// Lazy lookup of `target` by the id stored in `id_field`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelationDef {
    pub name: &'static str,
    pub target: ModelKind,
    pub id_field: &'static str,
}

#[derive(Debug)]
pub struct ModelSchema {
    pub kind: ModelKind,
    pub fields: &'static [FieldDef],
    pub collections: &'static [CollectionDef],
    pub relations: &'static [RelationDef],
    /// Fields an update RPC accepts for this model
    pub updatable: &'static [&'static str],
}

impl ModelSchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn collection(&self, name: &str) -> Option<&'static CollectionDef> {
        self.collections.iter().find(|collection| collection.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static RelationDef> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    pub fn many_to_one(&self) -> impl Iterator<Item = (&'static str, ModelKind, &'static str)> {
        self.fields.iter().filter_map(|field| match field.kind {
            FieldKind::ManyToOne { target, collection } => Some((field.name, target, collection)),
            _ => None,
        })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

use FieldKind::{Immutable, Property};

static WORKSPACE: ModelSchema = ModelSchema {
    kind: ModelKind::Workspace,
    fields: &[FieldDef::new("id", Immutable, true)],
    collections: &[CollectionDef {
        name: "issues",
        child: ModelKind::Issue,
        via: "workspaceId",
        cascade: false,
    }],
    relations: &[],
    updatable: &[],
};

static ISSUE: ModelSchema = ModelSchema {
    kind: ModelKind::Issue,
    fields: &[
        FieldDef::new("id", Immutable, true),
        FieldDef::new("title", Property, true),
        FieldDef::new("status", Property, true),
        FieldDef::new("priority", Property, true),
        FieldDef::new("createdAt", Immutable, true),
        FieldDef::new("updatedAt", Property, true),
        FieldDef::new("creator", Immutable, true),
        FieldDef::new(
            "workspaceId",
            FieldKind::ManyToOne {
                target: ModelKind::Workspace,
                collection: "issues",
            },
            false,
        ),
        FieldDef::new("descriptionId", Immutable, false),
    ],
    collections: &[CollectionDef {
        name: "comments",
        child: ModelKind::Comment,
        via: "issueId",
        cascade: true,
    }],
    relations: &[
        RelationDef {
            name: "workspace",
            target: ModelKind::Workspace,
            id_field: "workspaceId",
        },
        RelationDef {
            name: "description",
            target: ModelKind::Description,
            id_field: "descriptionId",
        },
    ],
    updatable: &["status", "priority"],
};

static COMMENT: ModelSchema = ModelSchema {
    kind: ModelKind::Comment,
    fields: &[
        FieldDef::new("id", Immutable, true),
        FieldDef::new("createdAt", Immutable, true),
        FieldDef::new("updatedAt", Property, true),
        FieldDef::new("creator", Immutable, true),
        FieldDef::new("body", Property, true),
        FieldDef::new(
            "issueId",
            FieldKind::ManyToOne {
                target: ModelKind::Issue,
                collection: "comments",
            },
            true,
        ),
    ],
    collections: &[],
    relations: &[RelationDef {
        name: "issue",
        target: ModelKind::Issue,
        id_field: "issueId",
    }],
    updatable: &["body"],
};

// Keyed by the issue id; `id` is not part of the wire record
static DESCRIPTION: ModelSchema = ModelSchema {
    kind: ModelKind::Description,
    fields: &[
        FieldDef::new("id", Immutable, false),
        FieldDef::new("createdAt", Immutable, true),
        FieldDef::new("updatedAt", Property, true),
        FieldDef::new("body", Property, true),
        FieldDef::new("issueId", Immutable, true),
    ],
    collections: &[],
    relations: &[RelationDef {
        name: "issue",
        target: ModelKind::Issue,
        id_field: "issueId",
    }],
    updatable: &["body"],
};
