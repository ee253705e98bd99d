// SPDX-License-Identifier: Apache-2.0

//! Schema synthesis
//!
//! Turns the table shapes a driver discovers into an immutable [`Schema`].
//! Synthesis runs in two phases:
//!
//! 1. every table becomes a [`Model`]; foreign keys are recorded by target
//!    table name only
//! 2. each foreign key is resolved against the completed name mapping
//!
//! Tables may therefore reference tables discovered after them, and no field
//! ever points at a partially built model.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::engine::types::{NodeId, TableShape};

use super::field::{Field, FieldKind, ModelId};
use super::model::{model_name, Model};

/// Something synthesis could not fully understand. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum SynthesisIssue {
    UnknownType {
        table: String,
        column: String,
        native_type: String,
    },
    DuplicateColumn {
        table: String,
        column: String,
    },
    DuplicateTable {
        table: String,
    },
    NameCollision {
        table: String,
        model: String,
    },
    UnresolvedForeignKey {
        table: String,
        column: String,
        target: String,
    },
}

impl fmt::Display for SynthesisIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType {
                table,
                column,
                native_type,
            } => write!(
                f,
                "{table}.{column}: unrecognized type '{native_type}', kept as unknown"
            ),
            Self::DuplicateColumn { table, column } => {
                write!(f, "{table}.{column}: duplicate column skipped")
            }
            Self::DuplicateTable { table } => write!(f, "{table}: duplicate table skipped"),
            Self::NameCollision { table, model } => {
                write!(f, "{table}: model name collides, registered as '{model}'")
            }
            Self::UnresolvedForeignKey {
                table,
                column,
                target,
            } => write!(
                f,
                "{table}.{column}: foreign key target '{target}' not found on this node"
            ),
        }
    }
}

/// Immutable set of models synthesized for one node.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    node_id: Option<NodeId>,
    models: Vec<Model>,
    by_name: HashMap<String, ModelId>,
    by_table: HashMap<String, ModelId>,
    issues: Vec<SynthesisIssue>,
}

impl Schema {
    pub fn empty(node_id: Option<NodeId>) -> Self {
        Self {
            node_id,
            ..Self::default()
        }
    }

    /// Synthesizes one model per shape and resolves foreign keys.
    pub fn build(node_id: Option<NodeId>, shapes: Vec<TableShape>) -> Self {
        let mut schema = Self::empty(node_id);

        for shape in shapes {
            schema.synthesize(shape);
        }
        schema.resolve_foreign_keys();

        schema
    }

    /// Returns a new schema with `shape` added, replacing any table of the
    /// same raw name.
    pub fn with_shape(&self, shape: TableShape) -> Self {
        let mut shapes: Vec<TableShape> = self
            .models
            .iter()
            .filter(|m| m.table_name != shape.table_name)
            .map(|m| m.raw_shape.clone())
            .collect();
        shapes.push(shape);
        Self::build(self.node_id, shapes)
    }

    fn synthesize(&mut self, shape: TableShape) {
        if self.by_table.contains_key(&shape.table_name) {
            self.issues.push(SynthesisIssue::DuplicateTable {
                table: shape.table_name,
            });
            return;
        }

        let base = model_name(&shape.table_name);
        let mut name = base.clone();
        let mut suffix = 2;
        while self.by_name.contains_key(&name) {
            name = format!("{base}_{suffix}");
            suffix += 1;
        }
        if name != base {
            self.issues.push(SynthesisIssue::NameCollision {
                table: shape.table_name.clone(),
                model: name.clone(),
            });
        }

        let mut fields: Vec<Field> = Vec::with_capacity(shape.columns.len());
        for column in &shape.columns {
            if fields.iter().any(|f| f.name == column.name) {
                self.issues.push(SynthesisIssue::DuplicateColumn {
                    table: shape.table_name.clone(),
                    column: column.name.clone(),
                });
                continue;
            }

            let field = Field::from_column(column);
            if field.storage_kind() == FieldKind::Unknown {
                self.issues.push(SynthesisIssue::UnknownType {
                    table: shape.table_name.clone(),
                    column: column.name.clone(),
                    native_type: column.native_type.clone(),
                });
            }
            fields.push(field);
        }

        let id = ModelId(self.models.len());
        self.by_name.insert(name.clone(), id);
        self.by_table.insert(shape.table_name.clone(), id);
        self.models.push(Model {
            id,
            name,
            table_name: shape.table_name.clone(),
            fields,
            node_id: self.node_id,
            raw_shape: shape,
        });
    }

    fn resolve_foreign_keys(&mut self) {
        for model in &mut self.models {
            for field in &mut model.fields {
                let Some(fk) = field.foreign_key.as_mut() else {
                    continue;
                };

                fk.model = self
                    .by_table
                    .get(&fk.table)
                    .or_else(|| self.by_name.get(&model_name(&fk.table)))
                    .copied();

                if fk.model.is_none() {
                    self.issues.push(SynthesisIssue::UnresolvedForeignKey {
                        table: model.table_name.clone(),
                        column: field.name.clone(),
                        target: fk.table.clone(),
                    });
                }
            }
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn get(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id.0)
    }

    /// Looks a model up by raw table name, model name, or a name that
    /// normalizes to a model name (`"orders"` finds `Orders`).
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.lookup(name).and_then(|id| self.get(id))
    }

    pub fn lookup(&self, name: &str) -> Option<ModelId> {
        self.by_table
            .get(name)
            .or_else(|| self.by_name.get(name))
            .or_else(|| self.by_name.get(&model_name(name)))
            .copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Model a foreign-key field points at, once resolved.
    pub fn foreign_target(&self, field: &Field) -> Option<&Model> {
        field
            .foreign_key
            .as_ref()
            .and_then(|fk| fk.model)
            .and_then(|id| self.get(id))
    }

    pub fn issues(&self) -> &[SynthesisIssue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ColumnShape;

    fn users() -> TableShape {
        TableShape::new("users")
            .column(ColumnShape::new("id", "integer").not_null())
            .column(ColumnShape::new("name", "text"))
    }

    fn orders() -> TableShape {
        TableShape::new("orders")
            .column(ColumnShape::new("id", "integer").not_null())
            .column(ColumnShape::new("user_id", "integer").references("users"))
    }

    #[test]
    fn backward_reference_resolves_to_full_model() {
        let schema = Schema::build(None, vec![users(), orders()]);

        let orders = schema.model("orders").unwrap();
        let fk = orders.field("user_id").unwrap();
        let target = schema.foreign_target(fk).unwrap();

        assert_eq!(target.name(), "Users");
        assert_eq!(target.field_count(), 2);
        assert!(schema.issues().is_empty());
    }

    #[test]
    fn forward_reference_resolves_to_canonical_model() {
        let schema = Schema::build(None, vec![orders(), users()]);

        let fk = schema.model("Orders").unwrap().field("user_id").unwrap();
        let target = schema.foreign_target(fk).unwrap();
        let canonical = schema.model("Users").unwrap();

        assert!(std::ptr::eq(target, canonical));
        assert_eq!(target.field_count(), canonical.field_count());
    }

    #[test]
    fn self_reference_resolves() {
        let employees = TableShape::new("employees")
            .column(ColumnShape::new("id", "integer"))
            .column(ColumnShape::new("manager_id", "integer").references("employees"));
        let schema = Schema::build(None, vec![employees]);

        let model = schema.model("employees").unwrap();
        let target = schema
            .foreign_target(model.field("manager_id").unwrap())
            .unwrap();
        assert!(std::ptr::eq(target, model));
    }

    #[test]
    fn missing_target_is_reported_not_fatal() {
        let schema = Schema::build(None, vec![orders()]);

        let fk = schema.model("orders").unwrap().field("user_id").unwrap();
        assert!(schema.foreign_target(fk).is_none());
        assert_eq!(
            schema.issues(),
            &[SynthesisIssue::UnresolvedForeignKey {
                table: "orders".to_string(),
                column: "user_id".to_string(),
                target: "users".to_string(),
            }]
        );
    }

    #[test]
    fn unknown_type_keeps_column_and_names_it() {
        let docs = TableShape::new("docs")
            .column(ColumnShape::new("id", "integer"))
            .column(ColumnShape::new("body", "tsvector"));
        let schema = Schema::build(None, vec![docs, users()]);

        assert_eq!(schema.len(), 2);
        let body = schema.model("docs").unwrap().field("body").unwrap();
        assert_eq!(body.kind, FieldKind::Unknown);

        let issue = schema.issues()[0].to_string();
        assert!(issue.contains("docs.body"));
        assert!(issue.contains("tsvector"));
    }

    #[test]
    fn colliding_names_get_suffixes() {
        let lower = TableShape::new("users").column(ColumnShape::new("id", "integer"));
        let upper = TableShape::new("USERS").column(ColumnShape::new("id", "integer"));
        let schema = Schema::build(None, vec![lower, upper]);

        assert_eq!(schema.model("users").unwrap().name(), "Users");
        assert_eq!(schema.model("USERS").unwrap().name(), "Users_2");
        assert!(matches!(
            schema.issues()[0],
            SynthesisIssue::NameCollision { .. }
        ));
    }

    #[test]
    fn duplicate_columns_are_skipped() {
        let shape = TableShape::new("t")
            .column(ColumnShape::new("id", "integer"))
            .column(ColumnShape::new("id", "text"));
        let schema = Schema::build(None, vec![shape]);

        let model = schema.model("t").unwrap();
        assert_eq!(model.field_count(), 1);
        assert_eq!(model.field("id").unwrap().kind, FieldKind::Integer);
    }

    #[test]
    fn with_shape_rebuilds_references() {
        let schema = Schema::build(None, vec![orders()]);
        let schema = schema.with_shape(users());

        let fk = schema.model("orders").unwrap().field("user_id").unwrap();
        assert_eq!(schema.foreign_target(fk).unwrap().name(), "Users");
        assert!(schema.issues().is_empty());
    }
}
