// SPDX-License-Identifier: Apache-2.0

//! Synthesized table descriptors and the instances written through them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::types::{NodeId, TableShape, Value};

use super::field::{Field, ModelId};

/// Derives a model name from a raw table name.
///
/// Title-cases every alphabetic run (`user_orders` → `User_Orders`,
/// `USERS` → `Users`). Deterministic; collisions inside one node are
/// resolved by [`super::Schema::build`].
pub fn model_name(table_name: &str) -> String {
    let mut name = String::with_capacity(table_name.len());
    let mut at_boundary = true;

    for ch in table_name.trim().chars() {
        if ch.is_alphabetic() {
            if at_boundary {
                name.extend(ch.to_uppercase());
            } else {
                name.extend(ch.to_lowercase());
            }
            at_boundary = false;
        } else {
            name.push(ch);
            at_boundary = true;
        }
    }

    name
}

/// One table, as synthesized from a node's discovery payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub(crate) id: ModelId,
    pub(crate) name: String,
    pub(crate) table_name: String,
    pub(crate) fields: Vec<Field>,
    pub(crate) node_id: Option<NodeId>,
    pub(crate) raw_shape: TableShape,
}

impl Model {
    /// Builds a model that belongs to no node yet, e.g. one a caller wants
    /// created on some nodes. Foreign keys stay unresolved.
    pub fn detached(shape: TableShape) -> Self {
        let mut fields: Vec<Field> = Vec::with_capacity(shape.columns.len());
        for column in &shape.columns {
            if fields.iter().all(|f| f.name != column.name) {
                fields.push(Field::from_column(column));
            }
        }

        Self {
            id: ModelId(0),
            name: model_name(&shape.table_name),
            table_name: shape.table_name.clone(),
            fields,
            node_id: None,
            raw_shape: shape,
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_foreign_key())
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    /// Discovery payload this model was built from.
    pub fn raw_shape(&self) -> &TableShape {
        &self.raw_shape
    }

    /// Shape a driver needs to materialize this model's field set.
    pub fn to_shape(&self) -> TableShape {
        TableShape {
            table_name: self.table_name.clone(),
            columns: self.fields.iter().map(Field::to_column).collect(),
        }
    }
}

/// A record to be written into some model.
///
/// Only the columns that were explicitly set take part in an insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInstance {
    model: String,
    values: BTreeMap<String, Value>,
}

impl ModelInstance {
    /// `model` may be a model name or a raw table name.
    pub fn new(model: &str) -> Self {
        Self {
            model: model_name(model),
            values: BTreeMap::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
