// SPDX-License-Identifier: Apache-2.0

//! Typed column descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::types::ColumnShape;

/// Closed set of primitive column kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Text,
    Boolean,
    Float,
    Timestamp,
    ForeignKey,
    /// Type tag not understood; values round-trip untouched
    Unknown,
}

impl FieldKind {
    /// Maps a native type tag to its storage kind.
    ///
    /// Never returns `ForeignKey`: that kind comes from the column's
    /// reference, not from its type tag.
    pub fn classify(native_type: &str) -> FieldKind {
        let normalized = normalize_type(native_type);

        match normalized.as_str() {
            "integer" | "int" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "tinyint"
            | "mediumint" | "serial" | "serial2" | "serial4" | "serial8" | "smallserial"
            | "bigserial" => FieldKind::Integer,

            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar"
            | "citext" | "name" | "string" | "clob" | "nvarchar" | "nchar" | "longtext"
            | "mediumtext" | "tinytext" | "uuid" => FieldKind::Text,

            "boolean" | "bool" => FieldKind::Boolean,

            "real" | "float" | "float4" | "float8" | "double" | "double precision" | "numeric"
            | "decimal" => FieldKind::Float,

            "timestamp" | "timestamptz" | "timestamp without time zone"
            | "timestamp with time zone" | "datetime" | "date" => FieldKind::Timestamp,

            _ => FieldKind::Unknown,
        }
    }

    /// Type tag used when materializing a field that carries no native tag.
    pub fn default_native_type(self) -> &'static str {
        match self {
            FieldKind::Integer | FieldKind::ForeignKey => "integer",
            FieldKind::Text | FieldKind::Unknown => "text",
            FieldKind::Boolean => "boolean",
            FieldKind::Float => "double precision",
            FieldKind::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Integer => "integer",
            FieldKind::Text => "text",
            FieldKind::Boolean => "boolean",
            FieldKind::Float => "float",
            FieldKind::Timestamp => "timestamp",
            FieldKind::ForeignKey => "foreign_key",
            FieldKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Lower-cases a type tag, strips parameters and collapses whitespace.
///
/// `"CHARACTER VARYING(255)"` becomes `"character varying"`.
pub fn normalize_type(native_type: &str) -> String {
    let without_params = match native_type.find('(') {
        Some(idx) => {
            let tail = native_type[idx..]
                .find(')')
                .map(|end| &native_type[idx + end + 1..])
                .unwrap_or("");
            format!("{}{}", &native_type[..idx], tail)
        }
        None => native_type.to_string(),
    };

    without_params
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Index of a model inside its node's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelId(pub usize);

/// Target of a foreign-key field.
///
/// `model` stays `None` until the second synthesis phase has seen every
/// table of the node; it remains `None` if the target table does not exist
/// there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub model: Option<ModelId>,
}

/// One column of a synthesized model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub native_type: String,
    pub nullable: bool,
    pub foreign_key: Option<ForeignKeyRef>,
}

impl Field {
    pub fn from_column(column: &ColumnShape) -> Self {
        let (kind, foreign_key) = match &column.foreign_key_target {
            Some(target) => (
                FieldKind::ForeignKey,
                Some(ForeignKeyRef {
                    table: target.clone(),
                    model: None,
                }),
            ),
            None => (FieldKind::classify(&column.native_type), None),
        };

        Self {
            name: column.name.clone(),
            kind,
            native_type: column.native_type.clone(),
            nullable: column.nullable,
            foreign_key,
        }
    }

    /// Storage kind, looking through foreign keys to their column type.
    pub fn storage_kind(&self) -> FieldKind {
        match self.kind {
            FieldKind::ForeignKey => FieldKind::classify(&self.native_type),
            kind => kind,
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        self.foreign_key.is_some()
    }

    pub fn to_column(&self) -> ColumnShape {
        let native_type = if self.native_type.trim().is_empty() {
            self.kind.default_native_type().to_string()
        } else {
            self.native_type.clone()
        };

        ColumnShape {
            name: self.name.clone(),
            native_type,
            nullable: self.nullable,
            foreign_key_target: self.foreign_key.as_ref().map(|fk| fk.table.clone()),
        }
    }
}
