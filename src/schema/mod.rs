// SPDX-License-Identifier: Apache-2.0

//! Runtime object model synthesized from discovered table shapes.

pub mod field;
pub mod model;
pub mod synth;

pub use field::{normalize_type, Field, FieldKind, ForeignKeyRef, ModelId};
pub use model::{model_name, Model, ModelInstance};
pub use synth::{Schema, SynthesisIssue};
