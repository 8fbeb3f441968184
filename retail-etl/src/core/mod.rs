//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the pipeline:
//! - Stage names and status enums
//! - Stage output summaries
//! - Raw objects and warehouse relations

mod output;
mod relation;
mod status;

pub use output::StageOutput;
pub use relation::{
    normalize_prefix, ColumnDef, ColumnType, RawObject, Relation, RelationKind,
};
pub use status::{StageName, StageStatus};
