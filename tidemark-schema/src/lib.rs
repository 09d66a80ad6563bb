//! # tidemark-schema
//!
//! Schema state model and target schema builder for tidemark.
//!
//! This crate provides:
//! - [`SchemaState`], the structural description of a relational schema that
//!   both the inspector and the model builder produce
//! - Model declarations ([`ModelSet`]) loadable from TOML files
//! - Structural validation and name-insensitive equivalence checks
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidemark_schema::{BuildSchema, ColumnSpec, ModelSet, ModelSpec};
//!
//! let models = ModelSet::new().model(
//!     ModelSpec::new("users")
//!         .column(ColumnSpec::new("id", "bigint").primary_key().identity())
//!         .column(ColumnSpec::new("email", "varchar").length(200).unique()),
//! );
//!
//! let target = models.build_schema("public")?;
//! ```

pub mod error;
pub mod model;
pub mod state;

pub use error::{SchemaError, SchemaResult};
pub use model::{BuildSchema, ColumnSpec, ForeignKeySpec, ModelSet, ModelSpec, UniqueSpec};
pub use state::{
    Column, ColumnRef, ForeignKey, PrimaryKey, SchemaState, Table, UniqueConstraint,
    normalize_default,
};
