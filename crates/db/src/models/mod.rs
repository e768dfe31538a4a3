//! Row structs and write DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - The DTO the sync engine writes

pub mod file;
pub mod folder;
pub mod workflow_metadata;
