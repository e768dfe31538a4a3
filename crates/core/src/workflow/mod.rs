//! Workflow graph parsing and metadata extraction.
//!
//! - [`graph`]: format detection and normalisation into a [`GraphIndex`].
//! - [`widgets`]: positional widget schemas for UI documents.
//! - [`roles`]: node kind to [`NodeRole`] classification.
//! - [`tracer`]: backward walks from sampler nodes.
//! - [`extract`]: the public extraction entry points.

pub mod extract;
pub mod graph;
pub mod roles;
pub mod tracer;
pub mod widgets;

pub use extract::{analyze, extract, extract_first, parse_document, ExtractedMetadata, Extraction};
pub use graph::{GraphError, GraphIndex, Node, NodeInput, NodeMode, SourceRef, WorkflowFormat};
pub use roles::{NodeRole, RoleTable};
pub use tracer::{SamplerDetail, TraceOptions, Tracer};
