//! Metadata extraction entry points.
//!
//! [`extract`] is pure and total: any JSON value goes in, and either a fully
//! built [`ExtractedMetadata`] or `None` comes out. Anything short of a
//! traceable sampler is "no metadata", never an error.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::graph::{GraphError, GraphIndex};
use crate::workflow::roles::{NodeRole, RoleTable};
use crate::workflow::tracer::{SamplerDetail, TraceOptions, Tracer};

/// Generation parameters recovered from one workflow document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub model: Option<String>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub cfg: Option<f64>,
    pub steps: Option<i64>,
    pub seed: Option<u64>,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Every file referenced by an active loader anywhere in the graph.
    pub loader_filenames: BTreeSet<String>,
    pub sampler_count: usize,
    pub samplers: Vec<SamplerDetail>,
}

impl ExtractedMetadata {
    /// Newline separated loader filenames, as stored in `files.workflow_files`.
    pub fn files_index_text(&self) -> String {
        self.loader_filenames
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of analysing a single document.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    NotAWorkflow,
    Malformed(GraphError),
    /// A valid graph with no active sampler.
    NoSampler,
    Found(ExtractedMetadata),
}

impl Extraction {
    /// Whether the document was a structurally valid workflow.
    pub fn is_workflow(&self) -> bool {
        matches!(self, Self::NoSampler | Self::Found(_))
    }

    pub fn into_metadata(self) -> Option<ExtractedMetadata> {
        match self {
            Self::Found(metadata) => Some(metadata),
            _ => None,
        }
    }
}

/// Analyse a document with an explicit role table.
pub fn analyze(document: &Value, roles: &RoleTable, options: &TraceOptions) -> Extraction {
    let graph = match GraphIndex::build(document) {
        Ok(graph) => graph,
        Err(GraphError::NotAWorkflow) => {
            tracing::debug!("Embedded document is not a workflow");
            return Extraction::NotAWorkflow;
        }
        Err(GraphError::Malformed { reason, node_ids }) => {
            tracing::warn!(reason = %reason, node_ids = ?node_ids, "Malformed workflow");
            return Extraction::Malformed(GraphError::Malformed { reason, node_ids });
        }
    };

    if !graph.anomalies.is_empty() {
        tracing::debug!(anomalies = ?graph.anomalies, "Workflow links dropped during indexing");
    }

    let tracer = Tracer::new(&graph, roles, *options);
    let roots = tracer.sampler_roots();
    if roots.is_empty() {
        tracing::debug!(format = ?graph.format, "Workflow has no active sampler");
        return Extraction::NoSampler;
    }

    let samplers: Vec<SamplerDetail> = roots
        .iter()
        .map(|root| tracer.trace_sampler(root))
        .collect();

    let loader_filenames = graph
        .nodes_by_id
        .values()
        .filter(|node| node.is_active() && matches!(tracer.role(node), NodeRole::Loader { .. }))
        .filter_map(|node| tracer.loader_filename(node, 0))
        .collect();

    Extraction::Found(headline(samplers, loader_filenames))
}

/// Headline fields come from the first sampler; gaps are filled from later
/// samplers in id order.
fn headline(samplers: Vec<SamplerDetail>, loader_filenames: BTreeSet<String>) -> ExtractedMetadata {
    fn first<T: Clone>(
        samplers: &[SamplerDetail],
        field: impl Fn(&SamplerDetail) -> &Option<T>,
    ) -> Option<T> {
        samplers.iter().find_map(|s| field(s).clone())
    }

    ExtractedMetadata {
        model: first(&samplers, |s| &s.model),
        sampler_name: first(&samplers, |s| &s.sampler_name),
        scheduler: first(&samplers, |s| &s.scheduler),
        cfg: first(&samplers, |s| &s.cfg),
        steps: first(&samplers, |s| &s.steps),
        seed: first(&samplers, |s| &s.seed),
        positive_prompt: first(&samplers, |s| &s.positive_prompt),
        negative_prompt: first(&samplers, |s| &s.negative_prompt),
        width: first(&samplers, |s| &s.width),
        height: first(&samplers, |s| &s.height),
        loader_filenames,
        sampler_count: samplers.len(),
        samplers,
    }
}

/// Extract metadata using the built-in role table.
pub fn extract(document: &Value, options: &TraceOptions) -> Option<ExtractedMetadata> {
    analyze(document, RoleTable::builtin(), options).into_metadata()
}

/// Try candidate documents in order and keep the first that yields metadata.
///
/// Returns whether any candidate was a valid workflow, and the metadata.
pub fn extract_first<'a, I>(candidates: I, options: &TraceOptions) -> (bool, Option<ExtractedMetadata>)
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut has_workflow = false;
    for document in candidates {
        let extraction = analyze(document, RoleTable::builtin(), options);
        has_workflow |= extraction.is_workflow();
        if let Some(metadata) = extraction.into_metadata() {
            return (true, Some(metadata));
        }
    }
    (has_workflow, None)
}

/// Parse an embedded JSON document.
///
/// Some exporters write the non-standard `NaN` token for unset floats; when
/// strict parsing fails those tokens are replaced by `null` and parsing is
/// retried.
pub fn parse_document(raw: &str) -> Option<Value> {
    let raw = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            if !raw.contains("NaN") {
                tracing::debug!(error = %e, "Embedded document is not JSON");
                return None;
            }
            serde_json::from_str(&replace_nan(raw)).ok()
        }
    }
}

/// Replace bare `NaN` tokens outside of string literals with `null`.
fn replace_nan(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = raw;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if rest.starts_with("NaN") {
            out.push_str("null");
            rest = &rest[3..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}
