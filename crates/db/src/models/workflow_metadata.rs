//! Models for the `workflow_metadata` table.

use serde::Serialize;
use sqlx::FromRow;

use gallery_core::types::FileId;
use gallery_core::workflow::ExtractedMetadata;

/// A row from the `workflow_metadata` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkflowMetadataRow {
    pub file_id: FileId,
    pub model_name: Option<String>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub cfg: Option<f64>,
    pub steps: Option<i64>,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub sampler_count: i64,
    /// Per-sampler detail (including seeds) as a JSON array.
    pub samplers_json: String,
}

/// Metadata columns written alongside a file.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkflowMetadata {
    pub model_name: Option<String>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub cfg: Option<f64>,
    pub steps: Option<i64>,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub sampler_count: i64,
    pub samplers_json: String,
}

impl NewWorkflowMetadata {
    pub fn from_extracted(metadata: &ExtractedMetadata) -> Self {
        let samplers_json = serde_json::to_string(&metadata.samplers).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to serialise sampler detail");
            "[]".to_string()
        });
        Self {
            model_name: metadata.model.clone(),
            sampler_name: metadata.sampler_name.clone(),
            scheduler: metadata.scheduler.clone(),
            cfg: metadata.cfg,
            steps: metadata.steps,
            positive_prompt: metadata.positive_prompt.clone(),
            negative_prompt: metadata.negative_prompt.clone(),
            width: metadata.width,
            height: metadata.height,
            sampler_count: metadata.sampler_count as i64,
            samplers_json,
        }
    }
}
