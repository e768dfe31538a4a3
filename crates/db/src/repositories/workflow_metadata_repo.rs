//! Repository for the `workflow_metadata` table.

use sqlx::{Sqlite, Transaction};

use crate::models::workflow_metadata::{NewWorkflowMetadata, WorkflowMetadataRow};
use crate::DbPool;

const COLUMNS: &str = "file_id, model_name, sampler_name, scheduler, cfg, steps, \
     positive_prompt, negative_prompt, width, height, sampler_count, samplers_json";

/// Provides access to extracted generation parameters.
pub struct WorkflowMetadataRepo;

impl WorkflowMetadataRepo {
    /// Find the metadata for one file.
    pub async fn find_by_file_id(
        pool: &DbPool,
        file_id: &str,
    ) -> Result<Option<WorkflowMetadataRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflow_metadata WHERE file_id = ?1");
        sqlx::query_as::<_, WorkflowMetadataRow>(&query)
            .bind(file_id)
            .fetch_optional(pool)
            .await
    }

    /// List metadata rows generated with the given model.
    pub async fn list_by_model(
        pool: &DbPool,
        model_name: &str,
    ) -> Result<Vec<WorkflowMetadataRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_metadata WHERE model_name = ?1 ORDER BY file_id"
        );
        sqlx::query_as::<_, WorkflowMetadataRow>(&query)
            .bind(model_name)
            .fetch_all(pool)
            .await
    }

    /// Distinct model names with their file counts, most used first.
    pub async fn model_counts(pool: &DbPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT model_name, COUNT(*) FROM workflow_metadata
             WHERE model_name IS NOT NULL
             GROUP BY model_name
             ORDER BY COUNT(*) DESC, model_name",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workflow_metadata")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Insert or replace the metadata row for `file_id` inside a batch.
    pub(crate) async fn upsert_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        file_id: &str,
        metadata: &NewWorkflowMetadata,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO workflow_metadata
                (file_id, model_name, sampler_name, scheduler, cfg, steps,
                 positive_prompt, negative_prompt, width, height, sampler_count, samplers_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(file_id) DO UPDATE SET
                model_name      = excluded.model_name,
                sampler_name    = excluded.sampler_name,
                scheduler       = excluded.scheduler,
                cfg             = excluded.cfg,
                steps           = excluded.steps,
                positive_prompt = excluded.positive_prompt,
                negative_prompt = excluded.negative_prompt,
                width           = excluded.width,
                height          = excluded.height,
                sampler_count   = excluded.sampler_count,
                samplers_json   = excluded.samplers_json",
        )
        .bind(file_id)
        .bind(&metadata.model_name)
        .bind(&metadata.sampler_name)
        .bind(&metadata.scheduler)
        .bind(metadata.cfg)
        .bind(metadata.steps)
        .bind(&metadata.positive_prompt)
        .bind(&metadata.negative_prompt)
        .bind(metadata.width)
        .bind(metadata.height)
        .bind(metadata.sampler_count)
        .bind(&metadata.samplers_json)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub(crate) async fn delete_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        file_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM workflow_metadata WHERE file_id = ?1")
            .bind(file_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
