//! Declarative, idempotent schema migration.
//!
//! Each table is declared once with its full column list. Migration creates
//! missing tables, diffs existing ones against `PRAGMA table_info` and adds
//! any missing column with `ALTER TABLE ... ADD COLUMN`, then creates indices
//! with `IF NOT EXISTS`. Running it against an up-to-date database changes
//! nothing.
//!
//! Columns that may be added later must therefore be nullable or carry a
//! default. Key columns are only ever created with the table.

use std::collections::HashSet;

use crate::DbPool;

/// A declared table.
pub struct TableSpec {
    pub name: &'static str,
    /// Key column with its constraints. Never added by `ALTER TABLE`.
    pub key: (&'static str, &'static str),
    /// `(name, declaration)` for every other column.
    pub columns: &'static [(&'static str, &'static str)],
}

pub const FILES: TableSpec = TableSpec {
    name: "files",
    key: ("id", "TEXT PRIMARY KEY"),
    columns: &[
        ("path", "TEXT NOT NULL DEFAULT ''"),
        ("name", "TEXT NOT NULL DEFAULT ''"),
        ("folder", "TEXT NOT NULL DEFAULT ''"),
        ("size", "INTEGER NOT NULL DEFAULT 0"),
        ("mtime", "INTEGER NOT NULL DEFAULT 0"),
        ("kind", "TEXT NOT NULL DEFAULT 'image'"),
        ("width", "INTEGER"),
        ("height", "INTEGER"),
        ("duration", "REAL"),
        ("thumbnail_path", "TEXT"),
        ("is_favorite", "INTEGER NOT NULL DEFAULT 0"),
        ("has_workflow", "INTEGER NOT NULL DEFAULT 0"),
        ("workflow_files", "TEXT NOT NULL DEFAULT ''"),
        ("last_scanned", "INTEGER NOT NULL DEFAULT 0"),
    ],
};

pub const WORKFLOW_METADATA: TableSpec = TableSpec {
    name: "workflow_metadata",
    key: (
        "file_id",
        "TEXT PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE",
    ),
    columns: &[
        ("model_name", "TEXT"),
        ("sampler_name", "TEXT"),
        ("scheduler", "TEXT"),
        ("cfg", "REAL"),
        ("steps", "INTEGER"),
        ("positive_prompt", "TEXT"),
        ("negative_prompt", "TEXT"),
        ("width", "INTEGER"),
        ("height", "INTEGER"),
        ("sampler_count", "INTEGER NOT NULL DEFAULT 0"),
        ("samplers_json", "TEXT NOT NULL DEFAULT '[]'"),
    ],
};

pub const FOLDERS: TableSpec = TableSpec {
    name: "folders",
    key: ("path", "TEXT PRIMARY KEY"),
    columns: &[("mtime", "INTEGER NOT NULL DEFAULT 0")],
};

pub const TABLES: &[&TableSpec] = &[&FILES, &WORKFLOW_METADATA, &FOLDERS];

pub const INDICES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_path ON files(path)",
    "CREATE INDEX IF NOT EXISTS idx_files_folder ON files(folder)",
    "CREATE INDEX IF NOT EXISTS idx_files_mtime ON files(mtime)",
    "CREATE INDEX IF NOT EXISTS idx_files_last_scanned ON files(last_scanned)",
    "CREATE INDEX IF NOT EXISTS idx_wm_model_name ON workflow_metadata(model_name)",
    "CREATE INDEX IF NOT EXISTS idx_wm_sampler_name ON workflow_metadata(sampler_name)",
    "CREATE INDEX IF NOT EXISTS idx_wm_scheduler ON workflow_metadata(scheduler)",
    "CREATE INDEX IF NOT EXISTS idx_wm_cfg ON workflow_metadata(cfg)",
    "CREATE INDEX IF NOT EXISTS idx_wm_steps ON workflow_metadata(steps)",
    "CREATE INDEX IF NOT EXISTS idx_wm_width ON workflow_metadata(width)",
    "CREATE INDEX IF NOT EXISTS idx_wm_height ON workflow_metadata(height)",
];

impl TableSpec {
    fn create_sql(&self) -> String {
        let mut columns = vec![format!("{} {}", self.key.0, self.key.1)];
        columns.extend(
            self.columns
                .iter()
                .map(|(name, decl)| format!("{name} {decl}")),
        );
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            columns.join(",\n    ")
        )
    }
}

/// Bring the schema up to date. Returns the `table.column` names that were
/// added to pre-existing tables.
pub async fn run_migrations(pool: &DbPool) -> Result<Vec<String>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut added = Vec::new();

    for table in TABLES {
        sqlx::query(&table.create_sql()).execute(&mut *tx).await?;

        let existing: HashSet<String> =
            sqlx::query_as::<_, (String,)>(&format!("SELECT name FROM pragma_table_info('{}')", table.name))
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|(name,)| name)
                .collect();

        for (name, decl) in table.columns {
            if existing.contains(*name) {
                continue;
            }
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN {name} {decl}",
                table.name
            ))
            .execute(&mut *tx)
            .await?;
            tracing::info!(table = table.name, column = name, "Added missing column");
            added.push(format!("{}.{name}", table.name));
        }
    }

    for index in INDICES {
        sqlx::query(index).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(added)
}
