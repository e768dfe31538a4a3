use gallery_db::models::file::FileUpsert;
use gallery_db::models::folder::FolderRecord;
use gallery_db::models::workflow_metadata::NewWorkflowMetadata;
use gallery_db::repositories::{FileRepo, FolderRepo, WorkflowMetadataRepo};
use gallery_db::run_migrations;
use sqlx::SqlitePool;

fn upsert(path: &str, folder: &str) -> FileUpsert {
    let name = path.rsplit('/').next().unwrap().to_string();
    FileUpsert {
        id: format!("id:{path}"),
        path: path.to_string(),
        name,
        folder: folder.to_string(),
        size: 1024,
        mtime: 1_700_000_000,
        kind: "image".to_string(),
        width: Some(512),
        height: Some(768),
        duration: None,
        thumbnail_path: None,
        has_workflow: false,
        workflow_files: String::new(),
        last_scanned: 1_700_000_100,
        metadata: None,
    }
}

fn metadata(model: &str) -> NewWorkflowMetadata {
    NewWorkflowMetadata {
        model_name: Some(model.to_string()),
        sampler_name: Some("euler".to_string()),
        scheduler: Some("normal".to_string()),
        cfg: Some(7.0),
        steps: Some(20),
        positive_prompt: Some("a cat".to_string()),
        negative_prompt: Some("blurry".to_string()),
        width: Some(1024),
        height: Some(1024),
        sampler_count: 1,
        samplers_json: "[]".to_string(),
    }
}

// ---------------------------------------------------------------------------
// flush_batch
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = false)]
async fn test_flush_inserts_file_with_metadata(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    let mut file = upsert("/media/a.png", "/media");
    file.has_workflow = true;
    file.workflow_files = "sd_xl.safetensors".to_string();
    file.metadata = Some(metadata("sd_xl.safetensors"));

    let stats = FileRepo::flush_batch(&pool, &[file.clone()], &[]).await.unwrap();
    assert_eq!(stats.upserted, 1);
    assert_eq!(stats.deleted, 0);

    let stored = FileRepo::find_by_id(&pool, &file.id).await.unwrap().unwrap();
    assert_eq!(stored.path, "/media/a.png");
    assert_eq!(stored.name, "a.png");
    assert!(stored.has_workflow);
    assert!(!stored.is_favorite);

    let row = WorkflowMetadataRepo::find_by_file_id(&pool, &file.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.model_name.as_deref(), Some("sd_xl.safetensors"));
    assert_eq!(row.steps, Some(20));
    assert_eq!(row.cfg, Some(7.0));
}

#[sqlx::test(migrations = false)]
async fn test_reflush_preserves_favorite(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    let file = upsert("/media/a.png", "/media");
    FileRepo::flush_batch(&pool, &[file.clone()], &[]).await.unwrap();
    assert!(FileRepo::set_favorite(&pool, &file.id, true).await.unwrap());

    let mut modified = file.clone();
    modified.size = 2048;
    modified.mtime += 60;
    FileRepo::flush_batch(&pool, &[modified], &[]).await.unwrap();

    let stored = FileRepo::find_by_id(&pool, &file.id).await.unwrap().unwrap();
    assert!(stored.is_favorite);
    assert_eq!(stored.size, 2048);
    assert_eq!(FileRepo::count(&pool).await.unwrap(), 1);
}

#[sqlx::test(migrations = false)]
async fn test_reflush_without_metadata_clears_it(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    let mut file = upsert("/media/a.png", "/media");
    file.metadata = Some(metadata("sd_xl.safetensors"));
    FileRepo::flush_batch(&pool, &[file.clone()], &[]).await.unwrap();

    file.metadata = None;
    FileRepo::flush_batch(&pool, &[file.clone()], &[]).await.unwrap();

    assert!(WorkflowMetadataRepo::find_by_file_id(&pool, &file.id)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = false)]
async fn test_delete_cascades_to_metadata(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    let mut file = upsert("/media/a.png", "/media");
    file.metadata = Some(metadata("sd_xl.safetensors"));
    FileRepo::flush_batch(&pool, &[file.clone()], &[]).await.unwrap();

    let stats = FileRepo::flush_batch(&pool, &[], &[file.id.clone()])
        .await
        .unwrap();
    assert_eq!(stats.deleted, 1);
    assert_eq!(FileRepo::count(&pool).await.unwrap(), 0);
    assert_eq!(WorkflowMetadataRepo::count(&pool).await.unwrap(), 0);
}

#[sqlx::test(migrations = false)]
async fn test_failed_batch_rolls_back(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    let first = upsert("/media/a.png", "/media");
    // Same path under another id violates the unique path index.
    let mut clash = upsert("/media/a.png", "/media");
    clash.id = "other".to_string();

    let result = FileRepo::flush_batch(&pool, &[first, clash], &[]).await;
    assert!(result.is_err());
    assert_eq!(FileRepo::count(&pool).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = false)]
async fn test_list_states_under_respects_recursion(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    let files = [
        upsert("/media/a.png", "/media"),
        upsert("/media/sub/b.png", "/media/sub"),
        upsert("/media2/c.png", "/media2"),
    ];
    FileRepo::flush_batch(&pool, &files, &[]).await.unwrap();

    let flat = FileRepo::list_states_under(&pool, "/media", false)
        .await
        .unwrap();
    assert_eq!(flat.len(), 1);
    assert_eq!(flat[0].path, "/media/a.png");

    let deep = FileRepo::list_states_under(&pool, "/media", true)
        .await
        .unwrap();
    let paths: Vec<&str> = deep.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(paths, vec!["/media/a.png", "/media/sub/b.png"]);
}

#[sqlx::test(migrations = false)]
async fn test_find_by_path_and_list_in_folder(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    let mut newer = upsert("/media/new.png", "/media");
    newer.mtime += 100;
    let older = upsert("/media/old.png", "/media");
    FileRepo::flush_batch(&pool, &[older, newer], &[]).await.unwrap();

    let found = FileRepo::find_by_path(&pool, "/media/old.png")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.name, "old.png");

    let page = FileRepo::list_in_folder(&pool, "/media", 10, 0).await.unwrap();
    let names: Vec<&str> = page.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["new.png", "old.png"]);
}

#[sqlx::test(migrations = false)]
async fn test_set_favorite_unknown_file(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    assert!(!FileRepo::set_favorite(&pool, "missing", true).await.unwrap());
}

#[sqlx::test(migrations = false)]
async fn test_model_counts(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    let mut a = upsert("/media/a.png", "/media");
    a.metadata = Some(metadata("sd_xl.safetensors"));
    let mut b = upsert("/media/b.png", "/media");
    b.metadata = Some(metadata("sd_xl.safetensors"));
    let mut c = upsert("/media/c.png", "/media");
    c.metadata = Some(metadata("flux.safetensors"));
    FileRepo::flush_batch(&pool, &[a, b, c], &[]).await.unwrap();

    let counts = WorkflowMetadataRepo::model_counts(&pool).await.unwrap();
    assert_eq!(
        counts,
        vec![
            ("sd_xl.safetensors".to_string(), 2),
            ("flux.safetensors".to_string(), 1)
        ]
    );
    let rows = WorkflowMetadataRepo::list_by_model(&pool, "flux.safetensors")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

// ---------------------------------------------------------------------------
// Folders
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = false)]
async fn test_folder_replace_under(pool: SqlitePool) {
    run_migrations(&pool).await.unwrap();
    let initial = [
        FolderRecord { path: "/media".into(), mtime: 10 },
        FolderRecord { path: "/media/sub".into(), mtime: 20 },
        FolderRecord { path: "/other".into(), mtime: 5 },
    ];
    FolderRepo::replace_under(&pool, "/", true, &initial).await.unwrap();

    // Rescan of /media finds only the root folder now.
    FolderRepo::replace_under(&pool, "/media", true, &[FolderRecord { path: "/media".into(), mtime: 30 }])
        .await
        .unwrap();

    let folders = FolderRepo::list(&pool).await.unwrap();
    assert_eq!(
        folders,
        vec![
            FolderRecord { path: "/media".into(), mtime: 30 },
            FolderRecord { path: "/other".into(), mtime: 5 },
        ]
    );
}
