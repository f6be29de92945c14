//! Copying data between two hosted projects.
//!
//! [`sync_environments`] moves changes between the dev and deploy projects in
//! either direction; [`migrate_project`] is a one-shot full copy into a new
//! project.

use std::collections::{BTreeMap, HashSet};

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::backend::{ProjectMirror, list_all_objects};
use crate::config::BackendConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// dev -> deploy
    Push,
    /// deploy -> dev
    Pull,
}

impl SyncMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "push" => Some(Self::Push),
            "pull" => Some(Self::Pull),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub bucket: String,
    pub folder: String,
    pub settings_table: String,
    /// Tables copied by an environment sync, in order.
    pub sync_tables: Vec<String>,
    /// Tables copied by a migration, in order.
    pub migrate_tables: Vec<String>,
    pub proxy_url: Option<String>,
}

impl MirrorOptions {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            folder: config.upload_folder.clone(),
            settings_table: config.settings_table.clone(),
            sync_tables: vec![
                config.masters_table.clone(),
                config.layouts_table.clone(),
                config.settings_table.clone(),
                config.updates_table.clone(),
            ],
            migrate_tables: vec![
                config.settings_table.clone(),
                config.masters_table.clone(),
                config.layouts_table.clone(),
            ],
            proxy_url: config.proxy_url.clone().filter(|url| !url.is_empty()),
        }
    }
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageReport {
    pub copied: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
    /// Listing the bucket itself failed.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TableOutcome {
    Synced(usize),
    UpToDate,
    FetchFailed(String),
    UpsertFailed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorReport {
    pub storage: StorageReport,
    pub tables: BTreeMap<String, TableOutcome>,
    pub synced_at: Option<String>,
}

/// Rewrite project references inside `value`: every occurrence of `from_id`
/// becomes `to_id`, then public storage URLs of `to_id` are routed through
/// `proxy` when one is given.
pub fn transform_urls(value: &Value, from_id: &str, to_id: &str, proxy: Option<&str>) -> Result<Value> {
    if from_id.is_empty() || to_id.is_empty() {
        return Ok(value.clone());
    }
    let mut text = serde_json::to_string(value)?.replace(from_id, to_id);
    if let Some(proxy) = proxy.filter(|proxy| !proxy.is_empty()) {
        let pattern = format!(
            r#"https://{}\.supabase\.co/storage/v1/object/public/([^"\s]+)"#,
            regex::escape(to_id)
        );
        if let Ok(storage_re) = Regex::new(&pattern) {
            let replacement = format!("{}/{to_id}/$1", proxy.trim_end_matches('/'));
            text = storage_re.replace_all(&text, replacement.as_str()).into_owned();
        }
    }
    Ok(serde_json::from_str(&text)?)
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn copy_objects(
    source: &dyn ProjectMirror,
    target: &dyn ProjectMirror,
    options: &MirrorOptions,
    skip_existing: bool,
) -> StorageReport {
    let mut report = StorageReport::default();
    let listed = async {
        let source_files = list_all_objects(source, &options.bucket, &options.folder).await?;
        let target_files: HashSet<String> = if skip_existing {
            list_all_objects(target, &options.bucket, &options.folder)
                .await?
                .into_iter()
                .collect()
        } else {
            HashSet::new()
        };
        Ok::<_, Error>((source_files, target_files))
    }
    .await;

    let (source_files, target_files) = match listed {
        Ok(listed) => listed,
        Err(err) => {
            log::error!("listing bucket {} failed: {err}", options.bucket);
            report.error = Some(err.to_string());
            return report;
        }
    };
    log::info!(
        "found {} files in source, {} in target",
        source_files.len(),
        target_files.len()
    );

    for path in source_files {
        if target_files.contains(&path) {
            report.skipped += 1;
            continue;
        }
        let copied = async {
            let bytes = source.download_object(&options.bucket, &path).await?;
            target.upload_object(&options.bucket, &path, bytes).await
        }
        .await;
        match copied {
            Ok(()) => report.copied += 1,
            Err(err) => {
                log::warn!("copying {path} failed: {err}");
                report.failed.push(path);
            }
        }
    }
    report
}

async fn copy_table(
    source: &dyn ProjectMirror,
    target: &dyn ProjectMirror,
    table: &str,
    since: Option<&str>,
    ids: (&str, &str),
    proxy: Option<&str>,
) -> TableOutcome {
    let rows = match source.select_rows(table, since).await {
        Ok(rows) => rows,
        Err(err) => {
            log::error!("reading {table} failed: {err}");
            return TableOutcome::FetchFailed(err.to_string());
        }
    };
    if rows.is_empty() {
        return TableOutcome::UpToDate;
    }
    let count = rows.len();
    let rows: Result<Vec<Value>> = rows
        .iter()
        .map(|row| transform_urls(row, ids.0, ids.1, proxy))
        .collect();
    let rows = match rows {
        Ok(rows) => rows,
        Err(err) => return TableOutcome::UpsertFailed(err.to_string()),
    };
    match target.upsert_rows(table, &rows).await {
        Ok(()) => {
            log::info!("synced {count} rows of {table}");
            TableOutcome::Synced(count)
        }
        Err(err) => {
            log::error!("writing {table} failed: {err}");
            TableOutcome::UpsertFailed(err.to_string())
        }
    }
}

/// Copy new objects and changed rows between the dev and deploy projects.
/// The password is always checked against dev.
pub async fn sync_environments(
    dev: &dyn ProjectMirror,
    deploy: &dyn ProjectMirror,
    password: &str,
    mode: SyncMode,
    options: &MirrorOptions,
) -> Result<MirrorReport> {
    if password.is_empty() || !dev.verify_admin_password(password).await? {
        return Err(Error::AuthRejected);
    }
    let (source, target) = match mode {
        SyncMode::Push => (dev, deploy),
        SyncMode::Pull => (deploy, dev),
    };
    log::info!("starting {mode:?} sync");

    let mut report = MirrorReport {
        storage: copy_objects(source, target, options, true).await,
        ..Default::default()
    };

    let from_id = source.project_id().unwrap_or_default();
    let to_id = target.project_id().unwrap_or_default();

    let last_synced = match target.last_synced_at().await {
        Ok(at) => at,
        Err(err) => {
            log::warn!("reading last sync time failed, copying everything: {err}");
            None
        }
    };
    log::info!("last synced at {}", last_synced.as_deref().unwrap_or("never"));

    for table in &options.sync_tables {
        // settings rows carry no update time and are always copied
        let since = if *table == options.settings_table {
            None
        } else {
            last_synced.as_deref()
        };
        let outcome = copy_table(
            source,
            target,
            table,
            since,
            (from_id.as_str(), to_id.as_str()),
            options.proxy_url.as_deref(),
        )
        .await;
        report.tables.insert(table.clone(), outcome);
    }

    let stamp = now_stamp();
    target.mark_synced(&stamp).await?;
    report.synced_at = Some(stamp);
    Ok(report)
}

/// Full copy of settings, stories, layouts and the image bucket into a fresh
/// project. URLs only get their project id swapped.
pub async fn migrate_project(
    old: &dyn ProjectMirror,
    new: &dyn ProjectMirror,
    options: &MirrorOptions,
) -> Result<MirrorReport> {
    let from_id = old.project_id().ok_or(Error::NotConfigured("source project id"))?;
    let to_id = new.project_id().ok_or(Error::NotConfigured("target project id"))?;
    log::info!("migrating {from_id} -> {to_id}");

    let mut report = MirrorReport::default();
    for table in &options.migrate_tables {
        let outcome = copy_table(old, new, table, None, (from_id.as_str(), to_id.as_str()), None).await;
        report.tables.insert(table.clone(), outcome);
    }
    report.storage = copy_objects(old, new, options, false).await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn projects() -> (MemoryBackend, MemoryBackend) {
        (
            MemoryBackend::with_url("pw", "https://devproj.supabase.co"),
            MemoryBackend::with_url("", "https://prodproj.supabase.co"),
        )
    }

    #[test]
    fn rewrites_ids_then_wraps_with_proxy() {
        let row = json!({
            "id": "s1",
            "image": "https://devproj.supabase.co/storage/v1/object/public/story-images/nodes/1/a.png",
            "note": "see https://devproj.supabase.co/rest"
        });
        let plain = transform_urls(&row, "devproj", "prodproj", None).unwrap();
        assert_eq!(
            plain["image"],
            "https://prodproj.supabase.co/storage/v1/object/public/story-images/nodes/1/a.png"
        );

        let proxied = transform_urls(&row, "devproj", "prodproj", Some("https://img.example.dev")).unwrap();
        assert_eq!(
            proxied["image"],
            "https://img.example.dev/prodproj/story-images/nodes/1/a.png"
        );
        assert_eq!(proxied["note"], "see https://prodproj.supabase.co/rest");

        assert_eq!(transform_urls(&row, "", "prodproj", None).unwrap(), row);
    }

    #[tokio::test]
    async fn wrong_password_stops_before_copying() {
        let (dev, deploy) = projects();
        dev.put_object("story-images", "nodes/1/a.png", vec![1]);
        let err = sync_environments(&dev, &deploy, "nope", SyncMode::Push, &MirrorOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthRejected));
        assert!(deploy.object("story-images", "nodes/1/a.png").is_none());
    }

    #[tokio::test]
    async fn push_copies_missing_objects_and_changed_rows() {
        let (dev, deploy) = projects();
        dev.put_object("story-images", "nodes/1/a.png", vec![1]);
        dev.put_object("story-images", "nodes/1/b.png", vec![2]);
        deploy.put_object("story-images", "nodes/1/b.png", vec![9]);

        dev.insert_row(
            "master_stories",
            json!({
                "id": "s1", "label": "Old", "type": "main",
                "updated_at": "2024-01-01T00:00:00.000Z"
            }),
        );
        dev.insert_row(
            "master_stories",
            json!({
                "id": "s2", "label": "New", "type": "main",
                "image": "https://devproj.supabase.co/storage/v1/object/public/story-images/nodes/1/a.png",
                "updated_at": "2024-06-01T00:00:00.000Z"
            }),
        );
        dev.insert_row("admin_settings", json!({"id": 1, "notice": "hello"}));
        deploy.mark_synced("2024-03-01T00:00:00.000Z").await.unwrap();

        let report = sync_environments(&dev, &deploy, "pw", SyncMode::Push, &MirrorOptions::default())
            .await
            .unwrap();

        assert_eq!(report.storage.copied, 1);
        assert_eq!(report.storage.skipped, 1);
        assert_eq!(deploy.object("story-images", "nodes/1/b.png"), Some(vec![9]));
        assert_eq!(report.tables["master_stories"], TableOutcome::Synced(1));
        assert_eq!(report.tables["admin_settings"], TableOutcome::Synced(1));
        assert_eq!(report.tables["story_layouts"], TableOutcome::UpToDate);

        let stories = deploy.rows("master_stories");
        assert_eq!(stories.len(), 1);
        assert_eq!(
            stories[0]["image"],
            "https://prodproj.supabase.co/storage/v1/object/public/story-images/nodes/1/a.png"
        );
        assert_eq!(deploy.last_synced_at().await.unwrap(), report.synced_at);
    }

    #[tokio::test]
    async fn pull_writes_into_dev() {
        let (dev, deploy) = projects();
        deploy.insert_row(
            "app_updates",
            json!({"id": 7, "title": "v2", "updated_at": "2024-05-01T00:00:00.000Z"}),
        );
        let report = sync_environments(&dev, &deploy, "pw", SyncMode::Pull, &MirrorOptions::default())
            .await
            .unwrap();
        assert_eq!(report.tables["app_updates"], TableOutcome::Synced(1));
        assert_eq!(dev.rows("app_updates").len(), 1);
        assert!(dev.last_synced_at().await.unwrap().is_some());
        assert!(deploy.last_synced_at().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn migration_copies_everything() {
        let (old, new) = projects();
        old.insert_row(
            "story_layouts",
            json!({"season": 1, "view_type": "release", "nodes": [], "edges": []}),
        );
        old.insert_row("admin_settings", json!({"id": 1}));
        old.put_object("story-images", "nodes/2/x.png", vec![5]);
        new.put_object("story-images", "nodes/2/x.png", vec![0]);

        let report = migrate_project(&old, &new, &MirrorOptions::default()).await.unwrap();
        assert_eq!(report.tables["story_layouts"], TableOutcome::Synced(1));
        assert_eq!(report.tables["master_stories"], TableOutcome::UpToDate);
        assert_eq!(report.storage.copied, 1);
        assert_eq!(new.object("story-images", "nodes/2/x.png"), Some(vec![5]));
        assert!(!report.tables.contains_key("app_updates"));
    }
}
