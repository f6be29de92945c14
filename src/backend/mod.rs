//! Access to the hosted data service.
//!
//! [`StoryBackend`] covers what the guide itself needs: reading views and
//! master records, verifying the admin password and the credential-gated
//! writes. [`ProjectMirror`] adds the raw table and bucket access used to copy
//! one project into another.

mod memory;
mod rest;

pub use memory::{Fixture, MemoryBackend};
pub use rest::{RestBackend, content_type_for};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::ir::{Edge, LayoutNode, StoryLayout, StoryRecord, ViewKey};
use crate::session::Credential;

pub const RPC_VERIFY_PASSWORD: &str = "verify_admin_password";
pub const RPC_SAVE_LAYOUT: &str = "save_story_layout";
pub const RPC_UPSERT_STORY: &str = "upsert_master_story";

#[async_trait]
pub trait StoryBackend: Send + Sync {
    async fn fetch_layout(&self, key: &ViewKey) -> Result<Option<StoryLayout>>;

    async fn fetch_masters(&self) -> Result<Vec<StoryRecord>>;

    /// Only the stored edges of a view, for writes that must not clobber
    /// connections edited elsewhere.
    async fn fetch_layout_edges(&self, key: &ViewKey) -> Result<Option<Vec<Edge>>>;

    async fn verify_admin_password(&self, password: &str) -> Result<bool>;

    /// Replace every node position and edge of one view.
    async fn save_layout(
        &self,
        key: &ViewKey,
        nodes: &[LayoutNode],
        edges: &[Edge],
        credential: &Credential,
    ) -> Result<()>;

    async fn upsert_story(&self, story: &StoryRecord, credential: &Credential) -> Result<()>;

    /// Store an image and return the URL it is served from.
    async fn upload_image(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    /// Folders come back without an id.
    #[serde(default)]
    pub id: Option<String>,
}

impl ObjectEntry {
    pub fn is_folder(&self) -> bool {
        self.id.is_none()
    }
}

#[async_trait]
pub trait ProjectMirror: StoryBackend {
    /// Project identifier embedded in public URLs.
    fn project_id(&self) -> Option<String>;

    async fn select_rows(&self, table: &str, updated_after: Option<&str>) -> Result<Vec<Value>>;

    async fn upsert_rows(&self, table: &str, rows: &[Value]) -> Result<()>;

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>>;

    async fn download_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;

    async fn upload_object(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<()>;

    async fn last_synced_at(&self) -> Result<Option<String>>;

    async fn mark_synced(&self, at: &str) -> Result<()>;
}

/// Every file under `prefix`, descending into folders.
pub async fn list_all_objects(
    mirror: &dyn ProjectMirror,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![prefix.trim_end_matches('/').to_string()];
    while let Some(folder) = pending.pop() {
        for entry in mirror.list_objects(bucket, &folder).await? {
            let path = if folder.is_empty() {
                entry.name.clone()
            } else {
                format!("{folder}/{}", entry.name)
            };
            if entry.is_folder() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

static PROJECT_HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://([A-Za-z0-9-]+)\.").expect("project host regex"));

/// First host label of a project URL, e.g. `abcd` for `https://abcd.supabase.co`.
pub fn project_id_from_url(url: &str) -> Option<String> {
    PROJECT_HOST_RE
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn public_object_url(base_url: &str, bucket: &str, path: &str) -> String {
    format!(
        "{}/storage/v1/object/public/{bucket}/{path}",
        base_url.trim_end_matches('/')
    )
}

/// Storage path for a new upload: `{folder}/{season}/{millis}.{ext}`.
pub fn upload_path(folder: &str, season: u32, file_name: &str, millis: i64) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .unwrap_or("bin");
    format!("{folder}/{season}/{millis}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_is_first_host_label() {
        assert_eq!(
            project_id_from_url("https://abcd1234.supabase.co").as_deref(),
            Some("abcd1234")
        );
        assert_eq!(project_id_from_url("localhost:54321"), None);
        assert_eq!(
            public_object_url("https://p.supabase.co/", "story-images", "nodes/1/2.png"),
            "https://p.supabase.co/storage/v1/object/public/story-images/nodes/1/2.png"
        );
    }

    #[test]
    fn upload_path_keeps_extension() {
        assert_eq!(upload_path("nodes", 2, "art.final.png", 17), "nodes/2/17.png");
        assert_eq!(upload_path("nodes", 1, "noext", 5), "nodes/1/5.bin");
    }

    #[tokio::test]
    async fn lists_nested_objects() {
        let backend = MemoryBackend::new("pw");
        backend.put_object("story-images", "nodes/1/a.png", vec![1]);
        backend.put_object("story-images", "nodes/2/b.png", vec![2]);
        backend.put_object("story-images", "nodes/root.png", vec![3]);
        backend.put_object("story-images", "other/c.png", vec![4]);
        let files = list_all_objects(&backend, "story-images", "nodes").await.unwrap();
        assert_eq!(files, vec!["nodes/1/a.png", "nodes/2/b.png", "nodes/root.png"]);
    }
}
