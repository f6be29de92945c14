use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

use super::{
    ObjectEntry, ProjectMirror, RPC_SAVE_LAYOUT, RPC_UPSERT_STORY, RPC_VERIFY_PASSWORD,
    StoryBackend, project_id_from_url, public_object_url,
};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::ir::{Edge, LayoutNode, StoryLayout, StoryRecord, ViewKey};
use crate::proxy::proxied_url;
use crate::session::Credential;

const LIST_PAGE_SIZE: usize = 1000;

/// PostgREST tables and RPCs plus the storage API of one hosted project.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    config: BackendConfig,
    headers: HeaderMap,
}

#[derive(Debug, Deserialize)]
struct EdgesRow {
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct SettingsRow {
    last_synced_at: Option<String>,
}

impl RestBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(Error::NotConfigured("backend url"))?
            .trim_end_matches('/')
            .to_string();
        let key = config
            .anon_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(Error::NotConfigured("backend key"))?;

        let mut headers = HeaderMap::new();
        let apikey = HeaderValue::from_str(key).map_err(|_| Error::NotConfigured("backend key"))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| Error::NotConfigured("backend key"))?;
        headers.insert("apikey", apikey);
        headers.insert(AUTHORIZATION, bearer);

        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url,
            config: config.clone(),
            headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{bucket}/{path}", self.base_url)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        log::warn!("backend request failed status={status}: {message}");
        Err(Error::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        let url = format!("{}/rest/v1/rpc/{function}", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .json(&args)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn view_rows<T: DeserializeOwned>(&self, key: &ViewKey, select: &str) -> Result<Vec<T>> {
        let url = self.table_url(&self.config.layouts_table);
        let season = format!("eq.{}", key.season);
        let view_type = format!("eq.{}", key.view_type);
        let response = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .query(&[
                ("select", select),
                ("season", season.as_str()),
                ("view_type", view_type.as_str()),
            ])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn put_object(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let response = self
            .client
            .post(self.object_url(bucket, path))
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl StoryBackend for RestBackend {
    async fn fetch_layout(&self, key: &ViewKey) -> Result<Option<StoryLayout>> {
        let rows: Vec<StoryLayout> = self.view_rows(key, "*").await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_masters(&self) -> Result<Vec<StoryRecord>> {
        let response = self
            .client
            .get(self.table_url(&self.config.masters_table))
            .headers(self.headers.clone())
            .query(&[("select", "*")])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn fetch_layout_edges(&self, key: &ViewKey) -> Result<Option<Vec<Edge>>> {
        let rows: Vec<EdgesRow> = self.view_rows(key, "edges").await?;
        Ok(rows.into_iter().next().map(|row| row.edges))
    }

    async fn verify_admin_password(&self, password: &str) -> Result<bool> {
        let value = self
            .rpc(RPC_VERIFY_PASSWORD, json!({ "input_password": password }))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn save_layout(
        &self,
        key: &ViewKey,
        nodes: &[LayoutNode],
        edges: &[Edge],
        credential: &Credential,
    ) -> Result<()> {
        self.rpc(
            RPC_SAVE_LAYOUT,
            json!({
                "p_season": key.season,
                "p_view_type": key.view_type,
                "p_nodes": nodes,
                "p_edges": edges,
                "p_password": credential.expose(),
            }),
        )
        .await?;
        log::debug!("saved {key}: {} nodes, {} edges", nodes.len(), edges.len());
        Ok(())
    }

    async fn upsert_story(&self, story: &StoryRecord, credential: &Credential) -> Result<()> {
        self.rpc(
            RPC_UPSERT_STORY,
            json!({ "p_story": story, "p_password": credential.expose() }),
        )
        .await?;
        Ok(())
    }

    async fn upload_image(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let bucket = self.config.bucket.clone();
        self.put_object(&bucket, path, bytes, content_type).await?;
        let public = public_object_url(&self.base_url, &bucket, path);
        Ok(match (&self.config.proxy_url, self.project_id()) {
            (Some(proxy), Some(project)) => proxied_url(proxy, &project, &bucket, path),
            _ => public,
        })
    }
}

#[async_trait]
impl ProjectMirror for RestBackend {
    fn project_id(&self) -> Option<String> {
        project_id_from_url(&self.base_url)
    }

    async fn select_rows(&self, table: &str, updated_after: Option<&str>) -> Result<Vec<Value>> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        if let Some(since) = updated_after {
            query.push(("updated_at".to_string(), format!("gt.{since}")));
        }
        let response = self
            .client
            .get(self.table_url(table))
            .headers(self.headers.clone())
            .query(&query)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn upsert_rows(&self, table: &str, rows: &[Value]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(self.table_url(table))
            .headers(self.headers.clone())
            .header("Prefer", "resolution=merge-duplicates")
            .json(rows)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let url = format!("{}/storage/v1/object/list/{bucket}", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .json(&json!({ "prefix": prefix, "limit": LIST_PAGE_SIZE, "offset": 0 }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn download_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.object_url(bucket, path))
            .headers(self.headers.clone())
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?.to_vec())
    }

    async fn upload_object(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<()> {
        let content_type = content_type_for(path);
        self.put_object(bucket, path, bytes, content_type).await
    }

    async fn last_synced_at(&self) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.table_url(&self.config.settings_table))
            .headers(self.headers.clone())
            .query(&[("select", "last_synced_at"), ("id", "eq.1")])
            .send()
            .await?;
        let rows: Vec<SettingsRow> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().next().and_then(|row| row.last_synced_at))
    }

    async fn mark_synced(&self, at: &str) -> Result<()> {
        let response = self
            .client
            .patch(self.table_url(&self.config.settings_table))
            .headers(self.headers.clone())
            .query(&[("id", "eq.1")])
            .json(&json!({ "last_synced_at": at }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

/// Guess a content type from the file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_url_and_key() {
        let mut config = BackendConfig::default();
        assert!(matches!(
            RestBackend::from_config(&config),
            Err(Error::NotConfigured("backend url"))
        ));
        config.url = Some("https://abcd.supabase.co/".to_string());
        assert!(matches!(
            RestBackend::from_config(&config),
            Err(Error::NotConfigured("backend key"))
        ));
        config.anon_key = Some("anon".to_string());
        let backend = RestBackend::from_config(&config).unwrap();
        assert_eq!(backend.base_url(), "https://abcd.supabase.co");
        assert_eq!(backend.project_id().as_deref(), Some("abcd"));
    }

    #[test]
    fn guesses_content_types() {
        assert_eq!(content_type_for("nodes/1/2.PNG"), "image/png");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
