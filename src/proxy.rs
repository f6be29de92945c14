//! Caching image proxy in front of public object storage.
//!
//! Requests look like `/{bucket}/{path}` or `/{project}/{bucket}/{path}`. An
//! embedded project id selects that project; otherwise the referrer decides
//! between the dev and the default project.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
pub const BANNER: &str = "Story image proxy";

/// `{proxy}/{project}/{bucket}/{path}`
pub fn proxied_url(proxy: &str, project: &str, bucket: &str, path: &str) -> String {
    format!("{}/{project}/{bucket}/{path}", proxy.trim_end_matches('/'))
}

pub fn project_storage_base(project: &str) -> String {
    format!("https://{project}.supabase.co/storage/v1/object/public")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProxyRoute {
    Banner,
    Upstream { project: String, url: String },
}

#[derive(Debug, Clone, Default)]
pub struct ProxyRoutes {
    pub default_project: String,
    pub dev_project: Option<String>,
    /// Referrer hosts (exact or suffix match) served from the dev project.
    pub dev_referrer_hosts: Vec<String>,
}

fn referrer_host(referer: &str) -> Option<&str> {
    let rest = referer.split_once("://").map_or(referer, |(_, rest)| rest);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit_once('@').map_or(host, |(_, host)| host);
    let host = host.split(':').next()?;
    if host.is_empty() { None } else { Some(host) }
}

impl ProxyRoutes {
    pub fn new(default_project: impl Into<String>) -> Self {
        Self {
            default_project: default_project.into(),
            ..Default::default()
        }
    }

    fn is_known(&self, project: &str) -> bool {
        project == self.default_project || self.dev_project.as_deref() == Some(project)
    }

    fn from_dev_site(&self, referer: Option<&str>) -> bool {
        let Some(host) = referer.and_then(referrer_host) else {
            return false;
        };
        self.dev_referrer_hosts
            .iter()
            .any(|dev| host == dev || host.ends_with(&format!(".{dev}")))
    }

    pub fn resolve(&self, path: &str, referer: Option<&str>) -> ProxyRoute {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() || trimmed == "favicon.ico" {
            return ProxyRoute::Banner;
        }

        let (project, rest) = match trimmed.split_once('/') {
            Some((first, rest)) if self.is_known(first) => (first.to_string(), rest),
            _ => {
                let project = match (&self.dev_project, self.from_dev_site(referer)) {
                    (Some(dev), true) => dev.clone(),
                    _ => self.default_project.clone(),
                };
                (project, trimmed)
            }
        };
        let url = format!("{}/{rest}", project_storage_base(&project));
        ProxyRoute::Upstream { project, url }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub cache_hit: bool,
}

impl ProxyResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get(&self, url: &str) -> Result<UpstreamResponse>;
}

#[async_trait]
impl Upstream for reqwest::Client {
    async fn get(&self, url: &str) -> Result<UpstreamResponse> {
        let response = reqwest::Client::get(self, url)
            .header(reqwest::header::USER_AGENT, "story-guide image proxy")
            .send()
            .await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

pub struct ImageProxy<U> {
    routes: ProxyRoutes,
    upstream: U,
    cache: Mutex<HashMap<String, ProxyResponse>>,
}

impl<U: Upstream> ImageProxy<U> {
    pub fn new(routes: ProxyRoutes, upstream: U) -> Self {
        Self {
            routes,
            upstream,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Serve one request. Only successful upstream answers are cached and
    /// they carry the long-lived cache header.
    pub async fn serve(&self, path: &str, referer: Option<&str>) -> Result<ProxyResponse> {
        let url = match self.routes.resolve(path, referer) {
            ProxyRoute::Banner => {
                return Ok(ProxyResponse {
                    status: 200,
                    content_type: Some("text/plain".to_string()),
                    headers: Vec::new(),
                    body: BANNER.as_bytes().to_vec(),
                    cache_hit: false,
                });
            }
            ProxyRoute::Upstream { url, .. } => url,
        };

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&url)
            .cloned();
        if let Some(mut hit) = cached {
            log::info!("cache hit for {path}");
            hit.cache_hit = true;
            return Ok(hit);
        }

        log::info!("cache miss for {path}, fetching upstream");
        let fetched = self.upstream.get(&url).await?;
        let mut response = ProxyResponse {
            status: fetched.status,
            content_type: fetched.content_type,
            headers: Vec::new(),
            body: fetched.body,
            cache_hit: false,
        };
        if !response.is_success() {
            log::warn!("upstream answered {} for {url}", response.status);
            return Ok(response);
        }
        response.headers = vec![
            ("Cache-Control".to_string(), CACHE_CONTROL.to_string()),
            ("Vary".to_string(), "Accept".to_string()),
        ];
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url, response.clone());
        Ok(response)
    }
}
