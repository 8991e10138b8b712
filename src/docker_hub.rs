use anyhow::{Context, Result};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub static DEFAULT_BASE_URL: &str = "https://registry.hub.docker.com";
static PAGE_SIZE: u32 = 100;
static REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Docker Hub HTTP {}", .0.as_u16())]
    Status(StatusCode),

    #[error("Docker Hub error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Docker Hub error: invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

/// Source of the complete tag list of a repository.
pub trait TagLister {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError>;
}

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<TagResult>,
}

#[derive(Debug, Deserialize)]
struct TagResult {
    name: Option<String>,
}

pub fn create_client() -> Result<Client> {
    info!("Initializing Docker Hub HTTP client");
    // System certificates are loaded automatically with rustls-tls-native-roots
    Client::builder()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

pub struct DockerHub {
    client: Client,
    base_url: String,
}

impl DockerHub {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn first_page_url(&self, repository: &str) -> String {
        format!(
            "{}/v2/repositories/{}/tags?page_size={}",
            self.base_url, repository, PAGE_SIZE
        )
    }

    async fn fetch_page(&self, url: &str) -> Result<TagPage, RegistryError> {
        debug!("Fetching Docker Hub tag page {}", url);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| RegistryError::InvalidResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

impl TagLister for DockerHub {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        let mut tags = Vec::new();
        let mut next = Some(self.first_page_url(repository));

        while let Some(url) = next {
            let page = self.fetch_page(&url).await?;
            tags.extend(page.results.into_iter().filter_map(|r| r.name));
            next = page.next.filter(|n| !n.is_empty());
        }

        info!("Found {} tags for repository {}", tags.len(), repository);
        Ok(tags)
    }
}

/// Remembers successful tag listings per repository for the rest of the run.
pub struct CachedTagLister<L> {
    inner: L,
    cache: HashMap<String, Vec<String>>,
}

impl<L: TagLister> CachedTagLister<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub async fn list_tags(&mut self, repository: &str) -> Result<&[String], RegistryError> {
        if !self.cache.contains_key(repository) {
            let tags = self.inner.list_tags(repository).await?;
            self.cache.insert(repository.to_string(), tags);
        } else {
            debug!("Using cached tag list for {}", repository);
        }
        Ok(self.cache.get(repository).map(Vec::as_slice).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use std::cell::Cell;

    fn docker_hub(server: &Server) -> DockerHub {
        DockerHub::new(create_client().expect("client should build"), &server.url())
    }

    #[tokio::test]
    async fn test_list_tags_follows_next_pages() {
        let mut server = Server::new_async().await;
        let second_page = format!(
            "{}/v2/repositories/library/redis/tags?page=2&page_size=100",
            server.url()
        );

        let first = server
            .mock("GET", "/v2/repositories/library/redis/tags?page_size=100")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"count": 3, "next": "{}", "results": [
                    {{"name": "7.2", "last_updated": "2024-01-01T00:00:00Z"}},
                    {{"name": "7.2-alpine"}}
                ]}}"#,
                second_page
            ))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/v2/repositories/library/redis/tags?page=2&page_size=100")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"next": null, "results": [{"name": "7.0"}, {"digest": "sha256:x"}]}"#)
            .create_async()
            .await;

        let tags = docker_hub(&server).list_tags("library/redis").await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(tags, vec!["7.2", "7.2-alpine", "7.0"]);
    }

    #[tokio::test]
    async fn test_list_tags_reports_http_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/repositories/acme/missing/tags?page_size=100")
            .with_status(404)
            .with_body(r#"{"message": "object not found"}"#)
            .create_async()
            .await;

        let err = docker_hub(&server)
            .list_tags("acme/missing")
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, RegistryError::Status(StatusCode::NOT_FOUND)));
        assert_eq!(err.to_string(), "Docker Hub HTTP 404");
    }

    #[tokio::test]
    async fn test_list_tags_rejects_malformed_json() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v2/repositories/acme/app/tags?page_size=100")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let err = docker_hub(&server).list_tags("acme/app").await.unwrap_err();

        assert!(matches!(err, RegistryError::InvalidResponse { .. }));
        assert!(err.to_string().starts_with("Docker Hub error:"));
    }

    struct CountingLister {
        calls: Cell<usize>,
    }

    impl TagLister for CountingLister {
        async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
            self.calls.set(self.calls.get() + 1);
            Ok(vec![format!("{}-1.0", repository)])
        }
    }

    #[tokio::test]
    async fn test_cached_lister_fetches_each_repository_once() {
        let mut lister = CachedTagLister::new(CountingLister {
            calls: Cell::new(0),
        });

        lister.list_tags("library/nginx").await.unwrap();
        lister.list_tags("library/nginx").await.unwrap();
        let tags = lister.list_tags("library/redis").await.unwrap().to_vec();

        assert_eq!(lister.inner().calls.get(), 2);
        assert_eq!(tags, vec!["library/redis-1.0"]);
    }
}
