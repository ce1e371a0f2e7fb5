/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::UpstreamConfig;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid lookup url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code {0}")]
    Status(StatusCode),
    #[error("malformed response body: {0}")]
    Malformed(String),
}

/// Upstream owner of the key to value mapping.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<String, SourceError>;
}

pub type ArcContextSource = Arc<dyn ContextSource>;

#[derive(Deserialize)]
struct LookupBody {
    value: String,
}

/// `GET {base_url}/{lookup_path}/{key}`, expecting `{"value": "..."}`.
pub struct HttpContextSource {
    client: reqwest::Client,
    base_url: Url,
    lookup_path: Vec<String>,
}

impl HttpContextSource {
    pub fn new(base_url: Url, lookup_path: &str, timeout: Duration) -> anyhow::Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("{base_url} can not be used as a base url"));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("g3edp/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("failed to build http client: {e}"))?;
        let lookup_path = lookup_path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        Ok(HttpContextSource {
            client,
            base_url,
            lookup_path,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> anyhow::Result<Option<Self>> {
        let Some(base_url) = &config.base_url else {
            return Ok(None);
        };
        HttpContextSource::new(base_url.clone(), &config.lookup_path, config.timeout).map(Some)
    }

    fn lookup_url(&self, key: &str) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SourceError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty();
            segments.extend(&self.lookup_path);
            segments.push(key);
        }
        Ok(url)
    }
}

#[async_trait]
impl ContextSource for HttpContextSource {
    async fn lookup(&self, key: &str) -> Result<String, SourceError> {
        let url = self.lookup_url(key)?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status));
        }
        let body = response.bytes().await?;
        let body: LookupBody =
            serde_json::from_slice(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(body.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode as HttpStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::net::TcpListener;

    async fn lookup_handler(Path(key): Path<String>) -> axum::response::Response {
        match key.as_str() {
            "demo" => Json(serde_json::json!({"value": "dev"})).into_response(),
            "a/b" => Json(serde_json::json!({"value": "slash"})).into_response(),
            "number" => Json(serde_json::json!({"value": 1})).into_response(),
            "text" => "dev".into_response(),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(serde_json::json!({"value": "late"})).into_response()
            }
            _ => HttpStatus::NOT_FOUND.into_response(),
        }
    }

    async fn spawn_upstream() -> Url {
        let app = Router::new().route("/api/context-lookup/{key}", get(lookup_handler));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/api/")).unwrap()
    }

    #[test]
    fn lookup_url() {
        let base = Url::parse("http://ctx.local:9200/api").unwrap();
        let source =
            HttpContextSource::new(base, "/context-lookup/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            source.lookup_url("demo").unwrap().as_str(),
            "http://ctx.local:9200/api/context-lookup/demo"
        );
        assert_eq!(
            source.lookup_url("a/b c").unwrap().as_str(),
            "http://ctx.local:9200/api/context-lookup/a%2Fb%20c"
        );

        let base = Url::parse("http://ctx.local/").unwrap();
        let source = HttpContextSource::new(base, "k8s/ns-env", Duration::from_secs(1)).unwrap();
        assert_eq!(
            source.lookup_url("prod").unwrap().as_str(),
            "http://ctx.local/k8s/ns-env/prod"
        );
    }

    #[test]
    fn from_config() {
        let config = UpstreamConfig::default();
        assert!(HttpContextSource::from_config(&config).unwrap().is_none());

        let config = UpstreamConfig {
            base_url: Some(Url::parse("https://ctx.local").unwrap()),
            ..Default::default()
        };
        assert!(HttpContextSource::from_config(&config).unwrap().is_some());
    }

    #[tokio::test]
    async fn lookup() {
        let base = spawn_upstream().await;
        let source =
            HttpContextSource::new(base, "context-lookup", Duration::from_millis(500)).unwrap();

        assert_eq!(source.lookup("demo").await.unwrap(), "dev");
        assert_eq!(source.lookup("a/b").await.unwrap(), "slash");
        assert!(matches!(
            source.lookup("missing").await,
            Err(SourceError::Status(StatusCode::NOT_FOUND))
        ));
        assert!(matches!(
            source.lookup("number").await,
            Err(SourceError::Malformed(_))
        ));
        assert!(matches!(
            source.lookup("text").await,
            Err(SourceError::Malformed(_))
        ));
        assert!(matches!(
            source.lookup("slow").await,
            Err(SourceError::Request(_))
        ));
    }

    #[tokio::test]
    async fn unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{addr}")).unwrap();
        let source =
            HttpContextSource::new(base, "context-lookup", Duration::from_millis(500)).unwrap();
        assert!(matches!(
            source.lookup("demo").await,
            Err(SourceError::Request(_))
        ));
    }
}
