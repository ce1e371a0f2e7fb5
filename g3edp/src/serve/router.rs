/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::future::join_all;
use log::debug;

use crate::config::ServerConfig;
use crate::protocol::{self, LookupItem, LookupResponse, RequestKey};
use crate::resolve::ContextResolver;
use crate::trust::CaSlot;

#[derive(Clone)]
pub struct ServeState {
    resolver: Arc<ContextResolver>,
    ca: CaSlot,
    provider_name: Arc<str>,
    request_timeout: Option<Duration>,
}

impl ServeState {
    pub fn new(resolver: Arc<ContextResolver>, ca: CaSlot, config: &ServerConfig) -> Self {
        ServeState {
            resolver,
            ca,
            provider_name: Arc::from(config.provider_name.as_str()),
            request_timeout: config.request_timeout,
        }
    }

    async fn resolve_one(&self, key: &str) -> String {
        let Some(timeout) = self.request_timeout else {
            return self.resolver.resolve(key).await;
        };
        match tokio::time::timeout(timeout, self.resolver.resolve(key)).await {
            Ok(value) => value,
            Err(_) => {
                debug!("resolve of {key} timed out, use the default value");
                self.resolver.defaults().resolve(key)
            }
        }
    }

    /// Resolve all keys concurrently, keeping the input order.
    async fn resolve_all(&self, keys: Vec<RequestKey>) -> Vec<LookupItem> {
        let tasks = keys.into_iter().map(|key| async move {
            match key {
                RequestKey::Name(key) => {
                    let value = self.resolve_one(&key).await;
                    LookupItem::resolved(key, value)
                }
                RequestKey::Invalid(key) => LookupItem::resolved(key, String::new()),
            }
        });
        join_all(tasks).await
    }
}

pub fn build_router(state: ServeState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/ca", get(ca_cert))
        .route("/lookup", post(lookup))
        .route("/validate", post(lookup))
        .with_state(state)
}

async fn health_check(State(state): State<ServeState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "provider": state.provider_name.as_ref(),
        "keys": state.resolver.defaults().len(),
    }))
}

async fn ca_cert(State(state): State<ServeState>) -> Response {
    match state.ca.get() {
        Some(pem) => (
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            pem.to_string(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "no ca cert").into_response(),
    }
}

async fn lookup(State(state): State<ServeState>, body: Bytes) -> Json<LookupResponse> {
    let keys = protocol::parse_request_keys(&body);
    let items = state.resolve_all(keys).await;
    Json(LookupResponse::new(items))
}
