/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use ::log::{info, warn};
use anyhow::{Context, anyhow};
use tokio::net::TcpListener;

pub mod cache;
pub mod config;
pub mod log;
pub mod opts;
pub mod protocol;
pub mod resolve;
pub mod serve;
pub mod trust;

mod build;

use config::EdpConfig;
use resolve::ContextResolver;
use serve::{ServeState, TlsListener};
use trust::CaSlot;

/// Serve until ctrl-c is received.
///
/// The plain http listener is up before the trust bundle is provisioned,
/// so `/ca` returns 404 until then. The tls listener starts afterwards.
pub async fn run(config: EdpConfig) -> anyhow::Result<()> {
    let resolver = ContextResolver::build(&config).context("failed to build context resolver")?;
    let ca_slot = CaSlot::new();
    let state = ServeState::new(Arc::new(resolver), ca_slot.clone(), &config.server);
    let router = serve::build_router(state);

    let http_addr = config.server.http_listen;
    let http_listener = TcpListener::bind(http_addr)
        .await
        .map_err(|e| anyhow!("failed to bind http listener on {http_addr}: {e}"))?;
    info!("http server listening on {http_addr}");
    let mut http_task = tokio::spawn(axum::serve(http_listener, router.clone()).into_future());

    let trust_config = config.trust.clone();
    let bundle = tokio::task::spawn_blocking(move || trust::provision(&trust_config))
        .await
        .map_err(|e| anyhow!("trust provision task failed: {e}"))?
        .context("failed to provision trust bundle")?;
    if !ca_slot.publish(&bundle) {
        warn!("ca certificate has already been published");
    }

    let tls_config = serve::build_tls_config(&bundle)?;
    let tls_addr = config.server.tls_listen;
    let tls_listener =
        TlsListener::bind(tls_addr, tls_config, config.server.tls_accept_timeout).await?;
    info!("tls server listening on {tls_addr}");
    let mut tls_task = tokio::spawn(axum::serve(tls_listener, router).into_future());

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.map_err(|e| anyhow!("failed to wait ctrl-c signal: {e}"))?;
            info!("ctrl-c received, quit now");
            http_task.abort();
            tls_task.abort();
            Ok(())
        }
        r = &mut http_task => {
            tls_task.abort();
            server_exited("http", r)
        }
        r = &mut tls_task => {
            http_task.abort();
            server_exited("tls", r)
        }
    }
}

fn server_exited(
    kind: &str,
    r: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match r {
        Ok(Ok(_)) => Err(anyhow!("{kind} server exited unexpectedly")),
        Ok(Err(e)) => Err(anyhow!("{kind} server exited with error: {e}")),
        Err(e) => Err(anyhow!("{kind} server task failed: {e}")),
    }
}
