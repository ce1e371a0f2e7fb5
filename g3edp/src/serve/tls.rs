/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use log::{debug, warn};
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use crate::trust::TrustBundle;

const HANDSHAKE_QUEUE_SIZE: usize = 128;

pub fn build_tls_config(bundle: &TrustBundle) -> anyhow::Result<Arc<ServerConfig>> {
    let mut certs = Vec::with_capacity(bundle.leaf_chain().len());
    for cert in bundle.leaf_chain() {
        let der = cert
            .to_der()
            .map_err(|e| anyhow!("failed to encode server certificate: {e}"))?;
        certs.push(CertificateDer::from(der));
    }
    let key = bundle
        .leaf_key()
        .private_key_to_pkcs8()
        .map_err(|e| anyhow!("failed to encode server private key: {e}"))?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| anyhow!("failed to set tls protocol versions: {e}"))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow!("failed to set server cert pair: {e:?}"))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// TCP listener that yields only connections with a completed TLS handshake.
///
/// Handshakes run in their own tasks so a slow client never blocks accept.
pub struct TlsListener {
    local_addr: SocketAddr,
    receiver: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    pub async fn bind(
        addr: SocketAddr,
        config: Arc<ServerConfig>,
        accept_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow!("failed to bind tls listener on {addr}: {e}"))?;
        TlsListener::from_tcp(listener, config, accept_timeout)
    }

    pub fn from_tcp(
        listener: TcpListener,
        config: Arc<ServerConfig>,
        accept_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| anyhow!("failed to get local address: {e}"))?;
        let (sender, receiver) = mpsc::channel(HANDSHAKE_QUEUE_SIZE);
        let acceptor = TlsAcceptor::from(config);
        let accept_task = tokio::spawn(accept_loop(listener, acceptor, accept_timeout, sender));
        Ok(TlsListener {
            local_addr,
            receiver,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.receiver.recv().await {
            Some(v) => v,
            None => {
                warn!("tls accept task on {} exited", self.local_addr);
                std::future::pending().await
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    accept_timeout: Duration,
    sender: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    while !sender.is_closed() {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) if is_connection_error(&e) => continue,
            Err(e) => {
                // mostly out of fds, wait for some to be released
                warn!("tls listener accept error: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(accept_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => {
                    let _ = sender.send((tls_stream, peer_addr)).await;
                }
                Ok(Err(e)) => debug!("tls handshake with {peer_addr} failed: {e}"),
                Err(_) => debug!("tls handshake with {peer_addr} timed out"),
            }
        });
    }
}
