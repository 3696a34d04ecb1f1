//! Listener setup for `serve`.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use std::io::{self, ErrorKind};
use tokio::net::TcpListener;

/// Bind `cfg.addr()`. A refused wildcard bind is retried on 127.0.0.1 only
/// when `cfg.loopback_fallback` is set; otherwise the error is returned.
pub async fn bind_listener(cfg: &AppConfig) -> Result<TcpListener> {
    let addr = cfg.addr();
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(err) => match loopback_fallback_addr(cfg, &err) {
            Some(fallback_addr) => {
                tracing::warn!(
                    "Permission denied binding to {} ({}). Falling back to {}; the server is not reachable from other hosts",
                    addr,
                    err,
                    fallback_addr
                );
                TcpListener::bind(&fallback_addr)
                    .await
                    .with_context(|| format!("binding {}", fallback_addr))
            }
            None => Err(err).with_context(|| format!("binding {}", addr)),
        },
    }
}

/// Where to retry after `err`, if anywhere.
pub fn loopback_fallback_addr(cfg: &AppConfig, err: &io::Error) -> Option<String> {
    let wildcard = matches!(cfg.host.as_str(), "0.0.0.0" | "::");
    (cfg.loopback_fallback && wildcard && err.kind() == ErrorKind::PermissionDenied)
        .then(|| format!("127.0.0.1:{}", cfg.port))
}
