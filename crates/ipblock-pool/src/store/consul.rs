//! Consul-backed [`CoordinationStore`].
//!
//! Keys map one-to-one onto the Consul KV store. Locks follow the Consul
//! session recipe: a session is created per acquisition, kept alive by a
//! background renewal task, and bound to the lock key with `?acquire=`.
//! Waiting for a contended lock uses blocking queries on the lock key rather
//! than polling.

use super::{CoordinationStore, LockHandle, StoreError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use core::time::Duration;
use parking_lot::Mutex;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Connection and lock settings for [`ConsulStore`].
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    /// Agent address as `host:port`.
    pub address: String,
    /// `http` or `https`.
    pub scheme: String,
    /// Datacenter to query; the agent's own datacenter when `None`.
    pub datacenter: Option<String>,
    /// ACL token sent with every request.
    pub token: Option<String>,
    /// TTL of lock sessions. Sessions are renewed every half TTL while held.
    pub session_ttl: Duration,
    /// Consul lock-delay applied when a holding session is invalidated.
    pub lock_delay: Duration,
    /// Maximum duration of a single blocking query on a contended lock.
    pub lock_wait: Duration,
    /// Pause before retrying when the lock is free but acquisition was
    /// refused (lock-delay window).
    pub lock_retry_interval: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8500".to_string(),
            scheme: "http".to_string(),
            datacenter: None,
            token: None,
            session_ttl: Duration::from_secs(15),
            lock_delay: Duration::from_secs(15),
            lock_wait: Duration::from_secs(15),
            lock_retry_interval: Duration::from_secs(5),
        }
    }
}

/// Coordination store talking to a Consul agent over its HTTP API.
#[derive(Clone)]
pub struct ConsulStore {
    client: reqwest::Client,
    base_url: String,
    config: ConsulConfig,
    renewals: Arc<Mutex<HashMap<String, CancellationToken>>>,
    /// Sessions whose release has started but not fully completed. Only the
    /// session teardown is repeated for these.
    teardown: Arc<Mutex<HashSet<String>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

impl ConsulStore {
    pub fn new(config: ConsulConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Builds a store on top of an existing HTTP client.
    pub fn with_client(client: reqwest::Client, config: ConsulConfig) -> Self {
        let base_url = format!("{}://{}/v1", config.scheme, config.address);
        tracing::debug!(%base_url, datacenter = ?config.datacenter, "Consul store configured");
        Self {
            client,
            base_url,
            config,
            renewals: Arc::default(),
            teardown: Arc::default(),
        }
    }

    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        if let Some(dc) = &self.config.datacenter {
            req = req.query(&[("dc", dc)]);
        }
        if let Some(token) = &self.config.token {
            req = req.header(TOKEN_HEADER, token);
        }
        req
    }

    async fn create_session(&self, lock_name: &str) -> Result<String, StoreError> {
        let body = serde_json::json!({
            "Name": format!("ipblock-pool lock: {lock_name}"),
            "Behavior": "release",
            "TTL": consul_duration(self.config.session_ttl),
            "LockDelay": consul_duration(self.config.lock_delay),
        });
        let resp = self
            .request(Method::PUT, "session/create")
            .json(&body)
            .send()
            .await?;
        let created: SessionCreated = expect_success("session create", resp).await?.json().await?;
        tracing::debug!(session = %created.id, "Created lock session");
        Ok(created.id)
    }

    fn spawn_renewal(&self, session: &str) {
        let token = CancellationToken::new();
        self.renewals
            .lock()
            .insert(session.to_string(), token.clone());

        let store = self.clone();
        let session = session.to_string();
        let interval = self.config.session_ttl / 2;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                let path = format!("session/renew/{session}");
                match store.request(Method::PUT, &path).send().await {
                    Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                        tracing::warn!(%session, "Lock session expired before renewal");
                        break;
                    }
                    Ok(resp) if !resp.status().is_success() => {
                        tracing::warn!(%session, status = %resp.status(), "Lock session renewal refused");
                    }
                    Ok(_) => tracing::trace!(%session, "Renewed lock session"),
                    Err(e) => tracing::warn!(%session, "Lock session renewal failed: {e}"),
                }
            }
        });
    }

    async fn end_session(&self, session: &str) -> Result<(), StoreError> {
        if let Some(token) = self.renewals.lock().remove(session) {
            token.cancel();
        }
        let resp = self
            .request(Method::PUT, &format!("session/destroy/{session}"))
            .send()
            .await?;
        expect_success("session destroy", resp).await?;
        tracing::debug!(%session, "Destroyed lock session");
        Ok(())
    }

    async fn try_acquire(&self, name: &str, session: &str) -> Result<bool, StoreError> {
        let resp = self
            .request(Method::PUT, &format!("kv/{name}"))
            .query(&[("acquire", session)])
            .send()
            .await?;
        parse_bool("lock acquire", resp).await
    }

    /// Waits until the lock key has no holding session.
    ///
    /// Returns `true` if a holder was observed (and waited on), `false` if
    /// the lock was already free on the first read.
    async fn wait_for_release(&self, name: &str) -> Result<bool, StoreError> {
        let mut index: u64 = 0;
        let mut blocked = false;
        loop {
            let resp = self
                .request(Method::GET, &format!("kv/{name}"))
                .query(&[
                    ("index", index.to_string()),
                    ("wait", consul_duration(self.config.lock_wait)),
                ])
                .send()
                .await?;

            let next_index = resp
                .headers()
                .get(INDEX_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);

            let holder = if resp.status() == StatusCode::NOT_FOUND {
                None
            } else {
                let entries: Vec<KvEntry> = expect_success("lock watch", resp).await?.json().await?;
                entries.into_iter().next().and_then(|e| e.session)
            };

            let Some(holder) = holder else {
                return Ok(blocked);
            };
            tracing::debug!(lock = name, %holder, "Lock is held, waiting for release");
            blocked = true;
            // Consul may reset the index; restart the watch from scratch.
            index = if next_index < index { 0 } else { next_index };
        }
    }

    async fn acquire_with_session(&self, name: &str, session: &str) -> Result<(), StoreError> {
        loop {
            if self.try_acquire(name, session).await? {
                return Ok(());
            }
            if !self.wait_for_release(name).await? {
                // Free but refused: Consul is enforcing the lock-delay of a
                // previously invalidated session.
                tokio::time::sleep(self.config.lock_retry_interval).await;
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for ConsulStore {
    async fn acquire_lock(&self, name: &str) -> Result<LockHandle, StoreError> {
        let session = self.create_session(name).await?;
        self.spawn_renewal(&session);

        match self.acquire_with_session(name, &session).await {
            Ok(()) => Ok(LockHandle::new(name, session)),
            Err(e) => {
                if let Err(cleanup) = self.end_session(&session).await {
                    tracing::warn!(%session, "Failed to destroy abandoned lock session: {cleanup}");
                }
                Err(e)
            }
        }
    }

    async fn release(&self, lock: &LockHandle) -> Result<(), StoreError> {
        let session = lock.token();
        if self.teardown.lock().contains(session) {
            self.end_session(session).await?;
            self.teardown.lock().remove(session);
            return Ok(());
        }

        let released = match self
            .request(Method::PUT, &format!("kv/{}", lock.name()))
            .query(&[("release", session)])
            .send()
            .await
        {
            Ok(resp) => parse_bool("lock release", resp).await,
            Err(e) => Err(e.into()),
        };

        if let Ok(false) = released {
            self.end_session(session).await?;
            return Err(StoreError::LockNotHeld {
                name: lock.name().to_string(),
            });
        }

        // Destroying the session frees the key even if the release request
        // failed, so it always runs. The session stays in `teardown` until
        // both steps have succeeded.
        self.teardown.lock().insert(session.to_string());
        let ended = self.end_session(session).await;
        let result = released.and(ended);
        if result.is_ok() {
            self.teardown.lock().remove(session);
        }
        result
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let resp = self
            .request(Method::GET, &format!("kv/{key}"))
            .query(&[("raw", "true")])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(expect_success("get", resp).await?.bytes().await?))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        let resp = self
            .request(Method::PUT, &format!("kv/{key}"))
            .body(value)
            .send()
            .await?;
        if parse_bool("put", resp).await? {
            Ok(())
        } else {
            Err(StoreError::MalformedResponse {
                op: "put",
                reason: format!("write to `{key}` was not applied"),
            })
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let resp = self
            .request(Method::DELETE, &format!("kv/{key}"))
            .send()
            .await?;
        expect_success("delete", resp).await?;
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError> {
        let resp = self
            .request(Method::GET, &format!("kv/{prefix}"))
            .query(&[("recurse", "true")])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let entries: Vec<KvEntry> = expect_success("list", resp).await?.json().await?;
        let mut pairs = entries
            .into_iter()
            .map(|entry| {
                let value = match entry.value {
                    Some(encoded) => STANDARD.decode(encoded).map(Bytes::from).map_err(|e| {
                        StoreError::MalformedResponse {
                            op: "list",
                            reason: format!("invalid base64 value at `{}`: {e}", entry.key),
                        }
                    })?,
                    None => Bytes::new(),
                };
                Ok((entry.key, value))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pairs)
    }
}

fn consul_duration(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

async fn expect_success(op: &'static str, resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::UnexpectedResponse {
        op,
        status: status.as_u16(),
        body,
    })
}

async fn parse_bool(op: &'static str, resp: Response) -> Result<bool, StoreError> {
    let body = expect_success(op, resp).await?.text().await?;
    match body.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(StoreError::MalformedResponse {
            op,
            reason: format!("expected `true` or `false`, got `{other}`"),
        }),
    }
}
