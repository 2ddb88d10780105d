//! Progress tokens: pollable records of deferred work.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use montage_model::{
    OpenToken, ProgressToken, TokenId, TokenState, TokenUpdate,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ContentError, Result};

#[async_trait]
pub trait ProgressTokens: Send + Sync {
    async fn open(&self, request: OpenToken) -> Result<ProgressToken>;

    /// Applies a partial update. Terminal tokens no longer accept updates.
    async fn update(
        &self,
        namespace: &str,
        id: TokenId,
        update: TokenUpdate,
    ) -> Result<ProgressToken>;

    /// Marks the token `Done` with every step counted.
    async fn close(&self, namespace: &str, id: TokenId) -> Result<ProgressToken>;

    async fn get(&self, namespace: &str, id: TokenId) -> Result<ProgressToken>;
}

/// Process-local token service. Every change is also published on a
/// broadcast channel so observers can follow tokens without polling.
pub struct InMemoryProgressTokens {
    tokens: DashMap<(String, TokenId), ProgressToken>,
    events: broadcast::Sender<ProgressToken>,
    reaper: std::sync::Mutex<Option<Reaper>>,
}

struct Reaper {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl fmt::Debug for InMemoryProgressTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reaper_running = self
            .reaper
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false);
        f.debug_struct("InMemoryProgressTokens")
            .field("tokens", &self.tokens.len())
            .field("subscribers", &self.events.receiver_count())
            .field("reaper_running", &reaper_running)
            .finish()
    }
}

impl Default for InMemoryProgressTokens {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProgressTokens {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            tokens: DashMap::new(),
            events,
            reaper: std::sync::Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressToken> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Drops every token that expired before `now`, finished or not.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| {
            if token.is_abandoned(now) {
                debug!(
                    token_id = %token.id,
                    namespace = %token.namespace,
                    current = %token.current,
                    "dropping abandoned progress token"
                );
            }
            !token.is_expired(now)
        });
        before.saturating_sub(self.tokens.len())
    }

    /// Starts a background task purging expired tokens every `interval`.
    /// Needs a Tokio runtime; without one the reaper is not started.
    pub fn start_reaper(self: &Arc<Self>, interval: Duration) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("Progress token reaper not started (no Tokio runtime available)");
            return;
        }
        let Ok(mut slot) = self.reaper.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let shutdown = CancellationToken::new();
        let tokens = Arc::downgrade(self);
        let stop = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let Some(tokens) = tokens.upgrade() else { break };
                        let purged = tokens.purge_expired(Utc::now());
                        if purged > 0 {
                            debug!(purged, "purged expired progress tokens");
                        }
                    }
                }
            }
        });
        *slot = Some(Reaper { shutdown, handle });
        info!(interval_ms = interval.as_millis() as u64, "progress token reaper started");
    }

    pub async fn stop_reaper(&self) {
        let reaper = self.reaper.lock().ok().and_then(|mut slot| slot.take());
        if let Some(reaper) = reaper {
            reaper.shutdown.cancel();
            if let Err(err) = reaper.handle.await {
                warn!("progress token reaper failed: {err}");
            }
        }
    }

    fn key(namespace: &str, id: TokenId) -> (String, TokenId) {
        (namespace.to_string(), id)
    }

    fn not_found(namespace: &str, id: TokenId) -> ContentError {
        ContentError::NotFound(format!("progress token {namespace}/{id}"))
    }

    fn publish(&self, token: &ProgressToken) {
        // No subscribers is fine.
        let _ = self.events.send(token.clone());
    }

    fn mutate(
        &self,
        namespace: &str,
        id: TokenId,
        change: impl FnOnce(&mut ProgressToken, DateTime<Utc>),
    ) -> Result<ProgressToken> {
        let updated = {
            let mut token = self
                .tokens
                .get_mut(&Self::key(namespace, id))
                .ok_or_else(|| Self::not_found(namespace, id))?;
            if token.is_terminal() {
                return Err(ContentError::InvalidArgument(format!(
                    "progress token {namespace}/{id} is already {}",
                    token.state
                )));
            }
            change(token.value_mut(), Utc::now());
            token.clone()
        };
        self.publish(&updated);
        Ok(updated)
    }
}

#[async_trait]
impl ProgressTokens for InMemoryProgressTokens {
    async fn open(&self, request: OpenToken) -> Result<ProgressToken> {
        let token = ProgressToken::open(request, Utc::now());
        self.tokens
            .insert(Self::key(&token.namespace, token.id), token.clone());
        self.publish(&token);
        Ok(token)
    }

    async fn update(
        &self,
        namespace: &str,
        id: TokenId,
        update: TokenUpdate,
    ) -> Result<ProgressToken> {
        self.mutate(namespace, id, |token, now| token.apply(update, now))
    }

    async fn close(&self, namespace: &str, id: TokenId) -> Result<ProgressToken> {
        self.mutate(namespace, id, |token, now| {
            let max = token.max;
            token.apply(
                TokenUpdate {
                    state: Some(TokenState::Done),
                    done: Some(max),
                    ..TokenUpdate::default()
                },
                now,
            );
        })
    }

    async fn get(&self, namespace: &str, id: TokenId) -> Result<ProgressToken> {
        self.tokens
            .get(&Self::key(namespace, id))
            .map(|token| token.clone())
            .ok_or_else(|| Self::not_found(namespace, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn request(ttl_secs: u64) -> OpenToken {
        OpenToken {
            namespace: "media-format-upload".into(),
            owner: None,
            current: "Request Created".into(),
            max: 1,
            ttl_secs,
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn tokens_move_through_their_lifecycle() {
        let tokens = InMemoryProgressTokens::new();
        let mut events = tokens.subscribe();
        let token = tokens.open(request(600)).await.unwrap();

        tokens
            .update(&token.namespace, token.id, TokenUpdate::step("Parsing", 0, 6))
            .await
            .unwrap();
        let closed = tokens.close(&token.namespace, token.id).await.unwrap();
        assert_eq!(closed.state, TokenState::Done);
        assert_eq!(closed.done, 6);

        let states: Vec<TokenState> = [
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ]
        .iter()
        .map(|t| t.state)
        .collect();
        assert_eq!(
            states,
            vec![TokenState::Created, TokenState::InProgress, TokenState::Done]
        );
    }

    #[tokio::test]
    async fn finished_tokens_reject_updates() {
        let tokens = InMemoryProgressTokens::new();
        let token = tokens.open(request(600)).await.unwrap();
        tokens
            .update(
                &token.namespace,
                token.id,
                TokenUpdate::failed(serde_json::json!({"summary": "boom"})),
            )
            .await
            .unwrap();

        let err = tokens.close(&token.namespace, token.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let stored = tokens.get(&token.namespace, token.id).await.unwrap();
        assert_eq!(stored.state, TokenState::Failed);
    }

    #[tokio::test]
    async fn unknown_tokens_are_not_found() {
        let tokens = InMemoryProgressTokens::new();
        let token = tokens.open(request(600)).await.unwrap();
        let err = tokens.get("elsewhere", token.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn expired_tokens_are_purged() {
        let tokens = InMemoryProgressTokens::new();
        let short = tokens.open(request(1)).await.unwrap();
        let long = tokens.open(request(600)).await.unwrap();

        let purged = tokens.purge_expired(Utc::now() + chrono::Duration::seconds(5));
        assert_eq!(purged, 1);
        assert!(tokens.get(&short.namespace, short.id).await.is_err());
        assert!(tokens.get(&long.namespace, long.id).await.is_ok());
    }

    #[tokio::test]
    async fn reaper_starts_and_stops() {
        let tokens = Arc::new(InMemoryProgressTokens::new());
        tokens.start_reaper(Duration::from_millis(10));
        assert!(format!("{tokens:?}").contains("reaper_running: true"));
        tokens.stop_reaper().await;
        assert!(format!("{tokens:?}").contains("reaper_running: false"));
    }
}
