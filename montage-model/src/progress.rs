//! Records of deferred, pollable operations.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ModelError,
    ids::{TokenId, UserId},
};

/// Lifecycle of a [`ProgressToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Created,
    InProgress,
    Done,
    Failed,
}

impl TokenState {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenState::Created => "created",
            TokenState::InProgress => "in_progress",
            TokenState::Done => "done",
            TokenState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TokenState::Done | TokenState::Failed)
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(TokenState::Created),
            "in_progress" | "inprogress" => Ok(TokenState::InProgress),
            "done" => Ok(TokenState::Done),
            "failed" => Ok(TokenState::Failed),
            _ => Err(ModelError::UnknownTokenState(s.to_string())),
        }
    }
}

/// One in-flight operation as seen by whoever polls for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressToken {
    pub id: TokenId,
    pub namespace: String,
    pub owner: Option<UserId>,
    pub state: TokenState,
    /// Label of the step currently running.
    pub current: String,
    pub done: u32,
    pub max: u32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProgressToken {
    /// Builds a fresh `Created` token from an open request.
    pub fn open(request: OpenToken, now: DateTime<Utc>) -> Self {
        let expires_at = i64::try_from(request.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: TokenId::new(),
            namespace: request.namespace,
            owner: request.owner,
            state: TokenState::Created,
            current: request.current,
            done: 0,
            max: request.max,
            metadata: request.metadata,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Expired while nobody ever reported an outcome.
    pub fn is_abandoned(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.is_expired(now)
    }

    /// Applies a partial update. Metadata entries are merged, not replaced.
    pub fn apply(&mut self, update: TokenUpdate, now: DateTime<Utc>) {
        if let Some(state) = update.state {
            self.state = state;
        }
        if let Some(current) = update.current {
            self.current = current;
        }
        if let Some(done) = update.done {
            self.done = done;
        }
        if let Some(max) = update.max {
            self.max = max;
        }
        if let Some(metadata) = update.metadata {
            self.metadata.extend(metadata);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = now;
    }
}

/// Parameters for opening a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenToken {
    pub namespace: String,
    pub owner: Option<UserId>,
    pub current: String,
    pub max: u32,
    pub ttl_secs: u64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUpdate {
    pub state: Option<TokenState>,
    pub current: Option<String>,
    pub done: Option<u32>,
    pub max: Option<u32>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub error: Option<serde_json::Value>,
}

impl TokenUpdate {
    /// Moves the token to `InProgress` at `step` of `max` with a new label.
    pub fn step(current: impl Into<String>, done: u32, max: u32) -> Self {
        Self {
            state: Some(TokenState::InProgress),
            current: Some(current.into()),
            done: Some(done),
            max: Some(max),
            ..Self::default()
        }
    }

    pub fn failed(error: serde_json::Value) -> Self {
        Self {
            state: Some(TokenState::Failed),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }
}
