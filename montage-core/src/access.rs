//! Capability checks consulted before work is accepted.

use std::fmt;

use async_trait::async_trait;
use montage_model::{Content, UserId};

use crate::error::{ContentError, Result};

/// Operations guarded by an [`AccessProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    UploadMedia,
    Publish,
    GenerateContent,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::UploadMedia => "upload media",
            Action::Publish => "publish",
            Action::GenerateContent => "generate content",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers whether `actor` may perform `action` on `content`, without
/// performing it. Denials are `PermissionDenied`.
#[async_trait]
pub trait AccessProbe: Send + Sync {
    async fn probe(
        &self,
        actor: Option<UserId>,
        content: &Content,
        action: Action,
    ) -> Result<()>;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessProbe for AllowAll {
    async fn probe(
        &self,
        _actor: Option<UserId>,
        _content: &Content,
        _action: Action,
    ) -> Result<()> {
        Ok(())
    }
}

/// Refuses anonymous actors. Signed-in actors are allowed everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireActor;

#[async_trait]
impl AccessProbe for RequireActor {
    async fn probe(
        &self,
        actor: Option<UserId>,
        content: &Content,
        action: Action,
    ) -> Result<()> {
        match actor {
            Some(_) => Ok(()),
            None => Err(ContentError::PermissionDenied {
                content: content.id,
                action: action.to_string(),
                reason: "an authenticated user is required".to_string(),
            }),
        }
    }
}
