// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delivery of queued actions to the backend.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

use super::pending_action::PendingAction;
use crate::error::RequestError;

/// Delivers one kind of queued action.
///
/// Implementations classify failures through [`RequestError`]: timeouts,
/// transport errors, 5xx and 429 are retried; anything else dead-letters.
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Circuit key for this action. Actions sharing a backend endpoint
    /// should return the same key.
    fn endpoint(&self, action_name: &str) -> String {
        action_name.to_string()
    }

    async fn deliver(&self, action: &PendingAction) -> Result<(), RequestError>;
}

/// Adapter turning an async closure into an [`ActionHandler`].
pub struct FnHandler<F, Fut> {
    endpoint: Option<String>,
    deliver: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(PendingAction) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RequestError>> + Send + 'static,
{
    pub fn new(deliver: F) -> Self {
        Self {
            endpoint: None,
            deliver,
            _fut: PhantomData,
        }
    }

    /// Route through a shared circuit instead of one per action name.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F, Fut>
where
    F: Fn(PendingAction) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RequestError>> + Send + 'static,
{
    fn endpoint(&self, action_name: &str) -> String {
        self.endpoint.clone().unwrap_or_else(|| action_name.to_string())
    }

    async fn deliver(&self, action: &PendingAction) -> Result<(), RequestError> {
        (self.deliver)(action.clone()).await
    }
}
