//! Collaborator interfaces for the revalidation core.
//!
//! The core never talks to the portal directly. It asks a [`SessionProvider`]
//! whether a transport-level session exists and a [`GroupFetcher`] for the
//! principal's current membership.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::principal::GroupMembership;

/// Access to the current portal session.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Whether the transport layer holds an authenticated session.
    async fn has_active_session(&self) -> bool;

    /// Identifier of the signed-in principal, if any.
    fn current_principal_id(&self) -> Option<String>;
}

/// Fetches current group membership from the portal.
#[async_trait]
pub trait GroupFetcher: Send + Sync {
    /// Returns the principal's groups. May fail on any network condition.
    async fn fetch_groups(&self, principal_id: &str) -> Result<GroupMembership, FetchError>;
}

#[async_trait]
impl<T: SessionProvider + ?Sized> SessionProvider for Arc<T> {
    async fn has_active_session(&self) -> bool {
        (**self).has_active_session().await
    }

    fn current_principal_id(&self) -> Option<String> {
        (**self).current_principal_id()
    }
}

#[async_trait]
impl<T: GroupFetcher + ?Sized> GroupFetcher for Arc<T> {
    async fn fetch_groups(&self, principal_id: &str) -> Result<GroupMembership, FetchError> {
        (**self).fetch_groups(principal_id).await
    }
}

/// Bounds every fetch with a timeout.
///
/// A fetch that never resolves would hold the scheduler's in-flight flag
/// forever, so the bound lives here at the fetch layer.
pub struct TimeoutFetcher<F> {
    inner: F,
    timeout: Duration,
}

impl<F: GroupFetcher> TimeoutFetcher<F> {
    /// Wraps `inner` so each fetch fails with [`FetchError::Timeout`] after `timeout`.
    pub fn new(inner: F, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The configured bound.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<F: GroupFetcher> GroupFetcher for TimeoutFetcher<F> {
    async fn fetch_groups(&self, principal_id: &str) -> Result<GroupMembership, FetchError> {
        match tokio::time::timeout(self.timeout, self.inner.fetch_groups(principal_id)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}
