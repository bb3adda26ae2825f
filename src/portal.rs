//! Group membership from the portal's community user document.
//!
//! Only two fields are read: `groups[].id` and `groups[].title`. A portal
//! `error` object (expired token, unknown user) becomes [`FetchError::Portal`],
//! which the scheduler treats like any other transport failure.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::FetchError;
use crate::fetch::GroupFetcher;
use crate::principal::GroupMembership;
use crate::token::PortalToken;

/// A GET request against the portal REST API.
#[derive(Clone, PartialEq, Eq)]
pub struct PortalRequest {
    /// Path relative to the portal root, e.g. `/sharing/rest/community/users/amir`
    pub path: String,
    /// Query parameters, including `f=json` and the token when present
    pub query: Vec<(String, String)>,
}

impl fmt::Debug for PortalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.query.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("PortalRequest")
            .field("path", &self.path)
            .field("query_keys", &keys)
            .finish()
    }
}

impl PortalRequest {
    /// Value of a query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Executes portal requests and returns the raw response body.
#[async_trait]
pub trait PortalTransport: Send + Sync {
    /// Performs the request. Implementations map network failures to
    /// [`FetchError::Transport`].
    async fn get(&self, request: &PortalRequest) -> Result<String, FetchError>;
}

#[derive(Debug, Deserialize)]
struct UserDocument {
    #[serde(default)]
    groups: Option<Vec<GroupEntry>>,
    #[serde(default)]
    error: Option<PortalErrorBody>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PortalErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Parses a community user document into group membership.
///
/// # Errors
///
/// `Malformed` when the body is not a user document, `Portal` when the
/// portal reported an error object instead.
pub fn parse_user_groups(body: &str) -> Result<GroupMembership, FetchError> {
    let doc: UserDocument =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    if let Some(err) = doc.error {
        return Err(FetchError::Portal {
            code: err.code,
            message: err.message,
        });
    }

    let groups = doc
        .groups
        .ok_or_else(|| FetchError::Malformed("user document has no `groups` field".into()))?;

    let mut membership = GroupMembership::default();
    for group in groups {
        if let Some(title) = group.title {
            membership.group_names.insert(title);
        }
        membership.group_ids.insert(group.id);
    }
    Ok(membership)
}

/// [`GroupFetcher`] backed by the portal community API.
pub struct PortalGroupFetcher<T> {
    transport: T,
    token: Option<PortalToken>,
}

impl<T: PortalTransport> PortalGroupFetcher<T> {
    /// Creates a fetcher that sends requests through `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            token: None,
        }
    }

    /// Attaches the token sent with every request.
    pub fn with_token(mut self, token: PortalToken) -> Self {
        self.token = Some(token);
        self
    }

    fn request_for(&self, principal_id: &str) -> Result<PortalRequest, FetchError> {
        let mut query = vec![("f".to_string(), "json".to_string())];
        if let Some(token) = &self.token {
            query.push(("token".to_string(), token.expose_token().to_string()));
        }
        Ok(PortalRequest {
            path: user_document_path(principal_id)?,
            query,
        })
    }
}

/// Path of the community user document, with `principal_id` encoded as a
/// single path segment so `/`, `?` and `#` cannot reshape the request.
fn user_document_path(principal_id: &str) -> Result<String, FetchError> {
    let mut url = Url::parse(USERS_ROOT).map_err(|e| FetchError::Malformed(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| FetchError::Malformed("portal users root cannot be a base".into()))?
        .push(principal_id);
    Ok(url.path().to_string())
}

// Host is a placeholder; only the path is sent to the transport.
const USERS_ROOT: &str = "https://portal.invalid/sharing/rest/community/users";

#[async_trait]
impl<T: PortalTransport> GroupFetcher for PortalGroupFetcher<T> {
    async fn fetch_groups(&self, principal_id: &str) -> Result<GroupMembership, FetchError> {
        let request = self.request_for(principal_id)?;
        let body = self.transport.get(&request).await?;
        let groups = parse_user_groups(&body)?;
        tracing::debug!(
            principal_id,
            group_count = groups.group_ids.len(),
            "fetched portal group membership"
        );
        Ok(groups)
    }
}
