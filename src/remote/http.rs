//! HTTP session against the server's JSON API.
//!
//! One [`HttpSession`] is created per run by logging in, is borrowed by every
//! component that talks to the server, and is consumed by
//! [`HttpSession::disconnect`] at the end of the run.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RANGE;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, instrument, trace};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_SERVER, READ_TIMEOUT_SECS, SESSION_KEY_HEADER,
};
use super::error::ServiceError;
use super::operation::{HandleStatus, OperationDescriptor, RequestHandle};
use super::query::{QueryParams, Rows};
use super::{QueryService, RemoteFile, RemoteFileStore, RemoteOperationService};
use crate::model::FileId;

/// How to authenticate when opening a session.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password login.
    Password {
        /// Login name.
        user: String,
        /// Password.
        password: String,
    },
    /// Join an existing session by key.
    SessionKey(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Self::SessionKey(_) => f.debug_tuple("SessionKey").field(&"<redacted>").finish(),
        }
    }
}

/// Where the server is and how patient to be with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Host name, or a full base URL including scheme.
    pub server: String,
    /// Port, used when `server` does not carry one.
    pub port: u16,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl ConnectionSettings {
    /// Resolves the base URL of the server's API.
    ///
    /// A bare host name gets `https://` and the configured port. A value with
    /// an explicit scheme is used as-is, taking the configured port only if it
    /// names none.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidAddress`] if no URL can be formed.
    pub fn base_url(&self) -> Result<Url, ServiceError> {
        let server = self.server.trim();
        if server.is_empty() {
            return Err(ServiceError::invalid_address(server));
        }
        let candidate = if server.contains("://") {
            server.to_string()
        } else {
            format!("https://{server}")
        };
        let mut url =
            Url::parse(&candidate).map_err(|_| ServiceError::invalid_address(server))?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(ServiceError::invalid_address(server));
        }
        if url.port().is_none() {
            url.set_port(Some(self.port))
                .map_err(|()| ServiceError::invalid_address(server))?;
        }
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session_key: String,
    #[serde(default)]
    group_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    handle: RequestHandle,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    params: &'a QueryParams,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    rows: Rows,
}

/// An authenticated session with the server.
///
/// Not `Clone`: the session has a single owner, which must call
/// [`disconnect`](Self::disconnect) exactly once.
#[derive(Debug)]
pub struct HttpSession {
    client: Client,
    base: Url,
    session_key: String,
    group_id: Option<i64>,
}

impl HttpSession {
    /// Logs in and opens a session.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AuthRequired`] if the server rejects the
    /// credentials, or a network/status error if it cannot be reached.
    #[instrument(skip(credentials), fields(server = %settings.server))]
    pub async fn connect(
        settings: &ConnectionSettings,
        credentials: &Credentials,
    ) -> Result<Self, ServiceError> {
        let base = settings.base_url()?;
        let client = build_client(settings.connect_timeout_secs, settings.read_timeout_secs)
            .map_err(|e| ServiceError::network(base.as_str(), e))?;

        let body = match credentials {
            Credentials::Password { user, password } => {
                json!({ "username": user, "password": password })
            }
            Credentials::SessionKey(key) => json!({ "session_key": key }),
        };

        let url = endpoint(&base, &["api", "v1", "session"])?;
        debug!(url = %url, "logging in");
        let response = client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::network(url.as_str(), e))?;
        let response = check_status(response, &url, "session")?;
        let login: LoginResponse = decode(response, &url).await?;

        info!(base = %base, group_id = ?login.group_id, "connected to server");
        Ok(Self {
            client,
            base,
            session_key: login.session_key,
            group_id: login.group_id,
        })
    }

    /// Returns the group the session is logged into, when the server reported one.
    #[must_use]
    pub fn group_id(&self) -> Option<i64> {
        self.group_id
    }

    /// Returns the base URL of the server's API.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Closes the session on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server could not be told; the session is
    /// consumed either way.
    #[instrument(skip(self), fields(base = %self.base))]
    pub async fn disconnect(self) -> Result<(), ServiceError> {
        let url = endpoint(&self.base, &["api", "v1", "session"])?;
        let response = self.send(Method::DELETE, &url).await?;
        check_status(response, &url, "session")?;
        info!("disconnected from server");
        Ok(())
    }

    async fn send(&self, method: Method, url: &Url) -> Result<Response, ServiceError> {
        self.client
            .request(method, url.clone())
            .header(SESSION_KEY_HEADER, &self.session_key)
            .send()
            .await
            .map_err(|e| ServiceError::network(url.as_str(), e))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        resource: &str,
    ) -> Result<T, ServiceError> {
        let url = endpoint(&self.base, segments)?;
        let response = self.send(Method::GET, &url).await?;
        let response = check_status(response, &url, resource)?;
        decode(response, &url).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
        resource: &str,
    ) -> Result<T, ServiceError> {
        let url = endpoint(&self.base, segments)?;
        let response = self
            .client
            .post(url.clone())
            .header(SESSION_KEY_HEADER, &self.session_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::network(url.as_str(), e))?;
        let response = check_status(response, &url, resource)?;
        decode(response, &url).await
    }
}

#[async_trait]
impl QueryService for HttpSession {
    #[instrument(level = "debug", skip(self, params))]
    async fn projection(&self, query: &str, params: &QueryParams) -> Result<Rows, ServiceError> {
        let response: QueryResponse = self
            .post_json(
                &["api", "v1", "query"],
                &QueryRequest { query, params },
                "query",
            )
            .await?;
        debug!(rows = response.rows.len(), "projection returned");
        Ok(response.rows)
    }
}

#[async_trait]
impl RemoteOperationService for HttpSession {
    async fn submit(
        &self,
        descriptor: &OperationDescriptor,
    ) -> Result<RequestHandle, ServiceError> {
        let response: SubmitResponse = self
            .post_json(&["api", "v1", "requests"], descriptor, "request")
            .await?;
        debug!(handle = %response.handle, "operation submitted");
        Ok(response.handle)
    }

    async fn poll(&self, handle: &RequestHandle) -> Result<HandleStatus, ServiceError> {
        let resource = format!("request {handle}");
        let status = self
            .get_json(&["api", "v1", "requests", &handle.0], &resource)
            .await?;
        trace!(handle = %handle, ?status, "polled operation");
        Ok(status)
    }

    async fn close(&self, handle: &RequestHandle) -> Result<(), ServiceError> {
        let url = endpoint(&self.base, &["api", "v1", "requests", &handle.0])?;
        let response = self.send(Method::DELETE, &url).await?;
        check_status(response, &url, &format!("request {handle}"))?;
        Ok(())
    }
}

#[async_trait]
impl RemoteFileStore for HttpSession {
    async fn metadata(&self, id: FileId) -> Result<RemoteFile, ServiceError> {
        let id_segment = id.to_string();
        self.get_json(&["api", "v1", "files", &id_segment], &format!("file {id}"))
            .await
    }

    async fn read(&self, id: FileId, offset: u64, length: u64) -> Result<Vec<u8>, ServiceError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let id_segment = id.to_string();
        let url = endpoint(&self.base, &["api", "v1", "files", &id_segment, "content"])?;
        let last = offset.saturating_add(length - 1);
        let response = self
            .client
            .get(url.clone())
            .header(SESSION_KEY_HEADER, &self.session_key)
            .header(RANGE, format!("bytes={offset}-{last}"))
            .send()
            .await
            .map_err(|e| ServiceError::network(url.as_str(), e))?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        let response = check_status(response, &url, &format!("file {id}"))?;
        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceError::network(url.as_str(), e))?;

        if partial {
            return Ok(body.to_vec());
        }
        // Server ignored the range and sent the whole file.
        Ok(slice_range(&body, offset, length).to_vec())
    }
}

fn build_client(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ServiceError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ServiceError::invalid_address(base.as_str()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn check_status(response: Response, url: &Url, resource: &str) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = status.as_u16();
    debug!(url = %url, status = code, "server returned error status");
    match code {
        401 | 403 => Err(ServiceError::auth_required(url.as_str(), code)),
        404 => Err(ServiceError::not_found(resource)),
        _ => Err(ServiceError::http_status(url.as_str(), code)),
    }
}

async fn decode<T: DeserializeOwned>(response: Response, url: &Url) -> Result<T, ServiceError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| ServiceError::network(url.as_str(), e))?;
    serde_json::from_slice(&body).map_err(|e| ServiceError::malformed(url.as_str(), e.to_string()))
}

fn slice_range(body: &[u8], offset: u64, length: u64) -> &[u8] {
    let len = body.len();
    let start = usize::try_from(offset).map_or(len, |start| start.min(len));
    let end = usize::try_from(offset.saturating_add(length)).map_or(len, |end| end.min(len));
    &body[start..end]
}
