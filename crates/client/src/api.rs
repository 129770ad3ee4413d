//! HTTP API client for the storage gateway.
//!
//! [`StorageClient`] is cheap to clone; clones share the HTTP connection pool
//! and the current credential, so the background refresher and the shell see
//! the same token.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use protocol::messages::{
    CdRequest, CompleteUploadResponse, DeleteRequest, FileEntry, HealthResponse, LoginRequest,
    LsRequest, LsResponse, MessageResponse, MkdirRequest, PathResponse, RefreshRequest,
    RenameRequest, StartDownloadRequest, StartDownloadResponse, StartUploadRequest,
    StateResponse, TokenResponse, TransferRequest, ValidateRequest, ValidateResponse,
};
use protocol::{StorageError, CHUNK_ID_PARAM};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Default timeout for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credential held by a logged-in client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub token: String,
    /// Expiry in unix seconds.
    pub expires_at: u64,
    pub root_dir: String,
}

impl From<TokenResponse> for SessionToken {
    fn from(response: TokenResponse) -> Self {
        Self {
            token: response.token,
            expires_at: response.expires_at,
            root_dir: response.root_dir,
        }
    }
}

/// Client for every gateway endpoint.
#[derive(Debug, Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    base_url: String,
    credential: Arc<RwLock<Option<SessionToken>>>,
}

impl StorageClient {
    /// Creates a client for the server at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Self::with_http(http, base_url)
    }

    /// Creates a client reusing an existing `reqwest` client.
    pub fn with_http(http: reqwest::Client, base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            credential: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current credential, if logged in.
    pub async fn session(&self) -> Option<SessionToken> {
        self.credential.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.credential.read().await.is_some()
    }

    /// Replaces the stored credential.
    pub async fn set_session(&self, session: Option<SessionToken>) {
        *self.credential.write().await = session;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self
            .credential
            .read()
            .await
            .as_ref()
            .map(|session| session.token.clone())
            .ok_or(ClientError::NotLoggedIn)?;
        Ok(self.http.request(method, self.url(path)).bearer_auth(token))
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let request = self.authorized(Method::POST, path).await?.json(body);
        decode(request.send().await?).await
    }

    // Authentication

    /// Logs in and stores the issued credential.
    pub async fn login(&self, name: &str, password: &str) -> Result<SessionToken> {
        let body = LoginRequest {
            name: name.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.url("/authentication/login"))
            .json(&body)
            .send()
            .await?;
        let session = SessionToken::from(decode::<TokenResponse>(response).await?);
        self.set_session(Some(session.clone())).await;
        debug!(expires_at = session.expires_at, "Logged in");
        Ok(session)
    }

    /// Exchanges the current credential for a fresh one.
    pub async fn refresh(&self) -> Result<SessionToken> {
        let token = self
            .session()
            .await
            .map(|session| session.token)
            .ok_or(ClientError::NotLoggedIn)?;
        let body = RefreshRequest { token: Some(token) };
        let response = self
            .http
            .post(self.url("/authentication/refresh"))
            .json(&body)
            .send()
            .await?;
        let session = SessionToken::from(decode::<TokenResponse>(response).await?);
        self.set_session(Some(session.clone())).await;
        debug!(expires_at = session.expires_at, "Credential refreshed");
        Ok(session)
    }

    /// Asks the server who the current credential belongs to.
    pub async fn validate(&self) -> Result<ValidateResponse> {
        let token = self
            .session()
            .await
            .map(|session| session.token)
            .ok_or(ClientError::NotLoggedIn)?;
        let response = self
            .http
            .post(self.url("/authentication/validate"))
            .json(&ValidateRequest { token })
            .send()
            .await?;
        decode(response).await
    }

    /// Ends the server session and forgets the credential.
    pub async fn logout(&self) -> Result<MessageResponse> {
        let response: Result<MessageResponse> = self
            .post("/authentication/logout", &serde_json::json!({}))
            .await;
        self.set_session(None).await;
        response
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        decode(self.http.get(self.url("/health")).send().await?).await
    }

    // Filesystem

    /// Fetches the whole tenant tree.
    pub async fn state(&self) -> Result<FileEntry> {
        let request = self.authorized(Method::GET, "/filesystem/state").await?;
        let response: StateResponse = decode(request.send().await?).await?;
        Ok(response.info)
    }

    pub async fn ls(&self, dir_path: &str) -> Result<LsResponse> {
        let body = LsRequest {
            dir_path: dir_path.to_string(),
        };
        self.post("/filesystem/ls", &body).await
    }

    /// Moves the server-side current directory.
    pub async fn cd(&self, path: &str) -> Result<PathResponse> {
        let body = CdRequest {
            path: path.to_string(),
        };
        self.post("/filesystem/cd", &body).await
    }

    pub async fn mkdir(&self, path: &str, dir_name: &str) -> Result<PathResponse> {
        let body = MkdirRequest {
            path: path.to_string(),
            dir_name: dir_name.to_string(),
        };
        self.post("/filesystem/mkdir", &body).await
    }

    pub async fn rename(&self, dir_path: &str, old_name: &str, new_name: &str) -> Result<PathResponse> {
        let body = RenameRequest {
            dir_path: dir_path.to_string(),
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        };
        self.post("/filesystem/rename", &body).await
    }

    pub async fn move_entry(
        &self,
        src_dir_path: &str,
        file_name: &str,
        dest_dir_path: &str,
    ) -> Result<PathResponse> {
        let body = transfer_request(src_dir_path, file_name, dest_dir_path);
        self.post("/filesystem/move", &body).await
    }

    pub async fn copy(
        &self,
        src_dir_path: &str,
        file_name: &str,
        dest_dir_path: &str,
    ) -> Result<PathResponse> {
        let body = transfer_request(src_dir_path, file_name, dest_dir_path);
        self.post("/filesystem/copy", &body).await
    }

    pub async fn delete(&self, dir_path: &str, file_name: &str) -> Result<PathResponse> {
        let body = DeleteRequest {
            dir_path: dir_path.to_string(),
            file_name: file_name.to_string(),
        };
        self.post("/filesystem/delete", &body).await
    }

    // Transfers

    pub async fn start_upload(
        &self,
        location: &str,
        file_name: &str,
        chunks_num: usize,
    ) -> Result<MessageResponse> {
        let body = StartUploadRequest {
            location: location.to_string(),
            file_name: file_name.to_string(),
            chunks_num,
        };
        self.post("/filesystem/upload", &body).await
    }

    pub async fn upload_chunk(&self, id: usize, data: Bytes) -> Result<MessageResponse> {
        let request = self
            .authorized(Method::POST, "/filesystem/upload/chunk")
            .await?
            .query(&[(CHUNK_ID_PARAM, id)])
            .body(data);
        decode(request.send().await?).await
    }

    /// Asks the server to assemble the upload; lists missing chunks if any.
    pub async fn complete_upload(&self) -> Result<CompleteUploadResponse> {
        self.post("/filesystem/upload/complete", &serde_json::json!({}))
            .await
    }

    pub async fn start_download(
        &self,
        location: &str,
        file_name: &str,
    ) -> Result<StartDownloadResponse> {
        let body = StartDownloadRequest {
            location: location.to_string(),
            file_name: file_name.to_string(),
        };
        self.post("/filesystem/download", &body).await
    }

    pub async fn download_chunk(&self, id: usize) -> Result<Bytes> {
        let response = self
            .authorized(Method::GET, "/filesystem/download/chunk")
            .await?
            .query(&[(CHUNK_ID_PARAM, id)])
            .send()
            .await?;
        Ok(check(response).await?.bytes().await?)
    }
}

fn transfer_request(src_dir_path: &str, file_name: &str, dest_dir_path: &str) -> TransferRequest {
    TransferRequest {
        src_dir_path: src_dir_path.to_string(),
        file_name: file_name.to_string(),
        dest_dir_path: dest_dir_path.to_string(),
    }
}

/// Turns a non-success response into the server's [`StorageError`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(StorageError::from_response(status.as_u16(), &text).into())
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R> {
    Ok(check(response).await?.json().await?)
}
