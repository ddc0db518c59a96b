//! HTTP client for the AutoScaler central-management API.
//!
//! Every outbound request attaches the current bearer token when one is
//! present; authorization is enforced server-side, so requests are never
//! blocked locally for lacking a token. A 401 on a data request is reported
//! to the session manager through a registered hook, exactly once per
//! failing request, and the request is not retried.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use crate::auth::{AuthError, CredentialVerifier, Session, SharedToken};
use crate::models::{InstancePool, Node, NodeSummary};

use super::ApiError;

/// HTTP request timeout in seconds.
/// Bounds every call, including the login exchange and the startup token
/// validation probe, so no lifecycle operation can hang indefinitely.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Callback invoked when the backend rejects the session.
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// API client for the central-management backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection
/// pooling, and the token cell and hook slot are shared across clones.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<String>,
    token: SharedToken,
    on_unauthorized: Arc<RwLock<Option<UnauthorizedHook>>>,
}

impl ApiClient {
    /// Create a new client rooted at `base_url` (e.g. `http://host:8000/api`).
    pub fn new(base_url: &str, token: SharedToken) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: Arc::new(base_url.trim_end_matches('/').to_string()),
            token,
            on_unauthorized: Arc::new(RwLock::new(None)),
        })
    }

    /// Register the session-invalidation hook. Shared across clones, so
    /// registering once wires every copy of this client.
    pub fn set_unauthorized_hook(&self, hook: UnauthorizedHook) {
        *self
            .on_unauthorized
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notify_unauthorized(&self) {
        let hook = self
            .on_unauthorized
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match hook.as_ref() {
            Some(hook) => hook(),
            None => debug!("401 received with no unauthorized hook registered"),
        }
    }

    /// Send an authorized GET and surface non-success statuses as ApiError.
    async fn get_authorized(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = self.bearer() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            // Signaled exactly once per failing request: this is the only
            // 401 exit and there is no retry path, so a forced redirect
            // can never loop back into more requests.
            self.notify_unauthorized();
            return Err(ApiError::Unauthorized);
        }
        warn!(path, status = %status, "Request failed");
        Err(ApiError::from_status(status, &body))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.get_authorized(path).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Fetch all registered autoscaler nodes
    pub async fn fetch_nodes(&self) -> Result<Vec<NodeSummary>, ApiError> {
        self.get("/nodes").await
    }

    /// Fetch one node with its registered instance pools
    pub async fn fetch_node(&self, node_id: &str) -> Result<Node, ApiError> {
        self.get(&format!("/nodes/{}", node_id)).await
    }

    /// Fetch all instance pools across nodes
    pub async fn fetch_instance_pools(&self) -> Result<Vec<InstancePool>, ApiError> {
        self.get("/instance-pools").await
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
    /// Seconds until expiry; the backend does not always report this
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WhoamiResponse {
    username: String,
}

impl CredentialVerifier for ApiClient {
    /// Exchange credentials at the token endpoint (form-encoded, per the
    /// backend's OAuth2 password flow). A 401 here is a credential failure,
    /// not a session invalidation, so the unauthorized hook never fires.
    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let url = self.url("/auth/token");
        debug!(%username, "Requesting access token");

        let response = self
            .client
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(AuthError::from_transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(AuthError::Network(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        let expires_at = body
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Ok(Session {
            username: username.to_string(),
            token: body.access_token,
            expires_at,
        })
    }

    /// Ask the whoami endpoint who the persisted token belongs to.
    async fn validate_token(&self, token: &str) -> Result<String, AuthError> {
        let url = self.url("/auth/me");

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(AuthError::from_transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(AuthError::Network(format!(
                "whoami endpoint returned {}",
                status
            )));
        }

        let body: WhoamiResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Ok(body.username)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;

    /// Minimal canned-response HTTP fixture. Every connection gets the same
    /// status and body; request heads are forwarded for inspection.
    async fn spawn_fixture(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture");
        let addr = listener.local_addr().expect("fixture addr");
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    // Read the full request: headers, then Content-Length
                    // bytes of body if the request declares one
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                        let Some(head_end) =
                            request.windows(4).position(|w| w == b"\r\n\r\n")
                        else {
                            continue;
                        };
                        let head = String::from_utf8_lossy(&request[..head_end]).to_lowercase();
                        let body_len = head
                            .lines()
                            .find_map(|l| l.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if request.len() >= head_end + 4 + body_len {
                            break;
                        }
                    }
                    let _ = tx.send(String::from_utf8_lossy(&request).to_string());
                    let response = format!(
                        "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_line,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        (format!("http://{}", addr), rx)
    }

    fn client_with_token(base_url: &str, token: Option<&str>) -> ApiClient {
        let cell = SharedToken::default();
        *cell.write().unwrap() = token.map(str::to_string);
        ApiClient::new(base_url, cell).expect("client builds")
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = client_with_token("http://localhost:8000/api/", None);
        assert_eq!(client.url("/nodes"), "http://localhost:8000/api/nodes");
    }

    #[test]
    fn test_token_response_parsing() {
        let full: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","token_type":"bearer","expires_in":1800}"#)
                .expect("full token response parses");
        assert_eq!(full.access_token, "abc");
        assert_eq!(full.expires_in, Some(1800));

        let bare: TokenResponse = serde_json::from_str(r#"{"access_token":"abc"}"#)
            .expect("bare token response parses");
        assert_eq!(bare.expires_in, None);
    }

    #[tokio::test]
    async fn test_bearer_token_is_attached() {
        let (base, mut requests) = spawn_fixture("HTTP/1.1 200 OK", "[]").await;
        let client = client_with_token(&base, Some("t1"));

        let nodes = client.fetch_nodes().await.expect("empty list fetches");
        assert!(nodes.is_empty());

        let head = requests.recv().await.expect("request captured").to_lowercase();
        assert!(head.contains("authorization: bearer t1"));
    }

    #[tokio::test]
    async fn test_no_bearer_header_without_token() {
        let (base, mut requests) = spawn_fixture("HTTP/1.1 200 OK", "[]").await;
        let client = client_with_token(&base, None);

        client.fetch_nodes().await.expect("request still sent");

        let head = requests.recv().await.expect("request captured").to_lowercase();
        assert!(!head.contains("authorization:"));
    }

    #[tokio::test]
    async fn test_unauthorized_fires_hook_once_per_request() {
        let (base, _requests) =
            spawn_fixture("HTTP/1.1 401 Unauthorized", r#"{"detail":"expired"}"#).await;
        let client = client_with_token(&base, Some("stale"));

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        client.set_unauthorized_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let err = client.fetch_nodes().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Each failing request signals independently
        let err = client.fetch_instance_pools().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_login_401_does_not_fire_hook() {
        let (base, _requests) =
            spawn_fixture("HTTP/1.1 401 Unauthorized", r#"{"detail":"bad"}"#).await;
        let client = client_with_token(&base, None);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        client.set_unauthorized_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let err = client.verify_credentials("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_verify_credentials_success() {
        let (base, mut requests) = spawn_fixture(
            "HTTP/1.1 200 OK",
            r#"{"access_token":"jwt-abc","token_type":"bearer"}"#,
        )
        .await;
        let client = client_with_token(&base, None);

        let session = client
            .verify_credentials("admin", "admin")
            .await
            .expect("login succeeds");
        assert_eq!(session.username, "admin");
        assert_eq!(session.token, "jwt-abc");
        assert_eq!(session.expires_at, None);

        let head = requests.recv().await.expect("request captured");
        assert!(head.starts_with("POST /auth/token"));
        assert!(head.contains("username=admin"));
    }

    #[tokio::test]
    async fn test_validate_token_success() {
        let (base, mut requests) =
            spawn_fixture("HTTP/1.1 200 OK", r#"{"username":"admin"}"#).await;
        let client = client_with_token(&base, None);

        let username = client.validate_token("t1").await.expect("token validates");
        assert_eq!(username, "admin");

        let head = requests.recv().await.expect("request captured");
        assert!(head.starts_with("GET /auth/me"));
    }

    #[tokio::test]
    async fn test_server_error_maps_without_hook() {
        let (base, _requests) =
            spawn_fixture("HTTP/1.1 500 Internal Server Error", "boom").await;
        let client = client_with_token(&base, Some("t1"));

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        client.set_unauthorized_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let err = client.fetch_nodes().await.unwrap_err();
        assert!(matches!(err, ApiError::ServerError(_)));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
