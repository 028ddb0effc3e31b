//! reqwest-backed Metabase client.

use super::{ApiGateway, Method, RequestOptions};
use crate::config::{Credentials, MetabaseConfig};
use crate::error::ServerError;
use crate::resilience::{with_retry, RetryConfig};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const API_KEY_HEADER: &str = "x-api-key";
const SESSION_HEADER: &str = "x-metabase-session";

/// HTTP gateway to a Metabase instance.
///
/// Session tokens are obtained lazily on first use and re-acquired once when
/// Metabase answers 401. Concurrent callers share a single login.
pub struct MetabaseClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
    timeout_ms: u64,
    retry: RetryConfig,
    session: RwLock<Option<String>>,
    login: Mutex<()>,
}

impl MetabaseClient {
    pub fn new(config: &MetabaseConfig, retry: RetryConfig) -> Result<Self, ServerError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .user_agent(concat!("metabase-mcp-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServerError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.url.clone(),
            credentials: config.credentials.clone(),
            timeout_ms: config.request_timeout.as_millis() as u64,
            retry,
            session: RwLock::new(None),
            login: Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ServerError {
        if e.is_timeout() {
            ServerError::timeout(self.timeout_ms)
        } else {
            ServerError::from(e)
        }
    }

    /// Current session token, logging in if there is none.
    async fn session_token(&self, email: &str, password: &str) -> Result<String, ServerError> {
        if let Some(token) = self.session.read().clone() {
            return Ok(token);
        }

        let _login = self.login.lock().await;
        if let Some(token) = self.session.read().clone() {
            return Ok(token);
        }

        debug!(%email, "Requesting Metabase session");
        let response = self
            .http
            .post(self.url("/api/session"))
            .json(&json!({ "username": email, "password": password }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = self.read_body(response).await?;
        if !status.is_success() {
            return Err(upstream_error(status, body));
        }

        let token = body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServerError::internal("Session response did not contain a token"))?;

        info!("Metabase session established");
        *self.session.write() = Some(token.clone());
        Ok(token)
    }

    async fn send_once(&self, path: &str, options: &RequestOptions) -> Result<Value, ServerError> {
        let first = self.send_authenticated(path, options).await;

        match (&self.credentials, first) {
            (Credentials::Session { .. }, Err(e)) if e.status() == Some(401) => {
                warn!(%path, "Metabase session rejected, re-authenticating");
                self.session.write().take();
                self.send_authenticated(path, options).await
            }
            (_, result) => result,
        }
    }

    async fn send_authenticated(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Value, ServerError> {
        let method = match options.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut request = self.http.request(method, self.url(path));
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        request = match &self.credentials {
            Credentials::ApiKey(key) => request.header(API_KEY_HEADER, key),
            Credentials::Session { email, password } => {
                let token = self.session_token(email, password).await?;
                request.header(SESSION_HEADER, token)
            }
        };

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = self.read_body(response).await?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(upstream_error(status, body))
        }
    }

    /// Decode a response body. Empty bodies are `null`; non-JSON bodies are kept as a string.
    async fn read_body(&self, response: reqwest::Response) -> Result<Value, ServerError> {
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

fn upstream_error(status: StatusCode, body: Value) -> ServerError {
    let message = match &body {
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
    .unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    });

    let data = match body {
        Value::Null | Value::String(_) => None,
        other => Some(other),
    };

    ServerError::upstream_with_data(status.as_u16(), message, data)
}

#[async_trait]
impl ApiGateway for MetabaseClient {
    async fn request(&self, path: &str, options: RequestOptions) -> Result<Value, ServerError> {
        let label = format!("{} {}", options.method, path);
        with_retry(&self.retry, &label, || self.send_once(path, &options)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one request, returning its head once the declared body has arrived.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return String::from_utf8_lossy(&buf).into_owned();
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let body_len = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < end + 4 + body_len {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return head;
        }
    }

    async fn respond(stream: &mut TcpStream, body: &str) {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
    }

    fn local_client(
        addr: std::net::SocketAddr,
        credentials: Credentials,
        timeout: Duration,
    ) -> MetabaseClient {
        let config = MetabaseConfig {
            url: format!("http://{addr}"),
            credentials,
            request_timeout: timeout,
        };
        MetabaseClient::new(&config, RetryConfig::no_retry()).unwrap()
    }

    fn client() -> MetabaseClient {
        let config = MetabaseConfig {
            url: "https://metabase.example.com".to_string(),
            credentials: Credentials::ApiKey("k".to_string()),
            request_timeout: Duration::from_secs(5),
        };
        MetabaseClient::new(&config, RetryConfig::no_retry()).unwrap()
    }

    #[test]
    fn test_url_joining() {
        let client = client();
        assert_eq!(
            client.url("/api/card/1"),
            "https://metabase.example.com/api/card/1"
        );
        assert_eq!(
            client.url("api/database/2?include=tables"),
            "https://metabase.example.com/api/database/2?include=tables"
        );
    }

    #[test]
    fn test_upstream_error_prefers_body_message() {
        let err = upstream_error(
            StatusCode::NOT_FOUND,
            json!({"message": "Card 2 not found", "status": "failed"}),
        );
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("Card 2 not found"));
    }

    #[test]
    fn test_upstream_error_plain_text_body() {
        let err = upstream_error(StatusCode::FORBIDDEN, Value::String("You don't have permissions to do that.".into()));
        assert!(err.to_string().contains("permissions"));
    }

    #[test]
    fn test_upstream_error_falls_back_to_reason() {
        let err = upstream_error(StatusCode::SERVICE_UNAVAILABLE, Value::Null);
        assert!(err.to_string().contains("Service Unavailable"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_stalled_body_reports_configured_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 64\r\n\r\n{")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = local_client(
            addr,
            Credentials::ApiKey("k".to_string()),
            Duration::from_millis(200),
        );
        let err = client
            .request("/api/card/1", RequestOptions::get())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServerError::Timeout { timeout_ms: 200 }),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_login() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let logins = Arc::new(AtomicUsize::new(0));
        let counter = logins.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    let head = read_request(&mut stream).await;
                    if head.starts_with("POST /api/session ") {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        respond(&mut stream, r#"{"id":"session-token"}"#).await;
                    } else {
                        respond(&mut stream, r#"{"id":1}"#).await;
                    }
                });
            }
        });

        let client = Arc::new(local_client(
            addr,
            Credentials::Session {
                email: "analyst@example.com".to_string(),
                password: "secret".to_string(),
            },
            Duration::from_secs(5),
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move {
                    client.request("/api/card/1", RequestOptions::get()).await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), json!({"id": 1}));
        }

        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(client.session.read().as_deref(), Some("session-token"));
    }
}
