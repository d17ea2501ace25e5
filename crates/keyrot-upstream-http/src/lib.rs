// # HTTP Upstream Client
//
// This crate provides the HTTP/JSON upstream client for the keyrot dispatcher.
//
// ## Behavior
//
// - One POST per call, carrying `{model, prompt, max_tokens, temperature, metadata?}`
// - The key travels as a bearer token and is never logged
// - Every HTTP status (2xx, 4xx, 5xx) is reported as `RawOutcome::Response`
// - Failures to get a response (connect, DNS, timeout, body read) are
//   reported as `RawOutcome::TransportFailure`
//
// ## What This Crate Does NOT Do
//
// - Classification, retries, backoff and key selection are owned by
//   `RotationController`
// - No response caching

use async_trait::async_trait;
use keyrot_core::config::UpstreamConfig;
use keyrot_core::{Error, RawOutcome, Result, UpstreamCall, UpstreamClient};
use serde::Serialize;
use serde_json::{Map, Value};

/// Request payload sent to the generation endpoint
#[derive(Debug, Serialize)]
struct GenerationPayload<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Map<String, Value>>,
}

/// HTTP upstream client
///
/// Cheap to share: the underlying `reqwest::Client` pools connections and
/// the per-call timeout comes from [`UpstreamCall::timeout`].
pub struct HttpUpstreamClient {
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

// Keys are passed per call and never stored, but keep Debug narrow anyway
impl std::fmt::Debug for HttpUpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstreamClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl HttpUpstreamClient {
    /// Create a client from upstream configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }

    fn payload<'a>(&'a self, call: &'a UpstreamCall) -> GenerationPayload<'a> {
        GenerationPayload {
            model: &self.model,
            prompt: &call.prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            metadata: call.metadata.as_ref(),
        }
    }
}

/// Describe a transport error without leaking request headers
fn describe_transport_error(err: reqwest::Error) -> String {
    let prefix = if err.is_timeout() {
        "Request timed out"
    } else if err.is_connect() {
        "Connection failed"
    } else {
        "HTTP request failed"
    };
    format!("{}: {}", prefix, err.without_url())
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn call(&self, key: &str, call: &UpstreamCall) -> RawOutcome {
        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "Posting generation request");

        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .timeout(call.timeout)
            .json(&self.payload(call))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return RawOutcome::TransportFailure {
                    message: describe_transport_error(e),
                };
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => RawOutcome::Response { status, body },
            Err(e) => RawOutcome::TransportFailure {
                message: format!(
                    "Failed to read response body (status {}): {}",
                    status,
                    e.without_url()
                ),
            },
        }
    }

    fn client_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn config_for(endpoint: &str) -> UpstreamConfig {
        UpstreamConfig {
            endpoint: endpoint.to_string(),
            ..UpstreamConfig::default()
        }
    }

    /// Serve exactly one HTTP exchange, handing the raw request back
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];

            // headers first, then as much body as content-length says
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&request[..header_end]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while request.len() < header_end + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            let _ = tx.send(String::from_utf8_lossy(&request).to_string());
        });

        (format!("http://{}/generate", addr), rx)
    }

    /// Accept one connection and never answer it
    async fn serve_silence() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        format!("http://{}/generate", addr)
    }

    #[test]
    fn test_payload_omits_missing_metadata() {
        let client = HttpUpstreamClient::new(&UpstreamConfig::default()).unwrap();
        let call = UpstreamCall::new("hello", None, Duration::from_secs(5));

        let json = serde_json::to_value(client.payload(&call)).unwrap();
        assert_eq!(json["model"], "gemini-1.0");
        assert_eq!(json["prompt"], "hello");
        assert_eq!(json["max_tokens"], 800);
        assert_eq!(json["temperature"].as_f64().unwrap() as f32, 0.2f32);
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_payload_forwards_metadata() {
        let client = HttpUpstreamClient::new(&UpstreamConfig::default()).unwrap();
        let mut metadata = Map::new();
        metadata.insert("trace".to_string(), Value::from("abc"));
        let call = UpstreamCall::new("hello", Some(metadata), Duration::from_secs(5));

        let json = serde_json::to_value(client.payload(&call)).unwrap();
        assert_eq!(json["metadata"]["trace"], "abc");
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let err = HttpUpstreamClient::new(&config_for("ftp://example.com")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_debug_is_narrow() {
        let client = HttpUpstreamClient::new(&UpstreamConfig::default()).unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("HttpUpstreamClient"));
        assert!(debug.contains("gemini-1.0"));
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let (endpoint, request_rx) =
            serve_once("HTTP/1.1 429 Too Many Requests", r#"{"error":"quota"}"#).await;
        let client = HttpUpstreamClient::new(&config_for(&endpoint)).unwrap();
        let call = UpstreamCall::new("hello", None, Duration::from_secs(5));

        let outcome = client.call("secret-key", &call).await;
        assert_eq!(
            outcome,
            RawOutcome::Response {
                status: 429,
                body: r#"{"error":"quota"}"#.to_string(),
            }
        );

        let request = request_rx.await.unwrap();
        assert!(request.starts_with("POST /generate"));
        assert!(
            request
                .to_ascii_lowercase()
                .contains("authorization: bearer secret-key")
        );
        assert!(request.contains(r#""prompt":"hello""#));
    }

    #[tokio::test]
    async fn test_success_body_is_returned_verbatim() {
        let (endpoint, _request_rx) = serve_once("HTTP/1.1 200 OK", r#"{"text":"hi"}"#).await;
        let client = HttpUpstreamClient::new(&config_for(&endpoint)).unwrap();
        let call = UpstreamCall::new("hello", None, Duration::from_secs(5));

        match client.call("key", &call).await {
            RawOutcome::Response { status, body } => {
                assert_eq!(status, 200);
                assert_eq!(body, r#"{"text":"hi"}"#);
            }
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_failure() {
        // bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let client =
            HttpUpstreamClient::new(&config_for(&format!("http://{}/generate", addr))).unwrap();
        let call = UpstreamCall::new("hello", None, Duration::from_secs(5));

        match client.call("sk-test-0451", &call).await {
            RawOutcome::TransportFailure { message } => {
                assert!(!message.contains("sk-test-0451"), "message must not echo the key");
            }
            other => panic!("expected a transport failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_timeout_is_transport_failure() {
        let endpoint = serve_silence().await;
        let client = HttpUpstreamClient::new(&config_for(&endpoint)).unwrap();
        let call = UpstreamCall::new("hello", None, Duration::from_millis(200));

        let started = std::time::Instant::now();
        match client.call("key", &call).await {
            RawOutcome::TransportFailure { message } => {
                assert!(message.starts_with("Request timed out"), "got: {}", message);
            }
            other => panic!("expected a transport failure, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
