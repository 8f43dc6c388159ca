//! JSON-over-HTTP/1 host agent client.
//!
//! One short-lived connection per call, each wrapped in a timeout:
//! `GET /health`, `POST /deploy`, `POST /teardown`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use berth_state::InstanceId;

use crate::HostAgent;
use crate::error::{AgentError, AgentResult};
use crate::types::*;

/// Talks to the agent listening on `port` of every worker host.
#[derive(Debug, Clone)]
pub struct HttpAgent {
    port: u16,
    timeout: Duration,
}

impl HttpAgent {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// `host:port`, unless the host name already carries a port.
    fn address(&self, host: &str) -> String {
        if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:{}", self.port)
        }
    }

    async fn call<B, R>(&self, host: &str, method: Method, path: &str, body: Option<&B>) -> AgentResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let address = self.address(host);
        let request = async {
            let stream = tokio::net::TcpStream::connect(&address)
                .await
                .map_err(|e| AgentError::Connect {
                    host: host.to_string(),
                    reason: e.to_string(),
                })?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| request_error(host, e))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "agent connection closed with error");
                }
            });

            let payload = match body {
                Some(body) => serde_json::to_vec(body).map_err(|e| request_error(host, e))?,
                None => Vec::new(),
            };
            let req = http::Request::builder()
                .method(method)
                .uri(path)
                .header("host", &address)
                .header("user-agent", "berth/0.1")
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(payload)))
                .map_err(|e| request_error(host, e))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| request_error(host, e))?;
            if !resp.status().is_success() {
                return Err(AgentError::Http {
                    host: host.to_string(),
                    status: resp.status().as_u16(),
                });
            }

            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| request_error(host, e))?
                .to_bytes();
            let value = serde_json::from_slice(&bytes).map_err(|e| AgentError::Decode {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
            Ok::<R, AgentError>(value)
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%host, %path, "agent call timed out");
                Err(AgentError::Timeout {
                    host: host.to_string(),
                    millis: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl HostAgent for HttpAgent {
    async fn health_check(&self, host: &str) -> AgentResult<HostHealth> {
        self.call::<(), _>(host, Method::GET, "/health", None).await
    }

    async fn deploy(&self, host: &str, call: &DeployCall) -> AgentResult<DeployResponse> {
        debug!(%host, container = %call.container_id, "deploying container");
        self.call(host, Method::POST, "/deploy", Some(call)).await
    }

    async fn teardown(
        &self,
        host: &str,
        ids: &[InstanceId],
        all: bool,
    ) -> AgentResult<TeardownResponse> {
        let call = TeardownCall {
            container_ids: ids.to_vec(),
            all,
        };
        debug!(%host, count = ids.len(), all, "tearing down containers");
        self.call(host, Method::POST, "/teardown", Some(&call)).await
    }
}

fn request_error(host: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::Request {
        host: host.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_state::Manifest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, capture the request, answer with `status` + `body`.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request
        });
        (addr, handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn agent() -> HttpAgent {
        HttpAgent::new(1337, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn health_check_decodes_capacity() {
        let (addr, server) = serve_once(
            "200 OK",
            r#"{"status":"OK","zone":"zone-a","containers":{"total":10,"free":7,"used":3},"memory":{"total":4096,"free":2048,"used":2048},"cpu":{"total":1000,"free":600,"used":400}}"#,
        )
        .await;

        let health = agent().health_check(&addr).await.unwrap();
        assert!(health.status.is_ok());
        assert_eq!(health.zone, "zone-a");
        assert_eq!(health.containers.free, 7);
        assert_eq!(health.memory.total, 4096);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /health HTTP/1.1"));
    }

    #[tokio::test]
    async fn deploy_posts_container_id() {
        let (addr, server) = serve_once("200 OK", r#"{"status":"OK","port":61005}"#).await;
        let call = DeployCall {
            app: "web".to_string(),
            sha: "abc".to_string(),
            env: "prod".to_string(),
            container_id: "web-abc-prod-0001".to_string(),
            manifest: Manifest {
                name: "web".to_string(),
                instances: 1,
                cpu_shares: 10,
                memory_limit: 256,
                internal: false,
            },
        };

        let resp = agent().deploy(&addr, &call).await.unwrap();
        assert_eq!(resp.port, 61005);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /deploy HTTP/1.1"));
        assert!(request.contains("web-abc-prod-0001"));
    }

    #[tokio::test]
    async fn non_success_http_status_is_an_error() {
        let (addr, _server) = serve_once("500 Internal Server Error", "{}").await;

        let err = agent().teardown(&addr, &["c1".to_string()], false).await.unwrap_err();
        assert!(matches!(err, AgentError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = agent().health_check(&addr).await.unwrap_err();
        assert!(matches!(err, AgentError::Connect { .. }));
    }

    #[tokio::test]
    async fn silent_agent_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let agent = HttpAgent::new(1337, Duration::from_millis(100));
        let err = agent.health_check(&addr).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { millis: 100, .. }));
    }

    #[test]
    fn address_appends_default_port() {
        assert_eq!(agent().address("worker-1"), "worker-1:1337");
        assert_eq!(agent().address("127.0.0.1:9000"), "127.0.0.1:9000");
    }
}
