//! SSE transport (C2): HTTP+SSE MCP transport with header injection.
//!
//! The client opens a persistent `GET` SSE connection. The server's first
//! event (`event: endpoint`) carries the URL subsequent JSON-RPC requests
//! must be `POST`ed to (often session-scoped); later `event: message` frames
//! carry JSON-RPC responses/notifications, delivered to [`recv_line`].

use super::transport::{McpError, McpTransport};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex, RwLock};

pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    post_url: RwLock<Option<String>>,
    incoming: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl SseTransport {
    pub async fn connect(
        url: &str,
        header_overrides: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut headers = HeaderMap::new();
        for (k, v) in header_overrides {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| McpError::Config(format!("invalid header name {}: {}", k, e)))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| McpError::Config(format!("invalid header value for {}: {}", k, e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::new();
        let response = client
            .get(url)
            .headers(headers.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let mut stream = response.bytes_stream().eventsource();

        let (tx, rx) = mpsc::unbounded_channel();
        let post_url = RwLock::new(Some(url.to_string()));

        let base = url.to_string();
        let endpoint_tx = tx.clone();
        let base_for_resolve = base.clone();
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(err) => {
                        log::debug!("[mcp:sse] stream error: {}", err);
                        break;
                    }
                };
                match event.event.as_str() {
                    "endpoint" => {
                        let resolved = resolve_endpoint(&base_for_resolve, &event.data);
                        let _ = endpoint_tx.send(format!("\u{0}endpoint:{}", resolved));
                    }
                    _ => {
                        if !event.data.is_empty() {
                            let _ = endpoint_tx.send(event.data);
                        }
                    }
                }
            }
        });

        Ok(Self {
            client,
            base_url: base,
            headers,
            post_url,
            incoming: Mutex::new(rx),
        })
    }

    async fn target_url(&self) -> String {
        self.post_url
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.base_url.clone())
    }
}

fn resolve_endpoint(base: &str, data: &str) -> String {
    if data.starts_with("http://") || data.starts_with("https://") {
        data.to_string()
    } else if let Ok(parsed) = reqwest::Url::parse(base) {
        parsed
            .join(data)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| data.to_string())
    } else {
        data.to_string()
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send_line(&self, line: &str) -> Result<(), McpError> {
        let url = self.target_url().await;
        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .header("Content-Type", "application/json")
            .body(line.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(McpError::Config(format!(
                "sse post to {} failed with status {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    async fn recv_line(&self) -> Result<Option<String>, McpError> {
        let mut rx = self.incoming.lock().await;
        loop {
            match rx.recv().await {
                Some(line) => {
                    if let Some(resolved) = line.strip_prefix("\u{0}endpoint:") {
                        *self.post_url.write().await = Some(resolved.to_string());
                        continue;
                    }
                    return Ok(Some(line));
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_endpoint() {
        let resolved = resolve_endpoint("http://localhost:3000/sse", "/messages?session=abc");
        assert_eq!(resolved, "http://localhost:3000/messages?session=abc");
    }

    #[test]
    fn keeps_absolute_endpoint() {
        let resolved = resolve_endpoint("http://localhost:3000/sse", "http://other/messages");
        assert_eq!(resolved, "http://other/messages");
    }
}
