//! Line-delimited JSON control socket
//!
//! Each request is one JSON object per line:
//! `{"type":"action","name":"setEnabled","params":{"id":"ALL","enabled":true}}`.
//! Each response is one JSON object per line, in request order.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use super::ManagementApi;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Action,
    View,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub detail: String,
    pub message: String,
}

impl From<&ApiError> for ErrorBody {
    fn from(e: &ApiError) -> Self {
        Self {
            code: e.code().to_string(),
            detail: e.detail().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ControlResponse {
    fn from_result(result: Result<Value, ApiError>) -> Self {
        match result {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                ok: false,
                data: None,
                error: Some(ErrorBody::from(&e)),
            },
        }
    }
}

/// TCP front end for a [`ManagementApi`]
pub struct ControlServer {
    listener: TcpListener,
    api: Arc<ManagementApi>,
}

impl ControlServer {
    /// Bind the control socket; port 0 picks a free port
    pub async fn bind(listen_addr: &str, port: u16, api: Arc<ManagementApi>) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", listen_addr, port)
            .parse()
            .context("Invalid control listen address")?;

        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind control server")?;

        Ok(Self { listener, api })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Control server has no local address")
    }

    /// Accept connections until `shutdown` fires or its sender is dropped
    pub async fn serve(self, mut shutdown: oneshot::Receiver<()>) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Control server listening on {}", addr);
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("Control: new connection from {}", peer_addr);
                        let api = self.api.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, api).await {
                                tracing::warn!("Control connection error: {:#}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                },
            }
        }

        tracing::info!("Control server stopped");
    }
}

async fn handle_connection(stream: TcpStream, api: Arc<ManagementApi>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&api, &line);
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
    }

    Ok(())
}

/// Decode and execute one request line
pub(crate) fn handle_line(api: &ManagementApi, line: &str) -> ControlResponse {
    let request: ControlRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed control request");
            return ControlResponse::from_result(Err(ApiError::IllegalParameter("request".into())));
        }
    };

    let result = match request.kind {
        RequestKind::Action => api.handle_action(&request.name, &request.params),
        RequestKind::View => api.handle_view(&request.name, &request.params),
    };
    if let Err(e) = &result {
        tracing::debug!(name = %request.name, code = e.code(), "Control request rejected");
    }
    ControlResponse::from_result(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scanner::testing::StaticRule;
    use crate::scanner::{CollectingSink, PassiveScanEngine};
    use crate::traffic::MessageHistory;
    use serde_json::json;

    fn api() -> Arc<ManagementApi> {
        let engine = PassiveScanEngine::builder(
            Arc::new(MessageHistory::new(10)),
            Arc::new(CollectingSink::new()),
        )
        .build();
        engine.add_rule(Arc::new(StaticRule::silent(10, "XSS")));
        Arc::new(ManagementApi::new(Arc::new(engine), Config::default()))
    }

    #[test]
    fn test_malformed_line() {
        let response = handle_line(&api(), "{not json");
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().code, "illegal_parameter");
    }

    #[tokio::test]
    async fn test_round_trip_over_tcp() {
        let api = api();
        let server = ControlServer::bind("127.0.0.1", 0, api.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(server.serve(shutdown_rx));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let requests = [
            json!({ "type": "action", "name": "setEnabled", "params": { "id": 999, "enabled": true } }),
            json!({ "type": "action", "name": "setEnabled", "params": { "id": 10, "enabled": true } }),
            json!({ "type": "view", "name": "queueDepth" }),
        ];
        for request in &requests {
            writer
                .write_all(format!("{}\n", request).as_bytes())
                .await
                .unwrap();
        }

        let first: ControlResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(!first.ok);
        assert_eq!(first.error.unwrap().code, "does_not_exist");

        let second: ControlResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(second.ok);
        assert!(api.list_rules()[0].enabled);

        let third: ControlResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(third.data, Some(json!({ "queueDepth": 0 })));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
