//! JSON-RPC server
//!
//! Read-only anchor listings over plain HTTP POST:
//!
//! | Method | Result |
//! |--------|--------|
//! | `spv_listanchors` | anchor chain with confirmations and activity |
//! | `spv_listanchorspending` | anchors awaiting promotion |
//! | `spv_listanchorsunrewarded` | active anchors without a mined reward |
//! | `spv_listanchorauths` | auth groups by block |
//! | `spv_listanchorrewardconfirms` | reward confirmation groups |
//! | `listanchors` | rewarded anchor history |
//! | `getanchorteams [height]` | auth and confirm teams, tip by default |
//! | `listcommunitybalances` | community account balances |
//! | `getblockcount` | local tip height |

use crate::config::RpcSettings;
use anchorage_consensus::{ChainReader, FinalityEngine};
use anchorage_core::AnchorError;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// RPC Server
pub struct RpcServer {
    /// Configuration
    config: RpcSettings,

    /// Rate limiter
    rate_limiter: Arc<RateLimiter>,

    /// Request handlers
    handlers: Arc<RpcHandlers>,

    /// Metrics
    metrics: Arc<RwLock<RpcMetrics>>,
}

/// Per-IP request limiter
pub struct RateLimiter {
    /// Requests per second per IP
    requests_per_second: u32,

    /// Burst allowance
    burst: u32,

    /// Request counts by IP
    request_counts: RwLock<HashMap<String, RequestCounter>>,
}

/// Request counter for rate limiting
#[derive(Clone)]
struct RequestCounter {
    count: u32,
    window_start: i64,
}

/// RPC metrics
#[derive(Clone, Debug, Default)]
pub struct RpcMetrics {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
}

/// JSON-RPC method dispatch
pub struct RpcHandlers {
    engine: Arc<FinalityEngine>,
    chain: Arc<dyn ChainReader>,
}

/// JSON-RPC error object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }
}

impl From<AnchorError> for RpcError {
    fn from(err: AnchorError) -> Self {
        Self {
            code: err.code() as i64,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: err.to_string(),
        }
    }
}

impl RpcServer {
    pub fn new(config: &RpcSettings, handlers: RpcHandlers) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.requests_per_second, config.burst));
        Self {
            config: config.clone(),
            rate_limiter,
            handlers: Arc::new(handlers),
            metrics: Arc::new(RwLock::new(RpcMetrics::default())),
        }
    }

    /// Run the RPC server
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.config.address.parse()?;

        tracing::info!("Starting RPC server on {}", addr);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        loop {
            let (stream, peer_addr) = listener.accept().await?;

            let handlers = self.handlers.clone();
            let rate_limiter = self.rate_limiter.clone();
            let metrics = self.metrics.clone();
            let cors = self.config.cors_enabled;

            tokio::spawn(async move {
                let peer_ip = peer_addr.ip().to_string();

                if !rate_limiter.check(&peer_ip).await {
                    metrics.write().await.rate_limited_requests += 1;
                    return;
                }

                if let Err(e) = handle_connection(stream, handlers, metrics.clone(), cors).await {
                    metrics.write().await.failed_requests += 1;
                    tracing::error!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }

    /// Get current metrics
    pub async fn metrics(&self) -> RpcMetrics {
        self.metrics.read().await.clone()
    }
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
            request_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Check if request is allowed
    async fn check(&self, ip: &str) -> bool {
        self.check_at(ip, chrono::Utc::now().timestamp()).await
    }

    /// Fixed one-second window per IP; closed windows are evicted
    async fn check_at(&self, ip: &str, now: i64) -> bool {
        let mut counts = self.request_counts.write().await;
        counts.retain(|_, counter| now - counter.window_start < 1);

        let counter = counts.entry(ip.to_string()).or_insert(RequestCounter {
            count: 0,
            window_start: now,
        });
        if counter.count >= self.requests_per_second + self.burst {
            return false;
        }

        counter.count += 1;
        true
    }
}

fn cors_headers(cors: bool) -> &'static str {
    if cors {
        "Access-Control-Allow-Origin: *\r\n\
        Access-Control-Allow-Methods: POST, OPTIONS\r\n\
        Access-Control-Allow-Headers: Content-Type\r\n"
    } else {
        ""
    }
}

/// Largest request accepted
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Read one HTTP request: headers plus a `Content-Length` body
async fn read_request(stream: &mut tokio::net::TcpStream) -> anyhow::Result<Option<String>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            anyhow::bail!("request exceeds {} bytes", MAX_REQUEST_BYTES);
        }

        if let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let body_len = String::from_utf8_lossy(&data[..header_end])
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= header_end + 4 + body_len {
                break;
            }
        }
    }

    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&data).into_owned()))
}

/// Handle a single connection
async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    handlers: Arc<RpcHandlers>,
    metrics: Arc<RwLock<RpcMetrics>>,
    cors: bool,
) -> anyhow::Result<()> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    metrics.write().await.total_requests += 1;

    let response = if request.starts_with("POST") {
        let body_start = request
            .find("\r\n\r\n")
            .map(|i| i + 4)
            .unwrap_or(request.len());
        let json_response = handlers.handle_json_rpc(&request[body_start..]);

        format!(
            "HTTP/1.1 200 OK\r\n\
            Content-Type: application/json\r\n\
            {}\
            Content-Length: {}\r\n\r\n{}",
            cors_headers(cors),
            json_response.len(),
            json_response
        )
    } else if request.starts_with("OPTIONS") {
        format!("HTTP/1.1 204 No Content\r\n{}\r\n", cors_headers(cors))
    } else {
        "HTTP/1.1 405 Method Not Allowed\r\n\r\n".to_string()
    };

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

impl RpcHandlers {
    pub fn new(engine: Arc<FinalityEngine>, chain: Arc<dyn ChainReader>) -> Self {
        Self { engine, chain }
    }

    /// Handle a JSON-RPC request body, returning the response body
    pub fn handle_json_rpc(&self, body: &str) -> String {
        let request: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                return json!({
                    "jsonrpc": "2.0",
                    "error": { "code": -32700, "message": format!("Parse error: {}", e) },
                    "id": null
                })
                .to_string();
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(Value::Null);
        let id = request.get("id").cloned().unwrap_or(json!(1));

        match self.dispatch(method, &params) {
            Ok(result) => json!({
                "jsonrpc": "2.0",
                "result": result,
                "id": id
            })
            .to_string(),
            Err(e) => {
                tracing::debug!("rpc {} failed: {}", method, e.message);
                json!({
                    "jsonrpc": "2.0",
                    "error": { "code": e.code, "message": e.message },
                    "id": id
                })
                .to_string()
            }
        }
    }

    fn dispatch(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "spv_listanchors" => to_value(self.engine.list_anchors()),
            "spv_listanchorspending" => to_value(self.engine.list_pending()),
            "spv_listanchorsunrewarded" => to_value(self.engine.list_unrewarded()),
            "spv_listanchorauths" => to_value(self.engine.list_auths()),
            "spv_listanchorrewardconfirms" => to_value(self.engine.list_reward_confirms()),
            "listanchors" => to_value(self.engine.list_rewarded()),
            "getanchorteams" => {
                let height = match first_param(params) {
                    None | Some(Value::Null) => self.chain.current_height(),
                    Some(value) => value
                        .as_u64()
                        .ok_or_else(|| RpcError::invalid_params("height must be a number"))?,
                };
                to_value(self.engine.teams(height)?)
            }
            "listcommunitybalances" => to_value(self.engine.community_balances()),
            "getblockcount" => Ok(json!(self.chain.current_height())),
            _ => Err(RpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {}", method),
            }),
        }
    }
}

fn first_param(params: &Value) -> Option<&Value> {
    match params {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    Ok(serde_json::to_value(value)?)
}
