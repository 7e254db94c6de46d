use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strum_macros::Display;
use thiserror::Error;
use tracing::trace;

/// Why a remote call failed, decided once at the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FailureKind {
    /// The node refused the block span or result size of a log query
    RangeTooLarge,
    RateLimited,
    Timeout,
    Unreachable,
    /// The node answered with something we can't interpret
    Malformed,
    Unknown,
}

impl FailureKind {
    /// Failures cured by asking for a smaller chunk rather than another endpoint
    pub fn is_range_class(self) -> bool {
        matches!(self, FailureKind::RangeTooLarge | FailureKind::RateLimited | FailureKind::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Malformed, message)
    }
}

/// `eth_getLogs` filter for one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogQuery {
    pub fn span(&self) -> u64 {
        self.to_block.saturating_sub(self.from_block) + 1
    }
}

/// A log as returned by the node. The payload stays hex until decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub block_number: u64,
    pub data: String,
    pub log_index: Option<u64>,
    pub transaction_hash: Option<String>,
}

/// The calls the harvester needs from a node
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// URL this transport talks to
    fn endpoint(&self) -> &str;

    /// Cheap introspection call used as the liveness probe
    async fn chain_id(&self) -> Result<u64, TransportError>;

    async fn block_number(&self) -> Result<u64, TransportError>;

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, TransportError>;

    /// `eth_call` against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError>;
}

/// A live handle to one endpoint. Replaced, never mutated, on rotation.
pub type Connection = Arc<dyn LogTransport>;

/// Builds a transport for a candidate URL without touching the network
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Connection, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpConnector {
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Connector for HttpConnector {
    fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        Ok(Arc::new(HttpRpcTransport::new(url, self.request_timeout)?))
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLog {
    block_number: Option<String>,
    data: String,
    log_index: Option<String>,
    transaction_hash: Option<String>,
    #[serde(default)]
    removed: bool,
}

/// JSON-RPC over HTTP
#[derive(Debug)]
pub struct HttpRpcTransport {
    rpc_url: String,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpRpcTransport {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        url::Url::parse(rpc_url)
            .map_err(|e| TransportError::new(FailureKind::Unreachable, format!("invalid url {}: {}", rpc_url, e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::new(FailureKind::Unknown, format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let request_body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });
        trace!("call {} {}", method, self.rpc_url);

        let response = self
            .http_client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| TransportError::new(classify_reqwest(&e), e.to_string()))?;

        let status = response.status();
        if let Some(kind) = classify_status_override(status) {
            return Err(TransportError::new(kind, format!("HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::new(classify_reqwest(&e), e.to_string()))?;
        trace!("response {}", body);

        let rpc_response: RpcResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => return Err(TransportError::malformed(format!("bad JSON-RPC body: {}", e))),
            Err(_) => return Err(TransportError::new(classify_status(status), format!("HTTP {}", status))),
        };

        if let Some(error) = rpc_response.error {
            return Err(TransportError::new(
                classify_rpc_error(method, error.code, &error.message),
                format!("RPC error {}: {}", error.code, error.message),
            ));
        }
        if !status.is_success() {
            return Err(TransportError::new(classify_status(status), format!("HTTP {}", status)));
        }

        rpc_response
            .result
            .ok_or_else(|| TransportError::malformed("missing result in RPC response"))
    }

    async fn quantity_call(&self, method: &str) -> Result<u64, TransportError> {
        let result = self.rpc_call(method, json!([])).await?;
        let quantity = result
            .as_str()
            .ok_or_else(|| TransportError::malformed(format!("{} returned a non-string", method)))?;
        parse_quantity(quantity)
    }
}

#[async_trait]
impl LogTransport for HttpRpcTransport {
    fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    async fn chain_id(&self) -> Result<u64, TransportError> {
        self.quantity_call("eth_chainId").await
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        self.quantity_call("eth_blockNumber").await
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, TransportError> {
        let filter = json!([{
            "fromBlock": format!("0x{:x}", query.from_block),
            "toBlock": format!("0x{:x}", query.to_block),
            "address": format!("{:#x}", query.address),
            "topics": [format!("{:#x}", query.topic0)],
        }]);

        let result = self.rpc_call("eth_getLogs", filter).await?;
        let wire_logs: Vec<WireLog> =
            serde_json::from_value(result).map_err(|e| TransportError::malformed(format!("bad log list: {}", e)))?;

        wire_logs.into_iter().filter(|log| !log.removed).map(RawLog::try_from).collect()
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        let params = json!([
            {
                "to": format!("{:#x}", to),
                "data": format!("{:#x}", data)
            },
            "latest"
        ]);

        let result = self.rpc_call("eth_call", params).await?;
        let hex_result = result
            .as_str()
            .ok_or_else(|| TransportError::malformed("eth_call returned a non-string"))?;
        let bytes = hex::decode(hex_result.trim_start_matches("0x"))
            .map_err(|e| TransportError::malformed(format!("bad eth_call hex: {}", e)))?;
        Ok(bytes.into())
    }
}

impl TryFrom<WireLog> for RawLog {
    type Error = TransportError;

    fn try_from(log: WireLog) -> Result<Self, Self::Error> {
        let block_number = log
            .block_number
            .as_deref()
            .ok_or_else(|| TransportError::malformed("log without block number"))
            .and_then(parse_quantity)?;

        Ok(Self {
            block_number,
            data: log.data,
            log_index: log.log_index.as_deref().map(parse_quantity).transpose()?,
            transaction_hash: log.transaction_hash,
        })
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(quantity: &str) -> Result<u64, TransportError> {
    let digits = quantity.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|e| TransportError::malformed(format!("invalid quantity {}: {}", quantity, e)))
}

/// Statuses that decide the failure kind regardless of the body
fn classify_status_override(status: StatusCode) -> Option<FailureKind> {
    match status {
        StatusCode::TOO_MANY_REQUESTS => Some(FailureKind::RateLimited),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Some(FailureKind::Timeout),
        StatusCode::PAYLOAD_TOO_LARGE => Some(FailureKind::RangeTooLarge),
        _ => None,
    }
}

pub fn classify_status(status: StatusCode) -> FailureKind {
    if let Some(kind) = classify_status_override(status) {
        return kind;
    }
    if status.is_server_error() {
        FailureKind::Unreachable
    } else {
        FailureKind::Unknown
    }
}

const RATE_LIMIT_HINTS: &[&str] = &["rate limit", "too many requests", "exceeded the quota", "capacity"];
const TIMEOUT_HINTS: &[&str] = &["timeout", "timed out"];
const MISSING_STATE_HINTS: &[&str] = &["header not found", "missing trie node", "pruned", "unknown block"];
const RANGE_HINTS: &[&str] = &["range", "limit", "exceed", "too many", "too large", "response size", "query returned more"];

fn mentions(message: &str, hints: &[&str]) -> bool {
    hints.iter().any(|hint| message.contains(hint))
}

/// Map a JSON-RPC error to a failure kind.
///
/// Providers disagree on codes for oversized log queries, so inside
/// `eth_getLogs` the implementation-defined server range (-32000..=-32099) and
/// invalid params are told apart by message. A node that lacks the requested
/// blocks is `Unreachable`, so the scan moves to another endpoint without
/// shrinking the chunk.
pub fn classify_rpc_error(method: &str, code: i64, message: &str) -> FailureKind {
    if code == -32005 {
        return FailureKind::RateLimited;
    }

    let message = message.to_ascii_lowercase();
    let is_server_range = (-32099..=-32000).contains(&code);
    if is_server_range || code == -32602 {
        if mentions(&message, MISSING_STATE_HINTS) {
            return FailureKind::Unreachable;
        }
        if mentions(&message, RATE_LIMIT_HINTS) {
            return FailureKind::RateLimited;
        }
        if mentions(&message, TIMEOUT_HINTS) {
            return FailureKind::Timeout;
        }
        if method == "eth_getLogs" && mentions(&message, RANGE_HINTS) {
            return FailureKind::RangeTooLarge;
        }
    }

    match code {
        -32700 | -32600 | -32602 => FailureKind::Malformed,
        -32601 => FailureKind::Unreachable,
        _ => FailureKind::Unknown,
    }
}

fn classify_reqwest(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() || error.is_request() {
        FailureKind::Unreachable
    } else if error.is_decode() || error.is_body() {
        FailureKind::Malformed
    } else {
        FailureKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_class() {
        assert!(FailureKind::RangeTooLarge.is_range_class());
        assert!(FailureKind::RateLimited.is_range_class());
        assert!(FailureKind::Timeout.is_range_class());
        assert!(!FailureKind::Unreachable.is_range_class());
        assert!(!FailureKind::Malformed.is_range_class());
        assert!(!FailureKind::Unknown.is_range_class());
    }

    #[test]
    fn test_classify_rpc_error() {
        let logs = "eth_getLogs";
        assert_eq!(classify_rpc_error(logs, -32005, "slow down"), FailureKind::RateLimited);
        assert_eq!(
            classify_rpc_error(logs, -32602, "eth_getLogs is limited to a 1000 block range"),
            FailureKind::RangeTooLarge
        );
        assert_eq!(classify_rpc_error(logs, -32000, "block range is too wide"), FailureKind::RangeTooLarge);
        assert_eq!(
            classify_rpc_error(logs, -32000, "query returned more than 10000 results"),
            FailureKind::RangeTooLarge
        );
        assert_eq!(classify_rpc_error(logs, -32602, "invalid argument 0: hex string"), FailureKind::Malformed);
        assert_eq!(classify_rpc_error("eth_call", -32000, "execution reverted"), FailureKind::Unknown);
        assert_eq!(classify_rpc_error("eth_call", -32602, "invalid params"), FailureKind::Malformed);
        assert_eq!(classify_rpc_error("eth_chainId", -32601, "method not found"), FailureKind::Unreachable);
        assert_eq!(classify_rpc_error(logs, 3, "range"), FailureKind::Unknown);
    }

    #[test]
    fn test_missing_state_is_not_a_range_failure() {
        let logs = "eth_getLogs";
        assert_eq!(classify_rpc_error(logs, -32000, "header not found"), FailureKind::Unreachable);
        assert_eq!(classify_rpc_error(logs, -32000, "missing trie node 0xabc"), FailureKind::Unreachable);
        assert_eq!(classify_rpc_error(logs, -32000, "something unexpected"), FailureKind::Unknown);
        assert_eq!(classify_rpc_error(logs, -32001, "Request timed out"), FailureKind::Timeout);
        assert_eq!(classify_rpc_error(logs, -32090, "Too Many Requests, rate limit exceeded"), FailureKind::RateLimited);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FailureKind::RateLimited);
        assert_eq!(classify_status(StatusCode::GATEWAY_TIMEOUT), FailureKind::Timeout);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), FailureKind::Unreachable);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), FailureKind::Unknown);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0xzz").unwrap_err().kind, FailureKind::Malformed);
    }

    #[test]
    fn test_wire_log_conversion() {
        let wire: Vec<WireLog> = serde_json::from_value(json!([
            {
                "address": "0x1f249f8b5a42aa78cc8a2b66ee0bb015468a5f43",
                "blockNumber": "0x10",
                "data": "0xabcd",
                "logIndex": "0x2",
                "transactionHash": "0x01",
                "removed": false
            }
        ]))
        .unwrap();
        let log = RawLog::try_from(wire.into_iter().next().unwrap()).unwrap();
        assert_eq!(log.block_number, 16);
        assert_eq!(log.log_index, Some(2));
        assert_eq!(log.data, "0xabcd");

        let pending: WireLog = serde_json::from_value(json!({ "blockNumber": null, "data": "0x" })).unwrap();
        assert_eq!(RawLog::try_from(pending).unwrap_err().kind, FailureKind::Malformed);
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let err = HttpRpcTransport::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind, FailureKind::Unreachable);
    }

    #[test]
    fn test_query_span() {
        let query = LogQuery { address: Address::ZERO, topic0: B256::ZERO, from_block: 10, to_block: 10 };
        assert_eq!(query.span(), 1);
    }
}
