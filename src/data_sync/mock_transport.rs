use super::transport::{Connection, Connector, FailureKind, LogQuery, LogTransport, RawLog, TransportError};
use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-process node with scripted failures, for exercising the harvester offline
#[derive(Debug)]
pub struct MockTransport {
    url: String,
    chain_id: u64,
    head_block: u64,
    logs: Vec<RawLog>,
    max_span: Option<u64>,
    always_fail: Option<FailureKind>,
    alive: AtomicBool,
    scripted_failures: Mutex<VecDeque<FailureKind>>,
    reserves: Option<(U256, U256)>,
    log_calls: AtomicUsize,
    served_ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            chain_id: 1,
            head_block: 0,
            logs: Vec::new(),
            max_span: None,
            always_fail: None,
            alive: AtomicBool::new(true),
            scripted_failures: Mutex::new(VecDeque::new()),
            reserves: None,
            log_calls: AtomicUsize::new(0),
            served_ranges: Mutex::new(Vec::new()),
        }
    }

    pub fn with_head(mut self, head_block: u64) -> Self {
        self.head_block = head_block;
        self
    }

    /// Logs the node knows about; kept sorted by block
    pub fn with_logs(mut self, mut logs: Vec<RawLog>) -> Self {
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        self.logs = logs;
        self
    }

    /// Refuse any log query spanning more than `max_span` blocks
    pub fn with_max_span(mut self, max_span: u64) -> Self {
        self.max_span = Some(max_span);
        self
    }

    /// Fail the next `times` log queries with `kind`
    pub fn failing_next(self, kind: FailureKind, times: usize) -> Self {
        if let Ok(mut scripted) = self.scripted_failures.lock() {
            scripted.extend(std::iter::repeat_n(kind, times));
        }
        self
    }

    pub fn always_failing(mut self, kind: FailureKind) -> Self {
        self.always_fail = Some(kind);
        self
    }

    pub fn with_reserves(mut self, reserve0: U256, reserve1: U256) -> Self {
        self.reserves = Some((reserve0, reserve1));
        self
    }

    /// Probe and every other call fail while the node is down
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }

    /// Ranges of log queries that succeeded, in call order
    pub fn served_ranges(&self) -> Vec<(u64, u64)> {
        self.served_ranges.lock().map(|ranges| ranges.clone()).unwrap_or_default()
    }

    fn check_alive(&self) -> Result<(), TransportError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::new(FailureKind::Unreachable, format!("{} is down", self.url)))
        }
    }
}

#[async_trait]
impl LogTransport for MockTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64, TransportError> {
        self.check_alive()?;
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        self.check_alive()?;
        Ok(self.head_block)
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, TransportError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        self.check_alive()?;

        if let Some(kind) = self.always_fail {
            return Err(TransportError::new(kind, "scripted permanent failure"));
        }
        let scripted = self.scripted_failures.lock().ok().and_then(|mut scripted| scripted.pop_front());
        if let Some(kind) = scripted {
            return Err(TransportError::new(kind, "scripted failure"));
        }
        if let Some(max_span) = self.max_span {
            if query.span() > max_span {
                return Err(TransportError::new(
                    FailureKind::RangeTooLarge,
                    format!("block range {} exceeds {}", query.span(), max_span),
                ));
            }
        }

        if let Ok(mut served) = self.served_ranges.lock() {
            served.push((query.from_block, query.to_block));
        }
        Ok(self
            .logs
            .iter()
            .filter(|log| log.block_number >= query.from_block && log.block_number <= query.to_block)
            .cloned()
            .collect())
    }

    async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, TransportError> {
        self.check_alive()?;
        let (reserve0, reserve1) = self
            .reserves
            .ok_or_else(|| TransportError::new(FailureKind::Unknown, "execution reverted"))?;

        // getReserves() returns (uint112, uint112, uint32), each padded to a word
        let mut encoded = Vec::with_capacity(96);
        encoded.extend_from_slice(&reserve0.to_be_bytes::<32>());
        encoded.extend_from_slice(&reserve1.to_be_bytes::<32>());
        encoded.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());
        Ok(encoded.into())
    }
}

/// Hands out registered mock transports by URL
#[derive(Debug, Default)]
pub struct MockConnector {
    transports: HashMap<String, Arc<MockTransport>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transport: Arc<MockTransport>) {
        self.transports.insert(transport.endpoint().to_string(), transport);
    }

    pub fn with(mut self, transport: Arc<MockTransport>) -> Self {
        self.register(transport);
        self
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        self.transports
            .get(url)
            .map(|transport| Arc::clone(transport) as Connection)
            .ok_or_else(|| TransportError::new(FailureKind::Unreachable, format!("no route to {}", url)))
    }
}

/// Swap log with the given tracked amount in slot 0, for fixtures
pub fn swap_log(block_number: u64, log_index: u64, amount0_in: u64) -> RawLog {
    RawLog {
        block_number,
        data: format!("0x{:064x}{:064x}{:064x}{:064x}", amount0_in, 0, 0, 0),
        log_index: Some(log_index),
        transaction_hash: None,
    }
}
