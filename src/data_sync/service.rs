use crate::data_sync::{
    config::HarvestConfig,
    endpoint_pool::EndpointPool,
    harvester::RangeHarvester,
    price::{FixedPriceFeed, PriceFeed, TickerPriceFeed},
    reserves::get_reserves,
    source::SourceDescriptor,
    transport::{Connector, HttpConnector},
};
use crate::errors::HarvestError;
use crate::logic::{AggregateState, ChainResult, LiquiditySnapshot, WindowSummary, events_since};
use crate::storage::{CheckpointStore, JsonFileStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Which sources a run scans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub skip_existing: bool,
    pub retry_incomplete: bool,
    /// Scanned even when already stored
    pub rescan: HashSet<String>,
}

impl RunOptions {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self { skip_existing: config.skip_existing, retry_incomplete: config.retry_incomplete, rescan: HashSet::new() }
    }

    pub fn with_rescan<I: IntoIterator<Item = String>>(mut self, ids: I) -> Self {
        self.rescan.extend(ids);
        self
    }
}

/// Whether `source_id` needs scanning given what is already stored
pub fn should_scan(state: &AggregateState, source_id: &str, options: &RunOptions) -> bool {
    if !options.skip_existing || options.rescan.contains(source_id) {
        return true;
    }
    match state.chains.get(source_id) {
        None => true,
        Some(result) => options.retry_incomplete && !result.is_complete(),
    }
}

/// What happened to each source during a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// The stored document reflects every completed source
    pub persisted: bool,
}

struct Checkpoint {
    state: AggregateState,
    /// In-memory state has results the store hasn't seen
    dirty: bool,
}

/// Runs every configured source through the harvester and folds the results
/// into the stored aggregate
pub struct HarvestService {
    sources: Vec<SourceDescriptor>,
    harvester: RangeHarvester,
    price_feed: Arc<dyn PriceFeed>,
    store: Arc<dyn CheckpointStore>,
    max_parallel: usize,
}

impl HarvestService {
    pub fn new(
        sources: Vec<SourceDescriptor>,
        harvester: RangeHarvester,
        price_feed: Arc<dyn PriceFeed>,
        store: Arc<dyn CheckpointStore>,
        max_parallel: usize,
    ) -> Self {
        Self { sources, harvester, price_feed, store, max_parallel: max_parallel.max(1) }
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    /// One pass over all sources. Only a state document that can't be read
    /// fails the run; per-source failures are logged and reported.
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport, HarvestError> {
        info!("Starting harvest of {} sources", self.sources.len());

        let state = self.store.load().await?;
        for id in &options.rescan {
            if !self.sources.iter().any(|source| &source.id == id) {
                warn!("Unknown source {} requested for rescan", id);
            }
        }

        let mut report = RunReport { persisted: true, ..RunReport::default() };
        let mut pending = Vec::new();
        for source in &self.sources {
            if should_scan(&state, &source.id, options) {
                pending.push(source);
            } else {
                info!("Skipping {} - already have data", source.id);
                report.skipped.push(source.id.clone());
            }
        }

        if pending.is_empty() {
            info!("Nothing to harvest");
            log_summary(&state);
            return Ok(report);
        }

        let price = match (self.price_feed.get_price().await, state.price) {
            (Some(price), _) => {
                info!("Price: ${:.6}", price);
                Some(price)
            }
            (None, Some(stored)) => {
                warn!("Price feed unavailable, using stored price ${:.6}", stored);
                Some(stored)
            }
            (None, None) => {
                warn!("No price available, USD figures will be absent");
                None
            }
        };

        let checkpoint = Mutex::new(Checkpoint { state, dirty: false });
        let outcomes: Vec<(String, bool)> = stream::iter(pending)
            .map(|source| {
                let checkpoint = &checkpoint;
                async move {
                    match self.analyze_source(source, price).await {
                        Ok(result) => {
                            self.checkpoint(checkpoint, &source.id, result, price).await;
                            (source.id.clone(), true)
                        }
                        Err(e) => {
                            error!("Error analyzing {}: {}", source.id, e);
                            (source.id.clone(), false)
                        }
                    }
                }
            })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        for (id, ok) in outcomes {
            if ok {
                report.completed.push(id);
            } else {
                report.failed.push(id);
            }
        }
        report.completed.sort();
        report.failed.sort();

        let mut checkpoint = checkpoint.lock().await;
        if checkpoint.dirty {
            match self.store.persist(&checkpoint.state).await {
                Ok(()) => checkpoint.dirty = false,
                Err(e) => error!("Final save failed, results of this run are only in memory: {}", e),
            }
        }
        report.persisted = !checkpoint.dirty;

        log_summary(&checkpoint.state);
        info!(
            "Harvest finished: {} completed, {} skipped, {} failed",
            report.completed.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Liquidity snapshot plus both windows for one source, from a single scan of
    /// the long window
    pub async fn analyze_source(&self, source: &SourceDescriptor, price: Option<f64>) -> Result<ChainResult, HarvestError> {
        info!("Analyzing {}", source.name);

        let endpoint = self
            .harvester
            .pool()
            .first_live(&source.rpc_urls)
            .await
            .ok_or_else(|| HarvestError::NoLiveEndpoint { source_id: source.id.clone() })?;
        info!("{}: Connected to {}", source.id, endpoint.url);

        let head_block = endpoint
            .connection
            .block_number()
            .await
            .map_err(|error| HarvestError::HeadUnavailable { source_id: source.id.clone(), error })?;
        let bounds = source.windows.bounds(head_block, source.block_time_secs);

        let reserves = get_reserves(&endpoint.connection, source).await;
        let liquidity = LiquiditySnapshot::new(&source.paired_asset, reserves, price);

        let outcome = self.harvester.scan_from(source, endpoint, bounds.long_from, head_block).await?;
        if !outcome.is_complete() {
            warn!(
                "{}: {} block ranges could not be fetched",
                source.id,
                outcome.gaps.len()
            );
        }

        let short_events = events_since(&outcome.events, bounds.short_from);
        Ok(ChainResult {
            name: source.name.clone(),
            pool_address: source.pool_address.to_checksum(None),
            current_block: head_block,
            liquidity,
            short_window: WindowSummary::from_events(short_events, price),
            long_window: WindowSummary::from_events(&outcome.events, price),
            scanned_from: bounds.long_from,
            price,
            unresolved_gaps: outcome.gaps,
        })
    }

    async fn checkpoint(&self, checkpoint: &Mutex<Checkpoint>, source_id: &str, result: ChainResult, price: Option<f64>) {
        let mut checkpoint = checkpoint.lock().await;
        checkpoint.state.insert_result(source_id, result, price, Utc::now());

        match self.store.persist(&checkpoint.state).await {
            Ok(()) => {
                checkpoint.dirty = false;
                info!("Saved data after completing {}", source_id);
            }
            Err(e) => {
                checkpoint.dirty = true;
                error!("Failed to save data after {}, will retry: {}", source_id, e);
            }
        }
    }
}

fn log_summary(state: &AggregateState) {
    if let Some(price) = state.price {
        info!("Price: ${:.6}", price);
    }

    let mut by_liquidity: Vec<&ChainResult> = state.chains.values().collect();
    by_liquidity.sort_by(|a, b| {
        let a = a.liquidity.usd.unwrap_or(0.0);
        let b = b.liquidity.usd.unwrap_or(0.0);
        b.partial_cmp(&a).unwrap_or(Ordering::Equal)
    });
    for result in by_liquidity {
        match result.liquidity.usd {
            Some(usd) => info!("Liquidity {}: ${:.2}", result.name, usd),
            None => info!("Liquidity {}: N/A", result.name),
        }
    }

    log_window("1 month", state, |result| result.short_window);
    log_window("3 months", state, |result| result.long_window);

    info!(
        "Totals: {} swaps (1 month), {} swaps (3 months)",
        state.totals.short_window.swap_count, state.totals.long_window.swap_count
    );
}

fn log_window(label: &str, state: &AggregateState, pick: fn(&ChainResult) -> WindowSummary) {
    let mut results: Vec<&ChainResult> = state.chains.values().collect();
    results.sort_by_key(|result| Reverse(pick(result).swap_count));
    for result in results {
        let window = pick(result);
        info!("{} {}: {} swaps, {:.0} volume", label, result.name, window.swap_count, window.volume_native);
    }
}

/// Builder for HarvestService; anything not provided is built from the config
pub struct HarvestServiceBuilder {
    config: HarvestConfig,
    sources: Vec<SourceDescriptor>,
    connector: Option<Arc<dyn Connector>>,
    price_feed: Option<Arc<dyn PriceFeed>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl HarvestServiceBuilder {
    pub fn new(config: HarvestConfig) -> Self {
        Self { config, sources: Vec::new(), connector: None, price_feed: None, store: None }
    }

    pub fn with_sources(mut self, sources: Vec<SourceDescriptor>) -> Self {
        self.sources = sources;
        self
    }

    pub fn add_source(mut self, source: SourceDescriptor) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_price_feed(mut self, price_feed: Arc<dyn PriceFeed>) -> Self {
        self.price_feed = Some(price_feed);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> eyre::Result<HarvestService> {
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(HttpConnector::new(self.config.request_timeout())),
        };
        let price_feed: Arc<dyn PriceFeed> = match (self.price_feed, &self.config.price_url) {
            (Some(price_feed), _) => price_feed,
            (None, Some(price_url)) => {
                Arc::new(TickerPriceFeed::new(price_url, self.config.request_timeout(), self.config.fallback_price)?)
            }
            (None, None) => Arc::new(FixedPriceFeed(self.config.fallback_price)),
        };
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(JsonFileStore::new(&self.config.state_path)),
        };

        let harvester = RangeHarvester::new(EndpointPool::new(connector, self.config.probe_timeout()));
        Ok(HarvestService::new(self.sources, harvester, price_feed, store, self.config.max_parallel_sources))
    }
}
