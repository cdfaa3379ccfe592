//! Market polling scheduler
//!
//! ```text
//!            window open, exchange not Closed
//!   WAITING ──────────────────────────────────▶ POLLING
//!      ▲                                          │ cycle done / partial failure
//!      │ window closed, or cycle saw Closed       ▼
//!      └─────────────────────────────────── SLEEPING_BETWEEN_POLLS
//!                                                 │ interval elapsed, still open
//!                                                 └──▶ POLLING
//!
//!   any state ── cancellation ──▶ SHUTTING_DOWN
//! ```
//!
//! Outside the window, on trading days, WAITING still asks `marketStatus` on
//! each wake-up and moves to POLLING when the exchange reports Open.
//!
//! A cycle is sequential: market status, index values, the price list and
//! trade summary, the mover lists, the per-symbol watch list, then
//! normalization, merge and persistence. One failing endpoint never aborts a
//! cycle; its contribution is simply absent.

use crate::constants::{SECURITIES_DATASET, SNAPSHOT_DATASET};
use crate::error::{AppError, Result};
use crate::models::{
    Endpoint, MarketSnapshot, MarketStatus, PipelineConfig, SecurityRecord, SnapshotPart, SymbolReference,
};
use crate::services::clock::{sleep_or_cancel, Clock};
use crate::services::normalizer::{apply_reference, build_reference, merge_securities, normalize, tag_movers, Normalized};
use crate::services::{
    LegacyCsvExporter, MarketHours, SessionClient, SessionHandle, SessionSettings, TimeSeriesStore, TransportFactory,
    WriteOutcome,
};
use crate::utils::to_exchange_time;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Endpoints fetched every cycle after the status check, in call order
const CYCLE_ENDPOINTS: [Endpoint; 7] = [
    Endpoint::AspiData,
    Endpoint::SnpData,
    Endpoint::MarketSummary,
    Endpoint::TodaySharePrice,
    Endpoint::TradeSummary,
    Endpoint::TopGainers,
    Endpoint::TopLosers,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    WaitingForMarketOpen,
    Polling,
    SleepingBetweenPolls,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleMode {
    /// Regular polling: a Closed status ends the cycle early
    Scheduled,
    /// One-off run: everything is fetched regardless of market state
    Forced,
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<FixedOffset>,
    pub market_status: Option<MarketStatus>,
    pub succeeded: Vec<Endpoint>,
    pub failed: Vec<Endpoint>,
    pub records: usize,
    pub files_written: usize,
    pub files_skipped: usize,
    pub storage_failures: usize,
    pub anomalies: Vec<String>,
    pub reference_refreshed: bool,
    /// The exchange reported Closed and the cycle stopped after the status call
    pub market_closed: bool,
}

impl CycleReport {
    fn new(timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            timestamp,
            market_status: None,
            succeeded: Vec::new(),
            failed: Vec::new(),
            records: 0,
            files_written: 0,
            files_skipped: 0,
            storage_failures: 0,
            anomalies: Vec::new(),
            reference_refreshed: false,
            market_closed: false,
        }
    }

    fn note(&mut self, endpoint: Endpoint, ok: bool) {
        if ok {
            self.succeeded.push(endpoint);
        } else {
            self.failed.push(endpoint);
        }
    }

    fn count(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Written(_) => self.files_written += 1,
            WriteOutcome::Skipped(_) => self.files_skipped += 1,
        }
    }

    /// Every attempted endpoint failed
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = fut => result,
    }
}

pub struct Scheduler {
    config: PipelineConfig,
    hours: MarketHours,
    client: SessionClient,
    store: TimeSeriesStore,
    csv: Option<LegacyCsvExporter>,
    clock: Arc<dyn Clock>,
    /// Shutdown request (Ctrl-C)
    cancel: CancellationToken,
    /// Stops in-flight session waits once the shutdown grace period is over
    abort: CancellationToken,
    state: SchedulerState,
    handle: Option<SessionHandle>,
    reference: Option<SymbolReference>,
    /// Exchange-local day of the last refresh attempt, successful or not
    last_reference_attempt: Option<NaiveDate>,
    exchange_reported_closed: bool,
    consecutive_failed_cycles: u32,
    iteration: u64,
    last_cycle_started: Option<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(
        config: PipelineConfig,
        factory: Arc<dyn TransportFactory>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        let abort = CancellationToken::new();
        let client = SessionClient::new(factory, clock.clone(), SessionSettings::from_config(&config), abort.clone());
        let store = TimeSeriesStore::new(config.data_root.clone());
        let csv = config
            .enable_legacy_csv
            .then(|| LegacyCsvExporter::new(&config.data_root));

        Self {
            hours: MarketHours::from_config(&config),
            config,
            client,
            store,
            csv,
            clock,
            cancel,
            abort,
            state: SchedulerState::WaitingForMarketOpen,
            handle: None,
            reference: None,
            last_reference_attempt: None,
            exchange_reported_closed: false,
            consecutive_failed_cycles: 0,
            iteration: 0,
            last_cycle_started: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn consecutive_failed_cycles(&self) -> u32 {
        self.consecutive_failed_cycles
    }

    /// Load the stored reference table and establish the first session
    ///
    /// Failing to establish the first session is fatal.
    pub async fn start(&mut self) -> Result<()> {
        self.load_reference().await;

        info!("Poll worker: Establishing session");
        let handle = until_cancelled(&self.cancel, self.client.establish()).await?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Run until cancelled
    pub async fn run(&mut self) -> Result<()> {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            market_open = %self.config.market_open,
            market_close = %self.config.market_close,
            endpoints = self.config.enabled_endpoints.len(),
            "Starting poll worker"
        );

        match self.start().await {
            Ok(()) => {}
            Err(AppError::Cancelled) => {
                self.transition(SchedulerState::ShuttingDown);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        while self.state != SchedulerState::ShuttingDown {
            self.step().await;
        }

        info!(iterations = self.iteration, "Poll worker: Stopped");
        Ok(())
    }

    /// Execute one full cycle regardless of the market window
    pub async fn run_once(&mut self) -> Result<CycleReport> {
        if self.reference.is_none() {
            self.load_reference().await;
        }
        self.iteration += 1;
        self.last_cycle_started = Some(self.clock.now());
        let cancel = self.cancel.clone();
        let report = until_cancelled(&cancel, self.run_cycle(CycleMode::Forced)).await?;
        Ok(report)
    }

    /// Advance the state machine by one transition
    pub async fn step(&mut self) -> SchedulerState {
        if self.cancel.is_cancelled() {
            return self.transition(SchedulerState::ShuttingDown);
        }

        let result = match self.state {
            SchedulerState::WaitingForMarketOpen => self.step_waiting().await,
            SchedulerState::Polling => self.step_polling().await,
            SchedulerState::SleepingBetweenPolls => self.step_sleeping().await,
            SchedulerState::ShuttingDown => Ok(SchedulerState::ShuttingDown),
        };

        let next = match result {
            Ok(next) => next,
            Err(AppError::Cancelled) => SchedulerState::ShuttingDown,
            Err(e) => {
                if matches!(e, AppError::Session(_)) {
                    self.handle = None;
                }
                error!(
                    iteration = self.iteration,
                    error = %e,
                    retry_in_secs = self.config.retry_delay.as_secs(),
                    "Poll worker: Cycle aborted"
                );
                match sleep_or_cancel(self.clock.as_ref(), self.config.retry_delay, &self.cancel).await {
                    Ok(()) => SchedulerState::WaitingForMarketOpen,
                    Err(_) => SchedulerState::ShuttingDown,
                }
            }
        };

        self.transition(next)
    }

    fn transition(&mut self, next: SchedulerState) -> SchedulerState {
        if next != self.state {
            info!(from = ?self.state, to = ?next, "Poll worker: State change");
            self.state = next;
        }
        next
    }

    async fn step_waiting(&mut self) -> Result<SchedulerState> {
        let now = self.clock.now();

        if !self.hours.is_open_at(now) {
            // The exchange may run past the configured window
            if self.hours.is_trading_day_at(now) && self.config.is_enabled(Endpoint::MarketStatus) {
                if self.probe_status().await? == Some(MarketStatus::Open) {
                    info!("Poll worker: Exchange reports Open outside the configured window");
                    self.exchange_reported_closed = false;
                    return Ok(SchedulerState::Polling);
                }
            }

            let until_open = self.hours.until_next_open(now);
            let wait = until_open.min(self.config.closed_market_check_interval);
            info!(
                until_open_secs = until_open.as_secs(),
                sleep_secs = wait.as_secs(),
                "Poll worker: Market window closed"
            );
            sleep_or_cancel(self.clock.as_ref(), wait, &self.cancel).await?;
            return Ok(SchedulerState::WaitingForMarketOpen);
        }

        if self.exchange_reported_closed && self.config.is_enabled(Endpoint::MarketStatus) {
            let status = self.probe_status().await?;
            if status == Some(MarketStatus::Closed) {
                debug!("Poll worker: Exchange still reports Closed");
                sleep_or_cancel(self.clock.as_ref(), self.config.poll_interval, &self.cancel).await?;
                return Ok(SchedulerState::WaitingForMarketOpen);
            }
            self.exchange_reported_closed = false;
        }

        Ok(SchedulerState::Polling)
    }

    async fn step_polling(&mut self) -> Result<SchedulerState> {
        self.iteration += 1;
        self.last_cycle_started = Some(self.clock.now());

        let report = self.run_cycle_with_grace().await?;
        if report.market_closed {
            return Ok(SchedulerState::WaitingForMarketOpen);
        }
        Ok(SchedulerState::SleepingBetweenPolls)
    }

    async fn step_sleeping(&mut self) -> Result<SchedulerState> {
        let now = self.clock.now();
        let elapsed = self
            .last_cycle_started
            .and_then(|started| (now - started).to_std().ok())
            .unwrap_or(Duration::ZERO);
        let remaining = self.config.poll_interval.saturating_sub(elapsed);

        debug!(sleep_secs = remaining.as_secs_f64(), "Poll worker: Sleeping until next cycle");
        sleep_or_cancel(self.clock.as_ref(), remaining, &self.cancel).await?;

        if self.hours.is_open_at(self.clock.now()) {
            Ok(SchedulerState::Polling)
        } else {
            Ok(SchedulerState::WaitingForMarketOpen)
        }
    }

    /// Run a cycle; on shutdown it gets `shutdown_grace` to finish
    async fn run_cycle_with_grace(&mut self) -> Result<CycleReport> {
        let cancel = self.cancel.clone();
        let abort = self.abort.clone();
        let clock = self.clock.clone();
        let grace = self.config.shutdown_grace;

        let cycle = self.run_cycle(CycleMode::Scheduled);
        tokio::pin!(cycle);

        tokio::select! {
            result = &mut cycle => return result,
            _ = cancel.cancelled() => {}
        }

        info!(grace_secs = grace.as_secs(), "Poll worker: Shutdown requested, finishing in-flight cycle");
        tokio::select! {
            _ = &mut cycle => {
                info!("Poll worker: In-flight cycle finished");
                Err(AppError::Cancelled)
            }
            _ = clock.sleep(grace) => {
                abort.cancel();
                warn!("Poll worker: Grace period expired, abandoning cycle");
                Err(AppError::Cancelled)
            }
        }
    }

    async fn load_reference(&mut self) {
        match self.store.load_reference().await {
            Ok(Some(reference)) => {
                info!(
                    symbols = reference.len(),
                    refreshed_on = %reference.refreshed_on,
                    "Poll worker: Loaded symbol reference"
                );
                self.reference = Some(reference);
            }
            Ok(None) => debug!("Poll worker: No stored symbol reference yet"),
            Err(e) => warn!(error = %e, "Poll worker: Failed to load symbol reference"),
        }
    }

    async fn take_handle(&mut self) -> Result<SessionHandle> {
        match self.handle.take() {
            Some(handle) => Ok(handle),
            None => {
                info!("Poll worker: Establishing new session");
                until_cancelled(&self.cancel, self.client.establish()).await
            }
        }
    }

    /// Call `marketStatus` only
    async fn probe_status(&mut self) -> Result<Option<MarketStatus>> {
        let mut handle = self.take_handle().await?;
        let fetched = until_cancelled(
            &self.cancel,
            Self::fetch(&self.client, &mut handle, Endpoint::MarketStatus, &BTreeMap::new()),
        )
        .await;
        self.restore_handle(handle, &fetched);

        let status = fetched?.and_then(|raw| {
            let timestamp = to_exchange_time(&self.clock.now());
            normalize(Endpoint::MarketStatus, &raw, timestamp).into_status()
        });
        Ok(status)
    }

    fn restore_handle<T>(&mut self, handle: SessionHandle, result: &Result<T>) {
        // A session that could not be renewed is discarded
        if !matches!(result, Err(AppError::Session(_))) {
            self.handle = Some(handle);
        }
    }

    async fn run_cycle(&mut self, mode: CycleMode) -> Result<CycleReport> {
        let started = self.clock.now();
        let mut report = CycleReport::new(to_exchange_time(&started));

        info!(iteration = self.iteration, timestamp = %report.timestamp, "Poll worker: Starting cycle");

        let mut handle = self.take_handle().await?;
        let collected = self.collect(&mut handle, mode, &mut report).await;
        self.restore_handle(handle, &collected);
        collected?;

        if !report.market_closed {
            self.track_failures(&report);
        }

        let duration = (self.clock.now() - started).to_std().unwrap_or(Duration::ZERO);
        info!(
            iteration = self.iteration,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            records = report.records,
            files_written = report.files_written,
            files_skipped = report.files_skipped,
            duration_secs = duration.as_secs_f64(),
            "Poll worker: Cycle completed"
        );
        Ok(report)
    }

    fn track_failures(&mut self, report: &CycleReport) {
        if !report.all_failed() {
            self.consecutive_failed_cycles = 0;
            return;
        }

        self.consecutive_failed_cycles += 1;
        if self.consecutive_failed_cycles >= self.config.failure_alert_threshold {
            error!(
                consecutive_failed_cycles = self.consecutive_failed_cycles,
                "Poll worker: Every endpoint has failed for several consecutive cycles"
            );
        } else {
            warn!(
                consecutive_failed_cycles = self.consecutive_failed_cycles,
                "Poll worker: Every endpoint failed this cycle"
            );
        }
    }

    /// Call an endpoint; endpoint-local failures come back as `None`
    async fn fetch(
        client: &SessionClient,
        handle: &mut SessionHandle,
        endpoint: Endpoint,
        params: &BTreeMap<String, String>,
    ) -> Result<Option<Value>> {
        match client.call(handle, endpoint, params).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_recoverable() => {
                warn!(endpoint = %endpoint, error = %e, "Poll worker: Endpoint failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_recorded(
        &self,
        handle: &mut SessionHandle,
        endpoint: Endpoint,
        report: &mut CycleReport,
    ) -> Result<Option<Value>> {
        let fetched = Self::fetch(&self.client, handle, endpoint, &BTreeMap::new()).await?;
        report.note(endpoint, fetched.is_some());
        Ok(fetched)
    }

    async fn persist_raw(&self, endpoint: Endpoint, raw: Value, report: &mut CycleReport) {
        match self.store.write_raw(endpoint, report.timestamp, raw).await {
            Ok(outcome) => report.count(&outcome),
            Err(e) => {
                report.storage_failures += 1;
                error!(endpoint = %endpoint, error = %e, "Poll worker: Failed to store raw response");
            }
        }
    }

    async fn persist<T: Serialize + ?Sized>(&self, dataset: &str, payload: &T, report: &mut CycleReport) -> bool {
        let timestamp = report.timestamp;
        match self.store.write(dataset, &timestamp, payload).await {
            Ok(outcome) => {
                report.count(&outcome);
                outcome.is_written()
            }
            Err(e) => {
                report.storage_failures += 1;
                error!(dataset = dataset, error = %e, "Poll worker: Failed to store dataset");
                false
            }
        }
    }

    async fn collect(&mut self, handle: &mut SessionHandle, mode: CycleMode, report: &mut CycleReport) -> Result<()> {
        let timestamp = report.timestamp;

        if self.config.is_enabled(Endpoint::MarketStatus) {
            if let Some(raw) = self.fetch_recorded(handle, Endpoint::MarketStatus, report).await? {
                report.market_status = normalize(Endpoint::MarketStatus, &raw, timestamp).into_status();
                self.persist_raw(Endpoint::MarketStatus, raw, report).await;
            }

            if report.market_status == Some(MarketStatus::Closed) {
                self.exchange_reported_closed = true;
                if mode == CycleMode::Scheduled {
                    info!(iteration = self.iteration, "Poll worker: Exchange reports market Closed");
                    report.market_closed = true;
                    return Ok(());
                }
            } else {
                self.exchange_reported_closed = false;
            }
        }

        let mut primary = Vec::new();
        let mut supplements = Vec::new();
        let mut gainers = Vec::new();
        let mut losers = Vec::new();
        let mut parts: Vec<SnapshotPart> = Vec::new();
        let mut share_price_raw: Option<Value> = None;

        for endpoint in CYCLE_ENDPOINTS {
            if !self.config.is_enabled(endpoint) {
                continue;
            }
            let Some(raw) = self.fetch_recorded(handle, endpoint, report).await? else {
                continue;
            };

            match normalize(endpoint, &raw, timestamp) {
                Normalized::Securities(records) if endpoint == Endpoint::TodaySharePrice => {
                    primary = records;
                    share_price_raw = Some(raw.clone());
                }
                Normalized::Securities(records) => supplements.push(records),
                Normalized::Movers(symbols) if endpoint == Endpoint::TopGainers => gainers = symbols,
                Normalized::Movers(symbols) => losers = symbols,
                Normalized::Snapshot(part) => parts.push(part),
                Normalized::Status(_) | Normalized::Sectors(_) => {}
            }
            self.persist_raw(endpoint, raw, report).await;
        }

        if let Some(records) = self.fetch_watch_list(handle, report).await? {
            supplements.push(records);
        }

        if let Some(raw) = share_price_raw.as_ref() {
            if self.reference_due(timestamp) {
                self.refresh_reference(handle, raw, report).await?;
            }
        }

        let mut securities = merge_securities(primary, &supplements);
        if let Some(reference) = &self.reference {
            apply_reference(&mut securities, reference);
        }
        report.anomalies = tag_movers(&mut securities, &gainers, &losers);
        report.records = securities.len();

        let status = report.market_status.unwrap_or_else(|| {
            if self.hours.is_open_at(timestamp.with_timezone(&Utc)) {
                MarketStatus::Open
            } else {
                MarketStatus::Closed
            }
        });
        let snapshot = MarketSnapshot::from_parts(timestamp, status, &parts);

        let securities_written = if securities.is_empty() {
            false
        } else {
            self.persist(SECURITIES_DATASET, &securities, report).await
        };
        if !parts.is_empty() || report.market_status.is_some() {
            self.persist(SNAPSHOT_DATASET, &snapshot, report).await;
        }

        // Only rows of a newly written minute reach the CSV
        if let Some(csv) = self.csv.clone().filter(|_| securities_written) {
            let path = csv.path().to_path_buf();
            let appended = tokio::task::spawn_blocking(move || csv.append(&securities, &snapshot))
                .await
                .map_err(|e| AppError::Storage(format!("CSV append task failed: {}", e)))
                .and_then(|result| result);
            if let Err(e) = appended {
                report.storage_failures += 1;
                error!(error = %e, path = %path.display(), "Poll worker: Failed to append legacy CSV");
            }
        }

        Ok(())
    }

    /// Per-symbol `companyInfoSummery` calls for the configured watch list
    async fn fetch_watch_list(
        &self,
        handle: &mut SessionHandle,
        report: &mut CycleReport,
    ) -> Result<Option<Vec<SecurityRecord>>> {
        let endpoint = Endpoint::CompanyInfoSummary;
        if !self.config.is_enabled(endpoint) || self.config.company_info_symbols.is_empty() {
            return Ok(None);
        }

        let mut payload = serde_json::Map::new();
        let mut records = Vec::new();
        for symbol in &self.config.company_info_symbols {
            let mut params = BTreeMap::new();
            params.insert("symbol".to_string(), symbol.clone());

            if let Some(raw) = Self::fetch(&self.client, handle, endpoint, &params).await? {
                records.extend(normalize(endpoint, &raw, report.timestamp).into_securities());
                payload.insert(symbol.clone(), raw);
            }
        }

        report.note(endpoint, !payload.is_empty());
        if payload.is_empty() {
            return Ok(None);
        }
        self.persist_raw(endpoint, Value::Object(payload), report).await;
        Ok(Some(records))
    }

    fn reference_due(&self, now: DateTime<FixedOffset>) -> bool {
        let today = now.date_naive();
        if now.time() < self.config.reference_refresh_time || self.last_reference_attempt == Some(today) {
            return false;
        }
        self.reference
            .as_ref()
            .map_or(true, |reference| reference.refreshed_on < today)
    }

    async fn refresh_reference(&mut self, handle: &mut SessionHandle, share_price_raw: &Value, report: &mut CycleReport) -> Result<()> {
        let timestamp = report.timestamp;
        let mut sectors = Vec::new();
        self.last_reference_attempt = Some(timestamp.date_naive());

        if self.config.is_enabled(Endpoint::AllSectors) {
            if let Some(raw) = self.fetch_recorded(handle, Endpoint::AllSectors, report).await? {
                sectors = normalize(Endpoint::AllSectors, &raw, timestamp).into_sectors();
                self.persist_raw(Endpoint::AllSectors, raw, report).await;
            }
        }

        let table = build_reference(timestamp, share_price_raw, &sectors);
        match self.store.refresh_reference(&table).await {
            Ok(_) => {
                report.reference_refreshed = true;
                self.reference = Some(table);
            }
            Err(e) => warn!(error = %e, "Poll worker: Symbol reference refresh failed, keeping previous table"),
        }
        Ok(())
    }
}
