//! Export of the current reading to a MySQL/MariaDB table.
//!
//! [`ExportScheduler`] is the shared half: it holds the export configuration
//! and status, coalesces triggers into a single pending slot and wakes the
//! worker. [`run_export_worker`] is the only place that talks to the
//! database, so attempts are single-flight by construction.
//!
//! # Trigger coalescing
//!
//! Triggers are not queued. A trigger that arrives while an attempt is
//! running waits (bounded) for it to finish, then overwrites whatever
//! trigger is pending. Callers learn the outcome by polling
//! [`ExportScheduler::status`].

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use indicator_core::mysql::{ConnectOptions, MysqlClient, MysqlError};
use indicator_core::{EventDispatcher, SensorEvent};
use indicator_types::{CurrentSnapshot, ExportConfig, ExportStatus, ExportTrigger};

use crate::sql;

/// Blob name of the persisted export configuration.
pub const CONFIG_BLOB: &str = "mariadb-cfg";

/// Why an export attempt failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExportError {
    #[error("Export is disabled")]
    Disabled,

    #[error("Export configuration incomplete: no {0} configured")]
    Incomplete(&'static str),

    #[error("Invalid table name {0:?}")]
    InvalidTable(String),

    /// No reading has arrived yet, so there is nothing to export.
    #[error("Current reading unavailable")]
    SnapshotUnavailable,

    #[error("Connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: MysqlError,
    },

    #[error("{statement} failed: {source}")]
    Query {
        statement: &'static str,
        #[source]
        source: MysqlError,
    },
}

impl ExportError {
    /// Status code recorded in [`ExportStatus::last_status`].
    pub fn code(&self) -> i32 {
        match self {
            ExportError::Disabled | ExportError::Incomplete(_) | ExportError::InvalidTable(_) => {
                -1
            }
            ExportError::SnapshotUnavailable => -2,
            ExportError::Connect { .. } => -3,
            ExportError::Query { .. } => -4,
        }
    }
}

/// Check everything about a configuration that can be checked offline.
///
/// The `enabled` flag only gates scheduled attempts.
pub fn check_config(config: &ExportConfig, trigger: ExportTrigger) -> Result<(), ExportError> {
    if !trigger.bypasses_enabled() && !config.enabled {
        return Err(ExportError::Disabled);
    }
    if config.host.is_empty() {
        return Err(ExportError::Incomplete("host"));
    }
    if config.user.is_empty() {
        return Err(ExportError::Incomplete("user"));
    }
    if config.password.is_empty() {
        return Err(ExportError::Incomplete("password"));
    }
    if !sql::is_valid_table_name(&config.table) {
        return Err(ExportError::InvalidTable(config.table.clone()));
    }
    Ok(())
}

/// One export attempt: connect, ensure the table, insert the snapshot.
///
/// Returns the capture time written with the row. Any failing step aborts
/// the attempt; there is no retry within an attempt.
pub async fn run_attempt(
    config: &ExportConfig,
    trigger: ExportTrigger,
    snapshot: &RwLock<CurrentSnapshot>,
    timeout: Duration,
) -> Result<i64, ExportError> {
    check_config(config, trigger)?;

    let snapshot = {
        let snapshot = snapshot.read().await;
        if snapshot.updated_at.is_none() {
            return Err(ExportError::SnapshotUnavailable);
        }
        snapshot.clone()
    };

    info!(
        "Connecting to {}:{} as {}...",
        config.host, config.port, config.user
    );
    let options = ConnectOptions::new(&config.host, config.port, &config.user, &config.password)
        .database(&config.database)
        .timeout(timeout);
    let mut client = MysqlClient::connect(&options)
        .await
        .map_err(|source| ExportError::Connect {
            host: config.host.clone(),
            port: config.port,
            source,
        })?;

    let result = insert_snapshot(&mut client, &config.table, &snapshot).await;
    client.close().await;
    result
}

async fn insert_snapshot(
    client: &mut MysqlClient,
    table: &str,
    snapshot: &CurrentSnapshot,
) -> Result<i64, ExportError> {
    client
        .query(&sql::create_table(table))
        .await
        .map_err(|source| ExportError::Query {
            statement: "CREATE TABLE",
            source,
        })?;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    client
        .query(&sql::insert_row(table, now, snapshot))
        .await
        .map_err(|source| ExportError::Query {
            statement: "INSERT",
            source,
        })?;
    Ok(now)
}

/// Shared export state and trigger coordination.
#[derive(Debug)]
pub struct ExportScheduler {
    config: watch::Sender<ExportConfig>,
    status: watch::Sender<ExportStatus>,
    running: watch::Sender<bool>,
    pending: Mutex<Option<ExportTrigger>>,
    wake: Notify,
    busy_wait: Duration,
}

impl ExportScheduler {
    pub fn new(config: ExportConfig, busy_wait: Duration) -> Self {
        Self {
            config: watch::Sender::new(config),
            status: watch::Sender::new(ExportStatus::default()),
            running: watch::Sender::new(false),
            pending: Mutex::new(None),
            wake: Notify::new(),
            busy_wait,
        }
    }

    /// Current export configuration.
    pub fn config(&self) -> ExportConfig {
        self.config.borrow().clone()
    }

    pub fn subscribe_config(&self) -> watch::Receiver<ExportConfig> {
        self.config.subscribe()
    }

    /// Replace the configuration. The worker re-arms its timer on change.
    ///
    /// Persisting the configuration is the caller's job.
    pub fn set_config(&self, config: ExportConfig) {
        info!(
            "Export config: enabled={}, host={}, port={}, interval={} min",
            config.enabled, config.host, config.port, config.interval_minutes
        );
        self.config.send_replace(config);
    }

    /// Last status and last successful export time.
    pub fn status(&self) -> ExportStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ExportStatus> {
        self.status.subscribe()
    }

    /// Whether an attempt is executing right now.
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Request an export attempt. Returns once the trigger is recorded.
    pub async fn trigger(&self, trigger: ExportTrigger) {
        if self.is_running() {
            warn!("Export already in progress, waiting...");
            let mut running = self.running.subscribe();
            if tokio::time::timeout(self.busy_wait, running.wait_for(|r| !*r))
                .await
                .is_err()
            {
                warn!(
                    "Export still running after {:?}, overwriting pending trigger",
                    self.busy_wait
                );
            }
        }

        if trigger == ExportTrigger::Test {
            self.status.send_modify(|s| s.last_status = ExportStatus::PENDING);
        }

        let replaced = self.pending.lock().await.replace(trigger);
        if let Some(previous) = replaced
            && previous != trigger
        {
            debug!("{} trigger replaces pending {} trigger", trigger, previous);
        }
        info!("{} export triggered", trigger);
        self.wake.notify_one();
    }

    /// Trigger an immediate export, bypassing the `enabled` flag.
    pub async fn export_now(&self) {
        self.trigger(ExportTrigger::Manual).await;
    }

    /// Trigger a connectivity test. The status reads as pending until the
    /// attempt finishes.
    pub async fn test_connection(&self) {
        self.trigger(ExportTrigger::Test).await;
    }

    /// Wait until the status is no longer pending.
    ///
    /// Returns `None` if it is still pending after `timeout`, which callers
    /// should treat as a hung attempt.
    pub async fn wait_for_test_result(&self, timeout: Duration) -> Option<ExportStatus> {
        let mut status = self.status.subscribe();
        match tokio::time::timeout(timeout, status.wait_for(|s| !s.is_pending())).await {
            Ok(Ok(status)) => Some(*status),
            _ => None,
        }
    }

    async fn take_pending(&self) -> Option<ExportTrigger> {
        self.pending.lock().await.take()
    }

    /// Record a timer tick unless a manual or test trigger is already
    /// pending.
    async fn schedule(&self) {
        let mut pending = self.pending.lock().await;
        if pending.is_none() {
            *pending = Some(ExportTrigger::Scheduled);
        }
        drop(pending);
        self.wake.notify_one();
    }

    fn begin(&self) {
        self.running.send_replace(true);
    }

    /// Publish an attempt's outcome.
    ///
    /// A test trigger that arrived during the attempt keeps the status
    /// pending so its caller does not read this attempt's result.
    async fn finish(&self, result: &Result<i64, ExportError>) {
        let test_waiting = *self.pending.lock().await == Some(ExportTrigger::Test);
        self.status.send_modify(|s| {
            match result {
                Ok(time) => {
                    s.last_status = ExportStatus::OK;
                    s.last_export_time = *time;
                }
                Err(e) => s.last_status = e.code(),
            }
            if test_waiting {
                s.last_status = ExportStatus::PENDING;
            }
        });
        self.running.send_replace(false);
    }
}

fn schedule_timer(config: &ExportConfig) -> Option<Interval> {
    if !config.schedule_active() {
        info!("Export timer stopped");
        return None;
    }
    let period = Duration::from_secs(u64::from(config.interval_minutes) * 60);
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "Export timer started: every {} minutes",
        config.interval_minutes
    );
    Some(timer)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// The export worker.
///
/// Sleeps until woken by a trigger or by the schedule timer, runs every
/// pending attempt, and re-arms the timer whenever the configuration
/// changes. Exits when `shutdown` is cancelled; an attempt in flight is
/// finished first.
pub async fn run_export_worker(
    scheduler: Arc<ExportScheduler>,
    snapshot: Arc<RwLock<CurrentSnapshot>>,
    events: EventDispatcher,
    timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut config_rx = scheduler.subscribe_config();
    let mut timer = schedule_timer(&config_rx.borrow_and_update());
    info!("Export worker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                timer = schedule_timer(&config_rx.borrow_and_update());
                continue;
            }
            _ = next_tick(&mut timer) => {
                debug!("Export timer fired");
                scheduler.schedule().await;
            }
            _ = scheduler.wake.notified() => {}
        }

        while let Some(trigger) = scheduler.take_pending().await {
            let config = scheduler.config();
            scheduler.begin();
            debug!("Export attempt started: {}", trigger);

            let result = run_attempt(&config, trigger, &snapshot, timeout).await;
            match &result {
                Ok(_) => info!("{} export succeeded", trigger),
                Err(ExportError::Disabled) => warn!("Export skipped: disabled"),
                Err(e) => error!("{} export failed ({}): {}", trigger, e.code(), e),
            }

            scheduler.finish(&result).await;
            events.send(SensorEvent::ExportFinished {
                trigger,
                status: scheduler.status().last_status,
            });
        }
    }

    info!("Export worker stopped");
}
