//! Link ingestion: read frames from the sensor board and dispatch them.
//!
//! The board is reached either through a serial port or a TCP bridge. Each session powers the board on, sets
//! the collection interval if configured, then reads until the link fails
//! or the service shuts down. Failed sessions are retried with exponential
//! backoff.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use indicator_core::{Command, Dispatch, FrameCodec};

use crate::config::TransportConfig;
use crate::state::AppState;

/// Byte stream to the sensor board.
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Link for T {}

/// Delays between reconnection attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Delay before reconnection attempt `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

/// Per-session frame counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub ignored: u64,
    pub dropped: u64,
}

impl IngestStats {
    fn record(&mut self, outcome: &Dispatch) {
        match outcome {
            Dispatch::Accepted(_) => self.accepted += 1,
            Dispatch::Ignored(_) => self.ignored += 1,
            Dispatch::Dropped(_) => self.dropped += 1,
        }
    }
}

/// Why a session ended.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("No transport configured")]
    NoTransport,
    #[error("Failed to open {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Link closed by peer")]
    Closed,
    #[error(transparent)]
    Link(#[from] indicator_core::Error),
}

/// Open the configured transport.
pub async fn open_transport(config: &TransportConfig) -> Result<Box<dyn Link>, IngestError> {
    if let Some(path) = &config.device {
        let port = tokio_serial::new(path.to_string_lossy(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| IngestError::Open {
                target: path.display().to_string(),
                source: e.into(),
            })?;
        info!("Opened sensor link {} at {} baud", path.display(), config.baud_rate);
        return Ok(Box::new(port));
    }

    if let Some(addr) = &config.tcp {
        let stream = TcpStream::connect(addr.as_str())
            .await
            .map_err(|source| IngestError::Open {
                target: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| IngestError::Open {
            target: addr.clone(),
            source,
        })?;
        info!("Connected to sensor bridge {}", addr);
        return Ok(Box::new(stream));
    }

    Err(IngestError::NoTransport)
}

/// Run one session over an open link.
///
/// Returns `Ok` with the session's counters when the service shuts down,
/// and an error when the link fails.
pub async fn run_session<L: Link>(state: &AppState, link: L) -> Result<IngestStats, IngestError> {
    let transport = &state.config.transport;
    let dispatcher = state.dispatcher();
    let mut framed = Framed::new(link, FrameCodec::new());
    let mut stats = IngestStats::default();

    framed.send(Command::PowerOn.to_payload()).await?;
    if let Some(interval) = transport.collect_interval_ms {
        framed
            .send(Command::CollectInterval(interval).to_payload())
            .await?;
        debug!("Collection interval set to {} ms", interval);
    }

    let read_timeout = transport.read_timeout();
    loop {
        tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => break,
            next = tokio::time::timeout(read_timeout, framed.next()) => match next {
                Err(_) => trace!("No frame within {:?}", read_timeout),
                Ok(Some(Ok(frame))) => {
                    let outcome = dispatcher.handle_frame(&frame).await;
                    stats.record(&outcome);
                }
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => return Err(IngestError::Closed),
            },
        }
    }

    stats.dropped += framed.codec().dropped();
    if let Err(e) = framed.send(Command::Shutdown.to_payload()).await {
        debug!("Failed to send shutdown command: {}", e);
    }
    Ok(stats)
}

/// The ingest worker. Reconnects until the service shuts down.
pub async fn run_ingest(state: Arc<AppState>) {
    let backoff = Backoff::default();
    let mut attempt = 0u32;

    loop {
        match open_transport(&state.config.transport).await {
            Ok(link) => {
                attempt = 0;
                match run_session(&state, link).await {
                    Ok(stats) => {
                        info!(
                            "Sensor link closed: {} accepted, {} ignored, {} dropped",
                            stats.accepted, stats.ignored, stats.dropped
                        );
                        break;
                    }
                    Err(e) => warn!("Sensor link failed: {}", e),
                }
            }
            Err(IngestError::NoTransport) => {
                info!("No sensor transport configured, ingest disabled");
                return;
            }
            Err(e) => warn!("{}", e),
        }

        let delay = backoff.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        info!("Reconnecting to sensor link in {:?} (attempt {})", delay, attempt);
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!("Ingest stopped");
}
