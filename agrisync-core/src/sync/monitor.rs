//! Liveness pings and reconnect backoff.
//!
//! The monitor owns the connection state machine:
//!
//! ```text
//! Connected --failure--> Reconnecting{1} --failure--> Reconnecting{2} ...
//!     ^                        |
//!     +--------success---------+
//! ```
//!
//! `Disconnected` is only entered by [`ConnectionMonitor::stop`] or, when a
//! cutoff is configured, after `max_reconnect_attempts` consecutive failures.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::backoff::Backoff;
use super::settings::SyncSettings;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// `attempt` counts consecutive failures, starting at 1
    Reconnecting {
        attempt: u32,
    },
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {})", attempt)
            }
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Monitor timing taken from [`SyncSettings`].
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub ping_interval: Duration,
    pub backoff: Backoff,
    pub max_attempts: Option<u32>,
}

impl From<&SyncSettings> for MonitorSettings {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval,
            backoff: settings.monitor_backoff(),
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Cloneable handle feeds use to report a dropped channel.
#[derive(Debug, Clone)]
pub struct LostSignal {
    tx: mpsc::Sender<String>,
}

impl LostSignal {
    /// Reports that a channel went away. Never blocks; repeated reports
    /// while one is pending collapse into it.
    pub fn report(&self, reason: impl Into<String>) {
        let _ = self.tx.try_send(reason.into());
    }

    /// A signal wired to nothing, for feeds running without a monitor.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Background task pinging the backend and driving reconnect backoff.
///
/// State transitions are published on a `watch` channel; live views subscribe
/// to it to resubscribe and refetch once the connection comes back.
pub struct ConnectionMonitor {
    state_rx: watch::Receiver<ConnectionState>,
    lost: LostSignal,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ConnectionMonitor {
    /// Starts pinging immediately, then every `ping_interval` while healthy.
    pub fn start<F, Fut>(ping: F, settings: MonitorSettings) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (lost_tx, lost_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(run(ping, settings, state_tx, lost_rx, stop_rx));

        Self {
            state_rx,
            lost: LostSignal { tx: lost_tx },
            stop_tx: Some(stop_tx),
            task,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver of state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Handle for feeds to report lost channels.
    pub fn lost_signal(&self) -> LostSignal {
        self.lost.clone()
    }

    /// Stops pinging and cancels any scheduled retry; the state becomes
    /// `Disconnected`.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<F, Fut>(
    ping: F,
    settings: MonitorSettings,
    state_tx: watch::Sender<ConnectionState>,
    mut lost_rx: mpsc::Receiver<String>,
    mut stop_rx: oneshot::Receiver<()>,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
{
    let mut backoff = settings.backoff.clone();
    backoff.reset();
    let mut wait = Duration::ZERO;

    loop {
        let failure = tokio::select! {
            _ = &mut stop_rx => break,
            Some(reason) = lost_rx.recv() => Some(SyncError::ChannelDropped(reason)),
            _ = sleep(wait) => {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    result = ping() => result.err(),
                }
            }
        };

        match failure {
            None => {
                if backoff.attempt() > 0 {
                    tracing::info!(attempts = backoff.attempt(), "Connection restored");
                }
                backoff.reset();
                publish(&state_tx, ConnectionState::Connected);
                wait = settings.ping_interval;
            }
            Some(err) => {
                if let Some(max) = settings.max_attempts {
                    if backoff.attempt() >= max {
                        tracing::error!(
                            attempts = backoff.attempt(),
                            "Giving up on reconnect: {}",
                            err
                        );
                        break;
                    }
                }

                let delay = backoff.next_delay();
                tracing::warn!(
                    attempt = backoff.attempt(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Connection check failed: {}",
                    err
                );
                publish(
                    &state_tx,
                    ConnectionState::Reconnecting {
                        attempt: backoff.attempt(),
                    },
                );
                wait = delay;
            }
        }
    }

    publish(&state_tx, ConnectionState::Disconnected);
}

/// Publishes `state` only if it differs, so receivers wake on transitions.
fn publish(state_tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    state_tx.send_if_modified(|current| {
        if *current == state {
            false
        } else {
            *current = state;
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn settings(base: u64, cap: u64, max_attempts: Option<u32>) -> MonitorSettings {
        MonitorSettings {
            ping_interval: Duration::from_secs(30),
            backoff: Backoff::new(Duration::from_secs(base), Duration::from_secs(cap)),
            max_attempts,
        }
    }

    /// Ping that fails `failures` times, then succeeds, recording call times.
    fn flaky_ping(
        failures: u32,
    ) -> (
        impl Fn() -> futures::future::Ready<Result<(), SyncError>> + Send + 'static,
        Arc<Mutex<Vec<Instant>>>,
    ) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicU32::new(0));
        let recorded = calls.clone();
        let ping = move || {
            recorded.lock().unwrap().push(Instant::now());
            let n = count.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                futures::future::ready(Err(SyncError::Http("unreachable".to_string())))
            } else {
                futures::future::ready(Ok(()))
            }
        };
        (ping, calls)
    }

    fn gaps(calls: &[Instant]) -> Vec<Duration> {
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_back_off_then_reset() {
        let (ping, calls) = flaky_ping(3);
        let monitor = ConnectionMonitor::start(ping, settings(1, 10, None));
        let mut rx = monitor.subscribe();

        rx.wait_for(|s| *s == ConnectionState::Reconnecting { attempt: 3 })
            .await
            .unwrap();
        rx.wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            gaps(&calls),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(monitor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_on_interval_while_healthy() {
        let (ping, calls) = flaky_ping(0);
        let monitor = ConnectionMonitor::start(ping, settings(1, 10, None));

        tokio::time::sleep(Duration::from_secs(95)).await;

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 4);
        assert!(gaps(&calls).iter().all(|g| *g == Duration::from_secs(30)));
        assert!(monitor.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_signal_triggers_reconnect() {
        let (ping, calls) = flaky_ping(0);
        let monitor = ConnectionMonitor::start(ping, settings(2, 10, None));
        let mut rx = monitor.subscribe();

        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.lost_signal().report("socket closed");

        rx.wait_for(|s| *s == ConnectionState::Reconnecting { attempt: 1 })
            .await
            .unwrap();
        rx.wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let calls = calls.lock().unwrap().clone();
        // Initial ping, then the retry two seconds after the drop
        assert_eq!(calls.len(), 2);
        assert_eq!(gaps(&calls), vec![Duration::from_secs(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_forever_without_cutoff() {
        let (ping, calls) = flaky_ping(u32::MAX);
        let monitor = ConnectionMonitor::start(ping, settings(1, 4, None));
        let mut rx = monitor.subscribe();

        rx.wait_for(|s| *s == ConnectionState::Reconnecting { attempt: 20 })
            .await
            .unwrap();

        assert_eq!(calls.lock().unwrap().len(), 20);
        let calls = calls.lock().unwrap().clone();
        assert!(gaps(&calls).iter().all(|g| *g <= Duration::from_secs(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cutoff_disconnects() {
        let (ping, calls) = flaky_ping(u32::MAX);
        let monitor = ConnectionMonitor::start(ping, settings(1, 10, Some(2)));
        let mut rx = monitor.subscribe();

        rx.wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();

        // Two scheduled retries, then the third failure ends it
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disconnects_and_cancels_retry() {
        let (ping, calls) = flaky_ping(u32::MAX);
        let monitor = ConnectionMonitor::start(ping, settings(5, 60, None));
        let rx = monitor.subscribe();

        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.stop().await;

        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.lock().unwrap().len(), 1);
    }
}
