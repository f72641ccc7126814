//! Heartbeat scheduling and round-trip measurement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::protocol::Envelope;
use super::GatewayError;
use crate::session::SessionHandle;
use crate::websocket::WebSocketSender;

/// Round trips at or above this are logged as a warning.
pub const LATENCY_WARNING: Duration = Duration::from_secs(10);

/// Clock used by the scheduler; swapped out in tests.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
    fn now(&self) -> Instant;
}

/// Wall-clock timer backed by the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Time since the last heartbeat was sent, stopped by its acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatTimer {
    pub sent_at: Option<Instant>,
    pub last_round_trip: Option<Duration>,
}

impl HeartbeatTimer {
    pub fn start(&mut self, at: Instant) {
        self.sent_at = Some(at);
    }

    /// Round trip of the in-flight heartbeat; `None` if nothing was in flight.
    pub fn stop(&mut self, at: Instant) -> Option<Duration> {
        let sent_at = self.sent_at.take()?;
        let round_trip = at.saturating_duration_since(sent_at);
        self.last_round_trip = Some(round_trip);
        Some(round_trip)
    }
}

/// Send one heartbeat carrying `sequence` and start the round-trip timer.
pub async fn send_heartbeat<S>(
    sender: &WebSocketSender<S>,
    session: &SessionHandle,
    timer: &dyn Timer,
    sequence: Option<u64>,
) -> Result<(), GatewayError>
where
    S: AsyncWrite,
{
    let payload = Envelope::heartbeat(sequence).to_json()?;
    sender.send_message(&payload).await?;
    session.mark_heartbeat_sent(timer.now()).await;
    log::debug!("gateway: heartbeat sent (seq {:?})", sequence);
    Ok(())
}

/// Spawn the periodic heartbeat loop: sleep `interval`, send the last-seen
/// sequence, repeat. Stops when `shutdown` flips or the socket write fails.
pub fn spawn_scheduler<S>(
    sender: WebSocketSender<S>,
    session: SessionHandle,
    timer: Arc<dyn Timer>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: AsyncWrite + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = timer.sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            let sequence = session.last_sequence().await;
            if let Err(e) = send_heartbeat(&sender, &session, timer.as_ref(), sequence).await {
                log::warn!("gateway: heartbeat failed, stopping scheduler: {}", e);
                break;
            }
        }
        log::debug!("gateway: heartbeat scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_measures_round_trip_once() {
        let mut timer = HeartbeatTimer::default();
        let start = Instant::now();
        assert_eq!(timer.stop(start), None);

        timer.start(start);
        assert_eq!(timer.stop(start + Duration::from_secs(11)), Some(Duration::from_secs(11)));
        assert_eq!(timer.sent_at, None);
        assert_eq!(timer.last_round_trip, Some(Duration::from_secs(11)));
        assert!(timer.last_round_trip.unwrap() >= LATENCY_WARNING);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_sleeps_on_runtime_clock() {
        let timer = TokioTimer;
        let before = timer.now();
        timer.sleep(Duration::from_millis(41_250)).await;
        assert!(timer.now() - before >= Duration::from_millis(41_250));
    }
}
