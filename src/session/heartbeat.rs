//! Keep-alive pings sent while a session is open.

use super::protocol::ServerMessage;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Background task that pings the client on a fixed interval.
///
/// [`Heartbeat::stop`] cancels the task and waits for it, so no ping can be written after it
/// returns.
pub struct Heartbeat {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Start pinging through `outbound` every `interval`. The first ping is sent after one
    /// interval.
    pub fn spawn(outbound: Sender<ServerMessage>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(beat(outbound, interval, cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel the task and wait for it to exit. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(error) = handle.await {
                tracing::warn!(error = %error, "Heartbeat task ended abnormally");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn beat(outbound: Sender<ServerMessage>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = outbound.send(ServerMessage::ping()) => {
                if sent.is_err() {
                    tracing::debug!("Outbound channel closed; stopping heartbeat");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn pings_until_stopped() {
        let (sender, mut receiver) = mpsc::channel(16);
        let mut heartbeat = Heartbeat::spawn(sender, Duration::from_millis(20));

        let first = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("ping within deadline");
        assert_eq!(first, Some(ServerMessage::ping()));

        heartbeat.stop().await;
        while receiver.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (sender, _receiver) = mpsc::channel(1);
        let mut heartbeat = Heartbeat::spawn(sender, Duration::from_secs(60));
        heartbeat.stop().await;
        heartbeat.stop().await;
    }
}
