//! Alert fan-out: the pipeline publishes into a broadcast channel, the
//! daemon forwards each alert as a D-Bus signal.

use gatehouse_core::{Alert, Notifier};
use tokio::sync::broadcast;

const ALERT_CAPACITY: usize = 64;

/// Non-blocking publisher. Alerts with no live subscriber are dropped.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Alert>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(ALERT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, alert: &Alert) {
        if self.tx.send(alert.clone()).is_err() {
            tracing::debug!("no alert subscribers");
        }
    }
}

/// Forward alerts to D-Bus until the channel closes.
pub async fn forward_to_dbus(mut rx: broadcast::Receiver<Alert>, emitter: zbus::object_server::SignalEmitter<'static>) {
    loop {
        match rx.recv().await {
            Ok(alert) => {
                let at = alert.at.format("%Y-%m-%d %H:%M:%S").to_string();
                if let Err(e) =
                    crate::dbus_interface::AttendanceService::unrecognized_alert(&emitter, &alert.message, &at)
                        .await
                {
                    tracing::warn!(error = %e, "failed to emit UnrecognizedAlert signal");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "alert forwarder lagging; alerts dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
