//! Alert observer: decouples recognition decisions from the push transport.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const UNRECOGNIZED_MESSAGE: &str = "Unrecognized face detected!";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub at: NaiveDateTime,
    /// Distance to the closest catalog entry, absent when the catalog is empty.
    pub distance: Option<f32>,
}

impl Alert {
    pub fn unrecognized(at: NaiveDateTime, distance: Option<f32>) -> Self {
        Self {
            message: UNRECOGNIZED_MESSAGE.to_string(),
            at,
            distance,
        }
    }
}

/// Fire-and-forget sink for alerts. Implementations must not block or fail the caller.
pub trait Notifier {
    fn notify(&self, alert: &Alert);
}

impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, alert: &Alert) {
        (**self).notify(alert)
    }
}
