//! The one-line, non-blocking status shown under the location field.

use chrono::{DateTime, Utc};

use crate::acquisition::{AcquisitionController, AcquisitionState};

/// `"Status: <state> · accuracy <N>m · updated <HH:MM:SS>"`, leaving out
/// whatever is not known yet
pub fn status_line(
    state: AcquisitionState,
    accuracy_meters: Option<f64>,
    last_update: Option<DateTime<Utc>>,
) -> String {
    let mut parts = vec![format!("Status: {state}")];

    if let Some(accuracy) = accuracy_meters.filter(|a| a.is_finite()) {
        parts.push(format!("accuracy {}m", accuracy.round() as i64));
    }
    if let Some(updated) = last_update {
        parts.push(format!("updated {}", updated.format("%H:%M:%S")));
    }

    parts.join(" · ")
}

/// Status line for whatever the controller is currently showing
pub fn controller_status(controller: &AcquisitionController, now_ms: i64) -> String {
    let current = controller.current_fix();
    status_line(
        controller.display_state(now_ms),
        current.and_then(|c| c.accuracy_meters),
        current.and_then(|c| DateTime::from_timestamp_millis(c.timestamp_ms)),
    )
}
