//! Single-writer emergency-stop state machine. Exactly one lock; the
//! on-transition callback fires under it and must not block — slow work
//! (hub broadcast, store write, test-run abort) is scheduled by the
//! callback itself via `tokio::spawn`, not awaited in place.

use std::sync::Arc;
use stationbus_proto::{EmergencyStopCause, EmergencyStopReason};
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::{now_secs, EstopState};

/// Invoked once per `active` transition (trigger or re-trigger), with
/// the new state. Never invoked on `acknowledge()`.
pub type EstopCallback = Arc<dyn Fn(EstopState) + Send + Sync>;

pub struct EstopCoordinator {
    state: RwLock<EstopState>,
    on_trigger: RwLock<Option<EstopCallback>>,
}

impl Default for EstopCoordinator {
    fn default() -> Self {
        Self {
            state: RwLock::new(EstopState::cleared()),
            on_trigger: RwLock::new(None),
        }
    }
}

impl EstopCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_callback(&self, cb: EstopCallback) {
        *self.on_trigger.write().await = Some(cb);
    }

    pub async fn state(&self) -> EstopState {
        self.state.read().await.clone()
    }

    /// Trigger (or re-trigger) the stop. Re-triggering while active
    /// replaces reason/description/initiator and refreshes the timestamp.
    pub async fn trigger(&self, reason: &str, description: &str, initiator: &str) -> EstopState {
        let new_state = {
            let mut state = self.state.write().await;
            state.active = true;
            state.reason = reason.to_string();
            state.description = description.to_string();
            state.initiator = initiator.to_string();
            state.triggered_at = now_secs();
            state.clone()
        };

        // Callback failure must never prevent the transition above; it
        // has already committed by the time we get here.
        if let Some(cb) = self.on_trigger.read().await.as_ref() {
            let cb = cb.clone();
            let state_for_cb = new_state.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(state_for_cb)));
            if result.is_err() {
                warn!("e-stop callback panicked; state transition already committed");
            }
        }

        new_state
    }

    /// Clear the stop. No callback is fired.
    pub async fn acknowledge(&self) -> EstopState {
        let mut state = self.state.write().await;
        *state = EstopState::cleared();
        state.clone()
    }

    /// Parse an emergency-stop payload and delegate to `trigger`.
    pub async fn handle_message(&self, payload: &EmergencyStopReason) -> EstopState {
        let reason = reason_str(payload.reason);
        self.trigger(
            reason,
            payload.description.as_deref().unwrap_or(""),
            payload.initiator.as_deref().unwrap_or(""),
        )
        .await
    }
}

fn reason_str(reason: EmergencyStopCause) -> &'static str {
    match reason {
        EmergencyStopCause::ButtonPress => "button_press",
        EmergencyStopCause::OperatorCommand => "operator_command",
        EmergencyStopCause::SafetyInterlock => "safety_interlock",
        EmergencyStopCause::DeviceFault => "device_fault",
        EmergencyStopCause::SoftwareError => "software_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn initial_state_is_inactive() {
        let coordinator = EstopCoordinator::new();
        assert!(!coordinator.state().await.active);
    }

    #[tokio::test]
    async fn trigger_activates_and_fires_callback_once() {
        let coordinator = EstopCoordinator::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        coordinator
            .set_callback(Arc::new(move |_state| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        let state = coordinator.trigger("button_press", "desc", "op-1").await;
        assert!(state.active);
        assert_eq!(state.reason, "button_press");
        assert!(state.triggered_at > 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn acknowledge_clears_and_retrigger_bumps_timestamp() {
        let coordinator = EstopCoordinator::new();
        let first = coordinator.trigger("button_press", "", "op-1").await;

        let cleared = coordinator.acknowledge().await;
        assert!(!cleared.active);
        assert_eq!(cleared.reason, "");
        assert_eq!(cleared.triggered_at, 0);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let second = coordinator.trigger("operator_command", "", "op-2").await;
        assert!(second.triggered_at >= first.triggered_at);
        assert!(second.active);
    }
}
