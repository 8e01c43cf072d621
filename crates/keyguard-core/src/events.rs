//! Authentication and wipe notifications
//!
//! Components announce lockouts, unlocks, biometric prompts and wipes on an
//! [`EventBus`] handed to them at construction. UI and navigation layers
//! subscribe and reset themselves; nothing here is process-global.

use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A wrong PIN was entered.
    PinFailed { attempts_remaining: u64 },
    /// PIN entry is refused until `until` (seconds since epoch).
    LockedOut { until: u64 },
    /// The PIN was verified.
    Authenticated,
    /// A biometric prompt is (true) or is no longer (false) on screen.
    BiometricPrompting(bool),
    WipeStarted,
    /// Every secret and on-disk database was erased.
    WalletWiped,
    /// A wipe left some state behind. Provisioning stays blocked.
    WipeIncomplete { failed: Vec<String> },
    /// The wallet database was removed; secrets were kept.
    WalletDatabaseDeleted,
}

/// Broadcast sink for [`AuthEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AuthEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: AuthEvent) {
        log::debug!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(AuthEvent::WalletWiped);
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let clone = bus.clone();

        bus.emit(AuthEvent::WipeStarted);
        clone.emit(AuthEvent::WalletWiped);

        assert_eq!(rx.try_recv().unwrap(), AuthEvent::WipeStarted);
        assert_eq!(rx.try_recv().unwrap(), AuthEvent::WalletWiped);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(8);
        bus.emit(AuthEvent::Authenticated);
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
