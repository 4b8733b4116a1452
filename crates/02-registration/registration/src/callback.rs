//! Observer slots for applied registration samples.
//!
//! Each slot is an [`ArcSwapOption`], so installing or removing a callback
//! never blocks the ingestion threads that dispatch through it.

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::sample::RegistrationSample;

/// Category a registration callback is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistrationEvent {
    Publisher,
    Subscriber,
    Service,
    Client,
    Process,
}

impl RegistrationEvent {
    pub const ALL: [RegistrationEvent; 5] = [
        RegistrationEvent::Publisher,
        RegistrationEvent::Subscriber,
        RegistrationEvent::Service,
        RegistrationEvent::Client,
        RegistrationEvent::Process,
    ];

    const fn index(self) -> usize {
        match self {
            RegistrationEvent::Publisher => 0,
            RegistrationEvent::Subscriber => 1,
            RegistrationEvent::Service => 2,
            RegistrationEvent::Client => 3,
            RegistrationEvent::Process => 4,
        }
    }
}

/// Receives the encoded, normalized sample.
pub type RegistrationCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Receives every normalized sample before it is routed.
pub type ApplySampleCallback = Box<dyn Fn(&RegistrationSample) + Send + Sync>;

struct Registered(RegistrationCallback);

struct Custom(ApplySampleCallback);

impl Custom {
    fn noop() -> Self {
        Custom(Box::new(|_| {}))
    }
}

pub(crate) struct CallbackSlots {
    slots: [ArcSwapOption<Registered>; 5],
    custom: ArcSwap<Custom>,
}

impl CallbackSlots {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| ArcSwapOption::empty()),
            custom: ArcSwap::from_pointee(Custom::noop()),
        }
    }

    /// Installs `callback`, replacing whatever the slot held.
    pub(crate) fn set(&self, event: RegistrationEvent, callback: RegistrationCallback) {
        self.slots[event.index()].store(Some(Arc::new(Registered(callback))));
    }

    pub(crate) fn clear(&self, event: RegistrationEvent) {
        self.slots[event.index()].store(None);
    }

    pub(crate) fn clear_all(&self) {
        for slot in &self.slots {
            slot.store(None);
        }
    }

    pub(crate) fn is_set(&self, event: RegistrationEvent) -> bool {
        self.slots[event.index()].load().is_some()
    }

    /// True when at least one category has a callback.
    pub(crate) fn any(&self) -> bool {
        self.slots.iter().any(|slot| slot.load().is_some())
    }

    pub(crate) fn notify(&self, event: RegistrationEvent, encoded: &[u8]) {
        if let Some(callback) = self.slots[event.index()].load_full() {
            (callback.0)(encoded);
        }
    }

    pub(crate) fn set_custom(&self, callback: ApplySampleCallback) {
        self.custom.store(Arc::new(Custom(callback)));
    }

    pub(crate) fn reset_custom(&self) {
        self.custom.store(Arc::new(Custom::noop()));
    }

    pub(crate) fn observe(&self, sample: &RegistrationSample) {
        (self.custom.load_full().0)(sample);
    }
}
