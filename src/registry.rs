use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::{ActiveLevel, Direction, EdgeDetect, PinSettings};
use crate::port::{HandleId, LineHandle};

pub type Callback = Arc<dyn Fn(&PinSnapshot) + Send + Sync>;

/// What a callback sees: the descriptor state at the moment of delivery.
#[derive(Debug, Clone, Serialize)]
pub struct PinSnapshot {
    pub pin: u32,
    pub direction: Direction,
    pub edge: EdgeDetect,
    pub active_level: ActiveLevel,
    pub value: u8,
    pub debounce_ms: u64,
}

pub(crate) struct PinDescriptor {
    pub pin: u32,
    pub settings: PinSettings,
    pub handle: Option<LineHandle>,
    pub enabled: bool,
    pub last_event: Option<Instant>,
    pub last_value: u8,
    pub callback: Option<Callback>,
}

impl PinDescriptor {
    pub(crate) fn new(pin: u32, settings: PinSettings, handle: LineHandle) -> Self {
        Self {
            pin,
            settings,
            handle: Some(handle),
            enabled: true,
            last_event: None,
            last_value: 0,
            callback: None,
        }
    }

    pub(crate) fn snapshot(&self) -> PinSnapshot {
        PinSnapshot {
            pin: self.pin,
            direction: self.settings.direction,
            edge: self.settings.edge,
            active_level: self.settings.active_level,
            value: self.last_value,
            debounce_ms: self.settings.debounce_ms,
        }
    }

    // output pins may be registered but are never part of the watch set
    fn watchable(&self) -> bool {
        self.settings.edge != EdgeDetect::None
            && self.settings.direction == Direction::Input
            && self.handle.is_some()
    }
}

/// Owns every registered descriptor plus the handle-to-pin reverse index
/// used for dispatch. Both live under one lock so the event-loop thread
/// never observes a partially erased entry.
#[derive(Default)]
pub struct PinRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    pins: FxHashMap<u32, PinDescriptor>,
    watch: FxHashMap<HandleId, u32>,
}

impl PinRegistry {
    pub(crate) fn insert(&self, descriptor: PinDescriptor) -> Result<(), PinDescriptor> {
        let mut inner = self.inner.lock();
        if inner.pins.contains_key(&descriptor.pin) {
            return Err(descriptor);
        }
        if descriptor.watchable()
            && let Some(handle) = descriptor.handle.as_ref()
        {
            inner.watch.insert(handle.id(), descriptor.pin);
        }
        inner.pins.insert(descriptor.pin, descriptor);
        Ok(())
    }

    pub(crate) fn remove(&self, pin: u32) -> Option<(PinDescriptor, usize)> {
        let mut inner = self.inner.lock();
        let descriptor = inner.pins.remove(&pin)?;
        if let Some(handle) = descriptor.handle.as_ref() {
            inner.watch.remove(&handle.id());
        }
        let remaining = inner.pins.len();
        Some((descriptor, remaining))
    }

    pub fn contains(&self, pin: u32) -> bool {
        self.inner.lock().pins.contains_key(&pin)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pins.is_empty()
    }

    pub fn pin_of_handle(&self, handle: HandleId) -> Option<u32> {
        self.inner.lock().watch.get(&handle).copied()
    }

    pub(crate) fn watched_handles(&self) -> Vec<HandleId> {
        self.inner.lock().watch.keys().copied().collect()
    }

    pub(crate) fn pins(&self) -> Vec<u32> {
        self.inner.lock().pins.keys().copied().collect()
    }

    pub(crate) fn with_descriptor<R>(
        &self,
        pin: u32,
        f: impl FnOnce(&mut PinDescriptor) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.pins.get_mut(&pin).map(f)
    }

    /// Mutate a pin's settings and resync its watch-index membership.
    pub(crate) fn update_settings(&self, pin: u32, f: impl FnOnce(&mut PinSettings)) -> bool {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let Some(descriptor) = inner.pins.get_mut(&pin) else {
            return false;
        };
        f(&mut descriptor.settings);
        if let Some(handle) = descriptor.handle.as_ref() {
            let id = handle.id();
            if descriptor.watchable() {
                inner.watch.insert(id, pin);
            } else {
                inner.watch.remove(&id);
            }
        }
        true
    }

    pub(crate) fn set_callback(&self, pin: u32, callback: Callback) -> bool {
        let mut inner = self.inner.lock();
        match inner.pins.get_mut(&pin) {
            Some(descriptor) => {
                descriptor.callback = Some(callback);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, pin: u32) -> Option<PinSnapshot> {
        self.inner.lock().pins.get(&pin).map(|d| d.snapshot())
    }

    pub fn settings(&self, pin: u32) -> Option<PinSettings> {
        self.inner.lock().pins.get(&pin).map(|d| d.settings)
    }

    pub(crate) fn drain(&self) -> Vec<PinDescriptor> {
        let mut inner = self.inner.lock();
        inner.watch.clear();
        inner.pins.drain().map(|(_, descriptor)| descriptor).collect()
    }
}
