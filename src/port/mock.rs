use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::{ActiveLevel, Direction, EdgeDetect};
use crate::error::Error;
use crate::port::{HandleId, LineHandle, LinePort};

/// In-memory stand-in for the kernel interface. Tests drive it by moving
/// line levels with `set_line_value` and marking handles ready with
/// `inject_edge` or `pulse`.
#[derive(Default)]
pub struct MockLinePort {
    inner: Mutex<MockInner>,
    readiness: Condvar,
}

#[derive(Default)]
struct MockInner {
    pins: FxHashMap<u32, MockPin>,
    handles: FxHashMap<HandleId, u32>,
    ready: Vec<HandleId>,
    woken: bool,
    next_handle: HandleId,
    busy: FxHashSet<u32>,
    fail_configure: FxHashSet<u32>,
}

struct MockPin {
    exported: bool,
    direction: Direction,
    edge: EdgeDetect,
    active_level: ActiveLevel,
    value: u8,
    handle: Option<HandleId>,
}

impl Default for MockPin {
    fn default() -> Self {
        Self {
            exported: false,
            direction: Direction::Input,
            edge: EdgeDetect::None,
            active_level: ActiveLevel::High,
            value: 0,
            handle: None,
        }
    }
}

impl MockLinePort {
    /// Make every configuration write for the pin fail, for rollback tests.
    pub fn fail_configure_on(&self, pin: u32) {
        self.inner.lock().fail_configure.insert(pin);
    }

    /// Pretend a prior owner already exported the pin, so the next export
    /// hits the busy path.
    pub fn simulate_busy(&self, pin: u32) {
        let mut inner = self.inner.lock();
        inner.busy.insert(pin);
        inner.pins.entry(pin).or_default().exported = true;
    }

    pub fn exported(&self, pin: u32) -> bool {
        self.inner
            .lock()
            .pins
            .get(&pin)
            .is_some_and(|p| p.exported)
    }

    pub fn open_handle_count(&self) -> usize {
        self.inner.lock().handles.len()
    }

    pub fn edge_of(&self, pin: u32) -> Option<EdgeDetect> {
        self.inner.lock().pins.get(&pin).map(|p| p.edge)
    }

    pub fn direction_of(&self, pin: u32) -> Option<Direction> {
        self.inner.lock().pins.get(&pin).map(|p| p.direction)
    }

    pub fn active_level_of(&self, pin: u32) -> Option<ActiveLevel> {
        self.inner.lock().pins.get(&pin).map(|p| p.active_level)
    }

    pub fn set_line_value(&self, pin: u32, value: u8) {
        let mut inner = self.inner.lock();
        inner.pins.entry(pin).or_default().value = value;
    }

    /// Mark the pin's open handle ready without changing the line level.
    pub fn inject_edge(&self, pin: u32) {
        let mut inner = self.inner.lock();
        let Some(handle) = inner.pins.get(&pin).and_then(|p| p.handle) else {
            debug!("inject_edge: pin {pin} has no open handle");
            return;
        };
        inner.ready.push(handle);
        self.readiness.notify_all();
    }

    /// Move the line level and raise a readiness event, like a real edge.
    pub fn pulse(&self, pin: u32, value: u8) {
        let mut inner = self.inner.lock();
        let Some(p) = inner.pins.get_mut(&pin) else {
            debug!("pulse: pin {pin} is not exported");
            return;
        };
        p.value = value;
        let Some(handle) = p.handle else {
            debug!("pulse: pin {pin} has no open handle");
            return;
        };
        inner.ready.push(handle);
        self.readiness.notify_all();
    }

    fn exported_pin_mut<'a>(
        inner: &'a mut MockInner,
        pin: u32,
    ) -> Result<&'a mut MockPin, Error> {
        if inner.fail_configure.contains(&pin) {
            return Err(Error::Resource(format!("pin {pin}: injected failure")));
        }
        inner
            .pins
            .get_mut(&pin)
            .filter(|p| p.exported)
            .ok_or_else(|| Error::Resource(format!("pin {pin} is not exported")))
    }
}

impl LinePort for MockLinePort {
    fn export(&self, pin: u32) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.busy.contains(&pin) {
            debug!("pin {pin} has been exported, assuming control");
        }
        inner.pins.entry(pin).or_default().exported = true;
        Ok(())
    }

    fn unexport(&self, pin: u32) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        match inner.pins.get_mut(&pin) {
            Some(p) if p.exported => {
                p.exported = false;
                p.handle = None;
                Ok(())
            }
            _ => Err(Error::Resource(format!("pin {pin} is not exported"))),
        }
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        Self::exported_pin_mut(&mut inner, pin)?.direction = direction;
        Ok(())
    }

    fn set_edge(&self, pin: u32, edge: EdgeDetect) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        Self::exported_pin_mut(&mut inner, pin)?.edge = edge;
        Ok(())
    }

    fn set_active_level(&self, pin: u32, level: ActiveLevel) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        Self::exported_pin_mut(&mut inner, pin)?.active_level = level;
        Ok(())
    }

    fn open(&self, pin: u32) -> Result<LineHandle, Error> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.next_handle += 1;
        let id = inner.next_handle;
        let p = inner
            .pins
            .get_mut(&pin)
            .filter(|p| p.exported)
            .ok_or_else(|| Error::Resource(format!("pin {pin} is not exported")))?;
        p.handle = Some(id);
        inner.handles.insert(id, pin);
        Ok(LineHandle::synthetic(id))
    }

    fn read(&self, handle: &LineHandle) -> Result<u8, Error> {
        let inner = self.inner.lock();
        let pin = inner
            .handles
            .get(&handle.id())
            .copied()
            .ok_or_else(|| Error::Io(format!("unknown handle {}", handle.id())))?;
        inner
            .pins
            .get(&pin)
            .map(|p| p.value)
            .ok_or_else(|| Error::Io(format!("pin {pin} vanished behind handle")))
    }

    fn write(&self, handle: &LineHandle, value: bool) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let pin = inner
            .handles
            .get(&handle.id())
            .copied()
            .ok_or_else(|| Error::Io(format!("unknown handle {}", handle.id())))?;
        if let Some(p) = inner.pins.get_mut(&pin) {
            p.value = value as u8;
        }
        Ok(())
    }

    fn wait(
        &self,
        handles: &[HandleId],
        timeout: Option<Duration>,
    ) -> Result<Vec<HandleId>, Error> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut inner = self.inner.lock();
        loop {
            if inner.woken {
                inner.woken = false;
                return Ok(Vec::new());
            }
            let mut ready = Vec::new();
            inner.ready.retain(|h| {
                if handles.contains(h) {
                    ready.push(*h);
                    false
                } else {
                    true
                }
            });
            if !ready.is_empty() {
                return Ok(ready);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(Vec::new());
                    }
                    let _ = self.readiness.wait_until(&mut inner, deadline);
                }
                None => self.readiness.wait(&mut inner),
            }
        }
    }

    fn wake(&self) {
        let mut inner = self.inner.lock();
        inner.woken = true;
        self.readiness.notify_all();
    }

    fn close(&self, handle: LineHandle) {
        let mut inner = self.inner.lock();
        let id = handle.id();
        if let Some(pin) = inner.handles.remove(&id) {
            if let Some(p) = inner.pins.get_mut(&pin) {
                p.handle = None;
            }
        }
        inner.ready.retain(|h| *h != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_export_is_treated_as_success() {
        let port = MockLinePort::default();
        port.simulate_busy(12);
        assert!(port.export(12).is_ok());
        assert!(port.exported(12));
    }

    #[test]
    fn configure_requires_export() {
        let port = MockLinePort::default();
        assert!(matches!(
            port.set_edge(3, EdgeDetect::Rising),
            Err(Error::Resource(_))
        ));
        port.export(3).unwrap();
        port.set_edge(3, EdgeDetect::Rising).unwrap();
        assert_eq!(port.edge_of(3), Some(EdgeDetect::Rising));
    }

    #[test]
    fn wait_returns_injected_handles() {
        let port = MockLinePort::default();
        port.export(9).unwrap();
        let handle = port.open(9).unwrap();
        port.inject_edge(9);
        let ready = port
            .wait(&[handle.id()], Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(ready, vec![handle.id()]);
    }

    #[test]
    fn wait_times_out_empty() {
        let port = MockLinePort::default();
        let ready = port.wait(&[], Some(Duration::from_millis(10))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn close_releases_handle() {
        let port = MockLinePort::default();
        port.export(9).unwrap();
        let handle = port.open(9).unwrap();
        assert_eq!(port.open_handle_count(), 1);
        port.close(handle);
        assert_eq!(port.open_handle_count(), 0);
    }
}
