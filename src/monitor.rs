use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::{FairMutex, Mutex};

use crate::config::{ActiveLevel, Direction, EdgeDetect, MonitorConfig, PinSettings, WaitMode};
use crate::debounce;
use crate::error::Error;
use crate::port::{HandleId, LineHandle, LinePort};
use crate::registry::{Callback, PinDescriptor, PinRegistry, PinSnapshot};

/// Façade over the port, registry and event loop. One background thread
/// waits on readiness across the watched handles and delivers debounced
/// callbacks; caller-side mutators are serialized by `ops` so registration
/// is atomic with respect to its rollback.
pub struct GpioMonitor<P: LinePort + 'static> {
    config: Arc<MonitorConfig>,
    port: Arc<P>,
    registry: Arc<PinRegistry>,
    enabled: Arc<AtomicBool>,
    ops: FairMutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<P: LinePort + 'static> GpioMonitor<P> {
    pub fn new(config: Arc<MonitorConfig>, port: Arc<P>) -> Self {
        Self {
            config,
            port,
            registry: Arc::new(PinRegistry::default()),
            enabled: Arc::new(AtomicBool::new(false)),
            ops: FairMutex::new(()),
            worker: Mutex::new(None),
        }
    }

    pub fn default_pin_settings(&self) -> PinSettings {
        PinSettings {
            debounce_ms: self.config.default_debounce_ms,
            ..PinSettings::default()
        }
    }

    /// Export, configure and open the line, then register it. Any partial
    /// failure rolls back the export so no half-configured pin stays
    /// registered.
    pub fn add_pin(&self, pin: u32, settings: PinSettings) -> Result<(), Error> {
        let _ops = self.ops.lock();
        if self.registry.contains(pin) {
            return Err(Error::AlreadyRegistered(pin));
        }

        info!(
            "registering pin {pin}: direction {:?}, edge {:?}, level {:?}, debounce {}ms",
            settings.direction, settings.edge, settings.active_level, settings.debounce_ms
        );
        self.port.export(pin)?;

        let configure = || -> Result<LineHandle, Error> {
            self.port.set_direction(pin, settings.direction)?;
            self.port.set_edge(pin, settings.edge)?;
            self.port.set_active_level(pin, settings.active_level)?;
            self.port.open(pin)
        };
        let handle = match configure() {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(ue) = self.port.unexport(pin) {
                    warn!("rollback unexport failed for pin {pin}: {ue}");
                }
                return Err(e);
            }
        };

        if let Err(mut rejected) = self.registry.insert(PinDescriptor::new(pin, settings, handle))
        {
            // the pin already belongs to another registration, release only
            // what this call opened
            if let Some(handle) = rejected.handle.take() {
                self.port.close(handle);
            }
            return Err(Error::AlreadyRegistered(pin));
        }
        Ok(())
    }

    /// Quiesce, close and unexport the line. Returns how many pins stay
    /// registered; removing an unknown pin just reports the current count.
    pub fn remove_pin(&self, pin: u32) -> usize {
        let _ops = self.ops.lock();
        let Some((mut descriptor, remaining)) = self.registry.remove(pin) else {
            debug!("pin {pin} is not registered");
            return self.registry.len();
        };
        descriptor.enabled = false;
        self.release_line(pin, &mut descriptor);
        info!("removed pin {pin}, {remaining} still registered");
        remaining
    }

    pub fn set_callback<F>(&self, pin: u32, callback: F) -> Result<(), Error>
    where
        F: Fn(&PinSnapshot) + Send + Sync + 'static,
    {
        if self.registry.set_callback(pin, Arc::new(callback)) {
            Ok(())
        } else {
            Err(Error::NotFound(pin))
        }
    }

    pub fn set_edge(&self, pin: u32, edge: EdgeDetect) -> Result<(), Error> {
        let _ops = self.ops.lock();
        if !self.registry.contains(pin) {
            return Err(Error::NotFound(pin));
        }
        self.port.set_edge(pin, edge)?;
        self.registry.update_settings(pin, |s| s.edge = edge);
        Ok(())
    }

    pub fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), Error> {
        let _ops = self.ops.lock();
        if !self.registry.contains(pin) {
            return Err(Error::NotFound(pin));
        }
        self.port.set_direction(pin, direction)?;
        self.registry.update_settings(pin, |s| s.direction = direction);
        Ok(())
    }

    pub fn set_active_level(&self, pin: u32, level: ActiveLevel) -> Result<(), Error> {
        let _ops = self.ops.lock();
        if !self.registry.contains(pin) {
            return Err(Error::NotFound(pin));
        }
        self.port.set_active_level(pin, level)?;
        self.registry.update_settings(pin, |s| s.active_level = level);
        Ok(())
    }

    pub fn set_debounce(&self, pin: u32, debounce: Duration) -> Result<(), Error> {
        let debounce_ms = debounce.as_millis() as u64;
        if self
            .registry
            .update_settings(pin, |s| s.debounce_ms = debounce_ms)
        {
            Ok(())
        } else {
            Err(Error::NotFound(pin))
        }
    }

    pub fn read_value(&self, pin: u32) -> Result<u8, Error> {
        let port = &self.port;
        self.registry
            .with_descriptor(pin, |descriptor| {
                if descriptor.settings.direction == Direction::Output {
                    info!("reading the value of output pin {pin}");
                }
                let handle = descriptor.handle.as_ref().ok_or_else(|| {
                    Error::Resource(format!("pin {pin} has no open value handle"))
                })?;
                let value = port.read(handle)?;
                descriptor.last_value = value;
                Ok(value)
            })
            .ok_or(Error::NotFound(pin))?
    }

    /// Meaningful only for output pins; a write to anything else is logged
    /// and dropped.
    pub fn write_value(&self, pin: u32, value: bool) -> Result<(), Error> {
        let port = &self.port;
        self.registry
            .with_descriptor(pin, |descriptor| {
                if descriptor.settings.direction != Direction::Output {
                    warn!("ignoring write to non-output pin {pin}");
                    return Ok(());
                }
                let handle = descriptor.handle.as_ref().ok_or_else(|| {
                    Error::Resource(format!("pin {pin} has no open value handle"))
                })?;
                port.write(handle, value)?;
                descriptor.last_value = value as u8;
                Ok(())
            })
            .ok_or(Error::NotFound(pin))?
    }

    pub fn snapshot(&self, pin: u32) -> Option<PinSnapshot> {
        self.registry.snapshot(pin)
    }

    pub fn settings(&self, pin: u32) -> Option<PinSettings> {
        self.registry.settings(pin)
    }

    pub fn pin_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_running(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Spawn the monitoring thread. The watch set is built once from the
    /// pins registered right now; pins added later are not observed until
    /// the next start.
    pub fn start(&self) {
        let _ops = self.ops.lock();
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                debug!("monitor loop already running");
                return;
            }
        }
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }

        self.enabled.store(true, Ordering::SeqCst);
        let port = self.port.clone();
        let registry = self.registry.clone();
        let enabled = self.enabled.clone();
        let wait = self.config.wait;
        *worker = Some(std::thread::spawn(move || {
            run_loop(port, registry, wait, enabled);
        }));
        info!("enabled interrupt monitor");
    }

    /// Cooperative shutdown: clear the enabled flag, wake the wait and join
    /// the loop thread.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.port.wake();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
            info!("disabled interrupt monitor");
        }
    }

    fn release_line(&self, pin: u32, descriptor: &mut PinDescriptor) {
        if let Err(e) = self.port.set_edge(pin, EdgeDetect::None) {
            debug!("edge reset failed for pin {pin}: {e}");
        }
        if let Some(handle) = descriptor.handle.take() {
            self.port.close(handle);
        }
        if let Err(e) = self.port.unexport(pin) {
            warn!("unexport failed for pin {pin}: {e}");
        }
    }
}

impl<P: LinePort + 'static> Drop for GpioMonitor<P> {
    fn drop(&mut self) {
        self.stop();
        for mut descriptor in self.registry.drain() {
            descriptor.enabled = false;
            let pin = descriptor.pin;
            self.release_line(pin, &mut descriptor);
        }
    }
}

fn run_loop<P: LinePort>(
    port: Arc<P>,
    registry: Arc<PinRegistry>,
    wait: WaitMode,
    enabled: Arc<AtomicBool>,
) {
    let mut watched = registry.watched_handles();
    let timeout = wait.timeout();
    info!("watching {} pins for interrupts", watched.len());

    while enabled.load(Ordering::SeqCst) {
        // drop handles whose pins were removed since the watch set was built
        watched.retain(|handle| registry.pin_of_handle(*handle).is_some());

        match port.wait(&watched, timeout) {
            Ok(ready) if ready.is_empty() => {
                // bounded-wait timeout: sweep for edges the wait missed
                if timeout.is_some() && enabled.load(Ordering::SeqCst) {
                    sweep(&*port, &registry);
                }
            }
            Ok(ready) => {
                for handle in ready {
                    dispatch(&*port, &registry, handle);
                }
            }
            Err(Error::Interrupted) => continue,
            Err(e) => {
                error!("readiness wait failed, monitor loop exiting: {e}");
                enabled.store(false, Ordering::SeqCst);
                return;
            }
        }
    }
}

fn dispatch<P: LinePort + ?Sized>(port: &P, registry: &PinRegistry, handle: HandleId) {
    let Some(pin) = registry.pin_of_handle(handle) else {
        debug!("no watched pin for ready handle {handle}");
        return;
    };
    let now = Instant::now();
    let fired = registry
        .with_descriptor(pin, |descriptor| {
            if !descriptor.enabled || !debounce::accept(descriptor, now) {
                return None;
            }
            let handle = descriptor.handle.as_ref()?;
            let value = match port.read(handle) {
                Ok(value) => value,
                Err(e) => {
                    warn!("value read failed for pin {pin}: {e}");
                    return None;
                }
            };
            descriptor.last_value = value;
            Some((descriptor.callback.clone(), descriptor.snapshot()))
        })
        .flatten();
    deliver(pin, fired);
}

/// Re-read every registered pin and treat a changed level as a raw event,
/// so an edge the wait primitive missed still reaches the callback.
fn sweep<P: LinePort + ?Sized>(port: &P, registry: &PinRegistry) {
    for pin in registry.pins() {
        let now = Instant::now();
        let fired = registry
            .with_descriptor(pin, |descriptor| {
                if !descriptor.enabled {
                    return None;
                }
                let handle = descriptor.handle.as_ref()?;
                let value = match port.read(handle) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("fallback read failed for pin {pin}: {e}");
                        return None;
                    }
                };
                if value == descriptor.last_value {
                    return None;
                }
                if !debounce::accept(descriptor, now) {
                    descriptor.last_value = value;
                    return None;
                }
                descriptor.last_value = value;
                Some((descriptor.callback.clone(), descriptor.snapshot()))
            })
            .flatten();
        deliver(pin, fired);
    }
}

// callbacks run here, on the loop thread, with no registry lock held
fn deliver(pin: u32, fired: Option<(Option<Callback>, PinSnapshot)>) {
    match fired {
        Some((Some(callback), snapshot)) => {
            debug!("executing callback for pin {pin}");
            callback(&snapshot);
        }
        Some((None, _)) => warn!("no callback registered for pin {pin}"),
        None => {}
    }
}

#[cfg(feature = "sysfs-gpio")]
mod shared {
    use super::*;
    use crate::port::SysfsLinePort;
    use parking_lot::RwLock;

    static SHARED: RwLock<Option<Arc<GpioMonitor<SysfsLinePort>>>> = RwLock::new(None);

    /// Build the process-wide monitor. Fails if one is already initialized.
    pub fn init_shared(config: MonitorConfig) -> Result<Arc<GpioMonitor<SysfsLinePort>>, Error> {
        let mut slot = SHARED.write();
        if slot.is_some() {
            return Err(Error::Config("shared monitor already initialized".into()));
        }
        let port = match config.sysfs_root.as_deref() {
            Some(root) => SysfsLinePort::with_root(root)?,
            None => SysfsLinePort::new()?,
        };
        let monitor = Arc::new(GpioMonitor::new(Arc::new(config), Arc::new(port)));
        *slot = Some(monitor.clone());
        Ok(monitor)
    }

    pub fn shared() -> Option<Arc<GpioMonitor<SysfsLinePort>>> {
        SHARED.read().clone()
    }

    /// Drop the process-wide monitor; its teardown stops the loop and
    /// unexports every still-registered pin.
    pub fn teardown_shared() {
        let _ = SHARED.write().take();
    }
}

#[cfg(feature = "sysfs-gpio")]
pub use shared::{init_shared, shared, teardown_shared};
