pub mod config;
mod debounce;
pub mod error;
pub mod monitor;
pub mod port;
pub mod registry;

pub use config::{
    ActiveLevel, DEFAULT_DEBOUNCE_MS, Direction, EdgeDetect, MonitorConfig, PinSettings, WaitMode,
};
pub use error::Error;
#[cfg(feature = "sysfs-gpio")]
pub use monitor::{init_shared, shared, teardown_shared};
pub use monitor::GpioMonitor;
pub use port::{HandleId, LineHandle, LinePort, MockLinePort};
#[cfg(feature = "sysfs-gpio")]
pub use port::SysfsLinePort;
pub use registry::{PinRegistry, PinSnapshot};
