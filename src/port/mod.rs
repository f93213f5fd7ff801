pub mod mock;
#[cfg(feature = "sysfs-gpio")]
pub mod sysfs;

use std::fs::File;
#[cfg(feature = "sysfs-gpio")]
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use crate::config::{ActiveLevel, Direction, EdgeDetect};
use crate::error::Error;

pub use mock::MockLinePort;
#[cfg(feature = "sysfs-gpio")]
pub use sysfs::SysfsLinePort;

/// Stable identity of an open line-value handle, used as the key of the
/// handle-to-pin reverse index.
pub type HandleId = i32;

pub struct LineHandle {
    id: HandleId,
    file: Option<File>,
}

impl LineHandle {
    #[cfg(feature = "sysfs-gpio")]
    pub(crate) fn from_file(file: File) -> Self {
        let id = file.as_raw_fd();
        Self {
            id,
            file: Some(file),
        }
    }

    pub(crate) fn synthetic(id: HandleId) -> Self {
        Self { id, file: None }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }
}

/// One line's worth of kernel interface: lifecycle control files, the open
/// value handle, and readiness multiplexing across many handles at once.
pub trait LinePort: Send + Sync {
    fn export(&self, pin: u32) -> Result<(), Error>;
    fn unexport(&self, pin: u32) -> Result<(), Error>;
    fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), Error>;
    fn set_edge(&self, pin: u32, edge: EdgeDetect) -> Result<(), Error>;
    fn set_active_level(&self, pin: u32, level: ActiveLevel) -> Result<(), Error>;
    fn open(&self, pin: u32) -> Result<LineHandle, Error>;
    fn read(&self, handle: &LineHandle) -> Result<u8, Error>;
    fn write(&self, handle: &LineHandle, value: bool) -> Result<(), Error>;

    /// Block until one or more of `handles` becomes ready, the timeout
    /// elapses (`Ok` with an empty set), or `wake` is called. `None` waits
    /// without bound. An interrupted wait surfaces as `Error::Interrupted`.
    fn wait(&self, handles: &[HandleId], timeout: Option<Duration>)
    -> Result<Vec<HandleId>, Error>;

    /// Force a blocked `wait` to return early.
    fn wake(&self);

    fn close(&self, handle: LineHandle) {
        drop(handle);
    }
}
