use std::fs::{self, OpenOptions};
use std::io::{PipeReader, PipeWriter, Read, Seek, SeekFrom, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::config::{ActiveLevel, Direction, EdgeDetect};
use crate::error::Error;
use crate::port::{HandleId, LineHandle, LinePort};

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Kernel sysfs GPIO interface rooted at `/sys/class/gpio`. The root is
/// configurable so tests can run against a temporary file tree. A self-pipe
/// rides along in every poll set so `wake` can interrupt an unbounded wait.
pub struct SysfsLinePort {
    root: PathBuf,
    wake_rx: PipeReader,
    wake_tx: PipeWriter,
}

impl SysfsLinePort {
    pub fn new() -> Result<Self, Error> {
        Self::with_root(SYSFS_GPIO_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let (wake_rx, wake_tx) =
            std::io::pipe().map_err(|e| Error::Resource(format!("wake pipe: {e}")))?;
        Ok(Self {
            root: root.into(),
            wake_rx,
            wake_tx,
        })
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn write_attr(&self, path: &Path, token: &str) -> Result<(), Error> {
        debug!("writing {token} to {}", path.display());
        fs::write(path, token)
            .map_err(|e| Error::Resource(format!("write {token} to {}: {e}", path.display())))
    }

    fn drain_wake(&self) {
        let mut rx = &self.wake_rx;
        let mut buf = [0u8; 64];
        let _ = rx.read(&mut buf);
    }
}

impl LinePort for SysfsLinePort {
    fn export(&self, pin: u32) -> Result<(), Error> {
        let path = self.root.join("export");
        match fs::write(&path, pin.to_string()) {
            Ok(()) => Ok(()),
            // EBUSY means a prior owner already exported the pin, assume control
            Err(e) if e.raw_os_error() == Some(Errno::EBUSY as i32) => {
                debug!("pin {pin} has been exported, assuming control");
                Ok(())
            }
            Err(e) => Err(Error::Resource(format!("export pin {pin}: {e}"))),
        }
    }

    fn unexport(&self, pin: u32) -> Result<(), Error> {
        let path = self.root.join("unexport");
        fs::write(&path, pin.to_string())
            .map_err(|e| Error::Resource(format!("unexport pin {pin}: {e}")))
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), Error> {
        self.write_attr(&self.pin_dir(pin).join("direction"), direction.token())
    }

    fn set_edge(&self, pin: u32, edge: EdgeDetect) -> Result<(), Error> {
        self.write_attr(&self.pin_dir(pin).join("edge"), edge.token())
    }

    fn set_active_level(&self, pin: u32, level: ActiveLevel) -> Result<(), Error> {
        self.write_attr(
            &self.pin_dir(pin).join("active_low"),
            level.active_low_token(),
        )
    }

    fn open(&self, pin: u32) -> Result<LineHandle, Error> {
        let path = self.pin_dir(pin).join("value");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&path)
            .map_err(|e| Error::Resource(format!("open {}: {e}", path.display())))?;
        let handle = LineHandle::from_file(file);
        debug!("opened {} with fd {}", path.display(), handle.id());
        Ok(handle)
    }

    fn read(&self, handle: &LineHandle) -> Result<u8, Error> {
        let mut file = handle
            .file()
            .ok_or_else(|| Error::Io("handle has no backing file".into()))?;
        let mut buf = [0u8; 8];
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::Io(format!("read: {e}")))?;
        // value entries are single-line files, seek back so the next edge
        // notification can be observed
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::Io(format!("seek: {e}")))?;
        let text = std::str::from_utf8(&buf[..n]).unwrap_or("").trim();
        text.parse::<u8>()
            .map_err(|e| Error::Parse(format!("gpio value {text:?}: {e}")))
    }

    fn write(&self, handle: &LineHandle, value: bool) -> Result<(), Error> {
        let mut file = handle
            .file()
            .ok_or_else(|| Error::Io("handle has no backing file".into()))?;
        file.write_all(if value { b"1" } else { b"0" })
            .map_err(|e| Error::Io(format!("write: {e}")))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::Io(format!("seek: {e}")))?;
        Ok(())
    }

    fn wait(
        &self,
        handles: &[HandleId],
        timeout: Option<Duration>,
    ) -> Result<Vec<HandleId>, Error> {
        let mut fds: Vec<PollFd> = Vec::with_capacity(handles.len() + 1);
        for &handle in handles {
            // SAFETY: the registry keeps every watched handle open for the
            // duration of the wait
            let fd = unsafe { BorrowedFd::borrow_raw(handle) };
            fds.push(PollFd::new(fd, PollFlags::POLLPRI | PollFlags::POLLERR));
        }
        fds.push(PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN));

        let poll_timeout = match timeout {
            Some(d) => PollTimeout::from(u16::try_from(d.as_millis()).unwrap_or(u16::MAX)),
            None => PollTimeout::NONE,
        };

        let nfds = match poll(&mut fds, poll_timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => return Err(Error::Interrupted),
            Err(e) => return Err(Error::Io(format!("poll: {e}"))),
        };
        if nfds == 0 {
            return Ok(Vec::new());
        }

        let mut ready = Vec::new();
        for (i, fd) in fds.iter().enumerate() {
            let revents = fd.revents().unwrap_or(PollFlags::empty());
            if i == handles.len() {
                if revents.contains(PollFlags::POLLIN) {
                    self.drain_wake();
                }
            } else if revents.contains(PollFlags::POLLPRI) {
                ready.push(handles[i]);
            }
        }
        Ok(ready)
    }

    fn wake(&self) {
        let mut tx = &self.wake_tx;
        if let Err(e) = tx.write_all(&[1]) {
            debug!("wake pipe write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tempfile::TempDir;

    use super::*;

    fn fake_tree(pin: u32) -> (TempDir, SysfsLinePort) {
        let dir = TempDir::new().expect("tempdir");
        let pin_dir = dir.path().join(format!("gpio{pin}"));
        fs::create_dir(&pin_dir).expect("pin dir");
        for name in ["direction", "edge", "active_low"] {
            fs::write(pin_dir.join(name), "").expect("attr file");
        }
        fs::write(pin_dir.join("value"), "0\n").expect("value file");
        let port = SysfsLinePort::with_root(dir.path()).expect("port");
        (dir, port)
    }

    #[test]
    fn export_writes_decimal_pin_id() {
        let (dir, port) = fake_tree(17);
        port.export(17).expect("export");
        let written = fs::read_to_string(dir.path().join("export")).unwrap();
        assert_eq!(written, "17");
    }

    #[test]
    fn unexport_writes_decimal_pin_id() {
        let (dir, port) = fake_tree(17);
        port.unexport(17).expect("unexport");
        let written = fs::read_to_string(dir.path().join("unexport")).unwrap();
        assert_eq!(written, "17");
    }

    #[test]
    fn attribute_tokens_match_kernel_interface() {
        let (dir, port) = fake_tree(4);
        let pin_dir = dir.path().join("gpio4");

        port.set_direction(4, Direction::Input).unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("direction")).unwrap(), "in");
        port.set_direction(4, Direction::Output).unwrap();
        assert_eq!(
            fs::read_to_string(pin_dir.join("direction")).unwrap(),
            "out"
        );

        for (edge, token) in [
            (EdgeDetect::None, "none"),
            (EdgeDetect::Rising, "rising"),
            (EdgeDetect::Falling, "falling"),
            (EdgeDetect::Both, "both"),
        ] {
            port.set_edge(4, edge).unwrap();
            assert_eq!(fs::read_to_string(pin_dir.join("edge")).unwrap(), token);
        }

        port.set_active_level(4, ActiveLevel::Low).unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("active_low")).unwrap(), "1");
        port.set_active_level(4, ActiveLevel::High).unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("active_low")).unwrap(), "0");
    }

    #[test]
    fn configure_missing_pin_fails_without_touching_state() {
        let (dir, port) = fake_tree(4);
        assert!(matches!(
            port.set_edge(99, EdgeDetect::Rising),
            Err(Error::Resource(_))
        ));
        assert_eq!(fs::read_to_string(dir.path().join("gpio4/edge")).unwrap(), "");
    }

    #[test]
    fn read_parses_value_and_resets_position() {
        let (dir, port) = fake_tree(7);
        fs::write(dir.path().join("gpio7/value"), "1\n").unwrap();
        let handle = port.open(7).expect("open");
        assert_eq!(port.read(&handle).unwrap(), 1);
        // the seek back to the start makes the value re-readable
        assert_eq!(port.read(&handle).unwrap(), 1);
    }

    #[test]
    fn read_rejects_non_numeric_content() {
        let (dir, port) = fake_tree(7);
        fs::write(dir.path().join("gpio7/value"), "zz\n").unwrap();
        let handle = port.open(7).expect("open");
        assert!(matches!(port.read(&handle), Err(Error::Parse(_))));
    }

    #[test]
    fn write_then_read_roundtrips() {
        let (_dir, port) = fake_tree(5);
        let handle = port.open(5).expect("open");
        port.write(&handle, true).unwrap();
        assert_eq!(port.read(&handle).unwrap(), 1);
        port.write(&handle, false).unwrap();
        assert_eq!(port.read(&handle).unwrap(), 0);
    }

    #[test]
    fn wake_unblocks_wait() {
        let (_dir, port) = fake_tree(5);
        port.wake();
        let started = Instant::now();
        let ready = port.wait(&[], Some(Duration::from_secs(5))).unwrap();
        assert!(ready.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
