//! Serial communication with Extron switching hardware.
//!
//! Extron units speak the SIS protocol over USB serial (115200 8N1). Ports
//! are opened per exchange with raw termios via nix — no shell forks, no
//! long-lived port ownership — and every exchange is flush → write → read
//! with a deadline. All functions here block; callers on the async runtime
//! go through `spawn_blocking`.
//!
//! Discovery walks `/sys/class/tty`, keeps USB serial nodes whose device
//! ancestor matches the Extron vendor id, and probes each candidate with the
//! SIS name query to learn the unit name.

use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices};
use nix::unistd;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::registry::Device;

/// SIS query for the unit name: ESC CN CR.
const NAME_QUERY: &[u8] = b"\x1bCN\r";

/// sysfs directory listing all tty class devices.
const TTY_CLASS_DIR: &str = "/sys/class/tty";

/// Read buffer size (SIS replies are a single short line).
const READ_BUF_SIZE: usize = 256;

/// Failures talking to or enumerating Extron hardware.
#[derive(Debug)]
pub enum DriverError {
    /// Device enumeration failed outright (individual port probes that fail
    /// are skipped, not errors).
    Discovery(String),
    /// The device rejected the requested input (SIS `E01`).
    InvalidInput(String),
    /// The device is unreachable or did not acknowledge the command.
    Comm(String),
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::Discovery(e) => write!(f, "Device discovery failed: {e}"),
            DriverError::InvalidInput(input) => write!(f, "Input {input} rejected by device"),
            DriverError::Comm(e) => write!(f, "Device communication failed: {e}"),
        }
    }
}

/// Boundary to the physical devices.
///
/// The server core only ever talks to hardware through this trait, so the
/// registry and dispatch layers can be exercised with a scripted
/// implementation.
pub trait SwitchDriver: Send + Sync {
    /// Enumerate reachable devices. Blocking.
    fn discover(&self) -> Result<Vec<Device>, DriverError>;

    /// Route `input` to the output of the device at `path`. Blocking.
    fn switch_input(&self, path: &str, input: &str) -> Result<(), DriverError>;
}

/// Production driver: raw termios serial I/O against real Extron units.
pub struct SerialDriver {
    config: DriverConfig,
}

impl SerialDriver {
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.config.response_timeout_ms)
    }

    /// Whether the USB device directory belongs to an Extron unit.
    fn matches_vendor(&self, usb_dir: &Path) -> bool {
        let vendor = read_sysfs_attr(&usb_dir.join("idVendor"));
        if !vendor.eq_ignore_ascii_case(&self.config.vendor_id) {
            return false;
        }
        read_sysfs_attr(&usb_dir.join("manufacturer")) == self.config.manufacturer
    }

    /// Query the unit name over the given serial path.
    fn probe_name(&self, path: &str) -> Result<String, String> {
        let port = SerialPort::open(path)?;
        port.send(NAME_QUERY)?;
        let reply = port.read_reply(self.response_timeout())?;
        let name = first_line(&reply);
        if name.is_empty() {
            return Err("empty name reply".to_string());
        }
        Ok(name)
    }
}

impl SwitchDriver for SerialDriver {
    fn discover(&self) -> Result<Vec<Device>, DriverError> {
        let entries = std::fs::read_dir(TTY_CLASS_DIR)
            .map_err(|e| DriverError::Discovery(format!("read {TTY_CLASS_DIR}: {e}")))?;

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let tty = entry.file_name().to_string_lossy().into_owned();
            if !tty.starts_with("ttyUSB") && !tty.starts_with("ttyACM") {
                continue;
            }
            let Some(usb_dir) = usb_device_dir(&entry.path()) else {
                continue;
            };
            if !self.matches_vendor(&usb_dir) {
                continue;
            }

            let path = format!("/dev/{tty}");
            match self.probe_name(&path) {
                Ok(name) => {
                    info!("Found {name} at {path}");
                    devices.push(Device { name, path });
                }
                Err(e) => warn!("{path}: name probe failed ({e}), skipping"),
            }
        }
        Ok(devices)
    }

    fn switch_input(&self, path: &str, input: &str) -> Result<(), DriverError> {
        if !input_is_wellformed(input) {
            return Err(DriverError::InvalidInput(input.to_string()));
        }

        let port = SerialPort::open(path).map_err(DriverError::Comm)?;
        port.send(switch_command(input).as_bytes())
            .map_err(DriverError::Comm)?;
        let reply = port
            .read_reply(self.response_timeout())
            .map_err(DriverError::Comm)?;
        debug!("{path}: {input}! -> {:?}", reply.trim());
        parse_switch_reply(input, &reply)
    }
}

/// SIS tie command: `<input>!` routes the input to all outputs.
fn switch_command(input: &str) -> String {
    format!("{input}!")
}

/// Inputs travel inside the SIS command string, so restrict them to the
/// characters the protocol can carry.
fn input_is_wellformed(input: &str) -> bool {
    !input.is_empty() && input.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Interpret the device's reply to a tie command.
///
/// `In<input>All` acknowledges the switch; `E01` means the unit does not
/// have that input; anything else is a communication failure.
fn parse_switch_reply(input: &str, reply: &str) -> Result<(), DriverError> {
    let line = first_line(reply);
    if line.starts_with("E01") {
        return Err(DriverError::InvalidInput(input.to_string()));
    }
    if line.starts_with(&format!("In{input}All")) {
        return Ok(());
    }
    Err(DriverError::Comm(format!(
        "unexpected reply from device: {line:?}"
    )))
}

/// First non-empty line of a reply, stripped of control characters.
fn first_line(reply: &str) -> String {
    reply
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control() && *c != '\u{FFFD}')
        .collect()
}

/// Trimmed contents of a sysfs attribute file, empty if unreadable.
fn read_sysfs_attr(path: &Path) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Resolve the USB device directory (the one carrying `idVendor`) for a
/// `/sys/class/tty/<node>` entry. USB serial adapters hang the tty one to
/// three levels below the device, so walk upward a bounded number of steps.
fn usb_device_dir(tty_sysfs: &Path) -> Option<PathBuf> {
    let mut dir = std::fs::canonicalize(tty_sysfs.join("device")).ok()?;
    for _ in 0..4 {
        if dir.join("idVendor").is_file() {
            return Some(dir);
        }
        dir = dir.parent()?.to_path_buf();
    }
    None
}

/// Helper to get a `BorrowedFd` from a `RawFd` for nix calls.
///
/// # Safety
/// The caller must ensure `fd` is a valid open file descriptor.
unsafe fn borrow_fd(fd: RawFd) -> BorrowedFd<'static> {
    BorrowedFd::borrow_raw(fd)
}

/// An open serial port, closed on drop.
struct SerialPort {
    fd: RawFd,
    path: String,
}

impl SerialPort {
    /// Open and configure a port: raw mode, 115200 8N1, no flow control,
    /// `VMIN=0 VTIME=1` so reads return after 100ms of silence. Stale data
    /// is flushed before the first exchange.
    fn open(path: &str) -> Result<Self, String> {
        let fd = fcntl::open(
            path,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map_err(|e| format!("open {path}: {e}"))?;

        let port = Self {
            fd,
            path: path.to_string(),
        };

        // O_NONBLOCK was only needed so open() doesn't hang on carrier
        // detect; reads should block with the VTIME timeout.
        let flags =
            fcntl::fcntl(fd, fcntl::FcntlArg::F_GETFL).map_err(|e| format!("F_GETFL: {e}"))?;
        let mut oflags = OFlag::from_bits_truncate(flags);
        oflags.remove(OFlag::O_NONBLOCK);
        fcntl::fcntl(fd, fcntl::FcntlArg::F_SETFL(oflags)).map_err(|e| format!("F_SETFL: {e}"))?;

        configure_termios(fd)?;

        // SAFETY: fd is valid — we just opened it
        unsafe {
            termios::tcflush(borrow_fd(fd), termios::FlushArg::TCIOFLUSH)
                .map_err(|e| format!("tcflush: {e}"))?;
        }

        Ok(port)
    }

    /// Write the full command to the port.
    fn send(&self, bytes: &[u8]) -> Result<(), String> {
        // SAFETY: fd is valid for the lifetime of self
        let bfd = unsafe { borrow_fd(self.fd) };
        let written = unistd::write(bfd, bytes).map_err(|e| format!("write {}: {e}", self.path))?;
        if written != bytes.len() {
            return Err(format!(
                "short write to {} ({written} of {} bytes)",
                self.path,
                bytes.len()
            ));
        }
        Ok(())
    }

    /// Read until a full line arrives or the deadline passes.
    ///
    /// The device terminates replies with CR LF. On timeout, partial data is
    /// returned if any arrived — the parser decides what to make of it.
    fn read_reply(&self, timeout: Duration) -> Result<String, String> {
        let mut buf = [0u8; READ_BUF_SIZE];
        let mut reply = String::new();
        let deadline = Instant::now() + timeout;

        loop {
            if Instant::now() >= deadline {
                if reply.is_empty() {
                    return Err(format!(
                        "no reply from {} within {}ms",
                        self.path,
                        timeout.as_millis()
                    ));
                }
                return Ok(reply);
            }

            match unistd::read(self.fd, &mut buf) {
                Ok(0) => {
                    // VTIME expired with no data; keep waiting for the deadline
                    if reply.contains('\n') {
                        return Ok(reply);
                    }
                }
                Ok(n) => {
                    reply.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if reply.contains('\n') {
                        return Ok(reply);
                    }
                }
                Err(nix::errno::Errno::EAGAIN) => {}
                Err(e) => return Err(format!("read {}: {e}", self.path)),
            }
        }
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        let _ = unistd::close(self.fd);
    }
}

/// Raw mode, 115200 baud, 8N1, receiver enabled, modem control ignored.
fn configure_termios(fd: RawFd) -> Result<(), String> {
    // SAFETY: fd is valid — caller just opened it
    let borrowed = unsafe { borrow_fd(fd) };

    let mut tio = termios::tcgetattr(borrowed).map_err(|e| format!("tcgetattr: {e}"))?;

    termios::cfmakeraw(&mut tio);

    termios::cfsetispeed(&mut tio, termios::BaudRate::B115200)
        .map_err(|e| format!("cfsetispeed: {e}"))?;
    termios::cfsetospeed(&mut tio, termios::BaudRate::B115200)
        .map_err(|e| format!("cfsetospeed: {e}"))?;

    tio.control_flags |= termios::ControlFlags::CLOCAL | termios::ControlFlags::CREAD;
    tio.control_flags &= !termios::ControlFlags::CRTSCTS;

    // VMIN=0, VTIME=1 → read returns after 100ms idle or when data available
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;

    termios::tcsetattr(borrowed, SetArg::TCSANOW, &tio).map_err(|e| format!("tcsetattr: {e}"))?;

    Ok(())
}

#[cfg(test)]
pub mod mock {
    //! Scripted driver for registry and dispatch tests.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::{DriverError, SwitchDriver};
    use crate::registry::Device;

    pub struct MockDriver {
        devices: Mutex<Vec<Device>>,
        discovery_error: Mutex<Option<String>>,
        accepted_inputs: Mutex<Option<Vec<String>>>,
        unreachable: AtomicBool,
        switch_attempts: AtomicUsize,
    }

    impl MockDriver {
        pub fn new(devices: Vec<Device>) -> Self {
            Self {
                devices: Mutex::new(devices),
                discovery_error: Mutex::new(None),
                accepted_inputs: Mutex::new(None),
                unreachable: AtomicBool::new(false),
                switch_attempts: AtomicUsize::new(0),
            }
        }

        /// Change what the next discovery returns.
        pub fn set_devices(&self, devices: Vec<Device>) {
            *self.devices.lock().unwrap() = devices;
            *self.discovery_error.lock().unwrap() = None;
        }

        /// Make discovery fail with the given message.
        pub fn fail_discovery(&self, msg: &str) {
            *self.discovery_error.lock().unwrap() = Some(msg.to_string());
        }

        /// Restrict the accepted input set (default: accept everything).
        pub fn accept_only(&self, inputs: &[&str]) {
            *self.accepted_inputs.lock().unwrap() =
                Some(inputs.iter().map(ToString::to_string).collect());
        }

        /// Make every switch attempt fail as unreachable.
        pub fn set_unreachable(&self, unreachable: bool) {
            self.unreachable.store(unreachable, Ordering::SeqCst);
        }

        /// How many times `switch_input` has been called.
        pub fn switch_attempts(&self) -> usize {
            self.switch_attempts.load(Ordering::SeqCst)
        }
    }

    impl SwitchDriver for MockDriver {
        fn discover(&self) -> Result<Vec<Device>, DriverError> {
            if let Some(msg) = self.discovery_error.lock().unwrap().clone() {
                return Err(DriverError::Discovery(msg));
            }
            Ok(self.devices.lock().unwrap().clone())
        }

        fn switch_input(&self, _path: &str, input: &str) -> Result<(), DriverError> {
            self.switch_attempts.fetch_add(1, Ordering::SeqCst);
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(DriverError::Comm("device did not acknowledge".to_string()));
            }
            let accepted = self.accepted_inputs.lock().unwrap();
            match accepted.as_ref() {
                Some(list) if !list.iter().any(|i| i == input) => {
                    Err(DriverError::InvalidInput(input.to_string()))
                }
                _ => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_command_format() {
        assert_eq!(switch_command("2"), "2!");
        assert_eq!(switch_command("HDMI2"), "HDMI2!");
    }

    #[test]
    fn test_parse_switch_reply_ack() {
        assert!(parse_switch_reply("2", "In2All\r\n").is_ok());
    }

    #[test]
    fn test_parse_switch_reply_ack_with_leading_blank_line() {
        assert!(parse_switch_reply("5", "\r\nIn5All\r\n").is_ok());
    }

    #[test]
    fn test_parse_switch_reply_rejected() {
        let err = parse_switch_reply("9", "E01\r\n").unwrap_err();
        assert!(matches!(err, DriverError::InvalidInput(input) if input == "9"));
    }

    #[test]
    fn test_parse_switch_reply_unexpected() {
        let err = parse_switch_reply("2", "Vid2 Aud2\r\n").unwrap_err();
        assert!(matches!(err, DriverError::Comm(_)));
    }

    #[test]
    fn test_parse_switch_reply_wrong_input_echoed() {
        // Ack for a different input than requested is not an ack.
        let err = parse_switch_reply("2", "In3All\r\n").unwrap_err();
        assert!(matches!(err, DriverError::Comm(_)));
    }

    #[test]
    fn test_input_wellformed() {
        assert!(input_is_wellformed("2"));
        assert!(input_is_wellformed("HDMI2"));
        assert!(!input_is_wellformed(""));
        assert!(!input_is_wellformed("2!"));
        assert!(!input_is_wellformed("2 3"));
    }

    #[test]
    fn test_first_line_strips_noise() {
        assert_eq!(first_line("\r\n  Matrix1\r\n"), "Matrix1");
        assert_eq!(first_line("\u{0}Matrix1\r\n"), "Matrix1");
        assert_eq!(first_line(""), "");
    }
}
