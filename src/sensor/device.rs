//! Telemetry device connectors.
//!
//! A `TelemetryConnector` opens a `TelemetryLink`; dropping the link closes
//! the device. Links read with a bounded wait so the ingestion loop can
//! observe cancellation between attempts.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

pub trait TelemetryLink: Send {
    /// Read one line (without its terminator).
    ///
    /// `Ok(None)` means no complete line arrived within the read timeout.
    /// An `Err` means the link is lost.
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Drop any input buffered before this call.
    fn discard_input(&mut self) -> io::Result<()>;
}

pub trait TelemetryConnector: Send {
    fn describe(&self) -> String;

    fn connect(&mut self) -> Result<Box<dyn TelemetryLink>>;
}

// ----------------------------------------------------------------------------
// Line framing shared by the byte-stream links
// ----------------------------------------------------------------------------

/// Longest unterminated run kept while waiting for a newline.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Accumulates raw chunks and hands back complete lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        strip_terminator(&mut line);
        Some(line)
    }

    /// Append `chunk` and return the first complete line, if any.
    ///
    /// Unterminated input past `MAX_LINE_BYTES` is dropped only once no
    /// complete line remains in the buffer.
    fn accept(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        if let Some(line) = self.take_line() {
            return Some(line);
        }
        if self.pending.len() > MAX_LINE_BYTES {
            log::warn!(
                "dropping {} bytes of unterminated serial input",
                self.pending.len()
            );
            self.pending.clear();
        }
        None
    }

    /// Whatever is left once the device reports end of input.
    fn take_rest(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.pending);
        strip_terminator(&mut line);
        Some(line)
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

fn strip_terminator(line: &mut Vec<u8>) {
    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }
}

// ----------------------------------------------------------------------------
// Plain file / tty connector
// ----------------------------------------------------------------------------

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on bytes dropped by one `discard_input` call.
const MAX_DISCARD_BYTES: usize = 1024 * 1024;

/// Opens the device path as a file (tty, FIFO, or capture file).
///
/// The descriptor is non-blocking; a read waits at most `read_timeout` for a
/// complete line. End of input is treated as a lost link.
pub struct FileConnector {
    path: PathBuf,
    read_timeout: Duration,
}

impl FileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl TelemetryConnector for FileConnector {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn connect(&mut self) -> Result<Box<dyn TelemetryLink>> {
        let mut options = OpenOptions::new();
        options.read(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NONBLOCK);
        }
        let file = options
            .open(&self.path)
            .with_context(|| format!("failed to open serial device {}", self.path.display()))?;
        let seekable = file
            .metadata()
            .with_context(|| format!("failed to stat serial device {}", self.path.display()))?
            .is_file();
        Ok(Box::new(FileLink {
            file,
            seekable,
            lines: LineBuffer::default(),
            read_timeout: self.read_timeout,
        }))
    }
}

struct FileLink {
    file: File,
    /// Regular files replay from the start; there is no stale input to drop.
    seekable: bool,
    lines: LineBuffer,
    read_timeout: Duration,
}

impl TelemetryLink for FileLink {
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        if let Some(line) = self.lines.take_line() {
            return Ok(Some(line));
        }
        let deadline = Instant::now() + self.read_timeout;
        let mut chunk = [0u8; 1024];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => {
                    if let Some(line) = self.lines.take_rest() {
                        return Ok(Some(line));
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "serial input ended (EOF)",
                    ));
                }
                Ok(read) => {
                    if let Some(line) = self.lines.accept(&chunk[..read]) {
                        return Ok(Some(line));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.lines.clear();
        if self.seekable {
            return Ok(());
        }
        let mut chunk = [0u8; 1024];
        let mut dropped = 0;
        while dropped < MAX_DISCARD_BYTES {
            match self.file.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => dropped += read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        if dropped > 0 {
            log::debug!("discarded {} stale bytes from serial input", dropped);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Native serial port connector
// ----------------------------------------------------------------------------

#[cfg(feature = "sensor-serial")]
pub use serial::SerialConnector;

#[cfg(feature = "sensor-serial")]
mod serial {
    use std::io::{self, Read};
    use std::time::Duration;

    use anyhow::{Context, Result};
    use serialport::{ClearBuffer, SerialPort};

    use super::{LineBuffer, TelemetryConnector, TelemetryLink};

    pub struct SerialConnector {
        path: String,
        baud: u32,
        read_timeout: Duration,
    }

    impl SerialConnector {
        pub fn new(path: &str, baud: u32, read_timeout: Duration) -> Self {
            Self {
                path: path.to_string(),
                baud,
                read_timeout,
            }
        }
    }

    impl TelemetryConnector for SerialConnector {
        fn describe(&self) -> String {
            format!("{} @ {} baud", self.path, self.baud)
        }

        fn connect(&mut self) -> Result<Box<dyn TelemetryLink>> {
            let port = serialport::new(&self.path, self.baud)
                .timeout(self.read_timeout)
                .open()
                .with_context(|| format!("failed to open serial port {}", self.path))?;
            Ok(Box::new(SerialLink {
                port,
                lines: LineBuffer::default(),
            }))
        }
    }

    struct SerialLink {
        port: Box<dyn SerialPort>,
        lines: LineBuffer,
    }

    impl TelemetryLink for SerialLink {
        fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
            if let Some(line) = self.lines.take_line() {
                return Ok(Some(line));
            }
            let mut chunk = [0u8; 1024];
            match self.port.read(&mut chunk) {
                Ok(0) => Ok(None),
                Ok(read) => Ok(self.lines.accept(&chunk[..read])),
                Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(None),
                Err(err) => Err(err),
            }
        }

        fn discard_input(&mut self) -> io::Result<()> {
            self.lines.clear();
            let waiting = self.port.bytes_to_read().map_err(io::Error::from)?;
            if waiting > 0 {
                log::debug!("discarding {} stale bytes from serial input", waiting);
            }
            self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
        }
    }
}

// ----------------------------------------------------------------------------
// In-memory connector for tests
// ----------------------------------------------------------------------------

const MEMORY_READ_WAIT: Duration = Duration::from_millis(10);

/// In-memory telemetry device. Clones share the same wire.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    wire: Arc<Mutex<MemoryWire>>,
}

#[derive(Default)]
struct MemoryWire {
    pending: VecDeque<Vec<u8>>,
    failing_connects: u32,
    connects: u32,
    open_links: usize,
    broken: bool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn wire(&self) -> MutexGuard<'_, MemoryWire> {
        self.wire
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue raw bytes as one line on the wire.
    pub fn push_line(&self, line: impl AsRef<[u8]>) {
        self.wire().pending.push_back(line.as_ref().to_vec());
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.wire().failing_connects = count;
    }

    /// Make the open link's next read fail, as an unplugged device would.
    pub fn break_link(&self) {
        self.wire().broken = true;
    }

    /// Connection attempts so far, failed ones included.
    pub fn connects(&self) -> u32 {
        self.wire().connects
    }

    pub fn open_links(&self) -> usize {
        self.wire().open_links
    }
}

impl TelemetryConnector for MemoryConnector {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn connect(&mut self) -> Result<Box<dyn TelemetryLink>> {
        let mut wire = self.wire();
        wire.connects += 1;
        if wire.failing_connects > 0 {
            wire.failing_connects -= 1;
            anyhow::bail!("memory device unavailable");
        }
        wire.open_links += 1;
        wire.broken = false;
        Ok(Box::new(MemoryLink {
            wire: self.wire.clone(),
        }))
    }
}

struct MemoryLink {
    wire: Arc<Mutex<MemoryWire>>,
}

impl MemoryLink {
    fn wire(&self) -> MutexGuard<'_, MemoryWire> {
        self.wire
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TelemetryLink for MemoryLink {
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        {
            let mut wire = self.wire();
            if wire.broken {
                wire.broken = false;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            if let Some(line) = wire.pending.pop_front() {
                return Ok(Some(line));
            }
        }
        std::thread::sleep(MEMORY_READ_WAIT);
        Ok(None)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.wire().pending.clear();
        Ok(())
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        let mut wire = self.wire();
        wire.open_links = wire.open_links.saturating_sub(1);
    }
}
