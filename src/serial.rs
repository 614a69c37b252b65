// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use serialport::{SerialPort as SerialPortTrait, ClearBuffer, DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte channel the link engines drive.
///
/// Timeouts are reported as `io::ErrorKind::TimedOut`; any other error kind is
/// a channel failure.
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Drop whatever is sitting in the input buffer.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        match self.read_timeout(&mut buf, timeout)? {
            0 => Err(timed_out("no byte before timeout")),
            _ => Ok(buf[0]),
        }
    }

    /// Read exactly `len` bytes, all of which must arrive before `timeout`
    /// elapses.
    fn read_exact_timeout(&mut self, len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out(&format!("read {} of {} bytes", filled, len)));
            }
            match self.read_timeout(&mut buf[filled..], remaining)? {
                0 => return Err(timed_out(&format!("read {} of {} bytes", filled, len))),
                n => filled += n,
            }
        }

        Ok(buf)
    }
}

pub fn timed_out(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, msg.to_string())
}

pub fn is_timeout(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::TimedOut
}

// ============================================================================
// Shared line
// ============================================================================

/// The physical link shared by both engines. Holding the lock is holding the
/// line for one exchange.
pub type Line = Arc<Mutex<Box<dyn SerialPort>>>;

pub fn new_line(port: Box<dyn SerialPort>) -> Line {
    Arc::new(Mutex::new(port))
}

pub fn lock_line(line: &Line) -> MutexGuard<'_, Box<dyn SerialPort>> {
    line.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.port.set_timeout(timeout).map_err(io::Error::other)?;
        self.port.read(buf)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::other)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(timed_out("Mock timeout"));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(timed_out("Mock timeout"));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

// ============================================================================
// Loopback null-modem for session tests
// ============================================================================

#[cfg(test)]
pub struct LoopbackPort {
    tx: crossbeam_channel::Sender<u8>,
    rx: crossbeam_channel::Receiver<u8>,
}

/// Two ports wired back to back: bytes written to one are read from the other.
#[cfg(test)]
pub fn loopback_pair() -> (LoopbackPort, LoopbackPort) {
    let (a_tx, b_rx) = crossbeam_channel::unbounded();
    let (b_tx, a_rx) = crossbeam_channel::unbounded();
    (
        LoopbackPort { tx: a_tx, rx: a_rx },
        LoopbackPort { tx: b_tx, rx: b_rx },
    )
}

#[cfg(test)]
impl SerialPort for LoopbackPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        for &byte in buf {
            self.tx
                .send(byte)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"))?;
        }
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        buf[0] = match self.rx.recv_timeout(timeout) {
            Ok(byte) => byte,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => return Err(timed_out("Loopback timeout")),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"));
            }
        };

        let mut bytes_read = 1;
        while bytes_read < buf.len() {
            match self.rx.try_recv() {
                Ok(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                }
                Err(_) => break,
            }
        }

        Ok(bytes_read)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }
}

/// A channel whose every read fails, as with a pulled cable.
#[cfg(test)]
pub struct BrokenPort;

#[cfg(test)]
impl SerialPort for BrokenPort {
    fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn read_timeout(&mut self, _buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled"))
    }
}

// ============================================================================
// Tests
// ============================================================================
