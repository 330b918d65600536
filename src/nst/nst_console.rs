use std::io::{self, BufRead, Read, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use serialport::{FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, error, trace};

pub const CONSOLE_BAUD: u32 = 115200;
const SERIAL_READ_TIMEOUT_MS: u64 = 100;
const MAX_LINE_LEN: usize = 256;

/// Splits a byte stream into lines on CR or LF. Empty lines are dropped and
/// overlong lines are truncated.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in data {
            match b {
                b'\r' | b'\n' => {
                    if !self.buf.is_empty() {
                        lines.push(String::from_utf8_lossy(&self.buf).into_owned());
                        self.buf.clear();
                    }
                }
                _ if self.buf.len() < MAX_LINE_LEN => self.buf.push(b),
                _ => {}
            }
        }
        lines
    }
}

/// Line-oriented operator console on stdin/stdout or a serial port.
///
/// Input is read on a background thread so that the poll loop never blocks.
pub struct Console {
    lines: Receiver<String>,
    port: Option<Box<dyn SerialPort>>,
    closed: bool,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").field("serial", &self.port.is_some()).field("closed", &self.closed).finish()
    }
}

impl Console {
    pub fn open_stdin() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(e=%e, "stdin read failed");
                        break;
                    }
                }
            }
            debug!("stdin closed");
        });
        Self { lines: rx, port: None, closed: false }
    }

    pub fn open_serial(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, CONSOLE_BAUD)
            .flow_control(FlowControl::None)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(SERIAL_READ_TIMEOUT_MS))
            .open()?;
        let mut reader = port.try_clone()?;
        debug!("console on {} at {} baud", port_name, CONSOLE_BAUD);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut lb = LineBuffer::new();
            let mut data = [0u8; 64];
            loop {
                match reader.read(&mut data) {
                    Ok(0) => continue,
                    Ok(n) => {
                        trace!("RD: {:02X?}", &data[..n]);
                        for line in lb.push(&data[..n]) {
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        error!(e=%e, "serial read failed");
                        return;
                    }
                }
            }
        });
        Ok(Self { lines: rx, port: Some(port), closed: false })
    }

    /// Next complete input line, if one is waiting.
    pub fn try_read_line(&mut self) -> Option<String> {
        match self.lines.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /* input side has gone away */
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Write for Console {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.port.as_mut() {
            Some(port) => {
                trace!(size=%data.len(), "WR: {:02X?}", data);
                port.write(data)
            }
            None => io::stdout().write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.port.as_mut() {
            Some(port) => port.flush(),
            None => io::stdout().flush(),
        }
    }
}
