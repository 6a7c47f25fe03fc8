//! Serial-attached IR transceiver transport.
//!
//! The hardware end is a small transceiver board on a serial port.
//! Host-to-device frames are postcard-encoded [`DeviceCommand`]s,
//! device-to-host frames are [`DeviceReply`]s. The device timestamps
//! receiver edges with a wrapping 32-bit microsecond tick counter and
//! synthesizes the mark carrier itself during transmission.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use postcard::take_from_bytes;
use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo};

use crate::pulse::PulseTrain;
use crate::transport::{Edge, EdgeEvent, EdgeStream, Transport, TransportError};

/// Extra wait on top of a train's own duration when blocking for the
/// device's transmit acknowledgement.
const TX_LATENCY_MARGIN: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 256;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Idle,
    Info,
    /// Start streaming edges seen on a receiver channel.
    Listen { channel: u32 },
    StopListen,
    /// Play a pulse train: durations in microseconds, mark first,
    /// carrier driven at `carrier_hz` during marks.
    Transmit {
        channel: u32,
        carrier_hz: u32,
        durations: Vec<u32>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DeviceReply {
    Ok,
    Info { version: u32 },
    /// A batch of receiver edges.
    Edges { edges: Vec<Edge> },
}

/// Framed link to the transceiver board.
pub struct SerialLink {
    port: Option<Box<dyn SerialPort>>,
    /// Bytes read past the end of the previous frame.
    pending: Vec<u8>,
}

impl SerialLink {
    pub fn new() -> Self {
        SerialLink { port: None, pending: Vec::new() }
    }

    pub fn list_ports() -> Result<Vec<SerialPortInfo>, serialport::Error> {
        serialport::available_ports()
    }

    pub fn connect<P: AsRef<Path>>(&mut self, path: P) -> Result<(), serialport::Error> {
        let path = path.as_ref().to_string_lossy();
        let port = serialport::new(path, 115_200)
            .timeout(Duration::from_millis(100))
            .open()?;
        self.port.replace(port);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    pub fn send_command(&mut self, cmd: &DeviceCommand) -> io::Result<()> {
        let req = postcard::to_stdvec(cmd)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.port
            .as_mut()
            .ok_or(io::ErrorKind::NotConnected)?
            .write_all(&req)
    }

    /// Read the next reply, waiting at most `deadline`.
    pub fn read_reply(&mut self, deadline: Duration) -> io::Result<DeviceReply> {
        let started = Instant::now();
        loop {
            if let Some(reply) = self.take_pending_reply() {
                return Ok(reply);
            }
            if started.elapsed() > deadline {
                return Err(io::ErrorKind::TimedOut.into());
            }

            let mut chunk = [0u8; READ_CHUNK];
            let port = self.port.as_mut().ok_or(io::ErrorKind::NotConnected)?;
            match port.read(&mut chunk) {
                Ok(read_len) => self.pending.extend_from_slice(&chunk[..read_len]),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for a plain `Ok` acknowledgement.
    pub fn reply_ok(&mut self, deadline: Duration) -> io::Result<()> {
        match self.read_reply(deadline)? {
            DeviceReply::Ok => Ok(()),
            other => {
                log::warn!("expected Ok, device sent {:?}", other);
                Err(io::ErrorKind::InvalidData.into())
            }
        }
    }

    fn take_pending_reply(&mut self) -> Option<DeviceReply> {
        match take_from_bytes::<DeviceReply>(&self.pending) {
            Ok((reply, rest)) => {
                self.pending = rest.to_vec();
                Some(reply)
            }
            Err(_) => None,
        }
    }
}

impl Default for SerialLink {
    fn default() -> Self {
        SerialLink::new()
    }
}

struct SerialClaim {
    channel: u32,
    busy: Arc<Mutex<HashSet<u32>>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    link: Arc<Mutex<SerialLink>>,
}

impl Drop for SerialClaim {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            reader.join().ok();
        }
        if let Ok(mut link) = self.link.lock() {
            if let Err(err) = link.send_command(&DeviceCommand::StopListen) {
                log::warn!("could not stop listening: {}", err);
            }
        }
        if let Ok(mut busy) = self.busy.lock() {
            busy.remove(&self.channel);
        }
    }
}

/// [`Transport`] implementation over a [`SerialLink`].
///
/// The link carries one conversation at a time: while a subscription
/// streams edges, [`Transport::transmit`] fails with `ChannelBusy`
/// rather than racing the reader thread for the device's replies.
pub struct SerialTransport {
    link: Arc<Mutex<SerialLink>>,
    busy: Arc<Mutex<HashSet<u32>>>,
}

impl SerialTransport {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, serialport::Error> {
        let mut link = SerialLink::new();
        link.connect(path)?;
        Ok(SerialTransport {
            link: Arc::new(Mutex::new(link)),
            busy: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    #[cfg(test)]
    fn unconnected() -> Self {
        SerialTransport {
            link: Arc::new(Mutex::new(SerialLink::new())),
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn lock_link(&self) -> Result<std::sync::MutexGuard<'_, SerialLink>, TransportError> {
        self.link
            .lock()
            .map_err(|_| TransportError::Io(io::Error::new(io::ErrorKind::Other, "link poisoned")))
    }
}

impl Transport for SerialTransport {
    fn is_connected(&self) -> bool {
        self.link.lock().map(|link| link.is_connected()).unwrap_or(false)
    }

    fn subscribe(&self, channel: u32) -> Result<EdgeStream, TransportError> {
        {
            let link = self.lock_link()?;
            if !link.is_connected() {
                return Err(TransportError::NotConnected);
            }
        }
        {
            let mut busy = self.busy.lock().map_err(|_| TransportError::NotConnected)?;
            if !busy.insert(channel) {
                return Err(TransportError::ChannelBusy(channel));
            }
        }

        let start = (|| -> Result<(), TransportError> {
            let mut link = self.lock_link()?;
            link.send_command(&DeviceCommand::Listen { channel })?;
            link.reply_ok(Duration::from_secs(1))?;
            Ok(())
        })();
        if let Err(err) = start {
            if let Ok(mut busy) = self.busy.lock() {
                busy.remove(&channel);
            }
            return Err(err);
        }

        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let reader_link = Arc::clone(&self.link);
        let reader = thread::spawn(move || {
            while !reader_stop.load(Ordering::SeqCst) {
                let reply = {
                    let mut link = match reader_link.lock() {
                        Ok(link) => link,
                        Err(_) => {
                            let err = io::Error::new(io::ErrorKind::Other, "link lock poisoned");
                            let _ = tx.send(EdgeEvent::Lost(TransportError::Io(err)));
                            return;
                        }
                    };
                    link.read_reply(Duration::from_millis(50))
                };
                match reply {
                    Ok(DeviceReply::Edges { edges }) => {
                        for edge in edges {
                            if tx.send(EdgeEvent::Edge(edge)).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(err) => {
                        log::warn!("edge reader stopping: {}", err);
                        let _ = tx.send(EdgeEvent::Lost(TransportError::Io(err)));
                        return;
                    }
                }
            }
        });

        let claim = SerialClaim {
            channel,
            busy: Arc::clone(&self.busy),
            stop,
            reader: Some(reader),
            link: Arc::clone(&self.link),
        };
        Ok(EdgeStream::new(rx, Box::new(claim)))
    }

    fn transmit(
        &self,
        channel: u32,
        train: &PulseTrain,
        carrier_khz: f32,
    ) -> Result<(), TransportError> {
        // The link is modal: while a subscription is live, the reader
        // thread owns the reply stream and a transmit ack could never
        // be read back. Refuse up front instead of stealing replies.
        {
            let busy = self.busy.lock().map_err(|_| TransportError::NotConnected)?;
            if let Some(&listening) = busy.iter().next() {
                return Err(TransportError::ChannelBusy(listening));
            }
        }
        let mut link = self.lock_link()?;
        if !link.is_connected() {
            return Err(TransportError::NotConnected);
        }

        link.send_command(&DeviceCommand::Transmit {
            channel,
            carrier_hz: (carrier_khz * 1000.0).round() as u32,
            durations: train.durations().collect(),
        })?;
        // The device acks once the whole train went out.
        link.reply_ok(train.total_duration() + TX_LATENCY_MARGIN)?;
        Ok(())
    }
}
