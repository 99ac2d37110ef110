//! Modbus-TCP grid meter adapter.
//!
//! Implements [`SensorPort`] by reading one holding register that carries
//! net grid power as a signed 16-bit watt value (negative = export).
//!
//! Wire format (function 0x03, read holding registers, quantity 1):
//! ```text
//! request  ┌──────┬──────┬──────┬──────┐┌──────┬────────┬──────────┐
//!          │ TID  │ PID=0│ LEN=6│ UNIT ││ 0x03 │ ADDR   │ QTY = 1  │
//!          │ 2B BE│ 2B   │ 2B   │ 1B   ││ 1B   │ 2B BE  │ 2B BE    │
//!          └──────┴──────┴──────┴──────┘└──────┴────────┴──────────┘
//! response ┌──────┬──────┬──────┬──────┐┌──────┬────────┬──────────┐
//!          │ TID  │ PID=0│ LEN=5│ UNIT ││ 0x03 │ BC = 2 │ VALUE BE │
//!          └──────┴──────┴──────┴──────┘└──────┴────────┴──────────┘
//! exception: function | 0x80 followed by a one-byte exception code.
//! ```
//!
//! The TCP connection stays open between reads.  Any failure drops it and
//! the next read reconnects, so a meter reboot costs one control cycle.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, info};

use crate::app::ports::SensorPort;
use crate::config::MeterConfig;
use crate::control::PowerReading;
use crate::error::SensorError;

/// Modbus function code: read holding registers.
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// MBAP header size (transaction, protocol, length, unit).
pub const MBAP_HEADER_LEN: usize = 7;

/// Encoded request size for a single-register read.
pub const REQUEST_LEN: usize = 12;

/// Largest PDU a Modbus-TCP server may send (253 bytes + unit id).
const MAX_MBAP_LENGTH: usize = 254;

// ───────────────────────────────────────────────────────────────
// Codec
// ───────────────────────────────────────────────────────────────

/// Encode a read of one holding register.
pub fn encode_read_request(transaction_id: u16, unit_id: u8, register: u16) -> [u8; REQUEST_LEN] {
    let tid = transaction_id.to_be_bytes();
    let addr = register.to_be_bytes();
    [
        tid[0],
        tid[1],
        0x00,
        0x00, // protocol id
        0x00,
        0x06, // unit + 5-byte PDU
        unit_id,
        READ_HOLDING_REGISTERS,
        addr[0],
        addr[1],
        0x00,
        0x01, // quantity
    ]
}

/// Parsed MBAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of unit id + PDU.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn parse(bytes: &[u8; MBAP_HEADER_LEN]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        }
    }

    /// PDU bytes that follow the header, if the length field is sane.
    pub fn pdu_len(&self) -> Option<usize> {
        let length = self.length as usize;
        if (2..=MAX_MBAP_LENGTH).contains(&length) {
            Some(length - 1)
        } else {
            None
        }
    }
}

/// Decode a complete response frame (header + PDU) to the register value.
///
/// Never panics on arbitrary input.
pub fn decode_read_response(
    frame: &[u8],
    expected_tid: u16,
    expected_unit: u8,
) -> Result<i16, SensorError> {
    let header_bytes: &[u8; MBAP_HEADER_LEN] = frame
        .get(..MBAP_HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(SensorError::MalformedResponse)?;
    let header = MbapHeader::parse(header_bytes);

    if header.transaction_id != expected_tid
        || header.protocol_id != 0
        || header.unit_id != expected_unit
    {
        return Err(SensorError::MalformedResponse);
    }
    let pdu_len = header.pdu_len().ok_or(SensorError::MalformedResponse)?;
    let pdu = &frame[MBAP_HEADER_LEN..];
    if pdu.len() != pdu_len {
        return Err(SensorError::MalformedResponse);
    }

    match pdu {
        [function, code] if *function == READ_HOLDING_REGISTERS | 0x80 => {
            Err(SensorError::Exception(*code))
        }
        [READ_HOLDING_REGISTERS, 2, hi, lo] => Ok(i16::from_be_bytes([*hi, *lo])),
        _ => Err(SensorError::MalformedResponse),
    }
}

// ───────────────────────────────────────────────────────────────
// Meter adapter
// ───────────────────────────────────────────────────────────────

/// Grid meter reached over Modbus-TCP.
pub struct ModbusMeter {
    host: heapless::String<64>,
    port: u16,
    unit_id: u8,
    register: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    next_tid: u16,
}

impl ModbusMeter {
    pub fn new(config: &MeterConfig, io_timeout_ms: u32) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            unit_id: config.unit_id,
            register: config.register,
            timeout: Duration::from_millis(u64::from(io_timeout_ms)),
            stream: None,
            next_tid: 1,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&self) -> Result<TcpStream, SensorError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| SensorError::ConnectFailed)?
            .next()
            .ok_or(SensorError::ConnectFailed)?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(|e| {
            if crate::error::is_timeout(&e) {
                SensorError::Timeout
            } else {
                SensorError::ConnectFailed
            }
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;
        info!("Meter: connected to {}", addr);
        Ok(stream)
    }

    fn transact(&mut self) -> Result<i16, SensorError> {
        if self.stream.is_none() {
            self.stream = Some(self.connect()?);
        }
        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);

        let request = encode_read_request(tid, self.unit_id, self.register);
        let Some(stream) = self.stream.as_mut() else {
            return Err(SensorError::ConnectFailed);
        };
        stream.write_all(&request)?;

        let mut frame = [0u8; MBAP_HEADER_LEN + MAX_MBAP_LENGTH];
        stream.read_exact(&mut frame[..MBAP_HEADER_LEN])?;
        let mut header_bytes = [0u8; MBAP_HEADER_LEN];
        header_bytes.copy_from_slice(&frame[..MBAP_HEADER_LEN]);
        let pdu_len = MbapHeader::parse(&header_bytes)
            .pdu_len()
            .ok_or(SensorError::MalformedResponse)?;
        let end = MBAP_HEADER_LEN + pdu_len;
        stream.read_exact(&mut frame[MBAP_HEADER_LEN..end])?;

        decode_read_response(&frame[..end], tid, self.unit_id)
    }
}

impl SensorPort for ModbusMeter {
    fn read(&mut self) -> Result<PowerReading, SensorError> {
        match self.transact() {
            Ok(raw) => Ok(PowerReading(i32::from(raw))),
            Err(e) => {
                if self.stream.take().is_some() {
                    debug!("Meter: dropping connection after {}", e);
                }
                Err(e)
            }
        }
    }
}
