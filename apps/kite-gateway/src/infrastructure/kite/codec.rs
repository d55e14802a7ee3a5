//! Kite Ticker Codec
//!
//! Splits binary ticker frames into packets and encodes subscription
//! commands.
//!
//! # Binary frame layout (big-endian)
//!
//! ```text
//! [u16 packet count] ([u16 packet length] [packet bytes])*
//! ```
//!
//! Each packet starts with the `u32` instrument token and the `i32` last
//! price in the smallest price unit of the segment. Only those two fields
//! are decoded; the packet length gives the mode. A frame shorter than two
//! bytes is a heartbeat.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::tick::{Tick, TickMode};

/// Currency derivatives segment: prices in 1e-7 units.
const SEGMENT_CDS: u32 = 3;
/// BSE currency derivatives segment: prices in 1e-4 units.
const SEGMENT_BCD: u32 = 6;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The frame ended before a declared packet did.
    #[error("frame truncated at offset {offset}: needed {needed} bytes, {available} left")]
    Truncated {
        /// Offset of the field being read.
        offset: usize,
        /// Bytes needed.
        needed: usize,
        /// Bytes remaining.
        available: usize,
    },

    /// A packet is too short to carry a token and price.
    #[error("packet of {0} bytes is too short")]
    ShortPacket(usize),
}

/// A decoded binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Keep-alive byte.
    Heartbeat,
    /// Ticks in vendor order.
    Ticks(Vec<Tick>),
}

/// Decode a binary frame.
///
/// # Errors
///
/// Returns an error if the frame is shorter than its declared packets or a
/// packet is shorter than eight bytes.
pub fn decode_frame(frame: &[u8]) -> Result<Frame, CodecError> {
    if frame.len() < 2 {
        return Ok(Frame::Heartbeat);
    }

    let count = usize::from(read_u16(frame, 0)?);
    let mut offset = 2;
    let mut ticks = Vec::with_capacity(count);

    for _ in 0..count {
        let length = usize::from(read_u16(frame, offset)?);
        offset += 2;
        let packet = frame
            .get(offset..offset + length)
            .ok_or(CodecError::Truncated {
                offset,
                needed: length,
                available: frame.len().saturating_sub(offset),
            })?;
        ticks.push(decode_packet(packet)?);
        offset += length;
    }

    Ok(Frame::Ticks(ticks))
}

fn decode_packet(packet: &[u8]) -> Result<Tick, CodecError> {
    if packet.len() < 8 {
        return Err(CodecError::ShortPacket(packet.len()));
    }

    let instrument_token = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]);
    let raw_price = i32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);

    let scale = match instrument_token & 0xff {
        SEGMENT_CDS => 7,
        SEGMENT_BCD => 4,
        _ => 2,
    };

    Ok(Tick {
        instrument_token,
        mode: mode_for_length(packet.len()),
        last_price: Decimal::new(i64::from(raw_price), scale),
    })
}

/// Packet mode from its length.
///
/// Index packets are 28 (quote) or 32 (full) bytes; tradable instruments
/// are 8 (ltp), 44 (quote) or 184 (full).
#[must_use]
pub const fn mode_for_length(length: usize) -> TickMode {
    match length {
        8 => TickMode::Ltp,
        28 | 44 => TickMode::Quote,
        32 | 184 => TickMode::Full,
        n if n > 44 => TickMode::Full,
        _ => TickMode::Quote,
    }
}

fn read_u16(frame: &[u8], offset: usize) -> Result<u16, CodecError> {
    frame
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(CodecError::Truncated {
            offset,
            needed: 2,
            available: frame.len().saturating_sub(offset),
        })
}

// =============================================================================
// Commands
// =============================================================================

/// Command sent to the ticker as a JSON text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "a", content = "v", rename_all = "lowercase")]
pub enum TickerCommand {
    /// `{"a":"subscribe","v":[tokens]}`
    Subscribe(Vec<u32>),
    /// `{"a":"unsubscribe","v":[tokens]}`
    Unsubscribe(Vec<u32>),
    /// `{"a":"mode","v":["full",[tokens]]}`
    Mode(TickMode, Vec<u32>),
}

impl TickerCommand {
    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Text message pushed by the ticker (`order`, `error`, `message`).
#[derive(Debug, Clone, Deserialize)]
pub struct TickerText {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

// =============================================================================
// Tests
// =============================================================================
