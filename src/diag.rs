/// Diagnostic channel messages.
///
/// The original debug surface was raw hex bytes over a UART. Here the
/// same content — sent/received frame echoes and the periodic counter
/// dump — goes out as newline-delimited JSON, serialized with
/// `serde_json_core` into `heapless` buffers so the path stays
/// allocation-free.

use core::fmt::Write;

use heapless::String;
use serde::Serialize;

use crate::frame::FRAME_LEN;

/// Hex rendering of one frame ("FF00..A521").
pub type FrameHex = String<{ FRAME_LEN * 2 }>;

/// Maximum size of a serialized diagnostic line.
pub const MAX_MSG_LEN: usize = 192;

/// Call counters mirrored to the diagnostic channel by the housekeeping
/// phase. Cumulative for the process lifetime, independent of protocol
/// correctness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    /// Timer-fired callbacks accepted.
    pub timer_ticks: u32,
    /// Advertise mode commands issued.
    pub advertise_commands: u32,
    /// Listen mode commands issued.
    pub listen_commands: u32,
    /// Raw radio events delivered.
    pub radio_events: u32,
    /// Events that decoded as protocol frames.
    pub frames_decoded: u32,
    /// Decoded frames that updated the observation vector.
    pub merges_applied: u32,
    /// Timer callbacks for an unrecognized handle.
    pub unknown_timers: u32,
}

/// One diagnostic record, NDJSON-framed on the wire.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DiagMessage<'a> {
    /// Outgoing frame changed and was (re)tagged for broadcast.
    #[serde(rename = "tx")]
    Tx { frame: &'a FrameHex, tag: u8 },

    /// Incoming frame decoded (duplicates suppressed).
    #[serde(rename = "rx")]
    Rx { frame: &'a FrameHex, rssi: u8 },

    /// Periodic counter flush.
    #[serde(rename = "counters")]
    Counters {
        ticks: u32,
        adv: u32,
        listen: u32,
        events: u32,
        decoded: u32,
        merged: u32,
        bad_timers: u32,
    },
}

impl<'a> DiagMessage<'a> {
    pub fn counters(c: &Counters) -> Self {
        DiagMessage::Counters {
            ticks: c.timer_ticks,
            adv: c.advertise_commands,
            listen: c.listen_commands,
            events: c.radio_events,
            decoded: c.frames_decoded,
            merged: c.merges_applied,
            bad_timers: c.unknown_timers,
        }
    }
}

/// Render a frame as uppercase hex for a diagnostic record.
pub fn frame_hex(bytes: &[u8; FRAME_LEN]) -> FrameHex {
    let mut s = FrameHex::new();
    for b in bytes {
        let _ = write!(s, "{b:02X}");
    }
    s
}

/// Serialize a diagnostic message to JSON bytes plus the NDJSON newline.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize(msg: &DiagMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}
