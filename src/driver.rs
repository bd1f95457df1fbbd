/// Platform driver seam.
///
/// The core never touches hardware: radio mode toggling, timer arming,
/// LED signaling, and the diagnostic byte channel are all provided by the
/// host platform behind this trait. The firmware binary implements it
/// over embassy + trouble-host; tests implement it with a call recorder.

use crate::frame::FRAME_LEN;

/// The one radio mode active during each duty-cycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// Radio off.
    Idle,
    /// Scanning enabled, advertising disabled.
    Listen,
    /// Advertising the current frame, scanning disabled.
    Advertise,
}

/// Services the duty-cycle core consumes from the platform.
///
/// Both callback sources (timer fired, advertisement received) are
/// serialized by the host; implementations are never re-entered.
pub trait RadioDriver {
    /// Opaque timer identity, compared against the armed handle when a
    /// timer-fired callback is dispatched.
    type Handle: Copy + PartialEq;

    /// Command the radio into exactly one mode for the current phase.
    fn set_mode(&mut self, mode: RadioMode);

    /// Install the frame to broadcast, or clear it with `None`.
    fn set_advertised_payload(&mut self, payload: Option<&[u8; FRAME_LEN]>);

    /// Arm a timer to fire after `after_ms` milliseconds. Re-arming on
    /// every tick is the protocol's only lifecycle control.
    fn schedule_after(&mut self, after_ms: u64, repeating: bool) -> Self::Handle;

    /// Drive the visual indicator.
    fn set_indicator(&mut self, on: bool);

    /// Write one serialized diagnostic record (NDJSON line) to the debug
    /// channel.
    fn write_diagnostic(&mut self, bytes: &[u8]);
}
