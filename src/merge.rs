/// Observation merging — the sole mutation point for proximity knowledge.
///
/// A received frame tells us who sent it (the sentinel slot); the physical
/// signal strength of the radio event that carried it tells us how close
/// the sender is. Slot values a peer reports about *third parties* are
/// never merged: the map holds only direct pairwise measurements,
/// aggregated over time by repeated direct hearing.

use crate::frame::{BeaconId, ObservationVector, ReceivedFrame};

/// Lower plausibility bound (exclusive). Readings at or below this are
/// driver noise, not real signals.
pub const PLAUSIBLE_MIN: u8 = 0x10;

/// Upper plausibility bound (exclusive). Readings at or above this are
/// driver error codes.
pub const PLAUSIBLE_MAX: u8 = 0xFE;

/// What a merge call did. Only `Updated` touches the vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The sender's slot was updated with the measured strength.
    Updated(BeaconId),
    /// Measured strength outside the plausible range; slot untouched.
    ImplausibleReading,
    /// The frame claims our own identity; merging would clobber the
    /// self-slot sentinel, so it is skipped.
    OwnSlot,
    /// No slot holds the sentinel — malformed frame, no-op.
    NoSender,
}

/// Fold one received frame into the local vector. Updates at most one
/// slot: the sender's, with the strength we measured ourselves.
pub fn merge(
    local: &mut ObservationVector,
    frame: &ReceivedFrame,
    measured_strength: u8,
) -> MergeOutcome {
    let Some(sender) = frame.sender() else {
        return MergeOutcome::NoSender;
    };
    if sender == local.id() {
        return MergeOutcome::OwnSlot;
    }
    if measured_strength <= PLAUSIBLE_MIN || measured_strength >= PLAUSIBLE_MAX {
        return MergeOutcome::ImplausibleReading;
    }
    local.set_slot(sender, measured_strength);
    MergeOutcome::Updated(sender)
}
