/// Proximity frame codec — the fixed 9-byte broadcast payload.
///
/// Every beacon periodically broadcasts one frame carrying its current
/// proximity map. Wire layout (little-endian byte positions):
///
/// | Offset | Field      | Value                                          |
/// |--------|------------|------------------------------------------------|
/// | 0      | marker     | `0xFF` (manufacturer-specific AD type)         |
/// | 1–6    | slots[1–6] | RSSI readings, `0x00` = never heard            |
/// | 7      | validation | `0xA5`                                         |
/// | 8      | tag        | rolling counter, never `0xFF`                  |
///
/// Exactly one slot in every frame holds `0xFF`: the sender's own slot.
/// That is how the receiver learns who sent the frame — beacon identity
/// is carried structurally, not as an explicit field.

/// Total frame length in bytes. Fixed for the lifetime of the protocol.
pub const FRAME_LEN: usize = 9;

/// Number of proximity slots (one per beacon identity 1..=6).
pub const SLOT_COUNT: usize = 6;

/// Frame-type marker at offset 0. Doubles as the BLE manufacturer-specific
/// AD type, so the frame can be embedded directly in advertising data.
pub const MARKER: u8 = 0xFF;

/// Integrity/version byte at offset 7, constant across the swarm.
pub const VALIDATION: u8 = 0xA5;

/// Reserved slot value marking "this is the transmitting beacon's own
/// identity slot", never a real signal-strength reading.
pub const SELF_SENTINEL: u8 = 0xFF;

/// Reserved tag value; the rolling tag skips it on wraparound so a tag
/// byte can never be mistaken for the sentinel.
pub const TAG_RESERVED: u8 = 0xFF;

/// Byte offset of the validation constant within a frame.
pub const VALIDATION_OFFSET: usize = 7;

/// Byte offset of the rolling tag within a frame.
pub const TAG_OFFSET: usize = 8;

/// Tag value a freshly initialized vector starts from.
pub const INITIAL_TAG: u8 = 0x20;

/// Fixed advertising-report header the platform places in front of the
/// broadcast payload when it delivers a raw radio event.
pub const REPORT_HEADER_LEN: usize = 12;

/// Decode failure. None of these are fatal — an undecodable payload is
/// simply excluded from the observation vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Payload shorter than the fixed frame length.
    Truncated,
    /// Byte 0 is not the marker — foreign advertisement traffic on the
    /// shared channel, discarded silently.
    InvalidMarker,
    /// Marker matched but the validation constant did not.
    InvalidFrame,
}

/// A beacon identity, 1..=6. Identity 0 does not exist (frame offset 0 is
/// the marker byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconId(u8);

impl BeaconId {
    /// Construct a validated identity. Returns `None` outside 1..=6.
    pub const fn new(id: u8) -> Option<Self> {
        if id >= 1 && id <= SLOT_COUNT as u8 {
            Some(Self(id))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Byte offset of this identity's slot within a frame. Identities are
    /// 1-indexed, so the offset equals the identity number.
    pub(crate) const fn offset(self) -> usize {
        self.0 as usize
    }

    /// Zero-based index into a slot array.
    pub(crate) const fn slot_index(self) -> usize {
        self.0 as usize - 1
    }
}

/// The local beacon's belief about proximity to every other beacon.
///
/// Created once at startup, mutated only by the observation merger (on
/// receipt) and the tag roll (on transmission), alive for the process
/// lifetime. There is no persistence across power cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationVector {
    slots: [u8; SLOT_COUNT],
    tag: u8,
    id: BeaconId,
}

impl ObservationVector {
    /// All proximity slots zeroed ("never heard"), self slot sentineled.
    pub fn new(id: BeaconId) -> Self {
        let mut slots = [0u8; SLOT_COUNT];
        slots[id.slot_index()] = SELF_SENTINEL;
        Self {
            slots,
            tag: INITIAL_TAG,
            id,
        }
    }

    pub fn id(&self) -> BeaconId {
        self.id
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Most recent directly-measured strength for `id`, or `0x00`.
    pub fn slot(&self, id: BeaconId) -> u8 {
        self.slots[id.slot_index()]
    }

    pub(crate) fn set_slot(&mut self, id: BeaconId, strength: u8) {
        self.slots[id.slot_index()] = strength;
    }

    /// Advance the rolling tag, skipping the reserved value.
    pub fn roll_tag(&mut self) {
        self.tag = advance_tag(self.tag);
    }

    /// Encode into the fixed wire layout. The self slot is forced to the
    /// sentinel regardless of vector state, so the identity invariant
    /// holds in every transmitted frame. Infallible.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = MARKER;
        buf[1..1 + SLOT_COUNT].copy_from_slice(&self.slots);
        buf[self.id.offset()] = SELF_SENTINEL;
        buf[VALIDATION_OFFSET] = VALIDATION;
        buf[TAG_OFFSET] = self.tag;
        buf
    }
}

/// A peer's frame as decoded off the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame {
    bytes: [u8; FRAME_LEN],
}

impl ReceivedFrame {
    /// Decode a payload that starts at the marker byte.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < FRAME_LEN {
            return Err(FrameError::Truncated);
        }
        if payload[0] != MARKER {
            return Err(FrameError::InvalidMarker);
        }
        if payload[VALIDATION_OFFSET] != VALIDATION {
            return Err(FrameError::InvalidFrame);
        }
        let mut bytes = [0u8; FRAME_LEN];
        bytes.copy_from_slice(&payload[..FRAME_LEN]);
        Ok(Self { bytes })
    }

    /// Decode from a transport that exposes the payload as little-endian
    /// 16-bit words rather than a flat byte stream. The high byte of the
    /// final word is padding and ignored.
    pub fn decode_words(words: &[u16]) -> Result<Self, FrameError> {
        const WORD_COUNT: usize = FRAME_LEN.div_ceil(2);
        if words.len() < WORD_COUNT {
            return Err(FrameError::Truncated);
        }
        let mut bytes = [0u8; FRAME_LEN];
        let mut i = 0;
        while i < FRAME_LEN {
            let [lo, hi] = words[i / 2].to_le_bytes();
            bytes[i] = lo;
            if i + 1 < FRAME_LEN {
                bytes[i + 1] = hi;
            }
            i += 2;
        }
        Self::decode(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    pub fn tag(&self) -> u8 {
        self.bytes[TAG_OFFSET]
    }

    pub fn slot(&self, id: BeaconId) -> u8 {
        self.bytes[id.offset()]
    }

    /// The sender's declared identity: the first slot holding the
    /// sentinel. `None` means a malformed frame with no identity slot.
    pub fn sender(&self) -> Option<BeaconId> {
        self.bytes[1..1 + SLOT_COUNT]
            .iter()
            .position(|&b| b == SELF_SENTINEL)
            .and_then(|i| BeaconId::new(i as u8 + 1))
    }
}

/// Bounds-checked view of the frame payload inside a raw advertising
/// event record, skipping the platform header.
pub fn frame_payload(event: &[u8]) -> Result<&[u8], FrameError> {
    let end = REPORT_HEADER_LEN + FRAME_LEN;
    if event.len() < end {
        return Err(FrameError::Truncated);
    }
    Ok(&event[REPORT_HEADER_LEN..end])
}

/// Advance the rolling tag: wrapping increment on the 8-bit domain,
/// skipping the reserved value. Pure and deterministic.
pub fn advance_tag(tag: u8) -> u8 {
    let next = tag.wrapping_add(1);
    if next == TAG_RESERVED {
        next.wrapping_add(1)
    } else {
        next
    }
}
