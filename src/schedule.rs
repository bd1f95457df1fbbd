/// Duty-cycle scheduler — the periodic state machine timing the radio.
///
/// Each timer tick enters the next phase of a fixed cycle: three short
/// advertise bursts separated by idle gaps, one longer listen window, a
/// fourth advertise burst that doubles as housekeeping, and a brief reset
/// hold before the cycle restarts. Every tick re-arms the timer with the
/// entered phase's interval and commands exactly one radio mode.
///
/// All mutable protocol state — the observation vector, the two memo
/// buffers, the indicator counter, the call counters — lives in the
/// [`Scheduler`] context struct. Both callback entry points
/// ([`Scheduler::on_timer_fired`], [`Scheduler::on_advertisement`]) are
/// serialized by the host platform, so there is one logical thread of
/// control and no locking.

use crate::dedup::diff_and_copy;
use crate::diag::{self, Counters, DiagMessage};
use crate::driver::{RadioDriver, RadioMode};
use crate::frame::{
    frame_payload, BeaconId, FrameError, ObservationVector, ReceivedFrame, FRAME_LEN, TAG_OFFSET,
};
use crate::merge::{merge, MergeOutcome};

/// Delay before the first tick lands in the reset phase.
pub const STARTUP_DELAY_MS: u64 = 300;

/// Idle gap between advertise bursts.
pub const IDLE_MS: u64 = 43;

/// Advertise burst length.
pub const ADVERTISE_MS: u64 = 7;

/// Listen window length.
pub const LISTEN_MS: u64 = 50;

/// Reset hold before the cycle restarts.
pub const RESET_HOLD_MS: u64 = 1;

/// Housekeeping lights the indicator and flushes counters once the tick
/// counter passes this threshold.
pub const INDICATOR_PERIOD: u8 = 130;

/// One phase of the duty cycle. The transition function is total; there
/// is no terminal phase and no integer fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Radio idle, indicator off, brief hold. Also the startup phase.
    Reset,
    Idle1,
    Advertise1,
    Idle2,
    Advertise2,
    Idle3,
    Advertise3,
    Listen,
    /// Fourth advertise burst plus periodic indicator/counter upkeep.
    Housekeeping,
}

impl Phase {
    pub const fn next(self) -> Self {
        match self {
            Phase::Reset => Phase::Idle1,
            Phase::Idle1 => Phase::Advertise1,
            Phase::Advertise1 => Phase::Idle2,
            Phase::Idle2 => Phase::Advertise2,
            Phase::Advertise2 => Phase::Idle3,
            Phase::Idle3 => Phase::Advertise3,
            Phase::Advertise3 => Phase::Listen,
            Phase::Listen => Phase::Housekeeping,
            Phase::Housekeeping => Phase::Reset,
        }
    }

    /// The one radio mode commanded while this phase runs.
    pub const fn mode(self) -> RadioMode {
        match self {
            Phase::Reset | Phase::Idle1 | Phase::Idle2 | Phase::Idle3 => RadioMode::Idle,
            Phase::Listen => RadioMode::Listen,
            Phase::Advertise1 | Phase::Advertise2 | Phase::Advertise3 | Phase::Housekeeping => {
                RadioMode::Advertise
            }
        }
    }

    /// Timer interval armed on entering this phase.
    pub const fn interval_ms(self) -> u64 {
        match self {
            Phase::Reset => RESET_HOLD_MS,
            Phase::Idle1 | Phase::Idle2 | Phase::Idle3 => IDLE_MS,
            Phase::Advertise1 | Phase::Advertise2 | Phase::Advertise3 | Phase::Housekeeping => {
                ADVERTISE_MS
            }
            Phase::Listen => LISTEN_MS,
        }
    }
}

/// Duty-cycle state machine plus all protocol state it owns.
pub struct Scheduler<H> {
    /// Phase that will execute on the next accepted tick.
    phase: Phase,
    vector: ObservationVector,
    /// Last-sent frame memo. Starts all-zero, which differs from any
    /// encoded frame, so the first advertise always tags and reports.
    prior_out: [u8; FRAME_LEN],
    /// Last-decoded incoming frame memo for echo suppression.
    prior_in: [u8; FRAME_LEN],
    indicator_count: u8,
    timer: Option<H>,
    counters: Counters,
}

impl<H: Copy + PartialEq> Scheduler<H> {
    pub fn new(id: BeaconId) -> Self {
        Self {
            phase: Phase::Reset,
            vector: ObservationVector::new(id),
            prior_out: [0u8; FRAME_LEN],
            prior_in: [0u8; FRAME_LEN],
            indicator_count: 0,
            timer: None,
            counters: Counters::default(),
        }
    }

    /// Arm the startup timer. The first fired tick runs the reset phase.
    pub fn start<D: RadioDriver<Handle = H>>(&mut self, driver: &mut D) {
        self.timer = Some(driver.schedule_after(STARTUP_DELAY_MS, true));
    }

    pub fn vector(&self) -> &ObservationVector {
        &self.vector
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Timer-fired callback. A handle that is not the armed one is logged
    /// and ignored — never fatal.
    pub fn on_timer_fired<D: RadioDriver<Handle = H>>(&mut self, handle: H, driver: &mut D) {
        match self.timer {
            Some(armed) if armed == handle => {}
            _ => {
                self.counters.unknown_timers += 1;
                log::warn!("timer fired for unrecognized handle");
                return;
            }
        }
        self.counters.timer_ticks += 1;

        let phase = self.phase;
        self.timer = Some(driver.schedule_after(phase.interval_ms(), true));

        match phase.mode() {
            RadioMode::Idle => {
                if phase == Phase::Reset {
                    driver.set_indicator(false);
                }
                driver.set_mode(RadioMode::Idle);
            }
            RadioMode::Listen => {
                self.counters.listen_commands += 1;
                driver.set_mode(RadioMode::Listen);
            }
            RadioMode::Advertise => {
                if phase == Phase::Housekeeping {
                    self.housekeeping(driver);
                }
                self.advertise(driver);
            }
        }

        self.indicator_count = self.indicator_count.wrapping_add(1);
        self.phase = phase.next();
    }

    /// Advertisement-received callback for a raw platform event record:
    /// skip the report header, then decode and merge.
    pub fn on_advertisement<D: RadioDriver<Handle = H>>(
        &mut self,
        event: &[u8],
        measured_strength: u8,
        driver: &mut D,
    ) {
        self.counters.radio_events += 1;
        match frame_payload(event) {
            Ok(payload) => self.ingest(payload, measured_strength, driver),
            Err(_) => log::trace!("radio event too short for a frame"),
        }
    }

    /// Variant for platforms that deliver the frame payload directly
    /// (already starting at the marker byte).
    pub fn on_frame_payload<D: RadioDriver<Handle = H>>(
        &mut self,
        payload: &[u8],
        measured_strength: u8,
        driver: &mut D,
    ) {
        self.counters.radio_events += 1;
        self.ingest(payload, measured_strength, driver);
    }

    fn ingest<D: RadioDriver<Handle = H>>(
        &mut self,
        payload: &[u8],
        measured_strength: u8,
        driver: &mut D,
    ) {
        let frame = match ReceivedFrame::decode(payload) {
            Ok(frame) => frame,
            // Foreign advertisement traffic; the shared channel is full
            // of it, so discard without a log line.
            Err(FrameError::InvalidMarker) => return,
            Err(e) => {
                log::debug!("discarding payload: {:?}", e);
                return;
            }
        };
        self.counters.frames_decoded += 1;

        match merge(&mut self.vector, &frame, measured_strength) {
            MergeOutcome::Updated(sender) => {
                self.counters.merges_applied += 1;
                log::trace!(
                    "beacon {} heard at {:#04x}",
                    sender.get(),
                    measured_strength
                );
            }
            MergeOutcome::ImplausibleReading => {
                log::trace!("implausible strength {:#04x}", measured_strength)
            }
            MergeOutcome::OwnSlot => log::warn!("peer frame claims our own identity"),
            MergeOutcome::NoSender => log::debug!("frame carries no identity slot"),
        }

        // Repeated packet — no need to echo it again.
        if diff_and_copy(frame.as_bytes(), &mut self.prior_in) {
            return;
        }
        let hex = diag::frame_hex(frame.as_bytes());
        self.emit(
            &DiagMessage::Rx {
                frame: &hex,
                rssi: measured_strength,
            },
            driver,
        );
    }

    /// Prepare and command an advertise burst. The tag rolls only when
    /// the outgoing content changed since the previous transmission.
    fn advertise<D: RadioDriver<Handle = H>>(&mut self, driver: &mut D) {
        self.counters.advertise_commands += 1;

        let mut frame = self.vector.encode();
        if !diff_and_copy(&frame, &mut self.prior_out) {
            self.vector.roll_tag();
            frame[TAG_OFFSET] = self.vector.tag();
            // Keep the memo's tag in step so the tag byte alone never
            // reads as a content change.
            self.prior_out[TAG_OFFSET] = self.vector.tag();

            let hex = diag::frame_hex(&frame);
            self.emit(
                &DiagMessage::Tx {
                    frame: &hex,
                    tag: self.vector.tag(),
                },
                driver,
            );
        }

        driver.set_advertised_payload(Some(&frame));
        driver.set_mode(RadioMode::Advertise);
    }

    /// Indicator blink and counter flush, decoupled from the protocol.
    fn housekeeping<D: RadioDriver<Handle = H>>(&mut self, driver: &mut D) {
        if self.indicator_count > INDICATOR_PERIOD {
            self.indicator_count = 0;
            driver.set_indicator(true);
            self.emit(&DiagMessage::counters(&self.counters), driver);
        }
    }

    fn emit<D: RadioDriver<Handle = H>>(&self, msg: &DiagMessage, driver: &mut D) {
        let mut buf = [0u8; diag::MAX_MSG_LEN];
        if let Some(len) = diag::serialize(msg, &mut buf) {
            driver.write_diagnostic(&buf[..len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{REPORT_HEADER_LEN, SELF_SENTINEL};

    fn id(n: u8) -> BeaconId {
        BeaconId::new(n).unwrap()
    }

    /// Records every driver call for assertion.
    #[derive(Default)]
    struct MockDriver {
        modes: Vec<RadioMode>,
        payloads: Vec<Option<[u8; FRAME_LEN]>>,
        intervals: Vec<u64>,
        indicator: Vec<bool>,
        diagnostics: Vec<Vec<u8>>,
        next_handle: u32,
    }

    impl RadioDriver for MockDriver {
        type Handle = u32;

        fn set_mode(&mut self, mode: RadioMode) {
            self.modes.push(mode);
        }

        fn set_advertised_payload(&mut self, payload: Option<&[u8; FRAME_LEN]>) {
            self.payloads.push(payload.copied());
        }

        fn schedule_after(&mut self, after_ms: u64, _repeating: bool) -> u32 {
            self.intervals.push(after_ms);
            self.next_handle += 1;
            self.next_handle
        }

        fn set_indicator(&mut self, on: bool) {
            self.indicator.push(on);
        }

        fn write_diagnostic(&mut self, bytes: &[u8]) {
            self.diagnostics.push(bytes.to_vec());
        }
    }

    /// Started scheduler plus the handle of the armed timer.
    fn started(beacon: u8) -> (Scheduler<u32>, MockDriver, u32) {
        let mut driver = MockDriver::default();
        let mut sched = Scheduler::new(id(beacon));
        sched.start(&mut driver);
        let handle = driver.next_handle;
        (sched, driver, handle)
    }

    fn tick(sched: &mut Scheduler<u32>, driver: &mut MockDriver, handle: &mut u32) {
        sched.on_timer_fired(*handle, driver);
        *handle = driver.next_handle;
    }

    #[test]
    fn startup_arms_the_initial_delay() {
        let (sched, driver, _) = started(5);
        assert_eq!(driver.intervals, vec![STARTUP_DELAY_MS]);
        assert_eq!(sched.phase(), Phase::Reset);
    }

    #[test]
    fn full_cycle_mode_order() {
        let (mut sched, mut driver, mut handle) = started(5);
        for _ in 0..9 {
            tick(&mut sched, &mut driver, &mut handle);
        }

        use RadioMode::*;
        // Reset, Idle1, Adv1, Idle2, Adv2, Idle3, Adv3, Listen,
        // Housekeeping (which also advertises).
        assert_eq!(
            driver.modes,
            vec![Idle, Idle, Advertise, Idle, Advertise, Idle, Advertise, Listen, Advertise]
        );
        assert_eq!(sched.phase(), Phase::Reset);
        assert_eq!(sched.counters().advertise_commands, 4);
        assert_eq!(sched.counters().listen_commands, 1);
        assert_eq!(sched.counters().timer_ticks, 9);
    }

    #[test]
    fn full_cycle_intervals() {
        let (mut sched, mut driver, mut handle) = started(5);
        for _ in 0..9 {
            tick(&mut sched, &mut driver, &mut handle);
        }
        assert_eq!(
            driver.intervals,
            vec![
                STARTUP_DELAY_MS,
                RESET_HOLD_MS,
                IDLE_MS,
                ADVERTISE_MS,
                IDLE_MS,
                ADVERTISE_MS,
                IDLE_MS,
                ADVERTISE_MS,
                LISTEN_MS,
                ADVERTISE_MS,
            ]
        );
    }

    #[test]
    fn transition_function_is_cyclic() {
        let mut phase = Phase::Reset;
        for _ in 0..9 {
            phase = phase.next();
        }
        assert_eq!(phase, Phase::Reset);
    }

    #[test]
    fn reset_phase_drops_the_indicator() {
        let (mut sched, mut driver, mut handle) = started(5);
        tick(&mut sched, &mut driver, &mut handle);
        assert_eq!(driver.indicator, vec![false]);
    }

    #[test]
    fn first_advertise_tags_and_reports() {
        let (mut sched, mut driver, mut handle) = started(5);
        // Reset, Idle1, Advertise1.
        for _ in 0..3 {
            tick(&mut sched, &mut driver, &mut handle);
        }

        // Initial memo differs from any frame, so the first burst rolls
        // the tag and emits a tx diagnostic.
        assert_eq!(sched.vector().tag(), 0x21);
        assert_eq!(driver.diagnostics.len(), 1);
        let line = String::from_utf8(driver.diagnostics[0].clone()).unwrap();
        assert!(line.contains(r#""type":"tx""#));

        let payload = driver.payloads[0].unwrap();
        assert_eq!(payload[5], SELF_SENTINEL);
        assert_eq!(payload[TAG_OFFSET], 0x21);
    }

    #[test]
    fn unchanged_content_does_not_advance_the_tag() {
        let (mut sched, mut driver, mut handle) = started(5);
        // Through Advertise1 and on to Advertise2 with nothing heard.
        for _ in 0..5 {
            tick(&mut sched, &mut driver, &mut handle);
        }

        assert_eq!(sched.counters().advertise_commands, 2);
        // Only the initial burst changed anything.
        assert_eq!(sched.vector().tag(), 0x21);
        assert_eq!(driver.diagnostics.len(), 1);
        assert_eq!(driver.payloads[0], driver.payloads[1]);
    }

    #[test]
    fn merged_observation_rolls_the_tag_on_next_burst() {
        let (mut sched, mut driver, mut handle) = started(5);
        for _ in 0..3 {
            tick(&mut sched, &mut driver, &mut handle);
        }
        let tag_before = sched.vector().tag();

        // Beacon 3 heard at 0x40 during the listen window.
        let peer = ObservationVector::new(id(3)).encode();
        sched.on_frame_payload(&peer, 0x40, &mut driver);
        assert_eq!(sched.vector().slot(id(3)), 0x40);

        tick(&mut sched, &mut driver, &mut handle); // Idle2
        tick(&mut sched, &mut driver, &mut handle); // Advertise2

        assert_eq!(sched.vector().tag(), advance_tag_of(tag_before));
        let payload = driver.payloads.last().unwrap().unwrap();
        assert_eq!(payload[3], 0x40);
    }

    fn advance_tag_of(t: u8) -> u8 {
        crate::frame::advance_tag(t)
    }

    #[test]
    fn unknown_timer_handle_is_ignored() {
        let (mut sched, mut driver, handle) = started(5);
        sched.on_timer_fired(handle + 99, &mut driver);

        assert!(driver.modes.is_empty());
        assert_eq!(sched.counters().unknown_timers, 1);
        assert_eq!(sched.phase(), Phase::Reset);

        // The armed handle still works afterwards.
        sched.on_timer_fired(handle, &mut driver);
        assert_eq!(driver.modes, vec![RadioMode::Idle]);
    }

    #[test]
    fn raw_event_path_skips_the_report_header() {
        let (mut sched, mut driver, _) = started(5);
        let peer = ObservationVector::new(id(2)).encode();
        let mut event = [0x77u8; REPORT_HEADER_LEN + FRAME_LEN];
        event[REPORT_HEADER_LEN..].copy_from_slice(&peer);

        sched.on_advertisement(&event, 0x52, &mut driver);
        assert_eq!(sched.vector().slot(id(2)), 0x52);
        assert_eq!(sched.counters().radio_events, 1);
        assert_eq!(sched.counters().frames_decoded, 1);
        assert_eq!(sched.counters().merges_applied, 1);
    }

    #[test]
    fn foreign_traffic_is_discarded_silently() {
        let (mut sched, mut driver, _) = started(5);
        // Typical flags + name advertisement, not our marker.
        let payload = [0x02, 0x01, 0x06, 0x05, 0x09, b'a', b'b', b'c', b'd'];
        sched.on_frame_payload(&payload, 0x50, &mut driver);

        assert_eq!(sched.counters().radio_events, 1);
        assert_eq!(sched.counters().frames_decoded, 0);
        assert!(driver.diagnostics.is_empty());
    }

    #[test]
    fn repeated_incoming_frame_echoes_once() {
        let (mut sched, mut driver, _) = started(5);
        let peer = ObservationVector::new(id(4)).encode();

        sched.on_frame_payload(&peer, 0x48, &mut driver);
        sched.on_frame_payload(&peer, 0x48, &mut driver);

        let echoes = driver
            .diagnostics
            .iter()
            .filter(|d| String::from_utf8_lossy(d).contains(r#""type":"rx""#))
            .count();
        assert_eq!(echoes, 1);
        // Both events still merged (readings supersede each other).
        assert_eq!(sched.counters().merges_applied, 2);
    }

    #[test]
    fn housekeeping_flushes_counters_past_the_threshold() {
        let (mut sched, mut driver, mut handle) = started(5);
        // indicator_count increments once per tick; run enough full
        // cycles for the housekeeping phase to see it past the period.
        let cycles = (INDICATOR_PERIOD as usize / 9) + 2;
        for _ in 0..cycles * 9 {
            tick(&mut sched, &mut driver, &mut handle);
        }

        assert!(driver.indicator.contains(&true));
        let flushes = driver
            .diagnostics
            .iter()
            .filter(|d| String::from_utf8_lossy(d).contains(r#""type":"counters""#))
            .count();
        assert_eq!(flushes, 1);
    }
}
