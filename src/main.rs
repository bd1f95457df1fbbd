//! proxmap firmware — duty-cycled BLE proximity beacon.
//!
//! Thin platform layer over the portable core: embassy timers drive the
//! duty-cycle scheduler, trouble-host provides the broadcaster/observer
//! radio roles, and the frame rides in the advertisement's
//! manufacturer-specific AD structure. All protocol logic lives in the
//! library; this binary only wires the [`RadioDriver`] seam to hardware.

#![no_std]
#![no_main]

extern crate alloc;

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use static_cell::StaticCell;

use trouble_host::prelude::*;

use proxmap::driver::{RadioDriver, RadioMode};
use proxmap::frame::{BeaconId, FRAME_LEN, MARKER};
use proxmap::schedule::Scheduler;

/// This unit's character number (1..=6). Set per device before flashing.
const BEACON_ID: u8 = 5;

/// A raw advertisement as delivered by the BLE stack runner.
struct AdvEvent {
    data: heapless::Vec<u8, 31>,
    rssi: i8,
}

/// Radio state requested by the scheduler for the current phase.
#[derive(Clone, Copy)]
struct RadioCommand {
    mode: RadioMode,
    payload: Option<[u8; FRAME_LEN]>,
}

/// Advertisement reports from the stack runner to the duty-cycle task.
static RX_CHANNEL: Channel<CriticalSectionRawMutex, AdvEvent, 16> = Channel::new();

/// Latest radio command from the duty-cycle task to the radio task.
/// Only the newest command matters, so a signal (not a queue).
static RADIO_SIGNAL: Signal<CriticalSectionRawMutex, RadioCommand> = Signal::new();

/// [`RadioDriver`] implementation that records the scheduler's commands;
/// the async tasks apply them between ticks.
struct PendingRadio {
    mode: RadioMode,
    payload: Option<[u8; FRAME_LEN]>,
    next_delay_ms: u64,
    last_handle: u32,
    indicator: bool,
}

impl PendingRadio {
    const fn new() -> Self {
        Self {
            mode: RadioMode::Idle,
            payload: None,
            next_delay_ms: 0,
            last_handle: 0,
            indicator: false,
        }
    }
}

impl RadioDriver for PendingRadio {
    type Handle = u32;

    fn set_mode(&mut self, mode: RadioMode) {
        self.mode = mode;
    }

    fn set_advertised_payload(&mut self, payload: Option<&[u8; FRAME_LEN]>) {
        self.payload = payload.copied();
    }

    fn schedule_after(&mut self, after_ms: u64, _repeating: bool) -> u32 {
        self.next_delay_ms = after_ms;
        self.last_handle = self.last_handle.wrapping_add(1);
        self.last_handle
    }

    fn set_indicator(&mut self, on: bool) {
        self.indicator = on;
    }

    fn write_diagnostic(&mut self, bytes: &[u8]) {
        if let Ok(s) = core::str::from_utf8(bytes) {
            log::info!("{}", s.trim_end());
        }
    }
}

/// EventHandler for BLE advertisement reports from trouble-host.
///
/// Copies the raw AD bytes plus measured RSSI to the duty-cycle task.
/// Called synchronously from the runner — must not block.
struct ScanEventHandler;

impl EventHandler for ScanEventHandler {
    fn on_adv_reports(&self, mut it: LeAdvReportsIter<'_>) {
        while let Some(Ok(report)) = it.next() {
            let mut data = heapless::Vec::new();
            if data.extend_from_slice(report.data).is_ok() {
                let _ = RX_CHANNEL.try_send(AdvEvent {
                    data,
                    rssi: report.rssi,
                });
            }
        }
    }
}

/// Locate our frame inside raw AD structures: the manufacturer-specific
/// structure whose type byte is the frame marker and whose length is one
/// whole frame. Returns the slice starting at the marker byte.
fn locate_frame(ad_data: &[u8]) -> Option<&[u8]> {
    let mut pos = 0;
    while pos < ad_data.len() {
        let len = ad_data[pos] as usize;
        if len == 0 || pos + 1 + len > ad_data.len() {
            break;
        }
        if len == FRAME_LEN && ad_data[pos + 1] == MARKER {
            return Some(&ad_data[pos + 1..pos + 1 + FRAME_LEN]);
        }
        pos += 1 + len;
    }
    None
}

#[esp_rtos::main]
async fn main(_spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Heap for the BLE stack.
    esp_alloc::heap_allocator!(size: 64 * 1024);

    // Start the RTOS — requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!(
        "proxmap character {} v{} starting",
        BEACON_ID,
        env!("CARGO_PKG_VERSION")
    );

    // Indicator LED, on during boot like the original hardware.
    let mut led = Output::new(peripherals.GPIO9, Level::High, OutputConfig::default());

    // ── BLE radio initialization ───────────────────────────────────────

    let connector =
        esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default())
            .expect("BLE connector init failed");

    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 2>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xff, 0x9b, 0x4c, BEACON_ID, 0x31, 0xd2]);

    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        mut peripheral,
        central,
        mut runner,
        ..
    } = stack.build();

    log::info!("BLE radio initialized");

    let scan_handler = ScanEventHandler;

    let beacon_id = BeaconId::new(BEACON_ID).expect("beacon id out of range");

    // ── Orchestration ──────────────────────────────────────────────────
    //
    // Three concurrent futures via join3:
    //   1. BLE stack runner (drives HCI, delivers scan reports)
    //   2. Duty-cycle task (ticks the scheduler, drains received frames)
    //   3. Radio task (applies mode commands as advertiser/scanner
    //      sessions)

    let _ = embassy_futures::join::join3(
        // ── Runner: drives the BLE stack ────────────────────────────────
        async {
            loop {
                if let Err(e) = runner.run_with_handler(&scan_handler).await {
                    log::error!("BLE runner error: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        // ── Duty cycle: timer ticks and frame ingestion ─────────────────
        async {
            let mut radio = PendingRadio::new();
            let mut scheduler: Scheduler<u32> = Scheduler::new(beacon_id);
            scheduler.start(&mut radio);
            let mut handle = radio.last_handle;

            loop {
                Timer::after(Duration::from_millis(radio.next_delay_ms)).await;

                // Everything heard during the last window merges before
                // the tick it could affect.
                while let Ok(ev) = RX_CHANNEL.try_receive() {
                    if let Some(payload) = locate_frame(&ev.data) {
                        // The controller reports signed dBm; the protocol
                        // carries the raw strength register byte.
                        scheduler.on_frame_payload(payload, ev.rssi as u8, &mut radio);
                    }
                }

                scheduler.on_timer_fired(handle, &mut radio);
                handle = radio.last_handle;

                led.set_level(if radio.indicator { Level::High } else { Level::Low });
                RADIO_SIGNAL.signal(RadioCommand {
                    mode: radio.mode,
                    payload: radio.payload,
                });
            }
        },
        // ── Radio: apply the commanded mode ─────────────────────────────
        async {
            let mut scanner = trouble_host::scan::Scanner::new(central);
            let mut cmd = RadioCommand {
                mode: RadioMode::Idle,
                payload: None,
            };

            loop {
                cmd = match cmd.mode {
                    RadioMode::Idle => RADIO_SIGNAL.wait().await,
                    RadioMode::Listen => match scanner.scan(&ScanConfig::default()).await {
                        // Session stays alive until the next command.
                        Ok(_session) => RADIO_SIGNAL.wait().await,
                        Err(e) => {
                            log::error!("BLE scan failed to start: {:?}", e);
                            RADIO_SIGNAL.wait().await
                        }
                    },
                    RadioMode::Advertise => {
                        if let Some(frame) = cmd.payload {
                            // One AD structure: length byte, then the
                            // frame (whose marker doubles as the AD
                            // type).
                            let mut adv_data = [0u8; FRAME_LEN + 1];
                            adv_data[0] = FRAME_LEN as u8;
                            adv_data[1..].copy_from_slice(&frame);

                            match peripheral
                                .advertise(
                                    &Default::default(),
                                    Advertisement::NonconnectableNonscannableUndirected {
                                        adv_data: &adv_data,
                                    },
                                )
                                .await
                            {
                                // Advertiser stays up until the next
                                // command.
                                Ok(_advertiser) => RADIO_SIGNAL.wait().await,
                                Err(e) => {
                                    log::error!("BLE advertise error: {:?}", e);
                                    RADIO_SIGNAL.wait().await
                                }
                            }
                        } else {
                            RADIO_SIGNAL.wait().await
                        }
                    }
                };
            }
        },
    )
    .await;
}
