//! proxmap — decentralized proximity heat-map beacon protocol.
//!
//! A swarm of short-range radio beacons ("characters", identities 1..6)
//! alternate between broadcasting a compact signal-strength map and
//! listening for peers' broadcasts. Each beacon's 9-byte advertisement
//! frame carries its live belief about which beacons are physically near
//! it; there are no connections, no acknowledgments, and no persistence.
//!
//! This crate is the portable core: frame codec, change detection, tag
//! sequencing, observation merging, and the duty-cycle scheduler that
//! times the radio's idle/advertise/listen phases. It has no platform
//! dependencies and is testable on any host with `cargo test`. The
//! firmware binary (ESP32, behind the chip features) is a thin consumer
//! that provides the radio, timers, LED, and diagnostic transport via
//! the [`driver::RadioDriver`] seam.

#![cfg_attr(not(test), no_std)]

pub mod dedup;
pub mod diag;
pub mod driver;
pub mod frame;
pub mod merge;
pub mod schedule;
