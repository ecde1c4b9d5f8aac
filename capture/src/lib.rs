//! Time-of-arrival capture core
//!
//! # Design
//! Up to [MAX_CHANNELS] sensor lines each report the arrival of a leading edge. A capture engine
//! latches the first arrival per channel and cycle into lock-free storage from interrupt context.
//! The [Arbiter] decides when all configured channels have reported and derives the delay of
//! every channel relative to the earliest one. The [Cycle] state machine hands the resulting
//! [ResultVector] to a [Transport] exactly once, holds off for a cooldown period and then rearms
//! the engine.
//!
//! Two engines share the consumer-facing [Capture] contract:
//! * [edge] latches a free-running microsecond counter from a per-channel edge interrupt.
//! * [polling] samples all lines at a fixed rate into a bounded queue and timestamps 0→1
//!   transitions with the sample tick.
//!
//! All timestamps are wrapping `u32` counter values. Differences are taken with wrapping
//! arithmetic, so counter overflow during a cycle is harmless as long as the spread of a single
//! detection stays below `i32::MAX` ticks.
#![cfg_attr(not(test), no_std)]

mod arbiter;
mod config;
mod cycle;
pub mod edge;
mod engine;
mod latch;
pub mod packet;
pub mod polling;
mod transport;

pub use arbiter::*;
pub use config::*;
pub use cycle::*;
pub use engine::*;
pub use latch::*;
pub use transport::*;

/// The maximum number of supported channels.
pub const MAX_CHANNELS: usize = 8;

/// A set of channels, bit `i` representing channel `i`.
pub type ChannelMask = u8;

/// Construct the mask covering the first `channels` channels.
pub const fn channel_mask(channels: usize) -> ChannelMask {
    if channels >= MAX_CHANNELS {
        ChannelMask::MAX
    } else {
        ((1u16 << channels) - 1) as ChannelMask
    }
}
