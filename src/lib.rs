#![no_std]

//! Driver layer for several chip-select-addressed devices sharing one SPI bus.
//!
//! The [`arbiter::Arbiter`] owns the shared [`bus::Transport`] and a fixed
//! registry of devices; the host calls [`arbiter::Arbiter::dispatch`] once per
//! scheduling tick and every device polls its own hardware from there. Each
//! device brackets its transfers with a scoped chip-select guard, so only one
//! device is ever addressed at a time.

pub mod arbiter;
pub mod bus;
pub mod cat25080;
pub mod delay;
pub mod device;
pub mod frame;
pub mod hc165;
pub mod hc595;
pub mod mcp2515;
pub mod zd25q80b;

mod chip_select;
mod interrupt;
mod timing;

#[cfg(test)]
extern crate std;

#[cfg(test)]
pub(crate) mod testutil;
