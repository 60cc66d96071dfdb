//! Core coordination fabric for the linret gateway.
//!
//! This crate is platform-agnostic: it knows how to decode/encode the wire
//! protocols, run the device registry, schedule streaming jobs, and keep a
//! GPS-anchored clock, but it never touches a socket or a TTY directly.
//! Those are injected through the traits in [`hal`].

pub mod error;
pub mod types;
pub mod bitcursor;
pub mod adc;
pub mod hal;
pub mod bus;
pub mod config;
pub mod protocol;
pub mod chassis_link;
pub mod device;
pub mod registry;
pub mod timebase;
pub mod coordinator;
pub mod stream;
pub mod cslink;

pub use error::LinretError;
pub use types::{FullAddr, IfType, NodeAddr, Serial};
