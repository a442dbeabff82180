//! # vitalgate-server
//!
//! Gateway daemon library for vitalgate.
//!
//! This library provides the status API handlers, shared state and logging
//! setup used by the `vitalgate-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
