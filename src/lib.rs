//! SCPI network server for HighFinesse wavemeters.
//!
//! The vendor's wlmData library controls every wavemeter of a machine through
//! one process-wide, stateful instance: calls address whichever wavemeter was
//! selected last. This crate multiplexes that single driver onto independent
//! per-wavemeter sessions and exposes each session as a line-based SCPI server.
//!
//! # Layers
//!
//! - [`driver`]: the synchronous [`WavemeterDriver`](driver::WavemeterDriver)
//!   boundary with the FFI implementation (feature `wlm-sdk`) and an
//!   in-process simulation.
//! - [`session`]: [`Wavemeter`](session::Wavemeter) sessions sharing a
//!   [`DriverHub`](session::DriverHub) that serializes selection and calls.
//! - [`measurement`] and [`event_bus`]: typed packages built from driver
//!   callbacks, fanned out per wavemeter.
//! - [`scpi`]: header matching, request parsing, command tables and reply
//!   encoding.
//! - [`server`]: TCP listeners and per-client connection handling.
//! - [`config`]: layered configuration.

pub mod channel_list;
pub mod config;
pub mod driver;
pub mod error;
pub mod event_bus;
pub mod measurement;
pub mod scpi;
pub mod server;
pub mod session;

/// Wavemeter product id (version number) as used by wlmData.
pub type ProductId = i32;

pub use config::Settings;
pub use error::{CommandError, ScpiError, ServerError, SessionError};
pub use server::WavemeterServer;
pub use session::{DriverHub, Wavemeter};
