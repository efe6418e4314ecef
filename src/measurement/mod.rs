//! Measurement records produced from driver callbacks.
//!
//! The wlmData driver reports every state change and measurement through a
//! single callback carrying five raw values. [`DataFactory`] turns those into
//! typed, immutable [`DataPackage`]s that are fanned out over the
//! [`EventBus`](crate::event_bus::EventBus).

pub mod factory;
pub mod mode;
pub mod package;

pub use factory::{data_factory, DataFactory, UnknownMeasurementKind};
pub use package::{
    DataPackage, Measurement, PatternStatistic, PidParameter, Quantity, RawEvent, Reading,
    ServerEvent, StateKind,
};
