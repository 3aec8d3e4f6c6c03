//! Wire types shared by the collector agent, the processor, and the
//! replay engine. This crate does no I/O; it only defines the shapes
//! that cross a process boundary or a journal file.

pub mod command;
pub mod measurement;

pub use command::{Command, OobFrame, StartCollectionRequest, PROTOCOL_VERSION};
pub use measurement::{validate_system_path, Measurement, SeriesKey, SystemPathError, WrappedMeasurement};
