//! Pulls measurements from one or more collector agents, archives them
//! to an encrypted journal, and feeds them through the differentiator.
//! Owns the reconnect-with-backoff policy so an agent reboot or a
//! network blip doesn't need operator intervention.

mod error;
mod reconnect;
mod sink;

pub use error::ProcessorError;
pub use reconnect::{run, AgentEndpoint, BackoffConfig};
pub use sink::{journal_writer_for_site, JournalSink, NullRecordSink, RecordSink};
