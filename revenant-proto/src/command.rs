use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

/// The `StartCollection` request, also kept verbatim inside the sink
/// actor's state so `StatusCollection` can echo it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartCollectionRequest {
    pub frequency_millis: u64,
    pub systems: Vec<String>,
    pub queue_depth: usize,
}

/// The OOB command/reply enum. Names are wire-stable:
/// renaming a variant breaks compatibility with any peer running an
/// older build, so this enum grows by addition only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Ack,
    Error { message: String },

    CollectOnce { systems: Vec<String> },
    CollectOnceReply { values: Vec<Vec<u8>> },

    StartCollection(StartCollectionRequest),
    StopCollection,

    StatusCollection,
    StatusCollectionReply {
        start: Option<DateTime<Utc>>,
        queue_free: usize,
        sink_enabled: bool,
        measurement_enabled: bool,
    },

    RegisterSink,

    CollectDirectories { dirs: Vec<String> },
    CollectDirectoriesReply { values: Vec<Vec<String>> },
}

/// One OOB frame: `{version, tag, command}`. The peer must ack every
/// frame it receives, even ones it doesn't understand, or the sender
/// will hang waiting for the tag to be freed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OobFrame {
    pub version: u32,
    pub tag: u64,
    pub command: Command,
}

impl OobFrame {
    pub fn new(tag: u64, command: Command) -> Self {
        Self { version: PROTOCOL_VERSION, tag, command }
    }
}
