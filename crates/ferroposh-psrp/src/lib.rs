pub mod fragment;
pub mod host;
pub mod message;
pub mod messages;
pub mod pipeline;
pub mod pool;
pub mod value;

pub use fragment::{Defragmenter, Fragment, Fragmenter};
pub use host::{HostRequestor, VOID_CALL_ID};
pub use message::{Destination, MessageBody, MessageType, PsrpMessage};
pub use messages::*;
pub use pipeline::{PipelineMetadata, ServerPipeline};
pub use pool::{CreatePipelineEvent, PsrpEvent, ServerRunspacePool};
pub use value::{PsObject, PsProperty, PsValue};

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PsrpError {
    #[error("invalid PSRP message: {0}")]
    InvalidMessage(String),

    #[error("unexpected message for a server runspace pool: {0}")]
    UnexpectedMessage(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("unknown pipeline {0} referenced by message")]
    UnknownPipeline(Uuid),

    #[error("failed to parse CLIXML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("failed to write CLIXML: {0}")]
    XmlWrite(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PsrpError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Stream a payload travels on inside the out-of-process framing.
///
/// Host-call exchanges that expect a reply ride the `PromptResponse`
/// stream; everything else is `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamType {
    #[default]
    Default,
    PromptResponse,
}

/// One run of fragment bytes ready for (or received from) the transport,
/// together with the scope it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsrpPayload {
    pub data: Vec<u8>,
    pub stream_type: StreamType,
    /// `None` addresses the runspace pool, `Some` a pipeline.
    pub pipeline_id: Option<Uuid>,
}

impl PsrpPayload {
    pub fn new(data: Vec<u8>, stream_type: StreamType, pipeline_id: Option<Uuid>) -> Self {
        Self {
            data,
            stream_type,
            pipeline_id,
        }
    }
}
