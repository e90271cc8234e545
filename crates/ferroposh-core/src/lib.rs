pub mod cmdlet;
pub mod connection;
pub mod engine;
pub mod host;
pub mod packet;
pub mod pipe_name;
pub mod transport;
pub(crate) mod workers;

pub use cmdlet::{PsCmdlet, WriteError};
pub use connection::{Connection, PipeConnection, StdioConnection};
pub use engine::{EngineError, Invocation, ScriptEngine, ShimEngine};
pub use host::PsHostFacade;
pub use packet::{data_packet, guid_packet, Packet, PacketKind};
pub use pipe_name::{default_pipe_name, ProcessIdentity};
pub use transport::OutOfProcTransport;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("unknown pipeline {0}")]
    UnknownPipeline(Uuid),

    #[error("host does not support {0}")]
    HostMethodUnavailable(&'static str),

    #[error("host call failed: {0}")]
    HostCallFailed(String),

    #[error("process introspection unavailable: {0}")]
    ProcessIntrospectionUnavailable(String),

    /// Internal unwind signal raised when a script touches the facade
    /// after the client requested a stop. Never reported to the client
    /// as a failure.
    #[error("pipeline stop requested")]
    CooperativeStop,

    #[error("PSRP codec failure: {0}")]
    Codec(#[from] ferroposh_psrp::PsrpError),

    #[error("IO failure: {0}")]
    Io(#[from] std::io::Error),
}
