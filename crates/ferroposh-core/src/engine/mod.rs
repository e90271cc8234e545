mod shim;

pub use shim::ShimEngine;

use std::collections::HashMap;

use ferroposh_psrp::PsValue;

use crate::cmdlet::PsCmdlet;
use crate::ServerError;

/// How one script invocation ended, when it did not complete normally.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The script failed to parse; nothing was executed.
    #[error("{message}")]
    Parse {
        message: String,
        detail: Option<String>,
    },

    /// The client requested a stop and the script unwound through the
    /// facade's cooperative-termination signal.
    #[error("script stop requested")]
    Stopped,

    /// The script started but raised an error it did not handle.
    #[error("{message}")]
    Runtime {
        message: String,
        detail: Option<String>,
    },
}

impl EngineError {
    /// Map a facade failure into the engine's vocabulary: the stop
    /// signal traverses unchanged, anything else is a runtime failure.
    pub fn from_facade(error: ServerError) -> Self {
        match error {
            ServerError::CooperativeStop => Self::Stopped,
            other => Self::Runtime {
                message: other.to_string(),
                detail: None,
            },
        }
    }
}

/// The bindings one pipeline invocation hands to its script: positional
/// arguments, named parameters, and the (blocking) input stream.
pub struct Invocation<'a> {
    pub args: Vec<PsValue>,
    pub params: HashMap<String, PsValue>,
    pub input: &'a mut dyn Iterator<Item = PsValue>,
}

/// The executor seam. The surrounding worker threading, cancellation,
/// and host-call machinery only depend on this one operation, so the
/// backing can be swapped for an embedded interpreter or an
/// out-of-process engine without touching the transport.
pub trait ScriptEngine: Send + Sync {
    fn run(
        &self,
        script: &str,
        invocation: Invocation<'_>,
        cmdlet: &PsCmdlet,
    ) -> Result<(), EngineError>;
}
