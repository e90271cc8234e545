use tracing::debug;

use crate::messages::{HostCall, HostMethodId};
use crate::pipeline::ServerPipeline;
use crate::pool::ServerRunspacePool;
use crate::value::PsValue;
use crate::{PsrpError, StreamType};

/// Call id used for host methods that never produce a response, per
/// MS-PSRP's convention for void host calls.
pub const VOID_CALL_ID: i64 = -100;

/// Emits host-call messages for one scope (the pool, or a single
/// pipeline). Response-bearing methods return the minted call id; the
/// caller owns the rendezvous with the matching HostResponse event.
#[derive(Debug, Clone)]
pub struct HostRequestor {
    pool: ServerRunspacePool,
    pipeline: Option<ServerPipeline>,
}

impl HostRequestor {
    pub fn for_pool(pool: &ServerRunspacePool) -> Self {
        Self {
            pool: pool.clone(),
            pipeline: None,
        }
    }

    pub fn for_pipeline(pipeline: &ServerPipeline) -> Self {
        Self {
            pool: pipeline.pool().clone(),
            pipeline: Some(pipeline.clone()),
        }
    }

    fn invoke(&self, method: HostMethodId, parameters: Vec<PsValue>) -> Result<i64, PsrpError> {
        let call_id = if method.expects_response() {
            self.pool.next_call_id()
        } else {
            VOID_CALL_ID
        };

        let call = HostCall::builder()
            .call_id(call_id)
            .method(method)
            .parameters(parameters)
            .pipeline_scope(self.pipeline.is_some())
            .build();

        let stream = if method.expects_response() {
            StreamType::PromptResponse
        } else {
            StreamType::Default
        };

        debug!(call_id, method = method.name(), "emitting host call");
        self.pool.queue_message(
            &call,
            self.pipeline.as_ref().map(ServerPipeline::id),
            stream,
        )?;
        Ok(call_id)
    }

    /// WriteLine2: write one line to the host UI. Void.
    pub fn write_line(&self, line: &str) -> Result<(), PsrpError> {
        self.invoke(HostMethodId::WriteLine2, vec![PsValue::str(line)])
            .map(|_| ())
    }

    /// WriteErrorLine: write one line to the host error stream. Void.
    pub fn write_error_line(&self, line: &str) -> Result<(), PsrpError> {
        self.invoke(HostMethodId::WriteErrorLine, vec![PsValue::str(line)])
            .map(|_| ())
    }

    /// ReadLine: prompt the host for one line of input.
    pub fn read_line(&self) -> Result<i64, PsrpError> {
        self.invoke(HostMethodId::ReadLine, Vec::new())
    }

    /// PromptForCredential1: ask the host for a credential.
    pub fn prompt_for_credential(
        &self,
        caption: &str,
        message: &str,
        username: Option<&str>,
        target_name: Option<&str>,
    ) -> Result<i64, PsrpError> {
        self.invoke(
            HostMethodId::PromptForCredential1,
            vec![
                PsValue::str(caption),
                PsValue::str(message),
                username.map_or(PsValue::Nil, PsValue::from),
                target_name.map_or(PsValue::Nil, PsValue::from),
            ],
        )
    }
}
