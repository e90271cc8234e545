use std::sync::{Arc, PoisonError};

use ferroposh_psrp::{
    HostInfo, HostRequestor, PsCredential, PsInvocationState, PsValue, ServerPipeline,
};
use tracing::debug;

use crate::transport::Outbound;
use crate::workers::{HostRegistry, HostResponseValue};
use crate::ServerError;

/// Synchronous host API for scripts: requests are serialized onto the
/// wire and the calling thread blocks until the matching response event
/// arrives (or the pipeline leaves Running).
pub struct PsHostFacade {
    pipeline: ServerPipeline,
    outbound: Arc<Outbound>,
    requestor: HostRequestor,
    host_info: Option<HostInfo>,
    registry: Arc<HostRegistry>,
}

impl PsHostFacade {
    /// Bind to the pipeline's own host when it declared one and did not
    /// ask for the runspace host; otherwise fall back to pool scope.
    pub(crate) fn new(
        pipeline: &ServerPipeline,
        pipeline_registry: &Arc<HostRegistry>,
        runspace_registry: &Arc<HostRegistry>,
        outbound: &Arc<Outbound>,
    ) -> Self {
        let pipeline_host = pipeline.metadata().and_then(|m| m.host_info);

        let (requestor, host_info, registry) = match pipeline_host {
            Some(info) if !info.use_runspace_host => {
                debug!(pipeline_id = %pipeline.id(), "using pipeline host info");
                (
                    HostRequestor::for_pipeline(pipeline),
                    Some(info),
                    Arc::clone(pipeline_registry),
                )
            }
            _ => {
                debug!(pipeline_id = %pipeline.id(), "using runspace host info");
                (
                    HostRequestor::for_pool(pipeline.pool()),
                    pipeline.pool().host_info(),
                    Arc::clone(runspace_registry),
                )
            }
        };

        Self {
            pipeline: pipeline.clone(),
            outbound: Arc::clone(outbound),
            requestor,
            host_info,
            registry,
        }
    }

    fn ensure_host_ui(&self, method: &'static str) -> Result<(), ServerError> {
        match self.host_info {
            Some(info) if !info.is_host_ui_null => Ok(()),
            _ => Err(ServerError::HostMethodUnavailable(method)),
        }
    }

    /// Write one line to the remote host. Void, no rendezvous.
    pub fn write_line(&self, line: &str) -> Result<(), ServerError> {
        self.ensure_host_ui("write_line")?;
        self.requestor.write_line(line)?;
        self.outbound.send_pending(self.pipeline.pool())
    }

    /// Write one line to the remote host's error stream. Void.
    pub fn write_error_line(&self, line: &str) -> Result<(), ServerError> {
        self.ensure_host_ui("write_error_line")?;
        self.requestor.write_error_line(line)?;
        self.outbound.send_pending(self.pipeline.pool())
    }

    /// Prompt the remote host for one line of input.
    pub fn read_line(&self) -> Result<String, ServerError> {
        self.ensure_host_ui("read_line")?;
        let call_id = self.requestor.read_line()?;
        match self.wait_response(call_id)? {
            Some(PsValue::Str(line)) => Ok(line),
            Some(other) => Ok(other.to_string()),
            None => Ok(String::new()),
        }
    }

    /// Prompt the remote host for a credential.
    pub fn prompt_for_credential(
        &self,
        caption: &str,
        message: &str,
        username: Option<&str>,
        target_name: Option<&str>,
    ) -> Result<PsCredential, ServerError> {
        self.ensure_host_ui("prompt_for_credential")?;
        let call_id = self
            .requestor
            .prompt_for_credential(caption, message, username, target_name)?;

        let value = self.wait_response(call_id)?.ok_or_else(|| {
            ServerError::HostCallFailed("credential prompt returned no value".to_string())
        })?;
        PsCredential::try_from(&value).map_err(ServerError::Codec)
    }

    /// The synchronous request rendezvous: flush the request under the
    /// waiter lock, then sleep until the call id resolves or the
    /// pipeline is torn down.
    fn wait_response(&self, call_id: i64) -> Result<Option<PsValue>, ServerError> {
        let mut results = self.registry.lock();
        self.outbound.send_pending(self.pipeline.pool())?;
        debug!(call_id, "waiting for host response");

        loop {
            if let Some(value) = results.remove(&call_id) {
                debug!(call_id, "host response received");
                return match value {
                    HostResponseValue::Value(value) => Ok(value),
                    HostResponseValue::Error(record) => Err(ServerError::HostCallFailed(format!(
                        "received error from host call: {}",
                        record.message
                    ))),
                };
            }

            if self.pipeline.state() != PsInvocationState::Running {
                // The pipeline is being torn down; unwind the script.
                return Err(ServerError::CooperativeStop);
            }

            results = self
                .registry
                .waiter
                .wait(results)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
