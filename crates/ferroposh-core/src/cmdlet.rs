use std::sync::Arc;

use ferroposh_psrp::{ErrorCategory, ErrorRecord, PsInvocationState, PsValue, ServerPipeline};
use tracing::debug;

use crate::host::PsHostFacade;
use crate::transport::Outbound;
use crate::ServerError;

/// Arguments to [`PsCmdlet::write_error`]. Only `message` is required;
/// the rest mirror the knobs Write-Error exposes.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct WriteError {
    pub message: String,
    #[builder(default)]
    pub category: ErrorCategory,
    #[builder(default = "Microsoft.PowerShell.Commands.WriteErrorException".to_string())]
    pub error_id: String,
    #[builder(default)]
    pub target_object: Option<PsValue>,
    #[builder(default)]
    pub recommended_action: Option<String>,
    #[builder(default = "WriteErrorException".to_string())]
    pub category_reason: String,
    #[builder(default)]
    pub category_target_name: Option<String>,
    #[builder(default)]
    pub category_target_type: Option<String>,
}

/// The object a running script talks to: output, error, and host
/// writes, all gated on the pipeline's cooperative-stop state.
pub struct PsCmdlet {
    pipeline: ServerPipeline,
    outbound: Arc<Outbound>,
    host: PsHostFacade,
}

impl PsCmdlet {
    pub(crate) fn new(pipeline: ServerPipeline, outbound: Arc<Outbound>, host: PsHostFacade) -> Self {
        Self {
            pipeline,
            outbound,
            host,
        }
    }

    pub fn host(&self) -> &PsHostFacade {
        &self.host
    }

    /// The cooperative cancellation point: every facade entry checks
    /// whether the client signalled a stop since the last call.
    fn ensure_not_stopping(&self) -> Result<(), ServerError> {
        if self.pipeline.state() == PsInvocationState::Stopping {
            debug!(pipeline_id = %self.pipeline.id(), "stop observed at facade boundary");
            return Err(ServerError::CooperativeStop);
        }
        Ok(())
    }

    /// Write one line through the remote host UI.
    pub fn write_host(&self, message: &str) -> Result<(), ServerError> {
        self.ensure_not_stopping()?;
        self.host.write_line(message)
    }

    /// Emit one object on the pipeline's output stream.
    pub fn write_output(&self, value: PsValue) -> Result<(), ServerError> {
        self.ensure_not_stopping()?;
        self.pipeline.write_output(value)?;
        self.outbound.send_pending(self.pipeline.pool())
    }

    /// Emit a non-terminating error record, normalizing the category
    /// target from the target object when not given explicitly.
    pub fn write_error(&self, request: WriteError) -> Result<(), ServerError> {
        self.ensure_not_stopping()?;

        let target_name = request.category_target_name.or_else(|| {
            request
                .target_object
                .as_ref()
                .map(std::string::ToString::to_string)
        });
        let target_type = request.category_target_type.or_else(|| {
            request
                .target_object
                .as_ref()
                .map(|t| t.type_name().to_string())
        });

        let record = ErrorRecord::builder()
            .message(request.message.clone())
            .exception_type("Microsoft.PowerShell.Commands.WriteErrorException".to_string())
            .category(request.category)
            .activity(Some("Write-Error".to_string()))
            .reason(Some(request.category_reason))
            .target_name(target_name)
            .target_type(target_type)
            .target_object(request.target_object)
            .fully_qualified_error_id(request.error_id)
            .error_details_message(request.recommended_action.as_ref().map(|_| request.message))
            .recommended_action(request.recommended_action)
            .build();

        self.pipeline.write_error(&record)?;
        self.outbound.send_pending(self.pipeline.pool())
    }
}
