use crate::message::{MessageBody, MessageType};
use crate::messages::ErrorRecord;
use crate::value::{PsObject, PsValue};
use crate::PsrpError;

/// Pipeline invocation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsInvocationState {
    NotStarted = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
    Completed = 4,
    Failed = 5,
    Disconnected = 6,
}

impl PsInvocationState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }
}

impl TryFrom<i32> for PsInvocationState {
    type Error = PsrpError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NotStarted),
            1 => Ok(Self::Running),
            2 => Ok(Self::Stopping),
            3 => Ok(Self::Stopped),
            4 => Ok(Self::Completed),
            5 => Ok(Self::Failed),
            6 => Ok(Self::Disconnected),
            _ => Err(PsrpError::InvalidMessage(format!(
                "invalid PsInvocationState value: {value}"
            ))),
        }
    }
}

/// PIPELINE_STATE, emitted when a pipeline reaches a terminal state (or
/// fails to start).
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct PipelineStateMessage {
    pub state: PsInvocationState,
    #[builder(default)]
    pub error: Option<ErrorRecord>,
}

impl PipelineStateMessage {
    pub fn completed() -> Self {
        Self::builder().state(PsInvocationState::Completed).build()
    }

    pub fn failed(error: ErrorRecord) -> Self {
        Self::builder()
            .state(PsInvocationState::Failed)
            .error(Some(error))
            .build()
    }

    pub fn stopped(error: ErrorRecord) -> Self {
        Self::builder()
            .state(PsInvocationState::Stopped)
            .error(Some(error))
            .build()
    }
}

impl MessageBody for PipelineStateMessage {
    fn message_type(&self) -> MessageType {
        MessageType::PipelineState
    }

    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property("PipelineState", PsValue::I32(self.state.as_i32()));
        if let Some(error) = &self.error {
            obj.push_property("ExceptionAsErrorRecord", error.to_ps_value());
        }
        PsValue::object(obj)
    }
}

impl TryFrom<&PsValue> for PipelineStateMessage {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("PipelineState is not an object".into()))?;

        let state = obj
            .property("PipelineState")
            .and_then(PsValue::as_i32)
            .ok_or_else(|| PsrpError::InvalidMessage("PipelineState missing state".into()))?;

        let error = obj
            .property("ExceptionAsErrorRecord")
            .map(ErrorRecord::try_from)
            .transpose()?;

        Ok(Self {
            state: PsInvocationState::try_from(state)?,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ErrorCategory;

    #[test]
    fn completed_round_trips() {
        let message = PipelineStateMessage::completed();
        let restored = PipelineStateMessage::try_from(&message.to_ps_value()).unwrap();
        assert_eq!(message, restored);
        assert!(restored.state.is_terminal());
    }

    #[test]
    fn failed_round_trips_with_error() {
        let message = PipelineStateMessage::failed(
            ErrorRecord::builder()
                .message("def (".to_string())
                .category(ErrorCategory::ParserError)
                .fully_qualified_error_id("InvalidScriptSyntax".to_string())
                .build(),
        );

        let restored = PipelineStateMessage::try_from(&message.to_ps_value()).unwrap();
        assert_eq!(restored.state, PsInvocationState::Failed);
        assert_eq!(
            restored.error.map(|e| e.fully_qualified_error_id),
            Some("InvalidScriptSyntax".to_string())
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!PsInvocationState::NotStarted.is_terminal());
        assert!(!PsInvocationState::Running.is_terminal());
        assert!(!PsInvocationState::Stopping.is_terminal());
        assert!(PsInvocationState::Stopped.is_terminal());
        assert!(PsInvocationState::Completed.is_terminal());
        assert!(PsInvocationState::Failed.is_terminal());
        assert!(!PsInvocationState::Disconnected.is_terminal());
    }
}
