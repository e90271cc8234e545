use crate::message::{MessageBody, MessageType};
use crate::messages::ErrorRecord;
use crate::value::{PsObject, PsValue};
use crate::PsrpError;

/// Runspace pool lifecycle states.
/// <https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-psrp/b05495bc-a9b2-4794-9f43-4bf1f3633900>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunspacePoolState {
    BeforeOpen = 0,
    Opening = 1,
    Opened = 2,
    Closed = 3,
    Closing = 4,
    Broken = 5,
    NegotiationSent = 6,
    NegotiationSucceeded = 7,
    Connecting = 8,
    Disconnected = 9,
}

impl RunspacePoolState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for RunspacePoolState {
    type Error = PsrpError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::BeforeOpen),
            1 => Ok(Self::Opening),
            2 => Ok(Self::Opened),
            3 => Ok(Self::Closed),
            4 => Ok(Self::Closing),
            5 => Ok(Self::Broken),
            6 => Ok(Self::NegotiationSent),
            7 => Ok(Self::NegotiationSucceeded),
            8 => Ok(Self::Connecting),
            9 => Ok(Self::Disconnected),
            _ => Err(PsrpError::InvalidMessage(format!(
                "invalid RunspacePoolState value: {value}"
            ))),
        }
    }
}

/// RUNSPACEPOOL_STATE, sent whenever the pool transitions.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct RunspacePoolStateMessage {
    pub state: RunspacePoolState,
    #[builder(default)]
    pub error: Option<ErrorRecord>,
}

impl RunspacePoolStateMessage {
    pub fn opened() -> Self {
        Self::builder().state(RunspacePoolState::Opened).build()
    }

    pub fn closed() -> Self {
        Self::builder().state(RunspacePoolState::Closed).build()
    }

    pub fn broken(error: ErrorRecord) -> Self {
        Self::builder()
            .state(RunspacePoolState::Broken)
            .error(Some(error))
            .build()
    }
}

impl MessageBody for RunspacePoolStateMessage {
    fn message_type(&self) -> MessageType {
        MessageType::RunspacePoolState
    }

    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property("RunspaceState", PsValue::I32(self.state.as_i32()));
        if let Some(error) = &self.error {
            obj.push_property("ExceptionAsErrorRecord", error.to_ps_value());
        }
        PsValue::object(obj)
    }
}

impl TryFrom<&PsValue> for RunspacePoolStateMessage {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("RunspacePoolState is not an object".into()))?;

        let state = obj
            .property("RunspaceState")
            .and_then(PsValue::as_i32)
            .ok_or_else(|| PsrpError::InvalidMessage("RunspacePoolState missing RunspaceState".into()))?;

        let error = obj
            .property("ExceptionAsErrorRecord")
            .map(ErrorRecord::try_from)
            .transpose()?;

        Ok(Self {
            state: RunspacePoolState::try_from(state)?,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ErrorCategory;

    #[test]
    fn opened_state_round_trips() {
        let message = RunspacePoolStateMessage::opened();
        let restored = RunspacePoolStateMessage::try_from(&message.to_ps_value()).unwrap();
        assert_eq!(message, restored);
    }

    #[test]
    fn broken_state_carries_the_error_record() {
        let record = ErrorRecord::builder()
            .message("boom".to_string())
            .category(ErrorCategory::ReadError)
            .fully_qualified_error_id("ProcessRunspaceMessageFailure".to_string())
            .build();
        let message = RunspacePoolStateMessage::broken(record);

        let restored = RunspacePoolStateMessage::try_from(&message.to_ps_value()).unwrap();
        assert_eq!(restored.state, RunspacePoolState::Broken);
        let error = restored.error.expect("error record present");
        assert_eq!(error.message, "boom");
        assert_eq!(
            error.fully_qualified_error_id,
            "ProcessRunspaceMessageFailure"
        );
    }

    #[test]
    fn out_of_range_state_is_rejected() {
        assert!(RunspacePoolState::try_from(12).is_err());
    }
}
