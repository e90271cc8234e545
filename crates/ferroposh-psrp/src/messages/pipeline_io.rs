use crate::message::{MessageBody, MessageType};
use crate::value::PsValue;
use crate::PsrpError;

/// PIPELINE_INPUT: one object fed into a running pipeline. The body is
/// the bare serialized value.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInput {
    pub data: PsValue,
}

impl MessageBody for PipelineInput {
    fn message_type(&self) -> MessageType {
        MessageType::PipelineInput
    }

    fn to_ps_value(&self) -> PsValue {
        self.data.clone()
    }
}

impl From<&PsValue> for PipelineInput {
    fn from(value: &PsValue) -> Self {
        Self {
            data: value.clone(),
        }
    }
}

/// END_OF_PIPELINE_INPUT: no body beyond the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndOfPipelineInput;

impl MessageBody for EndOfPipelineInput {
    fn message_type(&self) -> MessageType {
        MessageType::EndOfPipelineInput
    }

    fn to_ps_value(&self) -> PsValue {
        PsValue::Nil
    }
}

/// PIPELINE_OUTPUT: one object produced by a pipeline. Like input, the
/// body is the value itself with no wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub data: PsValue,
}

impl MessageBody for PipelineOutput {
    fn message_type(&self) -> MessageType {
        MessageType::PipelineOutput
    }

    fn to_ps_value(&self) -> PsValue {
        self.data.clone()
    }
}

impl TryFrom<&PsValue> for PipelineOutput {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        Ok(Self {
            data: value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_body_is_the_bare_value() {
        let output = PipelineOutput {
            data: PsValue::I64(2),
        };
        assert_eq!(output.to_ps_value(), PsValue::I64(2));
    }

    #[test]
    fn end_of_input_serializes_to_nil() {
        assert_eq!(EndOfPipelineInput.to_ps_value(), PsValue::Nil);
    }
}
