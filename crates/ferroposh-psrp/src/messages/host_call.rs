use crate::message::{MessageBody, MessageType};
use crate::messages::ErrorRecord;
use crate::value::{PsObject, PsValue};
use crate::PsrpError;

/// Remote host method identifiers, the subset this server can emit.
/// <https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-psrp/ddd2a4d1-797d-4d73-8372-7a77a62fb204>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMethodId {
    ReadLine = 11,
    WriteLine1 = 15,
    WriteLine2 = 16,
    WriteLine3 = 17,
    WriteErrorLine = 18,
    Prompt = 23,
    PromptForCredential1 = 24,
    PromptForCredential2 = 25,
}

impl HostMethodId {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadLine => "ReadLine",
            Self::WriteLine1 => "WriteLine1",
            Self::WriteLine2 => "WriteLine2",
            Self::WriteLine3 => "WriteLine3",
            Self::WriteErrorLine => "WriteErrorLine",
            Self::Prompt => "Prompt",
            Self::PromptForCredential1 => "PromptForCredential1",
            Self::PromptForCredential2 => "PromptForCredential2",
        }
    }

    /// Whether the remote host is expected to answer with a
    /// HostResponse message.
    pub fn expects_response(self) -> bool {
        matches!(
            self,
            Self::ReadLine | Self::Prompt | Self::PromptForCredential1 | Self::PromptForCredential2
        )
    }
}

impl TryFrom<i32> for HostMethodId {
    type Error = PsrpError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            11 => Ok(Self::ReadLine),
            15 => Ok(Self::WriteLine1),
            16 => Ok(Self::WriteLine2),
            17 => Ok(Self::WriteLine3),
            18 => Ok(Self::WriteErrorLine),
            23 => Ok(Self::Prompt),
            24 => Ok(Self::PromptForCredential1),
            25 => Ok(Self::PromptForCredential2),
            _ => Err(PsrpError::InvalidMessage(format!(
                "unsupported host method id: {value}"
            ))),
        }
    }
}

fn method_id_value(method: HostMethodId) -> PsValue {
    let mut obj = PsObject::with_type(&[
        "System.Management.Automation.Remoting.RemoteHostMethodId",
        "System.Enum",
        "System.ValueType",
        "System.Object",
    ]);
    obj.to_string = Some(method.name().to_string());
    obj.value = Some(PsValue::I32(method.as_i32()));
    PsValue::object(obj)
}

fn parameters_value(parameters: &[PsValue]) -> PsValue {
    let mut obj = PsObject::with_type(&["System.Collections.ArrayList", "System.Object"]);
    obj.value = Some(PsValue::List(parameters.to_vec()));
    PsValue::object(obj)
}

/// RUNSPACEPOOL_HOST_CALL / PIPELINE_HOST_CALL: server asks the remote
/// host to run a UI method. `ci`, `mi`, `mp` per MS-PSRP.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct HostCall {
    pub call_id: i64,
    pub method: HostMethodId,
    #[builder(default)]
    pub parameters: Vec<PsValue>,
    /// True when this call targets a pipeline rather than the pool.
    #[builder(default = false)]
    pub pipeline_scope: bool,
}

impl MessageBody for HostCall {
    fn message_type(&self) -> MessageType {
        if self.pipeline_scope {
            MessageType::PipelineHostCall
        } else {
            MessageType::RunspacePoolHostCall
        }
    }

    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property("ci", PsValue::I64(self.call_id));
        obj.push_property("mi", method_id_value(self.method));
        obj.push_property("mp", parameters_value(&self.parameters));
        PsValue::object(obj)
    }
}

impl HostCall {
    pub fn parse(value: &PsValue, pipeline_scope: bool) -> Result<Self, PsrpError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("host call is not an object".into()))?;

        let call_id = obj
            .property("ci")
            .and_then(PsValue::as_i64)
            .ok_or_else(|| PsrpError::InvalidMessage("host call missing ci".into()))?;

        let method = obj
            .property("mi")
            .and_then(|mi| mi.as_object())
            .and_then(|mi| mi.value.as_ref())
            .and_then(PsValue::as_i32)
            .ok_or_else(|| PsrpError::InvalidMessage("host call missing mi".into()))
            .and_then(HostMethodId::try_from)?;

        let parameters = obj
            .property("mp")
            .and_then(PsValue::as_list)
            .map(<[PsValue]>::to_vec)
            .unwrap_or_default();

        Ok(Self {
            call_id,
            method,
            parameters,
            pipeline_scope,
        })
    }
}

/// RUNSPACEPOOL_HOST_RESPONSE / PIPELINE_HOST_RESPONSE: the remote
/// host's answer. Carries either a result (`mr`) or an error (`me`).
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct HostResponse {
    pub call_id: i64,
    #[builder(default)]
    pub method: Option<HostMethodId>,
    #[builder(default)]
    pub result: Option<PsValue>,
    #[builder(default)]
    pub error: Option<ErrorRecord>,
    #[builder(default = false)]
    pub pipeline_scope: bool,
}

impl MessageBody for HostResponse {
    fn message_type(&self) -> MessageType {
        if self.pipeline_scope {
            MessageType::PipelineHostResponse
        } else {
            MessageType::RunspacePoolHostResponse
        }
    }

    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property("ci", PsValue::I64(self.call_id));
        if let Some(method) = self.method {
            obj.push_property("mi", method_id_value(method));
        }
        if let Some(result) = &self.result {
            obj.push_property("mr", result.clone());
        }
        if let Some(error) = &self.error {
            obj.push_property("me", error.to_ps_value());
        }
        PsValue::object(obj)
    }
}

impl HostResponse {
    pub fn parse(value: &PsValue, pipeline_scope: bool) -> Result<Self, PsrpError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("host response is not an object".into()))?;

        let call_id = obj
            .property("ci")
            .and_then(PsValue::as_i64)
            .ok_or_else(|| PsrpError::InvalidMessage("host response missing ci".into()))?;

        let method = obj
            .property("mi")
            .and_then(|mi| mi.as_object())
            .and_then(|mi| mi.value.as_ref())
            .and_then(PsValue::as_i32)
            .map(HostMethodId::try_from)
            .transpose()?;

        let error = obj.property("me").map(ErrorRecord::try_from).transpose()?;

        Ok(Self {
            call_id,
            method,
            result: obj.property("mr").cloned(),
            error,
            pipeline_scope,
        })
    }
}

/// A PSCredential payload, the answer to PromptForCredential.
#[derive(Debug, Clone, PartialEq, Eq, typed_builder::TypedBuilder)]
pub struct PsCredential {
    pub username: String,
    pub password: String,
}

impl PsCredential {
    pub fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::with_type(&[
            "System.Management.Automation.PSCredential",
            "System.Object",
        ]);
        obj.push_property("UserName", PsValue::str(self.username.clone()));
        obj.push_property("Password", PsValue::str(self.password.clone()));
        PsValue::object(obj)
    }
}

impl TryFrom<&PsValue> for PsCredential {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("credential is not an object".into()))?;

        let field = |name: &str| -> Result<String, PsrpError> {
            obj.property(name)
                .and_then(PsValue::as_str)
                .map(ToString::to_string)
                .ok_or_else(|| PsrpError::InvalidMessage(format!("credential missing {name}")))
        };

        Ok(Self {
            username: field("UserName")?,
            password: field("Password")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_call_round_trips() {
        let call = HostCall::builder()
            .call_id(7)
            .method(HostMethodId::PromptForCredential1)
            .parameters(vec![PsValue::str("caption"), PsValue::str("message")])
            .pipeline_scope(true)
            .build();

        let restored = HostCall::parse(&call.to_ps_value(), true).unwrap();
        assert_eq!(call, restored);
        assert_eq!(restored.message_type(), MessageType::PipelineHostCall);
    }

    #[test]
    fn void_methods_do_not_expect_responses() {
        assert!(!HostMethodId::WriteLine2.expects_response());
        assert!(HostMethodId::PromptForCredential1.expects_response());
    }

    #[test]
    fn host_response_with_result_round_trips() {
        let response = HostResponse::builder()
            .call_id(7)
            .method(Some(HostMethodId::PromptForCredential1))
            .result(Some(
                PsCredential::builder()
                    .username("admin".to_string())
                    .password("hunter2".to_string())
                    .build()
                    .to_ps_value(),
            ))
            .pipeline_scope(true)
            .build();

        let restored = HostResponse::parse(&response.to_ps_value(), true).unwrap();
        assert_eq!(restored.call_id, 7);
        let credential = PsCredential::try_from(restored.result.as_ref().unwrap()).unwrap();
        assert_eq!(credential.username, "admin");
    }

    #[test]
    fn host_response_with_error_surfaces_it() {
        let response = HostResponse::builder()
            .call_id(3)
            .error(Some(
                ErrorRecord::builder()
                    .message("host refused".to_string())
                    .fully_qualified_error_id("HostRefused".to_string())
                    .build(),
            ))
            .build();

        let restored = HostResponse::parse(&response.to_ps_value(), false).unwrap();
        assert_eq!(
            restored.error.map(|e| e.message),
            Some("host refused".to_string())
        );
        assert_eq!(restored.result, None);
    }

    #[test]
    fn unknown_method_id_is_rejected() {
        let mut mi = PsObject::default();
        mi.value = Some(PsValue::I32(999));
        let mut obj = PsObject::default();
        obj.push_property("ci", PsValue::I64(1));
        obj.push_property("mi", PsValue::object(mi));
        assert!(HostCall::parse(&PsValue::object(obj), false).is_err());
    }
}
