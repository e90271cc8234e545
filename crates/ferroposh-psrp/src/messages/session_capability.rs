use crate::message::{MessageBody, MessageType};
use crate::value::{PsObject, PsValue};
use crate::PsrpError;

/// SESSION_CAPABILITY, the first message exchanged in either direction.
#[derive(Debug, Clone, PartialEq, Eq, typed_builder::TypedBuilder)]
pub struct SessionCapability {
    pub protocol_version: String,
    pub ps_version: String,
    pub serialization_version: String,
}

impl SessionCapability {
    /// The capability this server advertises back to clients.
    pub fn server_default() -> Self {
        Self::builder()
            .protocol_version("2.3".to_string())
            .ps_version("2.0".to_string())
            .serialization_version("1.1.0.1".to_string())
            .build()
    }
}

impl MessageBody for SessionCapability {
    fn message_type(&self) -> MessageType {
        MessageType::SessionCapability
    }

    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property(
            "protocolversion",
            PsValue::Version(self.protocol_version.clone()),
        );
        obj.push_property("PSVersion", PsValue::Version(self.ps_version.clone()));
        obj.push_property(
            "SerializationVersion",
            PsValue::Version(self.serialization_version.clone()),
        );
        PsValue::object(obj)
    }
}

impl TryFrom<&PsValue> for SessionCapability {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("SessionCapability is not an object".into()))?;

        let version = |name: &str| -> Result<String, PsrpError> {
            match obj.property(name) {
                Some(PsValue::Version(v) | PsValue::Str(v)) => Ok(v.clone()),
                _ => Err(PsrpError::InvalidMessage(format!(
                    "SessionCapability missing {name}"
                ))),
            }
        };

        Ok(Self {
            protocol_version: version("protocolversion")?,
            ps_version: version("PSVersion")?,
            serialization_version: version("SerializationVersion")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_capability_round_trips() {
        let capability = SessionCapability::server_default();
        let value = capability.to_ps_value();
        let restored = SessionCapability::try_from(&value).unwrap();
        assert_eq!(capability, restored);
    }

    #[test]
    fn missing_version_is_rejected() {
        let mut obj = PsObject::default();
        obj.push_property("PSVersion", PsValue::Version("2.0".into()));
        assert!(SessionCapability::try_from(&PsValue::object(obj)).is_err());
    }
}
