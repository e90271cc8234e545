use crate::message::{MessageBody, MessageType};
use crate::value::{PsObject, PsValue};
use crate::PsrpError;

/// APPLICATION_PRIVATE_DATA, sent by the server while opening the pool.
/// This server has no application data to share, so the bag defaults to
/// empty, but inbound values are preserved for callers that care.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplicationPrivateData {
    pub data: Vec<(PsValue, PsValue)>,
}

impl MessageBody for ApplicationPrivateData {
    fn message_type(&self) -> MessageType {
        MessageType::ApplicationPrivateData
    }

    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property("ApplicationPrivateData", PsValue::Dict(self.data.clone()));
        PsValue::object(obj)
    }
}

impl TryFrom<&PsValue> for ApplicationPrivateData {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        let obj = value.as_object().ok_or_else(|| {
            PsrpError::InvalidMessage("ApplicationPrivateData is not an object".into())
        })?;

        match obj.property("ApplicationPrivateData") {
            Some(PsValue::Dict(entries)) => Ok(Self {
                data: entries.clone(),
            }),
            Some(PsValue::Nil) | None => Ok(Self::default()),
            Some(_) => Err(PsrpError::InvalidMessage(
                "ApplicationPrivateData bag is not a dictionary".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bag_round_trips() {
        let data = ApplicationPrivateData::default();
        let restored = ApplicationPrivateData::try_from(&data.to_ps_value()).unwrap();
        assert_eq!(data, restored);
    }

    #[test]
    fn populated_bag_round_trips() {
        let data = ApplicationPrivateData {
            data: vec![(PsValue::str("BashVersion"), PsValue::str("5.2"))],
        };
        let restored = ApplicationPrivateData::try_from(&data.to_ps_value()).unwrap();
        assert_eq!(data, restored);
    }
}
