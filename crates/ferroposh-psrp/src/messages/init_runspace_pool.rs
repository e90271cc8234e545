use crate::message::{MessageBody, MessageType};
use crate::value::{PsObject, PsValue};
use crate::PsrpError;

/// The host metadata flags a client sends for the pool (and optionally
/// per pipeline). Host default data (console buffer geometry and the
/// like) is not modeled; the server never asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, typed_builder::TypedBuilder)]
pub struct HostInfo {
    #[builder(default = true)]
    pub is_host_null: bool,
    #[builder(default = true)]
    pub is_host_ui_null: bool,
    #[builder(default = true)]
    pub is_host_raw_ui_null: bool,
    #[builder(default = false)]
    pub use_runspace_host: bool,
}

impl HostInfo {
    pub fn to_ps_value(self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property("_isHostNull", PsValue::Bool(self.is_host_null));
        obj.push_property("_isHostUINull", PsValue::Bool(self.is_host_ui_null));
        obj.push_property("_isHostRawUINull", PsValue::Bool(self.is_host_raw_ui_null));
        obj.push_property("_useRunspaceHost", PsValue::Bool(self.use_runspace_host));
        PsValue::object(obj)
    }
}

impl TryFrom<&PsValue> for HostInfo {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("HostInfo is not an object".into()))?;

        // A host that omits a flag is treated as not offering the
        // capability, the same defaulting remote hosts apply.
        let flag = |name: &str, default: bool| -> bool {
            obj.property(name).and_then(PsValue::as_bool).unwrap_or(default)
        };

        Ok(Self {
            is_host_null: flag("_isHostNull", true),
            is_host_ui_null: flag("_isHostUINull", true),
            is_host_raw_ui_null: flag("_isHostRawUINull", true),
            use_runspace_host: flag("_useRunspaceHost", false),
        })
    }
}

/// INIT_RUNSPACEPOOL, sent by the client after capability negotiation.
#[derive(Debug, Clone, PartialEq, Eq, typed_builder::TypedBuilder)]
pub struct InitRunspacePool {
    #[builder(default = 1)]
    pub min_runspaces: i32,
    #[builder(default = 1)]
    pub max_runspaces: i32,
    #[builder(default = HostInfo::builder().build())]
    pub host_info: HostInfo,
}

impl MessageBody for InitRunspacePool {
    fn message_type(&self) -> MessageType {
        MessageType::InitRunspacePool
    }

    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property("MinRunspaces", PsValue::I32(self.min_runspaces));
        obj.push_property("MaxRunspaces", PsValue::I32(self.max_runspaces));
        obj.push_property("HostInfo", self.host_info.to_ps_value());
        PsValue::object(obj)
    }
}

impl TryFrom<&PsValue> for InitRunspacePool {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("InitRunspacePool is not an object".into()))?;

        let min_runspaces = obj
            .property("MinRunspaces")
            .and_then(PsValue::as_i32)
            .ok_or_else(|| PsrpError::InvalidMessage("InitRunspacePool missing MinRunspaces".into()))?;
        let max_runspaces = obj
            .property("MaxRunspaces")
            .and_then(PsValue::as_i32)
            .ok_or_else(|| PsrpError::InvalidMessage("InitRunspacePool missing MaxRunspaces".into()))?;
        let host_info = obj
            .property("HostInfo")
            .map(HostInfo::try_from)
            .transpose()?
            .unwrap_or_else(|| HostInfo::builder().build());

        Ok(Self {
            min_runspaces,
            max_runspaces,
            host_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_runspace_pool_round_trips() {
        let init = InitRunspacePool::builder()
            .min_runspaces(1)
            .max_runspaces(4)
            .host_info(
                HostInfo::builder()
                    .is_host_null(false)
                    .is_host_ui_null(false)
                    .is_host_raw_ui_null(true)
                    .build(),
            )
            .build();

        let restored = InitRunspacePool::try_from(&init.to_ps_value()).unwrap();
        assert_eq!(init, restored);
    }

    #[test]
    fn missing_host_info_defaults_to_no_host() {
        let mut obj = PsObject::default();
        obj.push_property("MinRunspaces", PsValue::I32(1));
        obj.push_property("MaxRunspaces", PsValue::I32(1));

        let parsed = InitRunspacePool::try_from(&PsValue::object(obj)).unwrap();
        assert!(parsed.host_info.is_host_ui_null);
        assert!(!parsed.host_info.use_runspace_host);
    }
}
