use crate::message::{MessageBody, MessageType};
use crate::value::{PsObject, PsValue};
use crate::PsrpError;

/// PowerShell error categories.
/// <https://learn.microsoft.com/en-us/dotnet/api/system.management.automation.errorcategory>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCategory {
    #[default]
    NotSpecified = 0,
    OpenError = 1,
    CloseError = 2,
    InvalidArgument = 5,
    InvalidData = 6,
    InvalidOperation = 7,
    InvalidResult = 8,
    NotImplemented = 11,
    ObjectNotFound = 13,
    OperationStopped = 14,
    OperationTimeout = 15,
    SyntaxError = 16,
    ParserError = 17,
    PermissionDenied = 18,
    ResourceUnavailable = 21,
    ReadError = 22,
    WriteError = 23,
    SecurityError = 25,
}

impl ErrorCategory {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NotSpecified => "NotSpecified",
            Self::OpenError => "OpenError",
            Self::CloseError => "CloseError",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidData => "InvalidData",
            Self::InvalidOperation => "InvalidOperation",
            Self::InvalidResult => "InvalidResult",
            Self::NotImplemented => "NotImplemented",
            Self::ObjectNotFound => "ObjectNotFound",
            Self::OperationStopped => "OperationStopped",
            Self::OperationTimeout => "OperationTimeout",
            Self::SyntaxError => "SyntaxError",
            Self::ParserError => "ParserError",
            Self::PermissionDenied => "PermissionDenied",
            Self::ResourceUnavailable => "ResourceUnavailable",
            Self::ReadError => "ReadError",
            Self::WriteError => "WriteError",
            Self::SecurityError => "SecurityError",
        }
    }
}

impl TryFrom<i32> for ErrorCategory {
    type Error = PsrpError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NotSpecified),
            1 => Ok(Self::OpenError),
            2 => Ok(Self::CloseError),
            5 => Ok(Self::InvalidArgument),
            6 => Ok(Self::InvalidData),
            7 => Ok(Self::InvalidOperation),
            8 => Ok(Self::InvalidResult),
            11 => Ok(Self::NotImplemented),
            13 => Ok(Self::ObjectNotFound),
            14 => Ok(Self::OperationStopped),
            15 => Ok(Self::OperationTimeout),
            16 => Ok(Self::SyntaxError),
            17 => Ok(Self::ParserError),
            18 => Ok(Self::PermissionDenied),
            21 => Ok(Self::ResourceUnavailable),
            22 => Ok(Self::ReadError),
            23 => Ok(Self::WriteError),
            25 => Ok(Self::SecurityError),
            _ => Err(PsrpError::InvalidMessage(format!(
                "invalid ErrorCategory value: {value}"
            ))),
        }
    }
}

/// An ERROR_RECORD message body, also embedded inside pipeline and pool
/// state messages. The serialized property names follow MS-PSRP's
/// flattened `ErrorCategory_*` / `ErrorDetails_*` layout.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct ErrorRecord {
    /// Exception message.
    pub message: String,
    /// .NET type name of the exception.
    #[builder(default = "System.Exception".to_string())]
    pub exception_type: String,
    #[builder(default)]
    pub stack_trace: Option<String>,
    #[builder(default)]
    pub category: ErrorCategory,
    #[builder(default)]
    pub activity: Option<String>,
    #[builder(default)]
    pub reason: Option<String>,
    #[builder(default)]
    pub target_name: Option<String>,
    #[builder(default)]
    pub target_type: Option<String>,
    #[builder(default)]
    pub target_object: Option<PsValue>,
    pub fully_qualified_error_id: String,
    #[builder(default)]
    pub error_details_message: Option<String>,
    #[builder(default)]
    pub recommended_action: Option<String>,
}

impl ErrorRecord {
    /// "Category: (target:type) [activity], reason" summary line.
    pub fn category_message(&self) -> String {
        format!(
            "{} ({}:{}) [{}], {}",
            self.category.name(),
            self.target_name.as_deref().unwrap_or_default(),
            self.target_type.as_deref().unwrap_or_default(),
            self.activity.as_deref().unwrap_or_default(),
            self.reason.as_deref().unwrap_or_default(),
        )
    }

    pub fn to_ps_value(&self) -> PsValue {
        let mut exception = PsObject::with_type(&[self.exception_type.as_str(), "System.Object"]);
        exception.to_string = Some(self.message.clone());
        exception.push_property("Message", PsValue::str(self.message.clone()));
        exception.push_property(
            "StackTrace",
            self.stack_trace
                .clone()
                .map_or(PsValue::Nil, PsValue::Str),
        );

        let mut obj = PsObject::with_type(&["System.Management.Automation.ErrorRecord", "System.Object"]);
        obj.to_string = Some(self.message.clone());
        obj.push_property("Exception", PsValue::object(exception));
        obj.push_property(
            "TargetObject",
            self.target_object.clone().unwrap_or(PsValue::Nil),
        );
        obj.push_property(
            "FullyQualifiedErrorId",
            PsValue::str(self.fully_qualified_error_id.clone()),
        );
        obj.push_property("InvocationInfo", PsValue::Nil);
        obj.push_property("ErrorCategory_Category", PsValue::I32(self.category.as_i32()));
        obj.push_property(
            "ErrorCategory_Activity",
            opt_str(self.activity.as_deref()),
        );
        obj.push_property("ErrorCategory_Reason", opt_str(self.reason.as_deref()));
        obj.push_property(
            "ErrorCategory_TargetName",
            opt_str(self.target_name.as_deref()),
        );
        obj.push_property(
            "ErrorCategory_TargetType",
            opt_str(self.target_type.as_deref()),
        );
        obj.push_property(
            "ErrorCategory_Message",
            PsValue::str(self.category_message()),
        );
        if let Some(details) = &self.error_details_message {
            obj.push_property("ErrorDetails_Message", PsValue::str(details.clone()));
        }
        if let Some(action) = &self.recommended_action {
            obj.push_property("ErrorDetails_RecommendedAction", PsValue::str(action.clone()));
        }
        obj.push_property("SerializeExtendedInfo", PsValue::Bool(false));
        PsValue::object(obj)
    }
}

fn opt_str(value: Option<&str>) -> PsValue {
    value.map_or(PsValue::Nil, |s| PsValue::str(s.to_string()))
}

impl MessageBody for ErrorRecord {
    fn message_type(&self) -> MessageType {
        MessageType::ErrorRecord
    }

    fn to_ps_value(&self) -> PsValue {
        Self::to_ps_value(self)
    }
}

impl TryFrom<&PsValue> for ErrorRecord {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("ErrorRecord is not an object".into()))?;

        let opt = |name: &str| -> Option<String> {
            obj.property(name)
                .and_then(PsValue::as_str)
                .map(ToString::to_string)
        };

        let (message, exception_type, stack_trace) = match obj.property("Exception") {
            Some(PsValue::Object(exception)) => (
                exception
                    .property("Message")
                    .and_then(PsValue::as_str)
                    .unwrap_or_default()
                    .to_string(),
                exception
                    .type_names
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "System.Exception".to_string()),
                exception
                    .property("StackTrace")
                    .and_then(PsValue::as_str)
                    .map(ToString::to_string),
            ),
            _ => (String::new(), "System.Exception".to_string(), None),
        };

        let category = obj
            .property("ErrorCategory_Category")
            .and_then(PsValue::as_i32)
            .map_or(Ok(ErrorCategory::NotSpecified), ErrorCategory::try_from)?;

        let target_object = match obj.property("TargetObject") {
            None | Some(PsValue::Nil) => None,
            Some(other) => Some(other.clone()),
        };

        Ok(Self {
            message,
            exception_type,
            stack_trace,
            category,
            activity: opt("ErrorCategory_Activity"),
            reason: opt("ErrorCategory_Reason"),
            target_name: opt("ErrorCategory_TargetName"),
            target_type: opt("ErrorCategory_TargetType"),
            target_object,
            fully_qualified_error_id: opt("FullyQualifiedErrorId").unwrap_or_default(),
            error_details_message: opt("ErrorDetails_Message"),
            recommended_action: opt("ErrorDetails_RecommendedAction"),
        })
    }
}
