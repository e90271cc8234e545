use crate::message::{MessageBody, MessageType};
use crate::messages::HostInfo;
use crate::value::{PsObject, PsValue};
use crate::PsrpError;

/// One parameter attached to a pipeline command. A parameter with a
/// name binds by name; one without binds positionally; one with both a
/// name and a value contributes to both views on the server.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct CommandParameter {
    #[builder(default)]
    pub name: Option<String>,
    pub value: PsValue,
}

impl CommandParameter {
    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property(
            "N",
            self.name.clone().map_or(PsValue::Nil, PsValue::Str),
        );
        obj.push_property("V", self.value.clone());
        PsValue::object(obj)
    }

    fn try_from_value(value: &PsValue) -> Result<Self, PsrpError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("command parameter is not an object".into()))?;

        let name = match obj.property("N") {
            Some(PsValue::Str(name)) => Some(name.clone()),
            Some(PsValue::Nil) | None => None,
            Some(_) => {
                return Err(PsrpError::InvalidMessage(
                    "command parameter name is not a string".into(),
                ))
            }
        };

        Ok(Self {
            name,
            value: obj.property("V").cloned().unwrap_or(PsValue::Nil),
        })
    }
}

/// One command inside a pipeline.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct PipelineCommand {
    pub command_text: String,
    #[builder(default = true)]
    pub is_script: bool,
    #[builder(default)]
    pub parameters: Vec<CommandParameter>,
}

impl PipelineCommand {
    pub fn script(text: impl Into<String>) -> Self {
        Self::builder().command_text(text.into()).build()
    }

    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property("Cmd", PsValue::str(self.command_text.clone()));
        obj.push_property("IsScript", PsValue::Bool(self.is_script));
        obj.push_property(
            "Args",
            PsValue::List(self.parameters.iter().map(CommandParameter::to_ps_value).collect()),
        );
        PsValue::object(obj)
    }

    fn try_from_value(value: &PsValue) -> Result<Self, PsrpError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("pipeline command is not an object".into()))?;

        let command_text = obj
            .property("Cmd")
            .and_then(PsValue::as_str)
            .ok_or_else(|| PsrpError::InvalidMessage("pipeline command missing Cmd".into()))?
            .to_string();

        let parameters = obj
            .property("Args")
            .and_then(PsValue::as_list)
            .unwrap_or_default()
            .iter()
            .map(CommandParameter::try_from_value)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            command_text,
            is_script: obj
                .property("IsScript")
                .and_then(PsValue::as_bool)
                .unwrap_or(true),
            parameters,
        })
    }
}

/// The PowerShell block of a CREATE_PIPELINE message: the command list
/// plus pipeline-level flags.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct PowerShellPipeline {
    pub commands: Vec<PipelineCommand>,
    #[builder(default = false)]
    pub is_nested: bool,
    #[builder(default = true)]
    pub redirect_shell_error_output_pipe: bool,
}

impl PowerShellPipeline {
    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property(
            "Cmds",
            PsValue::List(self.commands.iter().map(PipelineCommand::to_ps_value).collect()),
        );
        obj.push_property("IsNested", PsValue::Bool(self.is_nested));
        obj.push_property(
            "RedirectShellErrorOutputPipe",
            PsValue::Bool(self.redirect_shell_error_output_pipe),
        );
        PsValue::object(obj)
    }

    fn try_from_value(value: &PsValue) -> Result<Self, PsrpError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("PowerShell pipeline is not an object".into()))?;

        let commands = obj
            .property("Cmds")
            .and_then(PsValue::as_list)
            .ok_or_else(|| PsrpError::InvalidMessage("pipeline missing Cmds".into()))?
            .iter()
            .map(PipelineCommand::try_from_value)
            .collect::<Result<Vec<_>, _>>()?;

        if commands.is_empty() {
            return Err(PsrpError::InvalidMessage(
                "pipeline carries no commands".into(),
            ));
        }

        Ok(Self {
            commands,
            is_nested: obj
                .property("IsNested")
                .and_then(PsValue::as_bool)
                .unwrap_or(false),
            redirect_shell_error_output_pipe: obj
                .property("RedirectShellErrorOutputPipe")
                .and_then(PsValue::as_bool)
                .unwrap_or(true),
        })
    }
}

/// CREATE_PIPELINE, sent by the client after the `<Command>` envelope
/// packet created the pipeline shell.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct CreatePipeline {
    pub powershell: PowerShellPipeline,
    #[builder(default = true)]
    pub no_input: bool,
    #[builder(default)]
    pub host_info: Option<HostInfo>,
}

impl MessageBody for CreatePipeline {
    fn message_type(&self) -> MessageType {
        MessageType::CreatePipeline
    }

    fn to_ps_value(&self) -> PsValue {
        let mut obj = PsObject::default();
        obj.push_property("PowerShell", self.powershell.to_ps_value());
        obj.push_property("NoInput", PsValue::Bool(self.no_input));
        obj.push_property(
            "HostInfo",
            self.host_info.map_or(PsValue::Nil, HostInfo::to_ps_value),
        );
        obj.push_property("ApartmentState", PsValue::I32(2));
        obj.push_property("RemoteStreamOptions", PsValue::I32(0));
        obj.push_property("AddToHistory", PsValue::Bool(false));
        obj.push_property("IsNested", PsValue::Bool(self.powershell.is_nested));
        PsValue::object(obj)
    }
}

impl TryFrom<&PsValue> for CreatePipeline {
    type Error = PsrpError;

    fn try_from(value: &PsValue) -> Result<Self, Self::Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| PsrpError::InvalidMessage("CreatePipeline is not an object".into()))?;

        let powershell = obj
            .property("PowerShell")
            .ok_or_else(|| PsrpError::InvalidMessage("CreatePipeline missing PowerShell".into()))
            .and_then(PowerShellPipeline::try_from_value)?;

        let host_info = match obj.property("HostInfo") {
            None | Some(PsValue::Nil) => None,
            Some(value) => Some(HostInfo::try_from(value)?),
        };

        Ok(Self {
            powershell,
            no_input: obj
                .property("NoInput")
                .and_then(PsValue::as_bool)
                .unwrap_or(true),
            host_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_pipeline_round_trips() {
        let create = CreatePipeline::builder()
            .powershell(
                PowerShellPipeline::builder()
                    .commands(vec![PipelineCommand::builder()
                        .command_text("write-output 1 + 1".to_string())
                        .parameters(vec![
                            CommandParameter::builder().value(PsValue::I32(5)).build(),
                            CommandParameter::builder()
                                .name(Some("Depth".to_string()))
                                .value(PsValue::I32(2))
                                .build(),
                        ])
                        .build()])
                    .build(),
            )
            .no_input(false)
            .host_info(Some(
                HostInfo::builder()
                    .is_host_ui_null(false)
                    .use_runspace_host(false)
                    .build(),
            ))
            .build();

        let restored = CreatePipeline::try_from(&create.to_ps_value()).unwrap();
        assert_eq!(create, restored);
    }

    #[test]
    fn empty_command_list_is_rejected() {
        let mut pipeline = PsObject::default();
        pipeline.push_property("Cmds", PsValue::List(vec![]));
        let mut obj = PsObject::default();
        obj.push_property("PowerShell", PsValue::object(pipeline));

        assert!(CreatePipeline::try_from(&PsValue::object(obj)).is_err());
    }

    #[test]
    fn parameter_without_name_binds_positionally() {
        let parameter = CommandParameter::builder()
            .value(PsValue::str("positional"))
            .build();
        let restored = CommandParameter::try_from_value(&parameter.to_ps_value()).unwrap();
        assert_eq!(restored.name, None);
        assert_eq!(restored.value, PsValue::str("positional"));
    }
}
