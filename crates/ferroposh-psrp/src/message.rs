use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::value::{from_clixml, to_clixml, PsValue};
use crate::PsrpError;

/// Direction marker carried in every PSRP message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Client = 0x0000_0001,
    Server = 0x0000_0002,
}

impl TryFrom<u32> for Destination {
    type Error = PsrpError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x0000_0001 => Ok(Self::Client),
            0x0000_0002 => Ok(Self::Server),
            _ => Err(PsrpError::InvalidMessage(format!(
                "unknown destination value: 0x{value:08x}"
            ))),
        }
    }
}

/// PSRP message type identifiers.
/// <https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-psrp/497ac440-89fb-4cb3-9cc1-3434c1aa74c3>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    SessionCapability,
    InitRunspacePool,
    RunspacePoolState,
    CreatePipeline,
    ApplicationPrivateData,
    RunspacePoolHostCall,
    RunspacePoolHostResponse,
    PipelineInput,
    EndOfPipelineInput,
    PipelineOutput,
    ErrorRecord,
    PipelineState,
    PipelineHostCall,
    PipelineHostResponse,
}

impl MessageType {
    pub fn value(self) -> u32 {
        match self {
            Self::SessionCapability => 0x0001_0002,
            Self::InitRunspacePool => 0x0001_0004,
            Self::RunspacePoolState => 0x0002_1005,
            Self::CreatePipeline => 0x0002_1006,
            Self::ApplicationPrivateData => 0x0002_1009,
            Self::RunspacePoolHostCall => 0x0002_1100,
            Self::RunspacePoolHostResponse => 0x0002_1101,
            Self::PipelineInput => 0x0004_1002,
            Self::EndOfPipelineInput => 0x0004_1003,
            Self::PipelineOutput => 0x0004_1004,
            Self::ErrorRecord => 0x0004_1005,
            Self::PipelineState => 0x0004_1006,
            Self::PipelineHostCall => 0x0004_1100,
            Self::PipelineHostResponse => 0x0004_1101,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SessionCapability => "SessionCapability",
            Self::InitRunspacePool => "InitRunspacePool",
            Self::RunspacePoolState => "RunspacePoolState",
            Self::CreatePipeline => "CreatePipeline",
            Self::ApplicationPrivateData => "ApplicationPrivateData",
            Self::RunspacePoolHostCall => "RunspacePoolHostCall",
            Self::RunspacePoolHostResponse => "RunspacePoolHostResponse",
            Self::PipelineInput => "PipelineInput",
            Self::EndOfPipelineInput => "EndOfPipelineInput",
            Self::PipelineOutput => "PipelineOutput",
            Self::ErrorRecord => "ErrorRecord",
            Self::PipelineState => "PipelineState",
            Self::PipelineHostCall => "PipelineHostCall",
            Self::PipelineHostResponse => "PipelineHostResponse",
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = PsrpError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x0001_0002 => Ok(Self::SessionCapability),
            0x0001_0004 => Ok(Self::InitRunspacePool),
            0x0002_1005 => Ok(Self::RunspacePoolState),
            0x0002_1006 => Ok(Self::CreatePipeline),
            0x0002_1009 => Ok(Self::ApplicationPrivateData),
            0x0002_1100 => Ok(Self::RunspacePoolHostCall),
            0x0002_1101 => Ok(Self::RunspacePoolHostResponse),
            0x0004_1002 => Ok(Self::PipelineInput),
            0x0004_1003 => Ok(Self::EndOfPipelineInput),
            0x0004_1004 => Ok(Self::PipelineOutput),
            0x0004_1005 => Ok(Self::ErrorRecord),
            0x0004_1006 => Ok(Self::PipelineState),
            0x0004_1100 => Ok(Self::PipelineHostCall),
            0x0004_1101 => Ok(Self::PipelineHostResponse),
            _ => Err(PsrpError::InvalidMessage(format!(
                "unknown message type value: 0x{value:08x}"
            ))),
        }
    }
}

/// A typed PSRP message body that knows how to render itself as the
/// CLIXML payload of an envelope.
pub trait MessageBody {
    fn message_type(&self) -> MessageType;
    fn to_ps_value(&self) -> PsValue;
}

/// One defragmented PSRP message: the binary header plus the CLIXML
/// body bytes.
#[derive(Debug, Clone)]
pub struct PsrpMessage {
    pub destination: Destination,
    pub message_type: MessageType,
    /// Runspace pool id (RPID).
    pub rpid: Uuid,
    /// Pipeline id (PID); all-zero on the wire means pool scope.
    pub pid: Option<Uuid>,
    pub data: Vec<u8>,
}

impl PsrpMessage {
    pub fn from_body(
        body: &dyn MessageBody,
        destination: Destination,
        rpid: Uuid,
        pid: Option<Uuid>,
    ) -> Result<Self, PsrpError> {
        Ok(Self {
            destination,
            message_type: body.message_type(),
            rpid,
            pid,
            data: to_clixml(&body.to_ps_value())?,
        })
    }

    /// Parse the CLIXML body back into a value tree.
    pub fn body(&self) -> Result<PsValue, PsrpError> {
        from_clixml(&self.data)
    }

    pub fn parse(data: &[u8]) -> Result<Self, PsrpError> {
        let mut cursor = Cursor::new(data);

        let destination = Destination::try_from(cursor.read_u32::<LittleEndian>()?)?;
        let message_type = MessageType::try_from(cursor.read_u32::<LittleEndian>()?)?;

        let mut rpid_bytes = [0u8; 16];
        cursor.read_exact(&mut rpid_bytes)?;
        let mut pid_bytes = [0u8; 16];
        cursor.read_exact(&mut pid_bytes)?;

        let mut body = Vec::new();
        cursor.read_to_end(&mut body)?;

        let pid = Uuid::from_bytes(pid_bytes);
        Ok(Self {
            destination,
            message_type,
            rpid: Uuid::from_bytes(rpid_bytes),
            pid: (!pid.is_nil()).then_some(pid),
            data: body,
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(40 + self.data.len());
        // The header is fixed-size, writes into a Vec cannot fail.
        let _ = buffer.write_u32::<LittleEndian>(self.destination as u32);
        let _ = buffer.write_u32::<LittleEndian>(self.message_type.value());
        buffer.extend_from_slice(self.rpid.as_bytes());
        buffer.extend_from_slice(self.pid.unwrap_or_default().as_bytes());
        buffer.extend_from_slice(&self.data);
        buffer
    }
}
