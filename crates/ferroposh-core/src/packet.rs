use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ferroposh_psrp::StreamType;
use uuid::Uuid;

use crate::ServerError;

/// The envelope tags of the out-of-process transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Data,
    DataAck,
    Command,
    CommandAck,
    Close,
    CloseAck,
    Signal,
    SignalAck,
}

impl PacketKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Data => "Data",
            Self::DataAck => "DataAck",
            Self::Command => "Command",
            Self::CommandAck => "CommandAck",
            Self::Close => "Close",
            Self::CloseAck => "CloseAck",
            Self::Signal => "Signal",
            Self::SignalAck => "SignalAck",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Data" => Some(Self::Data),
            "DataAck" => Some(Self::DataAck),
            "Command" => Some(Self::Command),
            "CommandAck" => Some(Self::CommandAck),
            "Close" => Some(Self::Close),
            "CloseAck" => Some(Self::CloseAck),
            "Signal" => Some(Self::Signal),
            "SignalAck" => Some(Self::SignalAck),
            _ => None,
        }
    }
}

/// One parsed envelope packet. `ps_guid` is nil when the packet
/// addresses the runspace pool; `stream` and `payload` only carry
/// meaning for Data packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub ps_guid: Uuid,
    pub stream: StreamType,
    pub payload: Vec<u8>,
}

impl Packet {
    /// The pipeline this packet addresses, or `None` for the pool.
    pub fn pipeline_id(&self) -> Option<Uuid> {
        (!self.ps_guid.is_nil()).then_some(self.ps_guid)
    }

    /// Parse one complete envelope element (excluding the trailing
    /// line feed).
    pub fn parse(raw: &[u8]) -> Result<Self, ServerError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ServerError::MalformedPacket(format!("packet is not UTF-8: {e}")))?;
        let doc = roxmltree::Document::parse(text)
            .map_err(|e| ServerError::MalformedPacket(format!("packet is not XML: {e}")))?;
        let root = doc.root_element();

        let kind = PacketKind::from_tag(root.tag_name().name()).ok_or_else(|| {
            ServerError::MalformedPacket(format!(
                "unknown packet tag <{}>",
                root.tag_name().name()
            ))
        })?;

        let ps_guid = root
            .attribute("PSGuid")
            .ok_or_else(|| ServerError::MalformedPacket("missing PSGuid attribute".to_string()))?;
        let ps_guid = Uuid::parse_str(ps_guid)
            .map_err(|e| ServerError::MalformedPacket(format!("invalid PSGuid: {e}")))?;

        let stream = match root.attribute("Stream") {
            Some("PromptResponse") => StreamType::PromptResponse,
            _ => StreamType::Default,
        };

        let payload = match root.text() {
            Some(body) if kind == PacketKind::Data => BASE64
                .decode(body.trim())
                .map_err(|e| ServerError::MalformedPacket(format!("invalid base64 body: {e}")))?,
            _ => Vec::new(),
        };

        Ok(Self {
            kind,
            ps_guid,
            stream,
            payload,
        })
    }
}

/// Encode a `<Data>` packet carrying PSRP fragment bytes.
///
/// The single trailing line feed is the packet terminator; line feeds
/// appear nowhere else in the encoding.
pub fn data_packet(data: &[u8], stream: StreamType, ps_guid: Option<Uuid>) -> Vec<u8> {
    let stream_name = match stream {
        StreamType::Default => "Default",
        StreamType::PromptResponse => "PromptResponse",
    };
    format!(
        "<Data Stream='{stream_name}' PSGuid='{}'>{}</Data>\n",
        ps_guid.unwrap_or_default(),
        BASE64.encode(data),
    )
    .into_bytes()
}

/// Encode a bodyless control packet (`<CommandAck PSGuid='...' />`).
pub fn guid_packet(kind: PacketKind, ps_guid: Option<Uuid>) -> Vec<u8> {
    format!(
        "<{} PSGuid='{}' />\n",
        kind.tag(),
        ps_guid.unwrap_or_default()
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_packet_round_trips() {
        let guid = Uuid::new_v4();
        let encoded = data_packet(b"fragment bytes", StreamType::PromptResponse, Some(guid));
        assert_eq!(encoded.last(), Some(&b'\n'));
        assert_eq!(encoded.iter().filter(|&&b| b == b'\n').count(), 1);

        let packet = Packet::parse(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(packet.kind, PacketKind::Data);
        assert_eq!(packet.ps_guid, guid);
        assert_eq!(packet.stream, StreamType::PromptResponse);
        assert_eq!(packet.payload, b"fragment bytes");
    }

    #[test]
    fn guid_packet_round_trips() {
        let guid = Uuid::new_v4();
        let encoded = guid_packet(PacketKind::CommandAck, Some(guid));
        let packet = Packet::parse(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(packet.kind, PacketKind::CommandAck);
        assert_eq!(packet.ps_guid, guid);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn nil_guid_addresses_the_pool() {
        let encoded = guid_packet(PacketKind::CloseAck, None);
        assert_eq!(
            String::from_utf8(encoded.clone()).unwrap(),
            "<CloseAck PSGuid='00000000-0000-0000-0000-000000000000' />\n"
        );
        let packet = Packet::parse(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(packet.pipeline_id(), None);
    }

    #[test]
    fn guids_render_lowercase_hyphenated() {
        let guid = Uuid::parse_str("ABCDEF01-2345-6789-ABCD-EF0123456789").unwrap();
        let encoded = String::from_utf8(guid_packet(PacketKind::DataAck, Some(guid))).unwrap();
        assert!(encoded.contains("abcdef01-2345-6789-abcd-ef0123456789"));
    }

    #[test]
    fn empty_data_body_decodes_to_no_payload() {
        let packet = Packet::parse(
            b"<Data Stream='Default' PSGuid='00000000-0000-0000-0000-000000000000'></Data>",
        )
        .unwrap();
        assert!(packet.payload.is_empty());
        assert_eq!(packet.stream, StreamType::Default);
    }

    #[test]
    fn malformed_packets_are_rejected() {
        // Missing PSGuid
        assert!(Packet::parse(b"<Data Stream='Default'>QQ==</Data>").is_err());
        // Invalid GUID
        assert!(Packet::parse(b"<Close PSGuid='not-a-guid' />").is_err());
        // Unknown tag
        assert!(Packet::parse(
            b"<Shutdown PSGuid='00000000-0000-0000-0000-000000000000' />"
        )
        .is_err());
        // Invalid base64
        assert!(Packet::parse(
            b"<Data PSGuid='00000000-0000-0000-0000-000000000000'>!!!</Data>"
        )
        .is_err());
        // Not XML at all
        assert!(Packet::parse(b"garbage").is_err());
    }
}
