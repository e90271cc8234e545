use std::collections::HashMap;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::trace;

use crate::message::PsrpMessage;
use crate::PsrpError;

/// Fragment header size: object id (8) + fragment id (8) + flags (1) +
/// blob length (4).
const HEADER_LEN: usize = 21;

const FLAG_START: u8 = 0x01;
const FLAG_END: u8 = 0x02;

/// One fragment of a PSRP message.
/// <https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-psrp/3610dae4-67f7-4175-82da-a3fab83af288>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub object_id: u64,
    pub fragment_id: u64,
    pub start: bool,
    pub end: bool,
    pub data: Vec<u8>,
}

impl Fragment {
    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_LEN + self.data.len());
        let _ = buffer.write_u64::<BigEndian>(self.object_id);
        let _ = buffer.write_u64::<BigEndian>(self.fragment_id);

        let mut flags = 0u8;
        if self.start {
            flags |= FLAG_START;
        }
        if self.end {
            flags |= FLAG_END;
        }
        buffer.push(flags);

        let _ = buffer.write_u32::<BigEndian>(self.data.len() as u32);
        buffer.extend_from_slice(&self.data);
        buffer
    }

    /// Unpack one fragment from the front of `data`, returning it and
    /// the remaining bytes.
    pub fn unpack(data: &[u8]) -> Result<(Self, &[u8]), PsrpError> {
        if data.len() < HEADER_LEN {
            return Err(PsrpError::InvalidMessage(format!(
                "fragment too short: need at least {HEADER_LEN} bytes, got {}",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let object_id = cursor.read_u64::<BigEndian>()?;
        let fragment_id = cursor.read_u64::<BigEndian>()?;
        let flags = cursor.read_u8()?;
        let length = cursor.read_u32::<BigEndian>()? as usize;

        if data.len() < HEADER_LEN + length {
            return Err(PsrpError::InvalidMessage(format!(
                "fragment data truncated: expected {} bytes, got {}",
                HEADER_LEN + length,
                data.len()
            )));
        }

        let fragment = Self {
            object_id,
            fragment_id,
            start: flags & FLAG_START != 0,
            end: flags & FLAG_END != 0,
            data: data[HEADER_LEN..HEADER_LEN + length].to_vec(),
        };

        Ok((fragment, &data[HEADER_LEN + length..]))
    }
}

/// Splits outgoing messages into wire fragments with a monotonically
/// increasing object id.
#[derive(Debug)]
pub struct Fragmenter {
    max_blob_size: usize,
    next_object_id: u64,
}

impl Fragmenter {
    pub fn new(max_fragment_size: usize) -> Self {
        Self {
            max_blob_size: max_fragment_size.saturating_sub(HEADER_LEN).max(1),
            next_object_id: 1,
        }
    }

    /// Fragment a packed message, returning the concatenated wire bytes
    /// of every fragment in order.
    pub fn fragment(&mut self, message: &PsrpMessage) -> Vec<u8> {
        let packed = message.pack();
        let object_id = self.next_object_id;
        self.next_object_id += 1;

        let mut out = Vec::with_capacity(packed.len() + HEADER_LEN);
        let chunk_count = packed.len().div_ceil(self.max_blob_size).max(1);

        for (fragment_id, chunk) in packed.chunks(self.max_blob_size).enumerate() {
            let fragment = Fragment {
                object_id,
                fragment_id: fragment_id as u64,
                start: fragment_id == 0,
                end: fragment_id + 1 == chunk_count,
                data: chunk.to_vec(),
            };
            out.extend_from_slice(&fragment.pack());
        }

        trace!(
            object_id,
            message_type = message.message_type.name(),
            fragments = chunk_count,
            "fragmented outgoing message"
        );
        out
    }
}

#[derive(Debug, Default)]
struct FragmentBuffer {
    fragments: Vec<Fragment>,
    complete: bool,
}

impl FragmentBuffer {
    fn reassemble(mut self) -> Vec<u8> {
        self.fragments.sort_by_key(|f| f.fragment_id);
        let total: usize = self.fragments.iter().map(|f| f.data.len()).sum();
        let mut out = Vec::with_capacity(total);
        for fragment in self.fragments {
            out.extend_from_slice(&fragment.data);
        }
        out
    }
}

/// Reassembles inbound fragments into parsed messages, keeping partial
/// objects keyed by object id.
#[derive(Debug, Default)]
pub struct Defragmenter {
    buffers: HashMap<u64, FragmentBuffer>,
}

impl Defragmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one run of fragment bytes and return the messages that
    /// became complete, in arrival order.
    pub fn defragment(&mut self, mut data: &[u8]) -> Result<Vec<PsrpMessage>, PsrpError> {
        let mut completed = Vec::new();

        while !data.is_empty() {
            let (fragment, rest) = Fragment::unpack(data)?;
            data = rest;
            trace!(
                object_id = fragment.object_id,
                fragment_id = fragment.fragment_id,
                start = fragment.start,
                end = fragment.end,
                len = fragment.data.len(),
                "defragmenter accepted fragment"
            );

            if fragment.start && fragment.end {
                completed.push(PsrpMessage::parse(&fragment.data)?);
                continue;
            }

            let object_id = fragment.object_id;
            let buffer = self.buffers.entry(object_id).or_default();
            if fragment.start {
                *buffer = FragmentBuffer::default();
            }
            if fragment.end {
                buffer.complete = true;
            }
            buffer.fragments.push(fragment);

            if buffer.complete {
                let buffer = self
                    .buffers
                    .remove(&object_id)
                    .ok_or(PsrpError::InvalidState("fragment buffer disappeared"))?;
                completed.push(PsrpMessage::parse(&buffer.reassemble())?);
            }
        }

        Ok(completed)
    }

    /// Number of objects still waiting for their end fragment.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}
