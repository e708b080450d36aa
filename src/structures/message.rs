use std::fmt::{self, Debug, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Max payload size of a CAN-FD frame in bytes.
pub const DATA_MAX_LEN: usize = 64;

/// CAN identifier. Carried along untouched, the bus never routes on it.
pub type CanId = u32;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    #[error("payload of {len} bytes does not fit in a {max}-byte frame")]
    PayloadTooLong { len: usize, max: usize },
}

/// Message to transmit or receive.
///
/// A plain value: the bus copies it for every receiver, nobody holds on to
/// the sender's instance. Bytes past `len` are kept zeroed so that two
/// messages compare equal exactly when their ids and payloads do.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    id: CanId,
    len: usize,
    data: [u8; DATA_MAX_LEN],
}

impl Message {
    pub fn new(id: CanId, payload: &[u8]) -> Result<Self, MessageError> {
        if payload.len() > DATA_MAX_LEN {
            return Err(MessageError::PayloadTooLong {
                len: payload.len(),
                max: DATA_MAX_LEN,
            });
        }
        let mut data = [0; DATA_MAX_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Message {
            id,
            len: payload.len(),
            data,
        })
    }

    /// A message without payload, e.g. a remote-request style ping.
    pub fn empty(id: CanId) -> Self {
        Message {
            id,
            len: 0,
            data: [0; DATA_MAX_LEN],
        }
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Used bytes of the frame.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole frame buffer, unused tail included.
    pub fn data(&self) -> &[u8; DATA_MAX_LEN] {
        &self.data
    }

    /// Same payload under another identifier.
    pub fn with_id(mut self, id: CanId) -> Self {
        self.id = id;
        self
    }

    /// Overwrites a single payload byte, returns `None` past the used length.
    pub fn set_byte(&mut self, index: usize, value: u8) -> Option<()> {
        if index >= self.len {
            return None;
        }
        self.data[index] = value;
        Some(())
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::empty(0)
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message {{id: {:#X}, data: {:02X?}}}", self.id, self.payload())
    }
}

// ID: 0x0000ABCD | Len: 3 | Data: 00 1A 2B
impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: 0x{:08X} | Len: {} | Data:", self.id, self.len)?;
        for byte in self.payload() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Serialized form: only the used bytes go over the wire.
#[derive(Serialize, Deserialize)]
struct MessageRecord {
    id: CanId,
    #[serde(default)]
    data: Vec<u8>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = MessageError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        Message::new(record.id, &record.data)
    }
}

impl From<Message> for MessageRecord {
    fn from(msg: Message) -> Self {
        MessageRecord {
            id: msg.id,
            data: msg.payload().to_vec(),
        }
    }
}
