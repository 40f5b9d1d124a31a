//! Relay message framing
//!
//! Every logical message is two WebSocket messages: a text token naming the
//! type, then exactly one payload message.
//!
//! | token           | payload                            |
//! |-----------------|------------------------------------|
//! | `init`          | text `"<clientId>,<schemaName>"`   |
//! | `make-supplier` | text `"<leaderClientId>"`          |
//! | `data`          | binary landmark frame (see codec)  |
//!
//! An empty token is accepted and ignored.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::tracking::LandmarkSchema;

/// Longest client id that fits the frame header's length byte
pub const MAX_CLIENT_ID_LEN: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    #[default]
    None,
    Init,
    Data,
    MakeSupplier,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Init => "init",
            Self::Data => "data",
            Self::MakeSupplier => "make-supplier",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::None),
            "init" => Ok(Self::Init),
            "data" => Ok(Self::Data),
            "make-supplier" => Ok(Self::MakeSupplier),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }
}

/// One WebSocket message, independent of the socket library
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Payload of an `init` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitPayload {
    pub client_id: String,
    pub schema: LandmarkSchema,
}

impl InitPayload {
    pub fn new(client_id: impl Into<String>, schema: LandmarkSchema) -> Self {
        Self {
            client_id: client_id.into(),
            schema,
        }
    }

    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedInit(payload.to_string());

        let (client_id, schema) = payload.split_once(',').ok_or_else(malformed)?;
        if client_id.is_empty() {
            return Err(malformed());
        }
        check_client_id(client_id)?;
        let schema = schema.trim().parse().map_err(|_| malformed())?;

        Ok(Self::new(client_id, schema))
    }

    pub fn encode(&self) -> String {
        format!("{},{}", self.client_id, self.schema.name())
    }
}

pub(crate) fn check_client_id(client_id: &str) -> Result<(), ProtocolError> {
    if client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(ProtocolError::ClientIdTooLong(client_id.len()));
    }
    Ok(())
}

/// The message pair that registers a client as a group leader.
pub fn init_messages(
    client_id: &str,
    schema: LandmarkSchema,
) -> Result<[WireMessage; 2], ProtocolError> {
    check_client_id(client_id)?;
    Ok([
        WireMessage::Text(MessageType::Init.as_str().to_string()),
        WireMessage::Text(InitPayload::new(client_id, schema).encode()),
    ])
}

/// The message pair that turns an initialised client into a supplier.
pub fn make_supplier_messages(leader_id: &str) -> [WireMessage; 2] {
    [
        WireMessage::Text(MessageType::MakeSupplier.as_str().to_string()),
        WireMessage::Text(leader_id.to_string()),
    ]
}

/// The message pair carrying one encoded landmark frame.
pub fn data_messages(frame: Vec<u8>) -> [WireMessage; 2] {
    [
        WireMessage::Text(MessageType::Data.as_str().to_string()),
        WireMessage::Binary(frame),
    ]
}
