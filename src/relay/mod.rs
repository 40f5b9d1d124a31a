//! Multi-camera landmark relay
//!
//! Several capture processes watch the same person. One registers as the
//! leader of a group; the others become its suppliers and stream raw
//! landmark frames through the relay to it.

pub mod client;
pub mod codec;
pub mod protocol;
pub mod server;
pub mod session;
pub mod supplier;

pub use client::{RelayClient, RelayLandmarkDetector, SupplyingDetector};
pub use codec::{FrameCodec, FrameHeader, RelayFrame, BYTES_PER_LANDMARK};
pub use protocol::{InitPayload, MessageType, WireMessage};
pub use server::RelayServer;
pub use session::{GroupRegistry, RelayMessage, Session, SessionControl};
pub use supplier::SupplierAggregator;
