//! Output module
//!
//! Sends the rig's pose to an external engine.

pub mod udp;

pub use udp::{tracing_tree, JointValue, PoseBroadcaster};
