//! Pose output over UDP
//!
//! Each flush sends one JSON datagram holding every joint of the rig:
//!
//! ```json
//! { "sequence": 42,
//!   "joints": { "arms.left.upper": { "roll": 0.0, "pitch": 15.9, "yaw": 0.0 },
//!               "arms.left.lower": { ... } } }
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::UdpSocket;

use crate::config::OutputConfig;
use crate::error::{OutputError, Result};
use crate::math::EulerAngle;
use crate::pose::{JointKind, JointNode, PoseTree};

/// Last value an actuator received
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JointValue {
    Hinge(f64),
    Cone(EulerAngle),
}

type JointTable = Arc<Mutex<BTreeMap<String, JointValue>>>;

#[derive(Serialize)]
struct PosePacket<'a> {
    sequence: u64,
    joints: &'a BTreeMap<String, JointValue>,
}

/// Collects joint values from a rig and sends them to an external engine.
pub struct PoseBroadcaster {
    socket: UdpSocket,
    target: SocketAddr,
    joints: JointTable,
    sequence: u64,
}

impl PoseBroadcaster {
    /// Bind a local socket and resolve the configured target.
    pub async fn connect(config: &OutputConfig) -> Result<Self> {
        let target = tokio::net::lookup_host(&config.target)
            .await
            .map_err(|e| OutputError::Sink(format!("Cannot resolve {}: {}", config.target, e)))?
            .next()
            .ok_or_else(|| OutputError::Sink(format!("No address for {}", config.target)))?;

        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| OutputError::Sink(format!("Failed to bind {}: {}", local, e)))?;

        tracing::info!("Sending pose to udp://{}", target);

        Ok(Self {
            socket,
            target,
            joints: Arc::new(Mutex::new(BTreeMap::new())),
            sequence: 0,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// A joint tree shaped like `P` whose leaves record into this broadcaster.
    pub fn joint_tree<P: PoseTree>(&self) -> JointNode {
        P::joint_tree("", &mut |path, kind| recording_leaf(&self.joints, path, kind))
    }

    /// Serialise the recorded joints as the next packet.
    pub fn encode(&mut self) -> std::result::Result<Vec<u8>, OutputError> {
        let joints = self.joints.lock().unwrap_or_else(PoisonError::into_inner);
        let packet = PosePacket {
            sequence: self.sequence,
            joints: &joints,
        };
        let bytes =
            serde_json::to_vec(&packet).map_err(|e| OutputError::Encode(e.to_string()))?;
        self.sequence += 1;
        Ok(bytes)
    }

    /// Send what the rig last drove. Nothing is sent before the first drive.
    pub async fn flush(&mut self) -> Result<()> {
        if self
            .joints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
        {
            return Ok(());
        }

        let bytes = self.encode()?;
        self.socket
            .send_to(&bytes, self.target)
            .await
            .map_err(|e| OutputError::Sink(format!("Send to {} failed: {}", self.target, e)))?;
        Ok(())
    }
}

fn recording_leaf(joints: &JointTable, path: &str, kind: JointKind) -> JointNode {
    let joints = Arc::clone(joints);
    let path = path.to_string();
    match kind {
        JointKind::Cone => JointNode::cone(move |angle: EulerAngle| {
            record(&joints, &path, JointValue::Cone(angle));
        }),
        _ => JointNode::hinge(move |angle: f64| {
            record(&joints, &path, JointValue::Hinge(angle));
        }),
    }
}

fn record(joints: &JointTable, path: &str, value: JointValue) {
    joints
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(path.to_string(), value);
}

/// A joint tree shaped like `P` that only logs what it is driven with.
pub fn tracing_tree<P: PoseTree>() -> JointNode {
    P::joint_tree("", &mut |path, kind| {
        let path = path.to_string();
        match kind {
            JointKind::Cone => JointNode::cone(move |angle: EulerAngle| {
                tracing::trace!("{} = {:?}", path, angle);
            }),
            _ => JointNode::hinge(move |angle: f64| {
                tracing::trace!("{} = {:.2}", path, angle);
            }),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Bilateral, HumanPoseAngles, PartialHumanPose, Rig};
    use std::time::Duration;

    async fn listener() -> (UdpSocket, OutputConfig) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = OutputConfig {
            enabled: true,
            target: socket.local_addr().unwrap().to_string(),
            ..OutputConfig::default()
        };
        (socket, config)
    }

    #[tokio::test]
    async fn test_rig_pose_is_sent_as_json() {
        let (socket, config) = listener().await;
        let mut broadcaster = PoseBroadcaster::connect(&config).await.unwrap();

        let mut rig: Rig<HumanPoseAngles> = Rig::default();
        rig.control(broadcaster.joint_tree::<HumanPoseAngles>());

        let mut update = PartialHumanPose::default();
        update.arms.left.upper = Some(EulerAngle::new(0.0, 15.0, 0.0));
        rig.apply(&update);
        rig.update(0.016);
        broadcaster.flush().await.unwrap();

        let mut buf = vec![0u8; 65536];
        let size = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let packet: serde_json::Value = serde_json::from_slice(&buf[..size]).unwrap();

        assert_eq!(packet["sequence"], 0);
        assert_eq!(packet["joints"]["arms.left.upper"]["pitch"], 15.0);
        assert_eq!(packet["joints"]["head"]["yaw"], 0.0);
    }

    #[tokio::test]
    async fn test_flush_before_drive_sends_nothing() {
        let (_socket, config) = listener().await;
        let mut broadcaster = PoseBroadcaster::connect(&config).await.unwrap();
        broadcaster.flush().await.unwrap();
        assert_eq!(broadcaster.sequence, 0);
    }

    #[tokio::test]
    async fn test_hinge_leaves_record_scalars() {
        let (_socket, config) = listener().await;
        let mut broadcaster = PoseBroadcaster::connect(&config).await.unwrap();

        let mut rig = Rig::new(Bilateral::new(30.0, -10.0));
        rig.control(broadcaster.joint_tree::<Bilateral<f64>>());
        rig.update(0.0);

        let packet: serde_json::Value =
            serde_json::from_slice(&broadcaster.encode().unwrap()).unwrap();
        assert_eq!(packet["joints"]["left"], 30.0);
        assert_eq!(packet["joints"]["right"], -10.0);
        assert!(!broadcaster.encode().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_target() {
        let config = OutputConfig {
            target: "not an address".to_string(),
            ..OutputConfig::default()
        };
        assert!(PoseBroadcaster::connect(&config).await.is_err());
    }

    #[test]
    fn test_tracing_tree_binds_to_human_pose() {
        let mut rig: Rig<HumanPoseAngles> = Rig::default();
        assert!(rig.try_control(tracing_tree::<HumanPoseAngles>()).is_ok());
        rig.update(0.016);
    }
}
