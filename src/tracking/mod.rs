//! Tracking module
//!
//! Everything between the landmark detector and the joint angles:
//! - landmark names and the COCO / BlazePose id schemas
//! - depth inference from 2D observations
//! - temporal smoothing of 3D estimates
//! - kinematic decomposition into a partial human pose
//! - the JSON-over-UDP detector adapter

pub mod decompose;
pub mod frame;
pub mod landmarks;
pub mod smoothing;
pub mod udp;
pub mod unproject;

pub use decompose::PoseDecomposer;
pub use frame::{FrameRate, LandmarkFrame, LandmarkObservation};
pub use landmarks::{Landmark, LandmarkSchema, LimbLandmarks, Side};
pub use smoothing::TemporalSmoother;
pub use udp::UdpLandmarkDetector;
pub use unproject::{Passthrough, StaticLimbLength, Unprojected, UnprojectedFrame, Unprojector};
