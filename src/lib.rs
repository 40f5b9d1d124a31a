//! Marionette - body landmarks to joint angles
//!
//! Turns 2D/3D body landmarks from a monocular pose detector into an
//! articulated pose and drives a rig with it:
//! - Unprojects landmarks to 3D and smooths them over time
//! - Decomposes arms, legs and head into per-joint Euler angles
//! - Binds typed poses to actuator trees and animates them from sources
//! - Relays landmark frames between capture processes over WebSocket

pub mod config;
pub mod error;
pub mod math;
pub mod output;
pub mod pipeline;
pub mod pose;
pub mod relay;
pub mod tracking;

pub use config::Config;
pub use error::{MarionetteError, Result};
pub use pipeline::{LandmarkDetector, PoseHandoff, PosePipeline, PoseReader};

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use pose::PartialHumanPose;

/// Application state shared across all components
#[derive(Debug)]
pub struct AppState {
    /// Current configuration
    pub config: RwLock<Config>,
    /// Latest tracked pose
    pub pose: PoseHandoff,
    /// Shutdown signal
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create a new application state with the given configuration
    pub fn new(config: Config) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            config: RwLock::new(config),
            pose: PoseHandoff::new(),
            shutdown_tx,
        })
    }

    /// The most recent pose published by the pipeline
    pub fn latest_pose(&self) -> PartialHumanPose {
        self.pose.snapshot()
    }

    /// Subscribe to shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
