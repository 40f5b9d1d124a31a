//! The motion-capture pipeline driver
//!
//! One cycle: detect landmarks, unproject to 3D, smooth, decompose into joint
//! angles, publish. Cycles run strictly one after another; a frame is never
//! queued behind another, so a slow cycle drops frames rather than lagging.

use glam::DVec3;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::watch;

use crate::config::Config;
use crate::error::Result;
use crate::pose::{PartialHumanPose, PartialPose};
use crate::tracking::{
    unproject, FrameRate, Landmark, LandmarkFrame, PoseDecomposer, TemporalSmoother, Unprojector,
};

/// Pause after a failed cycle.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Cycles between frame-rate log lines.
const FPS_LOG_INTERVAL: u64 = 300;

/// A source of landmark frames.
pub trait LandmarkDetector: Send {
    /// Wait for the next frame. `Ok(None)` means nothing arrived this time.
    fn estimate(&mut self) -> impl Future<Output = Result<Option<LandmarkFrame>>> + Send;
}

/// Latest tracked pose, shared between the pipeline and any number of rigs.
///
/// Writers overlay their partial pose onto the accumulated one in a single
/// atomic update; a leaf nobody has measured yet stays unset.
#[derive(Debug, Clone)]
pub struct PoseHandoff {
    tx: Arc<watch::Sender<PartialHumanPose>>,
}

impl Default for PoseHandoff {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseHandoff {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PartialHumanPose::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, update: &PartialHumanPose) {
        self.tx.send_modify(|pose| pose.overlay(update));
    }

    pub fn snapshot(&self) -> PartialHumanPose {
        *self.tx.borrow()
    }

    pub fn reader(&self) -> PoseReader {
        PoseReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of a [`PoseHandoff`].
#[derive(Debug, Clone)]
pub struct PoseReader {
    rx: watch::Receiver<PartialHumanPose>,
}

impl PoseReader {
    /// The latest pose, without waiting.
    pub fn snapshot(&self) -> PartialHumanPose {
        *self.rx.borrow()
    }

    /// Wait for the next publish. Returns false once every writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Owns one capture source and everything downstream of it.
pub struct PosePipeline<D> {
    detector: D,
    unprojector: Box<dyn Unprojector>,
    smoother: TemporalSmoother,
    decomposer: PoseDecomposer,
    frame_rate: FrameRate,
    handoff: PoseHandoff,
    idle_backoff: Duration,
    cycles: u64,
}

impl<D: LandmarkDetector> PosePipeline<D> {
    pub fn new(
        detector: D,
        unprojector: Box<dyn Unprojector>,
        smoother: TemporalSmoother,
        decomposer: PoseDecomposer,
        handoff: PoseHandoff,
    ) -> Self {
        Self {
            detector,
            unprojector,
            smoother,
            decomposer,
            frame_rate: FrameRate::new(),
            handoff,
            idle_backoff: Duration::from_millis(5),
            cycles: 0,
        }
    }

    pub fn from_config(detector: D, config: &Config, handoff: PoseHandoff) -> Self {
        let mut pipeline = Self::new(
            detector,
            unproject::from_config(&config.unprojector),
            TemporalSmoother::new(&config.smoothing),
            PoseDecomposer::new(&config.decomposer),
            handoff,
        );
        pipeline.idle_backoff = Duration::from_millis(config.tracking.idle_backoff_ms);
        pipeline
    }

    /// Run one detect-to-publish cycle. Returns whether a frame was processed.
    pub async fn cycle(&mut self) -> Result<bool> {
        let Some(frame) = self.detector.estimate().await? else {
            return Ok(false);
        };

        self.process_frame(&frame);
        Ok(true)
    }

    /// Everything after detection, for one frame.
    pub fn process_frame(&mut self, frame: &LandmarkFrame) -> PartialHumanPose {
        self.frame_rate.record(frame.timestamp_ms);
        self.cycles += 1;
        if self.cycles % FPS_LOG_INTERVAL == 0 {
            if let Some(fps) = self.frame_rate.fps() {
                tracing::debug!("Tracking at {:.1} fps", fps);
            }
        }

        let unprojected = self.unprojector.unproject(&frame.observations);
        self.smoother.update(&unprojected);
        let pose = self.decomposer.decompose(self.smoother.estimates());

        if !pose.is_empty() {
            self.handoff.publish(&pose);
        }
        pose
    }

    /// Loop until shutdown is signalled. Shutdown is only checked between
    /// cycles, so an in-flight detection always completes.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        tracing::info!(
            "Pose pipeline started ({} unprojector)",
            self.unprojector.name()
        );

        loop {
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => {
                    tracing::info!("Pose pipeline shutting down");
                    break;
                }
            }

            match self.cycle().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.idle_backoff).await,
                Err(e) => {
                    tracing::error!("Pose pipeline cycle failed: {}", e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }

        Ok(())
    }

    pub fn fps(&self) -> Option<f64> {
        self.frame_rate.fps()
    }

    pub fn estimates(&self) -> &HashMap<Landmark, DVec3> {
        self.smoother.estimates()
    }

    pub fn handoff(&self) -> &PoseHandoff {
        &self.handoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MarionetteError, TrackingError};
    use crate::math::EulerAngle;
    use crate::tracking::{LandmarkObservation, Passthrough};
    use std::collections::VecDeque;

    /// Replays canned frames, then reports nothing.
    struct Replay {
        frames: VecDeque<Result<Option<LandmarkFrame>>>,
    }

    impl LandmarkDetector for Replay {
        async fn estimate(&mut self) -> Result<Option<LandmarkFrame>> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    fn arm_frame(timestamp_ms: f64) -> LandmarkFrame {
        let point = |landmark, x, y| LandmarkObservation::new(landmark, x, y).with_z(0.0);
        LandmarkFrame::new(
            timestamp_ms,
            vec![
                point(Landmark::LeftHip, -0.25, 0.0),
                point(Landmark::RightHip, 0.25, 0.0),
                point(Landmark::LeftShoulder, -0.25, 0.5),
                point(Landmark::RightShoulder, 0.25, 0.5),
                point(Landmark::LeftElbow, -0.6, 0.4),
                point(Landmark::LeftWrist, -0.95, 0.45),
            ],
        )
    }

    fn pipeline(frames: Vec<Result<Option<LandmarkFrame>>>) -> PosePipeline<Replay> {
        PosePipeline::new(
            Replay {
                frames: frames.into(),
            },
            Box::new(Passthrough),
            TemporalSmoother::default(),
            PoseDecomposer::default(),
            PoseHandoff::new(),
        )
    }

    #[tokio::test]
    async fn test_cycle_publishes_pose() {
        let mut pipeline = pipeline(vec![Ok(Some(arm_frame(0.0)))]);
        let reader = pipeline.handoff().reader();

        assert!(pipeline.cycle().await.unwrap());
        let pose = reader.snapshot();
        let upper = pose.arms.left.upper.unwrap();
        assert!(upper.approx_eq(&EulerAngle::new(0.0, 15.945, 0.0), 0.05));
        assert_eq!(pipeline.estimates().len(), 6);

        assert!(!pipeline.cycle().await.unwrap());
    }

    #[tokio::test]
    async fn test_cycle_propagates_detector_error() {
        let error = MarionetteError::Tracking(TrackingError::Receiver("gone".to_string()));
        let mut pipeline = pipeline(vec![Err(error)]);
        assert!(pipeline.cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_frame_rate_from_timestamps() {
        let frames = (0..5).map(|i| Ok(Some(arm_frame(i as f64 * 40.0)))).collect();
        let mut pipeline = pipeline(frames);
        for _ in 0..5 {
            pipeline.cycle().await.unwrap();
        }
        assert!((pipeline.fps().unwrap() - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let pipeline = pipeline(vec![Ok(Some(arm_frame(0.0)))]);
        let handoff = pipeline.handoff().clone();
        let (tx, rx) = broadcast::channel(1);

        let task = tokio::spawn(pipeline.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        task.await.unwrap().unwrap();
        assert!(handoff.snapshot().arms.left.upper.is_some());
    }

    #[test]
    fn test_handoff_overlays_partials() {
        let handoff = PoseHandoff::new();
        let mut first = PartialHumanPose::default();
        first.head = Some(EulerAngle::new(0.0, 5.0, 0.0));
        handoff.publish(&first);

        let mut second = PartialHumanPose::default();
        second.arms.right.lower = Some(EulerAngle::new(0.0, -20.0, 0.0));
        handoff.publish(&second);

        let pose = handoff.reader().snapshot();
        assert_eq!(pose.head, Some(EulerAngle::new(0.0, 5.0, 0.0)));
        assert_eq!(pose.arms.right.lower, Some(EulerAngle::new(0.0, -20.0, 0.0)));
    }
}
