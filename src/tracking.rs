//! Detection worker and the landmark cache it publishes into.
//!
//! Frames go to the worker through a bounded channel of one slot; a busy
//! worker means the frame is dropped, never that the render loop waits.
//! Results replace the whole cached [`DetectionSnapshot`] in one swap.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use image::RgbImage;
use tracing::{debug, info, span, warn, Level};

use crate::landmarks::LandmarkSet;
use crate::pipeline::LandmarkDetector;

/// One complete detection result.
#[derive(Debug, Clone, Default)]
pub struct DetectionSnapshot {
    /// Frame-source epoch the frame came from.
    pub epoch: u64,
    /// Increments with every published result; 0 means nothing published yet.
    pub generation: u64,
    pub faces: Vec<LandmarkSet>,
    /// Consecutive results in this epoch with no faces, including this one.
    pub empty_streak: u32,
    /// Total failed detection cycles since the cache was created.
    pub failures: u64,
    /// Epoch of the most recent failure, cleared by the next published result.
    pub failed_epoch: Option<u64>,
}

type Slot = Arc<RwLock<Arc<DetectionSnapshot>>>;

/// The only handle that can publish detection results. Not `Clone`.
pub struct LandmarkWriter {
    slot: Slot,
}

/// Read side of the cache; cheap to clone and share.
#[derive(Clone)]
pub struct LandmarkReader {
    slot: Slot,
}

pub fn landmark_cache() -> (LandmarkWriter, LandmarkReader) {
    let slot: Slot = Arc::new(RwLock::new(Arc::new(DetectionSnapshot::default())));
    (LandmarkWriter { slot: slot.clone() }, LandmarkReader { slot })
}

impl LandmarkWriter {
    pub fn publish(&self, epoch: u64, faces: Vec<LandmarkSet>) -> Arc<DetectionSnapshot> {
        let mut guard = self.lock();
        let prev = guard.clone();
        let empty_streak = match (faces.is_empty(), prev.epoch == epoch) {
            (false, _) => 0,
            (true, true) => prev.empty_streak + 1,
            (true, false) => 1,
        };
        let next = Arc::new(DetectionSnapshot {
            epoch,
            generation: prev.generation + 1,
            faces,
            empty_streak,
            failures: prev.failures,
            failed_epoch: None,
        });
        *guard = next.clone();
        next
    }

    /// Record a failed cycle for `epoch`. Faces and generation stay as they were.
    pub fn fail(&self, epoch: u64) -> Arc<DetectionSnapshot> {
        let mut guard = self.lock();
        let next = Arc::new(DetectionSnapshot {
            failures: guard.failures + 1,
            failed_epoch: Some(epoch),
            ..DetectionSnapshot::clone(&guard)
        });
        *guard = next.clone();
        next
    }

    fn lock(&self) -> std::sync::RwLockWriteGuard<'_, Arc<DetectionSnapshot>> {
        match self.slot.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl LandmarkReader {
    pub fn latest(&self) -> Arc<DetectionSnapshot> {
        match self.slot.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// A frame handed to the detector, tagged with its source epoch.
pub struct FrameTicket {
    pub epoch: u64,
    pub frame: Arc<RgbImage>,
}

/// Owns the detection worker thread. Dropping it stops and joins the worker.
pub struct DetectionPipeline {
    tx: Option<SyncSender<FrameTicket>>,
    worker: Option<JoinHandle<()>>,
    reader: LandmarkReader,
    name: String,
}

impl DetectionPipeline {
    pub fn start(mut detector: Box<dyn LandmarkDetector>) -> Self {
        let (writer, reader) = landmark_cache();
        // Bounded channel (1) so a slow detector cannot build a backlog
        let (tx, rx) = mpsc::sync_channel::<FrameTicket>(1);
        let name = detector.name();

        let worker = std::thread::Builder::new()
            .name("landmark-detection".to_string())
            .spawn(move || run_worker(detector.as_mut(), rx, writer))
            .map_err(|e| warn!("could not spawn detection thread: {e}"))
            .ok();

        info!("Detection pipeline started: {}", name);
        Self { tx: Some(tx), worker, reader, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reader(&self) -> LandmarkReader {
        self.reader.clone()
    }

    /// Hand a frame to the worker. Returns false when the worker is busy
    /// (the frame is dropped) or gone.
    pub fn submit(&self, ticket: FrameTicket) -> bool {
        let Some(tx) = &self.tx else { return false };
        match tx.try_send(ticket) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                warn!("detection worker is gone; frame dropped");
                false
            }
        }
    }

    pub fn shutdown(&mut self) {
        // Closing the channel ends the worker's recv loop.
        self.tx.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("detection worker panicked");
            }
            info!("Detection pipeline stopped");
        }
    }
}

impl Drop for DetectionPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(detector: &mut dyn LandmarkDetector, rx: Receiver<FrameTicket>, writer: LandmarkWriter) {
    while let Ok(first) = rx.recv() {
        // Skip to the newest frame if more arrived while we were busy.
        let mut ticket = first;
        while let Ok(newer) = rx.try_recv() {
            ticket = newer;
        }

        let span = span!(Level::DEBUG, "detect", epoch = ticket.epoch);
        let _guard = span.enter();
        match detector.detect(&ticket.frame) {
            Ok(faces) => {
                let snapshot = writer.publish(ticket.epoch, faces);
                debug!(
                    generation = snapshot.generation,
                    faces = snapshot.faces.len(),
                    "landmarks published"
                );
            }
            // Keep the previous landmarks authoritative.
            Err(e) => {
                warn!("detection failed, keeping previous landmarks: {e}");
                writer.fail(ticket.epoch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{level_face, wait_for, ScriptedDetector};
    use crate::error::TryOnError;

    #[test]
    fn empty_streak_counts_within_an_epoch() {
        let (writer, reader) = landmark_cache();
        assert_eq!(reader.latest().generation, 0);

        writer.publish(1, vec![level_face(0.5, 0.5, 0.2)]);
        assert_eq!(reader.latest().empty_streak, 0);
        writer.publish(1, vec![]);
        writer.publish(1, vec![]);
        assert_eq!(reader.latest().empty_streak, 2);

        // A new epoch restarts the count.
        writer.publish(2, vec![]);
        let snap = reader.latest();
        assert_eq!(snap.empty_streak, 1);
        assert_eq!(snap.generation, 4);
    }

    #[test]
    fn readers_see_whole_snapshots() {
        let (writer, reader) = landmark_cache();
        let before = reader.latest();
        writer.publish(1, vec![level_face(0.3, 0.5, 0.2), level_face(0.7, 0.5, 0.2)]);
        // An Arc taken earlier is unaffected by the swap.
        assert!(before.faces.is_empty());
        assert_eq!(reader.latest().faces.len(), 2);
    }

    #[test]
    fn failed_detection_keeps_previous_result() {
        let detector = ScriptedDetector::new(vec![
            Ok(vec![level_face(0.5, 0.5, 0.2)]),
            Err(TryOnError::Detection("boom".into())),
        ]);
        let pipeline = DetectionPipeline::start(Box::new(detector.clone()));
        let reader = pipeline.reader();
        let frame = Arc::new(RgbImage::new(8, 8));

        assert!(wait_for(|| {
            pipeline.submit(FrameTicket { epoch: 1, frame: frame.clone() });
            reader.latest().generation >= 1
        }));
        assert!(wait_for(|| {
            pipeline.submit(FrameTicket { epoch: 1, frame: frame.clone() });
            detector.calls() >= 2
        }));

        assert!(wait_for(|| reader.latest().failures >= 1));
        let snap = reader.latest();
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.faces.len(), 1);
        assert_eq!(snap.failed_epoch, Some(1));
    }

    #[test]
    fn next_result_clears_the_failed_epoch() {
        let (writer, reader) = landmark_cache();
        writer.publish(1, vec![level_face(0.5, 0.5, 0.2)]);
        writer.fail(2);
        let failed = reader.latest();
        assert_eq!((failed.epoch, failed.failed_epoch, failed.failures), (1, Some(2), 1));

        writer.publish(2, vec![]);
        let snap = reader.latest();
        assert_eq!(snap.failed_epoch, None);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.generation, 2);
    }

    #[test]
    fn dropping_the_pipeline_joins_the_worker() {
        let detector = ScriptedDetector::new(vec![]);
        let mut pipeline = DetectionPipeline::start(Box::new(detector));
        pipeline.shutdown();
        assert!(!pipeline.submit(FrameTicket { epoch: 0, frame: Arc::new(RgbImage::new(1, 1)) }));
    }
}
