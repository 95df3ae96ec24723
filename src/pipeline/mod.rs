// Copyright (c) 2026 artrack contributors
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT
//! Per-frame orchestration of the detection-to-render pipeline.
//!
//! One [`TrackingSession`] exists per active AR session, owning every stage
//! explicitly (no module-global state). Each host animation tick calls
//! [`TrackingSession::tick`]; on detection cycles the full chain runs
//! (extract -> detect -> estimate -> convert -> lifecycle), strictly in
//! order within the tick, while other ticks return immediately so the host
//! can re-render the last transforms.

pub mod frame;
pub mod lifecycle;
pub mod scheduler;
pub mod telemetry;
pub mod transform;

use log::{debug, warn};

use crate::config::TrackerConfig;
use crate::core::detector::{Detector, DetectorOptions};
use crate::core::dictionary::Dictionary;
use crate::core::posit::PositEstimator;
use crate::Result;

use frame::{FrameExtractor, FrameSource, SourceStats};
use lifecycle::{ObjectRegistry, SceneRenderer};
use scheduler::DetectionScheduler;
use telemetry::Telemetry;
use transform::{center_corners, RenderTransform, TransformConverter};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session not started (or stopped); nothing ran.
    Idle,
    /// Off-cadence frame: render-only, detection skipped by the scheduler.
    RenderOnly,
    /// Detection cycle with no usable frame from the source.
    SourceNotReady,
    /// Detection ran; `markers` markers were tracked this cycle.
    Detected { markers: usize },
}

/// The AR tracking pipeline for one session.
///
/// Generic over the frame source and the host renderer; the renderer is
/// borrowed per tick rather than owned so the host keeps control of its
/// scene between ticks.
pub struct TrackingSession<S: FrameSource, R: SceneRenderer> {
    config: TrackerConfig,
    source: S,
    extractor: FrameExtractor,
    detector: Detector,
    /// Rebuilt when the source width changes, since the focal length is
    /// approximated from image width.
    estimator: Option<(u32, PositEstimator)>,
    converter: TransformConverter,
    registry: ObjectRegistry<R::Drawable>,
    scheduler: DetectionScheduler,
    telemetry: Telemetry,
    stalled_cycles: u32,
    running: bool,
}

impl<S: FrameSource, R: SceneRenderer> TrackingSession<S, R> {
    pub fn new(config: TrackerConfig, source: S) -> Self {
        let detector_options = DetectorOptions {
            warp_size: config.warp_size,
            max_hamming_distance: config.max_hamming_distance,
            min_contour_fraction: config.min_contour_fraction,
            min_edge_length_px: config.min_edge_length_px,
            ..DetectorOptions::default()
        };
        Self {
            detector: Detector::new(Dictionary::aruco_original(), detector_options),
            converter: TransformConverter::new(&config),
            registry: ObjectRegistry::new(config.miss_tolerance),
            scheduler: DetectionScheduler::new(config.detection_cadence),
            extractor: FrameExtractor::new(),
            estimator: None,
            telemetry: Telemetry::default(),
            stalled_cycles: 0,
            running: false,
            config,
            source,
        }
    }

    /// Acquires and starts the frame source. Failures here carry a
    /// human-readable reason and must be shown to the user by the host.
    pub fn start(&mut self) -> Result<()> {
        self.source.initialize()?;
        self.source.start()?;
        self.running = true;
        debug!("tracking session started");
        Ok(())
    }

    /// Stops the source and clears every tracked object from the scene.
    pub fn stop(&mut self, renderer: &mut R) {
        self.source.stop();
        self.running = false;
        self.registry.clear(renderer);
        debug!("tracking session stopped");
    }

    /// Runs one animation tick. Never panics and never returns an error:
    /// per-cycle failures are recovered locally and the next frame is the
    /// retry.
    pub fn tick(&mut self, renderer: &mut R) -> TickOutcome {
        if !self.running {
            return TickOutcome::Idle;
        }
        if !self.scheduler.tick() {
            self.telemetry.frame_skipped();
            return TickOutcome::RenderOnly;
        }
        let cycle = self.scheduler.cycles();

        let (width, height) = self.source.dimensions();
        if width == 0 || height == 0 {
            return self.stall(renderer);
        }

        let estimator: &PositEstimator = match &mut self.estimator {
            Some((w, est)) if *w == width => &*est,
            slot => {
                let focal = TrackerConfig::focal_length_for(width);
                debug!("pose estimator rebuilt: focal length {focal} px");
                &slot
                    .insert((width, PositEstimator::new(self.config.marker_size_mm, focal)))
                    .1
            }
        };

        let mut updates: Vec<(u32, RenderTransform)> = Vec::new();
        let mut tracked_ids: Vec<u32> = Vec::new();
        {
            let Some(frame) = self.extractor.extract(&mut self.source) else {
                return self.stall(renderer);
            };

            let observations = match self.detector.detect(&frame) {
                Ok(observations) => observations,
                Err(err) => {
                    // Degenerate input: skip the cycle, never throw.
                    debug!("detection skipped: {err}");
                    self.telemetry.record_error();
                    return TickOutcome::SourceNotReady;
                }
            };

            updates.reserve(observations.len());
            for observation in &observations {
                let centered = center_corners(&observation.corners, frame.width, frame.height);
                match estimator.estimate(&centered) {
                    Ok(solution) => {
                        updates.push((observation.id, self.converter.convert(&solution.best)));
                        tracked_ids.push(observation.id);
                    }
                    Err(err) => {
                        // Treated exactly like "marker not observed": the
                        // existing object keeps its last-known-good
                        // transform and keeps aging.
                        debug!("marker {}: {err}", observation.id);
                        self.telemetry.record_error();
                    }
                }
            }
        }
        self.stalled_cycles = 0;

        for (id, transform) in &updates {
            self.registry.observe(renderer, cycle, *id, transform);
        }
        self.registry.sweep(renderer, cycle);
        self.telemetry.record_cycle(&tracked_ids);

        TickOutcome::Detected {
            markers: updates.len(),
        }
    }

    /// A detection cycle without a usable frame. Tracked objects are left
    /// frozen in their last pose until the source has been gone long
    /// enough, then cleared so no stale ghosts linger.
    fn stall(&mut self, renderer: &mut R) -> TickOutcome {
        self.stalled_cycles += 1;
        self.telemetry.frame_skipped();
        if self.stalled_cycles >= self.config.source_stall_tolerance && !self.registry.is_empty() {
            warn!(
                "frame source stalled for {} cycles, clearing {} tracked objects",
                self.stalled_cycles,
                self.registry.len()
            );
            self.registry.clear(renderer);
        }
        TickOutcome::SourceNotReady
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn tracked_count(&self) -> usize {
        self.registry.len()
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

/// Convenience constructor wiring the default configuration.
impl<S: FrameSource, R: SceneRenderer> TrackingSession<S, R> {
    pub fn with_defaults(source: S) -> Self {
        Self::new(TrackerConfig::default(), source)
    }
}
