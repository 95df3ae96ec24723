//! Per-cycle counters for an external debug overlay. Not required for
//! correctness; the pipeline updates them unconditionally because they are
//! cheap.

use serde::Serialize;

/// Snapshot of pipeline activity, serializable for a debug HUD.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Telemetry {
    /// Markers decoded in the most recent detection cycle.
    pub markers_this_cycle: u32,
    /// Ids decoded in the most recent detection cycle.
    pub ids_this_cycle: Vec<u32>,
    /// Cumulative successful marker decodes across the session.
    pub total_detections: u64,
    /// Cumulative per-marker failures (invalid buffers, unsolvable poses).
    pub total_errors: u64,
    /// Frames elapsed since detection last ran ("frame skip").
    pub frames_since_detection: u64,
}

impl Telemetry {
    pub fn record_cycle(&mut self, ids: &[u32]) {
        self.markers_this_cycle = ids.len() as u32;
        self.ids_this_cycle.clear();
        self.ids_this_cycle.extend_from_slice(ids);
        self.total_detections += ids.len() as u64;
        self.frames_since_detection = 0;
    }

    pub fn record_error(&mut self) {
        self.total_errors += 1;
    }

    pub fn frame_skipped(&mut self) {
        self.frames_since_detection += 1;
    }
}
