//! Detection cadence control.
//!
//! Detection is the expensive part of the pipeline, so it runs every Kth
//! frame while rendering happens every frame. Raising K is the documented
//! mitigation when detection exceeds the frame budget; it is a config
//! value, never hardcoded.

/// Decides on each frame tick whether to run detection.
#[derive(Debug)]
pub struct DetectionScheduler {
    cadence: u64,
    frame: u64,
    cycles: u64,
}

impl DetectionScheduler {
    /// `cadence` of 0 is treated as 1 (detect every frame).
    pub fn new(cadence: u32) -> Self {
        Self {
            cadence: u64::from(cadence.max(1)),
            frame: 0,
            cycles: 0,
        }
    }

    /// Advances the frame counter; returns true when this frame is a
    /// detection cycle (frames K, 2K, 3K, ... of the 1-based counter).
    pub fn tick(&mut self) -> bool {
        self.frame += 1;
        let run = self.frame % self.cadence == 0;
        if run {
            self.cycles += 1;
        }
        run
    }

    /// Total frames ticked so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Completed detection cycles; the lifecycle manager's clock.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_three_runs_on_multiples() {
        let mut s = DetectionScheduler::new(3);
        let detected: Vec<u64> = (1..=9).filter(|_| s.tick()).collect();
        assert_eq!(detected, vec![3, 6, 9]);
        assert_eq!(s.frame(), 9);
        assert_eq!(s.cycles(), 3);
    }

    #[test]
    fn cadence_one_runs_every_frame() {
        let mut s = DetectionScheduler::new(1);
        assert!((0..5).all(|_| s.tick()));
    }

    #[test]
    fn zero_cadence_is_clamped() {
        let mut s = DetectionScheduler::new(0);
        assert!(s.tick());
    }
}
