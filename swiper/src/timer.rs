use std::time::Instant;

pub struct Timer {
    active: bool,
    timestamp: Instant,
}

impl Timer {
    pub fn new(active: bool) -> Timer {
        Timer {
            active,
            timestamp: Instant::now(),
        }
    }

    /// Returns the milliseconds since the last stop (or construction)
    /// and restarts the measurement.
    pub fn stop(&mut self) -> f32 {
        assert!(self.active);
        let curr = Instant::now();
        let last = self.timestamp;
        self.timestamp = curr;

        (curr - last).as_secs_f32() * 1000.0
    }

    pub fn active(&self) -> bool {
        self.active
    }
}
