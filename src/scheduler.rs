// ============================================================================
// RENDER SCHEDULER: cancellable single-flight timer slots
// ============================================================================
//
// The session clock is `f64` seconds (egui's `input.time`). A slot holds at
// most one pending deadline; requesting again rearms it instead of stacking.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once the requests have been quiet for the interval.
    Debounce,
    /// Fire at most once per interval: immediately on the first request,
    /// then once more at the end of the window if requests kept coming.
    Throttle,
}

#[derive(Clone, Debug)]
pub struct TimerSlot {
    mode: TimerMode,
    interval: f64,
    deadline: Option<f64>,
    last_fire: Option<f64>,
}

impl TimerSlot {
    pub fn debounce(interval: f64) -> Self {
        Self::new(TimerMode::Debounce, interval)
    }

    pub fn throttle(interval: f64) -> Self {
        Self::new(TimerMode::Throttle, interval)
    }

    fn new(mode: TimerMode, interval: f64) -> Self {
        Self {
            mode,
            interval: interval.max(0.0),
            deadline: None,
            last_fire: None,
        }
    }

    /// Ask for a run. Returns `true` when the caller should run right now
    /// (throttle leading edge); otherwise the run is left pending.
    pub fn request(&mut self, now: f64) -> bool {
        match self.mode {
            TimerMode::Debounce => {
                self.deadline = Some(now + self.interval);
                false
            }
            TimerMode::Throttle => {
                let ready = self.last_fire.is_none_or(|t| now - t >= self.interval);
                if ready && self.deadline.is_none() {
                    self.last_fire = Some(now);
                    true
                } else {
                    if self.deadline.is_none() {
                        let base = self.last_fire.unwrap_or(now);
                        self.deadline = Some(base + self.interval);
                    }
                    false
                }
            }
        }
    }

    /// Returns `true` once when the pending deadline has passed.
    pub fn poll(&mut self, now: f64) -> bool {
        match self.deadline {
            Some(d) if now >= d => {
                self.deadline = None;
                self.last_fire = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Seconds until the pending deadline, for repaint scheduling.
    pub fn time_until(&self, now: f64) -> Option<f64> {
        self.deadline.map(|d| (d - now).max(0.0))
    }
}
