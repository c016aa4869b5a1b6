//! Build phase timing.

use std::time::{Duration, Instant};

/// Measures one build phase and prints its duration when finished.
pub struct Timer {
    phase: String,
    start: Instant,
}

impl Timer {
    pub fn start(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            start: Instant::now(),
        }
    }

    /// Print `[elapsed] phase` and return the elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        println!("  [{}] {}", format_elapsed(elapsed), self.phase);
        elapsed
    }
}

/// `12.3s` below a minute, `1.5m` above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}
