use std::io::{self, Write};
use std::time::Instant;

/// Throttled progress display on stderr.
///
/// A reporter is an ordinary value owned by the caller and handed into
/// long-running operations; all throttle state lives inside it. Output
/// looks like:
///
/// - `Indexing objects: 42` (no total)
/// - `Indexing objects:  50% (42/84)` (with total)
pub struct ProgressReporter {
    title: String,
    total: Option<u64>,
    current: u64,
    start_time: Instant,
    last_update: Instant,
    /// Minimum delay between display updates in milliseconds.
    delay_ms: u64,
    started: bool,
    /// Last percentage displayed, to skip redundant redraws.
    last_percent: Option<u32>,
    /// When false the reporter counts but never writes.
    visible: bool,
}

impl ProgressReporter {
    /// Create a reporter with a title and optional total count.
    pub fn new(title: &str, total: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            title: title.to_string(),
            total,
            current: 0,
            start_time: now,
            last_update: now,
            delay_ms: 100,
            started: false,
            last_percent: None,
            visible: true,
        }
    }

    /// A reporter that counts but produces no output.
    pub fn hidden() -> Self {
        let mut p = Self::new("", None);
        p.visible = false;
        p
    }

    /// Replace the title and total for a new phase of the same operation.
    pub fn restart(&mut self, title: &str, total: Option<u64>) {
        self.title = title.to_string();
        self.total = total;
        self.current = 0;
        self.started = false;
        self.last_percent = None;
    }

    /// Set the current count, redrawing if the throttle allows.
    pub fn update(&mut self, count: u64) {
        self.current = count;
        if !self.visible {
            return;
        }

        let now = Instant::now();
        let since_last = now.duration_since(self.last_update).as_millis() as u64;

        if self.started && since_last < self.delay_ms {
            // Always render the final count even when rate-limited.
            match self.total {
                Some(total) if count >= total => {}
                _ => return,
            }
        }

        if let Some(total) = self.total {
            if total > 0 {
                let percent = ((count as f64 / total as f64) * 100.0) as u32;
                if self.started && self.last_percent == Some(percent) && count < total {
                    return;
                }
                self.last_percent = Some(percent);
            }
        }

        self.started = true;
        self.last_update = now;
        self.display();
    }

    /// Increment the count by one.
    pub fn tick(&mut self) {
        self.update(self.current + 1);
    }

    /// Current count.
    pub fn current(&self) -> u64 {
        self.current
    }

    fn display(&self) {
        let mut stderr = io::stderr();
        let line = match self.total {
            Some(total) if total > 0 => {
                let percent = (self.current as f64 / total as f64) * 100.0;
                format!(
                    "\r{}: {:3.0}% ({}/{})",
                    self.title, percent, self.current, total
                )
            }
            _ => format!("\r{}: {}", self.title, self.current),
        };
        let _ = write!(stderr, "{line}");
        let _ = stderr.flush();
    }

    /// Finish the current phase, printing a closing `done.` line.
    pub fn finish(&mut self) {
        if !self.visible || !self.started {
            return;
        }
        let mut stderr = io::stderr();
        let elapsed = self.start_time.elapsed();
        let elapsed_str = if elapsed.as_secs() > 0 {
            format!(", {:.2}s", elapsed.as_secs_f64())
        } else {
            String::new()
        };
        match self.total {
            Some(total) if total > 0 => {
                let _ = writeln!(
                    stderr,
                    "\r{}: 100% ({}/{}){}, done.",
                    self.title, total, total, elapsed_str
                );
            }
            _ => {
                let _ = writeln!(
                    stderr,
                    "\r{}: {}{}, done.",
                    self.title, self.current, elapsed_str
                );
            }
        }
        let _ = stderr.flush();
        self.started = false;
    }
}
