use std::time::{Duration, Instant};

/// Averages rate samples over fixed, back-to-back time windows.
///
/// An empty window averages to 0. Windowing is purely an observer concern;
/// the engine publishes every sample unchanged.
#[derive(Debug, Clone)]
pub struct RateWindow {
    width: Duration,
    window_start: Instant,
    sum: f64,
    count: u64,
}

impl RateWindow {
    pub fn new(width: Duration, now: Instant) -> Self {
        Self {
            width,
            window_start: now,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn width(&self) -> Duration {
        self.width
    }

    pub fn push(&mut self, rate: f64) {
        if rate.is_finite() {
            self.sum += rate;
            self.count += 1;
        }
    }

    /// Closes the current window if `now` has reached its end.
    ///
    /// Returns the window's mean and sample count, then starts a new window.
    pub fn poll(&mut self, now: Instant) -> Option<(f64, u64)> {
        if now.saturating_duration_since(self.window_start) < self.width {
            return None;
        }
        let closed = self.flush();
        self.window_start = now;
        Some(closed)
    }

    /// Mean of whatever is buffered, resetting the window contents.
    pub fn flush(&mut self) -> (f64, u64) {
        let mean = if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        };
        let count = self.count;
        self.sum = 0.0;
        self.count = 0;
        (mean, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_samples_in_window() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(1), t0);
        window.push(100.0);
        window.push(300.0);
        assert_eq!(window.poll(t0 + Duration::from_millis(500)), None);
        assert_eq!(
            window.poll(t0 + Duration::from_secs(1)),
            Some((200.0, 2))
        );
    }

    #[test]
    fn empty_window_reports_zero() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(1), t0);
        assert_eq!(window.poll(t0 + Duration::from_secs(2)), Some((0.0, 0)));
    }

    #[test]
    fn windows_do_not_leak_into_each_other() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(Duration::from_millis(100), t0);
        window.push(10.0);
        let t1 = t0 + Duration::from_millis(100);
        assert_eq!(window.poll(t1), Some((10.0, 1)));
        window.push(30.0);
        assert_eq!(window.poll(t1 + Duration::from_millis(100)), Some((30.0, 1)));
    }

    #[test]
    fn non_finite_samples_ignored() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(1), t0);
        window.push(f64::NAN);
        window.push(50.0);
        assert_eq!(window.flush(), (50.0, 1));
    }
}
