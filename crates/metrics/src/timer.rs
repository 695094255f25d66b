use std::time::{
    Duration,
    Instant,
};

use prometheus::{
    Histogram,
    HistogramVec,
};

use crate::labels::{
    STATUS_ERROR,
    STATUS_SUCCESS,
};

/// Observes the elapsed wall-clock time into its histogram when dropped.
pub struct Timer {
    start: Instant,
    histogram: &'static Histogram,
}

impl Timer {
    pub fn new(histogram: &'static Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Status timer that reports under the error status unless `.finish()` is
/// explicitly called upon success. The histogram must declare a single
/// `status` label.
pub struct StatusTimer {
    start: Instant,
    histogram: &'static HistogramVec,
    finished: bool,
}

impl StatusTimer {
    pub fn new(histogram: &'static HistogramVec) -> Self {
        Self {
            start: Instant::now(),
            histogram,
            finished: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(mut self) -> Duration {
        self.observe(STATUS_SUCCESS);
        self.start.elapsed()
    }

    fn observe(&mut self, status: &str) {
        self.histogram
            .with_label_values(&[status])
            .observe(self.start.elapsed().as_secs_f64());
        self.finished = true;
    }
}

impl Drop for StatusTimer {
    fn drop(&mut self) {
        if self.finished || std::thread::panicking() {
            return;
        }
        self.observe(STATUS_ERROR);
    }
}
