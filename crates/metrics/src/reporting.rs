use prometheus::{
    Histogram,
    HistogramVec,
    IntCounter,
    IntCounterVec,
    IntGauge,
    IntGaugeVec,
};

pub fn log_counter(counter: &'static IntCounter, count: u64) {
    counter.inc_by(count);
}

pub fn log_counter_with_labels(counter: &'static IntCounterVec, count: u64, labels: &[&str]) {
    counter.with_label_values(labels).inc_by(count);
}

pub fn log_distribution(histogram: &'static Histogram, value: f64) {
    histogram.observe(value);
}

pub fn log_distribution_with_labels(histogram: &'static HistogramVec, value: f64, labels: &[&str]) {
    histogram.with_label_values(labels).observe(value);
}

pub fn log_gauge(gauge: &'static IntGauge, value: i64) {
    gauge.set(value);
}

pub fn log_gauge_with_labels(gauge: &'static IntGaugeVec, value: i64, labels: &[&str]) {
    gauge.with_label_values(labels).set(value);
}
