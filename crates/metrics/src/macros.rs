pub use paste::paste;

/// Register an integer counter with the rotor metrics registry and store it
/// in a static. The reported metric name is the lower_snake_case version of
/// the declared variable name. An optional third argument declares labels,
/// which switches the static to the `Vec` flavor of the metric.
#[macro_export]
macro_rules! register_rotor_counter {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    $crate::prometheus::register_int_counter_with_registry!(
                        stringify!([<$NAME:lower>]),
                        $HELP,
                        &*$crate::ROTOR_METRICS_REGISTRY,
                    )
                    .expect("Metric initialization failed")
                }
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounterVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    $crate::prometheus::register_int_counter_vec_with_registry!(
                        stringify!([<$NAME:lower>]),
                        $HELP,
                        $LABELS,
                        &*$crate::ROTOR_METRICS_REGISTRY,
                    )
                    .expect("Metric initialization failed")
                }
            });
    };
}

/// Register a histogram with the rotor metrics registry and store it in a
/// static. See [`register_rotor_counter`] for naming and label conventions.
#[macro_export]
macro_rules! register_rotor_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Histogram> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    $crate::prometheus::register_histogram_with_registry!(
                        stringify!([<$NAME:lower>]),
                        $HELP,
                        &*$crate::ROTOR_METRICS_REGISTRY,
                    )
                    .expect("Metric initialization failed")
                }
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::HistogramVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    $crate::prometheus::register_histogram_vec_with_registry!(
                        stringify!([<$NAME:lower>]),
                        $HELP,
                        $LABELS,
                        &*$crate::ROTOR_METRICS_REGISTRY,
                    )
                    .expect("Metric initialization failed")
                }
            });
    };
}

/// Register an integer gauge with the rotor metrics registry and store it in
/// a static. See [`register_rotor_counter`] for naming and label conventions.
#[macro_export]
macro_rules! register_rotor_gauge {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntGauge> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    $crate::prometheus::register_int_gauge_with_registry!(
                        stringify!([<$NAME:lower>]),
                        $HELP,
                        &*$crate::ROTOR_METRICS_REGISTRY,
                    )
                    .expect("Metric initialization failed")
                }
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntGaugeVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    $crate::prometheus::register_int_gauge_vec_with_registry!(
                        stringify!([<$NAME:lower>]),
                        $HELP,
                        $LABELS,
                        &*$crate::ROTOR_METRICS_REGISTRY,
                    )
                    .expect("Metric initialization failed")
                }
            });
    };
}
