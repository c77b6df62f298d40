pub mod metrics;

pub use metrics::{names, LiveMetrics, MetricsSink, NoopMetrics};
