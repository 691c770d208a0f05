//! Dispatcher and runner metrics
//!
//! Each [`MetricsRegistry`] owns its own prometheus registry so several
//! contexts (and tests) never collide on metric registration.

use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::constants::metrics::*;

/// Dispatch outcome counters, labelled by job name
#[derive(Debug, Clone)]
pub struct DispatcherMetrics {
    valid: IntCounterVec,
    invalid: IntCounterVec,
    unknown: IntCounterVec,
}

impl DispatcherMetrics {
    fn register(registry: &Registry) -> prometheus::Result<Self> {
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounterVec> {
            let vec = IntCounterVec::new(Opts::new(name, help), &[JOB_NAME_LABEL])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        Ok(Self {
            valid: counter(DISPATCHER_VALID_JOBS, "Count of valid jobs dispatched")?,
            invalid: counter(DISPATCHER_INVALID_JOBS, "Count of invalid jobs rejected")?,
            unknown: counter(DISPATCHER_UNKNOWN_JOBS, "Count of dispatches for unknown jobs")?,
        })
    }

    pub fn record_valid(&self, job_name: &str, count: u64) {
        self.valid.with_label_values(&[job_name]).inc_by(count);
    }

    pub fn record_invalid(&self, job_name: &str, count: u64) {
        self.invalid.with_label_values(&[job_name]).inc_by(count);
    }

    pub fn record_unknown(&self, job_name: &str) {
        self.unknown.with_label_values(&[job_name]).inc();
    }

    pub fn valid_count(&self, job_name: &str) -> u64 {
        self.valid.with_label_values(&[job_name]).get()
    }

    pub fn invalid_count(&self, job_name: &str) -> u64 {
        self.invalid.with_label_values(&[job_name]).get()
    }

    pub fn unknown_count(&self, job_name: &str) -> u64 {
        self.unknown.with_label_values(&[job_name]).get()
    }
}

/// Run outcome counters and timing histograms
#[derive(Debug, Clone)]
pub struct RunnerMetrics {
    successful: IntCounterVec,
    failed: IntCounterVec,
    lead_time: HistogramVec,
    touch_time: HistogramVec,
}

impl RunnerMetrics {
    fn register(registry: &Registry) -> prometheus::Result<Self> {
        let successful = IntCounterVec::new(
            Opts::new(RUNNER_SUCCESSFUL_JOBS, "Count of jobs run successfully"),
            &[JOB_NAME_LABEL],
        )?;
        let failed = IntCounterVec::new(
            Opts::new(RUNNER_FAILED_JOBS, "Count of jobs whose run failed"),
            &[JOB_NAME_LABEL],
        )?;
        let lead_time = HistogramVec::new(
            HistogramOpts::new(
                RUNNER_JOB_LEAD_TIME,
                "Seconds from dispatch to the end of the run",
            ),
            &[JOB_NAME_LABEL, SUCCESS_LABEL],
        )?;
        let touch_time = HistogramVec::new(
            HistogramOpts::new(
                RUNNER_JOB_TOUCH_TIME,
                "Seconds from dequeue to the end of the run",
            ),
            &[JOB_NAME_LABEL, SUCCESS_LABEL],
        )?;

        registry.register(Box::new(successful.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(lead_time.clone()))?;
        registry.register(Box::new(touch_time.clone()))?;

        Ok(Self {
            successful,
            failed,
            lead_time,
            touch_time,
        })
    }

    /// Record the outcome and timings of one wrapped run
    ///
    /// Lead time is only observed when the job carries a dispatch timestamp.
    pub fn observe_run(
        &self,
        job_name: &str,
        success: bool,
        dispatched: Option<DateTime<Utc>>,
        dequeued: DateTime<Utc>,
    ) {
        let finished = Utc::now();
        let success_label = if success { "true" } else { "false" };

        if success {
            self.successful.with_label_values(&[job_name]).inc();
        } else {
            self.failed.with_label_values(&[job_name]).inc();
        }

        if let Some(dispatched) = dispatched {
            self.lead_time
                .with_label_values(&[job_name, success_label])
                .observe(seconds_between(dispatched, finished));
        }
        self.touch_time
            .with_label_values(&[job_name, success_label])
            .observe(seconds_between(dequeued, finished));
    }

    pub fn success_count(&self, job_name: &str) -> u64 {
        self.successful.with_label_values(&[job_name]).get()
    }

    pub fn failure_count(&self, job_name: &str) -> u64 {
        self.failed.with_label_values(&[job_name]).get()
    }

    pub fn lead_time_samples(&self, job_name: &str, success: bool) -> u64 {
        let label = if success { "true" } else { "false" };
        self.lead_time
            .with_label_values(&[job_name, label])
            .get_sample_count()
    }

    pub fn touch_time_samples(&self, job_name: &str, success: bool) -> u64 {
        let label = if success { "true" } else { "false" };
        self.touch_time
            .with_label_values(&[job_name, label])
            .get_sample_count()
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

/// Metrics owned by one application context
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    dispatcher: DispatcherMetrics,
    runner: RunnerMetrics,
}

impl MetricsRegistry {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let dispatcher = DispatcherMetrics::register(&registry)?;
        let runner = RunnerMetrics::register(&registry)?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            dispatcher,
            runner,
        })
    }

    pub fn dispatcher(&self) -> &DispatcherMetrics {
        &self.dispatcher
    }

    pub fn runner(&self) -> &RunnerMetrics {
        &self.runner
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_registries_are_independent() {
        let first = MetricsRegistry::new().unwrap();
        let second = MetricsRegistry::new().unwrap();

        first.dispatcher().record_valid("send-email", 2);
        assert_eq!(first.dispatcher().valid_count("send-email"), 2);
        assert_eq!(second.dispatcher().valid_count("send-email"), 0);
    }

    #[test]
    fn test_lead_time_requires_dispatch_timestamp() {
        let metrics = MetricsRegistry::new().unwrap();
        let runner = metrics.runner();
        let now = Utc::now();

        runner.observe_run("resize", true, None, now);
        assert_eq!(runner.lead_time_samples("resize", true), 0);
        assert_eq!(runner.touch_time_samples("resize", true), 1);

        runner.observe_run("resize", false, Some(now - Duration::seconds(3)), now);
        assert_eq!(runner.lead_time_samples("resize", false), 1);
        assert_eq!(runner.success_count("resize"), 1);
        assert_eq!(runner.failure_count("resize"), 1);
    }

    #[test]
    fn test_render_contains_metric_names() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.dispatcher().record_unknown("nope");
        let text = metrics.render().unwrap();
        assert!(text.contains("dispatcher_unknown_jobs"));
        assert!(text.contains("jobName=\"nope\""));
    }
}
