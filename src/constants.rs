//! # System Constants
//!
//! Defaults and reserved names shared by the transport, dispatcher, runners
//! and consumer.

use std::time::Duration;

/// Broker connection defaults
pub mod broker {
    use super::Duration;

    /// Connection attempts before giving up
    pub const DEFAULT_CONNECT_RETRIES: u32 = 10;

    /// Maximum unacknowledged deliveries per channel
    pub const DEFAULT_PREFETCH_COUNT: u16 = 1;

    /// First retry delay; doubles after every failed attempt
    pub const DEFAULT_INITIAL_RETRY_DELAY: Duration = Duration::from_millis(10);

    /// AMQP delivery mode for messages that survive a broker restart
    pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

    pub const CONTENT_TYPE_JSON: &str = "application/json";

    pub const CONNECTION_NAME: &str = "arnavon-transport";

    /// Environment variable overriding the configured broker URL
    pub const AMQP_URL_ENV: &str = "AMQP_URL";

    /// Management API port used when deriving its URL from the AMQP URL
    pub const DEFAULT_MANAGEMENT_PORT: u16 = 15672;
}

/// Dead-letter recovery
pub mod requeue {
    /// Prefix of the deterministic shovel name, suffixed with the source queue
    pub const SHOVEL_NAME_PREFIX: &str = "arnavon-requeue-";

    /// Shovel `src-delete-after` value draining the queue as it was at start
    pub const DELETE_AFTER_QUEUE_LENGTH: &str = "queue-length";

    pub const ACK_MODE_ON_CONFIRM: &str = "on-confirm";

    pub const SHOVEL_PROTOCOL: &str = "amqp091";
}

/// Header handling on publish
pub mod headers {
    /// Header keys with this prefix are reserved and never forwarded to the broker
    pub const RESERVED_PREFIX: &str = "x-arnavon-";
}

/// Process runner limits
pub mod process {
    use super::Duration;

    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

    pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

    /// Time between SIGTERM and SIGKILL once a process times out
    pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

    /// Upper bound of stderr kept for logging
    pub const MAX_STDERR_BYTES: usize = 64 * 1024;
}

/// Consumer lifecycle
pub mod consumer {
    /// Exit code used when the transport fails underneath a running consumer
    pub const FATAL_EXIT_CODE: i32 = 10;

    pub const DEFAULT_STATUS_PORT: u16 = 3000;
}

/// Metric names
pub mod metrics {
    pub const DISPATCHER_VALID_JOBS: &str = "dispatcher_valid_jobs";
    pub const DISPATCHER_INVALID_JOBS: &str = "dispatcher_invalid_jobs";
    pub const DISPATCHER_UNKNOWN_JOBS: &str = "dispatcher_unknown_jobs";
    pub const RUNNER_SUCCESSFUL_JOBS: &str = "runner_successful_jobs";
    pub const RUNNER_FAILED_JOBS: &str = "runner_failed_jobs";
    pub const RUNNER_JOB_LEAD_TIME: &str = "runner_job_lead_time";
    pub const RUNNER_JOB_TOUCH_TIME: &str = "runner_job_touch_time";

    pub const JOB_NAME_LABEL: &str = "jobName";
    pub const SUCCESS_LABEL: &str = "success";
}
