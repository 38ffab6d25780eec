use std::time::Duration;

/// How long a phase waits for push confirmation before polling once.
///
/// Tune per ledger; block times vary by orders of magnitude.
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(45);

/// Upper bound on a single outcome query; a query that takes longer reads as `Pending`.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_COMMAND_BUFFER: usize = 8;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub guard_timeout: Duration,
    pub poll_timeout: Duration,
    /// Capacity of the channel carrying `FlowHandle` commands
    pub command_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            guard_timeout: DEFAULT_GUARD_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl ControllerConfig {
    pub fn new(guard_timeout: Duration) -> Self {
        Self {
            guard_timeout,
            ..Default::default()
        }
    }

    pub fn with_guard_timeout(mut self, timeout: Duration) -> Self {
        self.guard_timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity.max(1);
        self
    }
}
