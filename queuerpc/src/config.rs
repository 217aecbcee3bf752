//! Configuration structures for the sender, receiver, client and server.

use std::time::Duration;

/// Default call time-to-live.
pub const DEFAULT_CALL_TTL: Duration = Duration::from_secs(30);

/// Configuration for a session [`Receiver`](crate::Receiver).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Maximum number of messages requested per receive
    pub max_messages: usize,

    /// Bounded wait of a single receive
    pub idle_timeout: Duration,

    /// Extra time past `idle_timeout` before a receive counts as overrun
    pub overrun_grace: Duration,

    /// Pause after `start()` and after `stop()` so the broker can settle
    pub settle_delay: Duration,

    /// First and minimum backoff after a receive error
    pub backoff_min: Duration,

    /// Ceiling of the backoff sequence
    pub backoff_max: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            max_messages: 1,
            idle_timeout: Duration::from_secs(5),
            overrun_grace: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            backoff_min: Duration::from_secs(2),
            backoff_max: Duration::from_secs(60),
        }
    }
}

impl ReceiverConfig {
    /// Create a configuration for an in-process queue where nothing needs
    /// time to settle.
    pub fn fast_local() -> Self {
        Self {
            max_messages: 1,
            idle_timeout: Duration::from_millis(500),
            overrun_grace: Duration::from_millis(100),
            settle_delay: Duration::ZERO,
            backoff_min: Duration::from_millis(50),
            backoff_max: Duration::from_secs(1),
        }
    }

    /// Set the idle wait and overrun grace.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration, overrun_grace: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self.overrun_grace = overrun_grace;
        self
    }

    /// Set the backoff bounds.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    /// Set the settle delay.
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Set the batch size.
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    /// Time after which a pending receive is considered overrun.
    pub fn overrun_after(&self) -> Duration {
        self.idle_timeout + self.overrun_grace
    }
}

/// Configuration for a [`Sender`](crate::Sender).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SenderConfig {
    /// Pause after a failed send before retrying the head of the queue
    pub retry_cooldown: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            retry_cooldown: Duration::from_secs(60),
        }
    }
}

impl SenderConfig {
    /// Create a configuration for an in-process queue.
    pub fn fast_local() -> Self {
        Self {
            retry_cooldown: Duration::from_millis(100),
        }
    }

    /// Set the retry cooldown.
    pub fn with_retry_cooldown(mut self, retry_cooldown: Duration) -> Self {
        self.retry_cooldown = retry_cooldown;
        self
    }
}

/// Configuration for an [`RpcClient`](crate::RpcClient).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Reply session receiver settings
    pub receiver: ReceiverConfig,

    /// Outbound queue settings
    pub sender: SenderConfig,
}

impl ClientConfig {
    /// Create a configuration for an in-process queue.
    pub fn fast_local() -> Self {
        Self {
            receiver: ReceiverConfig::fast_local(),
            sender: SenderConfig::fast_local(),
        }
    }

    /// Replace the receiver settings.
    pub fn with_receiver(mut self, receiver: ReceiverConfig) -> Self {
        self.receiver = receiver;
        self
    }

    /// Replace the sender settings.
    pub fn with_sender(mut self, sender: SenderConfig) -> Self {
        self.sender = sender;
        self
    }
}

/// Configuration for an [`RpcServer`](crate::RpcServer).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Settings applied to every session receiver
    pub receiver: ReceiverConfig,

    /// Reply queue settings
    pub sender: SenderConfig,
}

impl ServerConfig {
    /// Create a configuration for an in-process queue.
    pub fn fast_local() -> Self {
        Self {
            receiver: ReceiverConfig::fast_local(),
            sender: SenderConfig::fast_local(),
        }
    }

    /// Replace the receiver settings.
    pub fn with_receiver(mut self, receiver: ReceiverConfig) -> Self {
        self.receiver = receiver;
        self
    }

    /// Replace the sender settings.
    pub fn with_sender(mut self, sender: SenderConfig) -> Self {
        self.sender = sender;
        self
    }
}

/// Per-call options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallOptions {
    /// Time allowed without hearing from the handler. Refreshed by every
    /// acknowledgement. Also sent as the request's transport time-to-live.
    pub ttl: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CALL_TTL,
        }
    }
}

impl CallOptions {
    /// Options with the given time-to-live.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl }
    }
}
