//! Event loop configuration.

use std::time::Duration;

use tracing::warn;

/// Which wait primitive the loop blocks on between iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// `poll(2)` where available, the timed wait otherwise.
    #[default]
    Auto,
    /// `poll(2)` on the registered descriptors plus a wake pipe. Unix only.
    Poll,
    /// A condition variable with a timeout. Portable, but cannot watch
    /// file descriptors.
    TimedWait,
}

impl Backend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "poll" => Some(Self::Poll),
            "timed-wait" | "timedwait" | "timed" => Some(Self::TimedWait),
            _ => None,
        }
    }
}

/// How long the loop may block while spinner sinks are registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpinnerPolicy {
    /// Never block; spinners run back to back.
    #[default]
    Busy,
    /// Block for at most this long between spinner passes.
    Throttle(Duration),
}

/// Event loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLoopConfig {
    pub backend: Backend,
    /// Upper bound on a single blocking wait, even with no timer pending.
    pub max_wait: Duration,
    pub spinner_policy: SpinnerPolicy,
    /// Drain the global deferred-detach queue after the epilogue sinks.
    pub process_detach_queue: bool,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Auto,
            max_wait: Duration::from_secs(1),
            spinner_policy: SpinnerPolicy::Busy,
            process_detach_queue: true,
        }
    }
}

impl EventLoopConfig {
    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    #[must_use]
    pub fn with_spinner_policy(mut self, policy: SpinnerPolicy) -> Self {
        self.spinner_policy = policy;
        self
    }

    #[must_use]
    pub fn with_detach_queue(mut self, enabled: bool) -> Self {
        self.process_detach_queue = enabled;
        self
    }

    /// Defaults overridden by `ARBOR_EVENT_BACKEND` and `ARBOR_MAX_WAIT_MS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through
    /// `lookup`. Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(val) = lookup("ARBOR_EVENT_BACKEND") {
            match Backend::parse(&val) {
                Some(b) => cfg.backend = b,
                None => warn!(value = %val, "ignoring unknown ARBOR_EVENT_BACKEND"),
            }
        }
        if let Some(val) = lookup("ARBOR_MAX_WAIT_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) => cfg.max_wait = Duration::from_millis(ms),
                Err(_) => warn!(value = %val, "ignoring invalid ARBOR_MAX_WAIT_MS"),
            }
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    #[test]
    fn defaults_without_env() {
        assert_eq!(EventLoopConfig::from_env_with(env(&[])), EventLoopConfig::default());
    }

    #[test]
    fn env_overrides() {
        let cfg = EventLoopConfig::from_env_with(env(&[
            ("ARBOR_EVENT_BACKEND", "Timed-Wait"),
            ("ARBOR_MAX_WAIT_MS", "250"),
        ]));
        assert_eq!(cfg.backend, Backend::TimedWait);
        assert_eq!(cfg.max_wait, Duration::from_millis(250));
    }

    #[test]
    fn bad_values_are_ignored() {
        let cfg = EventLoopConfig::from_env_with(env(&[
            ("ARBOR_EVENT_BACKEND", "kqueue"),
            ("ARBOR_MAX_WAIT_MS", "soon"),
        ]));
        assert_eq!(cfg, EventLoopConfig::default());
    }

    #[test]
    fn builders_chain() {
        let cfg = EventLoopConfig::default()
            .with_backend(Backend::Poll)
            .with_spinner_policy(SpinnerPolicy::Throttle(Duration::from_millis(5)))
            .with_detach_queue(false);
        assert_eq!(cfg.backend, Backend::Poll);
        assert!(!cfg.process_detach_queue);
    }
}
