//! Reconnect supervision for the vision channel.
//!
//! Every handshake or transport failure is reported here. The supervisor answers
//! with the instant of the next attempt, computed as exponential backoff with
//! random jitter, until the attempt budget is spent. After that it stays `Failed`
//! until the client is stopped and started again.

use rand::Rng;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Fraction of the backoff added as uniform random jitter (0.0 disables jitter).
    pub jitter: f64,
    /// Consecutive failed attempts tolerated before giving up. 0 means unbounded.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(15),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()))
    }

    fn with_jitter(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(extra)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    /// Not supervising (client stopped).
    Idle,
    /// A connection attempt should run now.
    Connecting,
    /// Channel is up.
    Connected,
    /// Waiting before the next attempt.
    Backoff { attempt: u32, retry_at: Instant },
    /// Attempt budget exhausted.
    Failed { attempts: u32 },
}

#[derive(Debug)]
pub struct ConnectionSupervisor {
    policy: ReconnectPolicy,
    state: SupervisorState,
    failures: u32,
}

impl ConnectionSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: SupervisorState::Idle,
            failures: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Begin supervising; the first attempt is due immediately.
    pub fn activate(&mut self) {
        self.failures = 0;
        self.state = SupervisorState::Connecting;
    }

    /// True when an attempt should be made at `now`.
    pub fn should_attempt(&self, now: Instant) -> bool {
        match self.state {
            SupervisorState::Connecting => true,
            SupervisorState::Backoff { retry_at, .. } => now >= retry_at,
            _ => false,
        }
    }

    /// When the next attempt is due, if one is scheduled.
    pub fn next_attempt_at(&self) -> Option<Instant> {
        match self.state {
            SupervisorState::Backoff { retry_at, .. } => Some(retry_at),
            _ => None,
        }
    }

    /// The socket is open. Failures still count until the service confirms the session.
    pub fn on_opened(&mut self) {
        self.state = SupervisorState::Connected;
    }

    /// The service acknowledged the session; the attempt budget starts over.
    pub fn on_confirmed(&mut self) {
        if self.state != SupervisorState::Connected {
            return;
        }
        if self.failures > 0 {
            log::info!("supervisor: connected after {} failed attempt(s)", self.failures);
        }
        self.failures = 0;
    }

    /// Record a failed attempt or a lost connection and schedule what comes next.
    pub fn on_failure(&mut self, now: Instant) -> SupervisorState {
        if matches!(
            self.state,
            SupervisorState::Idle | SupervisorState::Failed { .. }
        ) {
            return self.state;
        }
        self.failures += 1;
        if self.policy.max_attempts > 0 && self.failures > self.policy.max_attempts {
            log::error!(
                "supervisor: giving up after {} failed attempt(s)",
                self.failures - 1
            );
            self.state = SupervisorState::Failed {
                attempts: self.failures - 1,
            };
            return self.state;
        }
        let delay = self.policy.with_jitter(self.policy.base_backoff(self.failures));
        log::warn!(
            "supervisor: retry {} in {} ms",
            self.failures,
            delay.as_millis()
        );
        self.state = SupervisorState::Backoff {
            attempt: self.failures,
            retry_at: now + delay,
        };
        self.state
    }

    /// Stop supervising (client stop).
    pub fn deactivate(&mut self) {
        self.failures = 0;
        self.state = SupervisorState::Idle;
    }
}
