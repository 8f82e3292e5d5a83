// Connection health monitoring and reconnection with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::SyncError;

/// Delay before reconnect attempt `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`.
pub fn backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exp).unwrap_or(max).min(max)
}

/// Spread `delay` uniformly over `[delay*(1-jitter), delay*(1+jitter)]`
/// using `sample` in `[0, 1)`.
pub fn jittered(delay: Duration, jitter: f64, sample: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    let factor = 1.0 - jitter + 2.0 * jitter * sample.clamp(0.0, 1.0);
    delay.mul_f64(factor.max(0.0))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    /// Fraction of the delay randomized in either direction.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: 8,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Jittered backoff for `attempt`, never above `max`.
    pub fn delay_for(&self, attempt: u32, sample: f64) -> Duration {
        jittered(backoff(attempt, self.base, self.max), self.jitter, sample).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
}

/// Tracks liveness of the backend channel.
///
/// Heartbeats mark the channel alive and record latency. A channel with no
/// heartbeat for `stale_after` is considered silently dead and moves to
/// `Reconnecting`. Failed reconnect attempts count against the policy's
/// attempt budget; exhausting it lands in `Disconnected`.
#[derive(Debug)]
pub struct ConnectionMonitor {
    policy: ReconnectPolicy,
    stale_after: Duration,
    state: ConnectionState,
    last_heartbeat: Option<Instant>,
    last_latency: Option<Duration>,
}

impl ConnectionMonitor {
    pub fn new(policy: ReconnectPolicy, stale_after: Duration) -> Self {
        ConnectionMonitor {
            policy,
            stale_after,
            state: ConnectionState::Connected,
            last_heartbeat: None,
            last_latency: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    /// A successful probe or any inbound traffic.
    pub fn record_heartbeat(&mut self, latency: Duration, now: Instant) {
        self.last_heartbeat = Some(now);
        self.last_latency = Some(latency);
        if self.state != ConnectionState::Connected {
            info!("connection restored ({:?} latency)", latency);
        }
        self.state = ConnectionState::Connected;
    }

    /// Returns true if this call detected a stale channel.
    pub fn check_stale(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        let Some(last) = self.last_heartbeat else {
            self.last_heartbeat = Some(now);
            return false;
        };
        if now.saturating_duration_since(last) > self.stale_after {
            warn!(
                "no heartbeat for {:?}; treating connection as lost",
                now.saturating_duration_since(last)
            );
            self.state = ConnectionState::Reconnecting { attempt: 1 };
            return true;
        }
        false
    }

    /// An explicit error on the channel.
    pub fn connection_lost(&mut self) {
        if self.state == ConnectionState::Connected {
            warn!("connection lost");
            self.state = ConnectionState::Reconnecting { attempt: 1 };
        }
    }

    /// Record a failed reconnect attempt. Returns the delay before the next
    /// one, or the exhaustion error once the budget is spent.
    pub fn attempt_failed(&mut self, sample: f64) -> Result<Duration, SyncError> {
        let attempt = match self.state {
            ConnectionState::Reconnecting { attempt } => attempt,
            ConnectionState::Connected => 1,
            ConnectionState::Disconnected => {
                return Err(SyncError::ReconnectExhausted {
                    attempts: self.policy.max_attempts,
                })
            }
        };
        if attempt >= self.policy.max_attempts {
            self.state = ConnectionState::Disconnected;
            return Err(SyncError::ReconnectExhausted { attempts: attempt });
        }
        self.state = ConnectionState::Reconnecting {
            attempt: attempt + 1,
        };
        Ok(self.policy.delay_for(attempt, sample))
    }

    /// Start over after a hard disconnect (user asked to retry).
    pub fn reset(&mut self) {
        self.state = ConnectionState::Reconnecting { attempt: 1 };
    }
}

/// Something that can (re)establish the backend channel.
#[async_trait]
pub trait Connector: Send {
    type Connection: Send;

    async fn connect(&mut self) -> anyhow::Result<Self::Connection>;
}

/// Retry `connector` under the monitor's policy until it connects or the
/// attempt budget is exhausted, in which case the monitor ends in
/// `Disconnected` and `ReconnectExhausted` is returned.
pub async fn reconnect<C: Connector>(
    connector: &mut C,
    monitor: &mut ConnectionMonitor,
) -> Result<C::Connection, SyncError> {
    if monitor.state() == ConnectionState::Connected {
        monitor.connection_lost();
    }
    loop {
        let attempt = match monitor.state() {
            ConnectionState::Reconnecting { attempt } => attempt,
            _ => 1,
        };
        let started = Instant::now();
        match connector.connect().await {
            Ok(conn) => {
                monitor.record_heartbeat(started.elapsed(), Instant::now());
                info!("reconnected after {} attempt(s)", attempt);
                return Ok(conn);
            }
            Err(e) => {
                warn!("reconnect attempt {} failed: {:#}", attempt, e);
                let delay = monitor.attempt_failed(rand::random::<f64>())?;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(2);
        assert_eq!(backoff(1, base, max), Duration::from_millis(100));
        assert_eq!(backoff(2, base, max), Duration::from_millis(200));
        assert_eq!(backoff(4, base, max), Duration::from_millis(800));
        assert_eq!(backoff(6, base, max), max);
        assert_eq!(backoff(200, base, max), max);
        assert_eq!(backoff(0, base, max), base);
    }

    #[test]
    fn jitter_stays_in_band() {
        let d = Duration::from_millis(1000);
        let ms = |sample: f64| jittered(d, 0.2, sample).as_secs_f64() * 1000.0;
        assert!((ms(0.0) - 800.0).abs() < 1.0);
        assert!((ms(0.5) - 1000.0).abs() < 1.0);
        assert!(ms(0.999) <= 1200.0);
        for i in 0..10 {
            let v = ms(i as f64 / 10.0);
            assert!((800.0 - 1.0..=1200.0).contains(&v), "{v}");
        }
        assert_eq!(jittered(d, 0.0, 0.7), d);
    }

    #[test]
    fn jittered_delay_never_exceeds_cap() {
        let policy = ReconnectPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 12,
            jitter: 0.2,
        };
        for attempt in 1..=12 {
            assert!(policy.delay_for(attempt, 0.99) <= policy.max, "attempt {attempt}");
        }
        assert_eq!(policy.delay_for(10, 0.99), policy.max);
        // Below the cap jitter still spreads upward.
        assert!(policy.delay_for(2, 0.99) > Duration::from_secs(2));
    }

    #[test]
    fn stale_channel_is_detected() {
        let mut m = ConnectionMonitor::new(ReconnectPolicy::default(), Duration::from_secs(15));
        let t0 = Instant::now();
        m.record_heartbeat(Duration::from_millis(5), t0);
        assert!(!m.check_stale(t0 + Duration::from_secs(10)));
        assert!(m.check_stale(t0 + Duration::from_secs(16)));
        assert_eq!(m.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert!(!m.check_stale(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn attempts_exhaust_into_disconnected() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            jitter: 0.0,
            ..ReconnectPolicy::default()
        };
        let mut m = ConnectionMonitor::new(policy, Duration::from_secs(15));
        m.connection_lost();
        assert_eq!(m.attempt_failed(0.5), Ok(Duration::from_millis(500)));
        assert_eq!(m.attempt_failed(0.5), Ok(Duration::from_millis(1000)));
        assert_eq!(
            m.attempt_failed(0.5),
            Err(SyncError::ReconnectExhausted { attempts: 3 })
        );
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    struct FlakyConnector {
        failures_left: u32,
        calls: u32,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        type Connection = u32;

        async fn connect(&mut self) -> anyhow::Result<u32> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                anyhow::bail!("connection refused");
            }
            Ok(self.calls)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_succeeds_after_failures() {
        let mut connector = FlakyConnector {
            failures_left: 2,
            calls: 0,
        };
        let mut m = ConnectionMonitor::new(ReconnectPolicy::default(), Duration::from_secs(15));
        let conn = reconnect(&mut connector, &mut m).await.unwrap();
        assert_eq!(conn, 3);
        assert!(m.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_budget() {
        let mut connector = FlakyConnector {
            failures_left: u32::MAX,
            calls: 0,
        };
        let policy = ReconnectPolicy {
            max_attempts: 4,
            ..ReconnectPolicy::default()
        };
        let mut m = ConnectionMonitor::new(policy, Duration::from_secs(15));
        let err = reconnect(&mut connector, &mut m).await.unwrap_err();
        assert_eq!(err, SyncError::ReconnectExhausted { attempts: 4 });
        assert_eq!(connector.calls, 4);
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }
}
