//! Verdict state machine: debounced, asymmetric internet availability.
//!
//! Declaring the internet down needs `unavailable_threshold` consecutive bad
//! cycles; recovery is accepted on the first good cycle. Moves between
//! `Available` and `Slowdown` are immediate in both directions.

use std::time::Duration;

use serde::Serialize;

use crate::config::PingerConfig;

use super::AggregateSample;

/// Shortest wait between cycles.
pub const MIN_WAIT: Duration = Duration::from_millis(10);

/// Public internet classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InetState {
    /// Nothing confirmed since start or resume.
    Unknown,
    Available,
    Slowdown,
    Unavailable,
}

/// Authoritative cross-cycle internet state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternetVerdict {
    pub state: InetState,
    pub hosts_count: u32,
    pub hosts_available: u32,
    /// Consecutive unavailable cycles, confirmed or not
    pub count_unavailable: u32,
    /// Unix time the state left `Available`, 0 while available
    pub time_unavailable: i64,
    /// Filtered latency
    pub duration_ms_total: f64,
    pub duration_ms_min: f64,
    pub duration_ms_max: f64,
    pub loss_total: f64,
    pub loss_min: f64,
    pub loss_max: f64,
}

impl InternetVerdict {
    pub fn new(hosts_count: u32) -> Self {
        Self {
            state: InetState::Unknown,
            hosts_count,
            hosts_available: 0,
            count_unavailable: 0,
            time_unavailable: 0,
            duration_ms_total: 0.0,
            duration_ms_min: 0.0,
            duration_ms_max: 0.0,
            loss_total: 0.0,
            loss_min: 0.0,
            loss_max: 0.0,
        }
    }
}

/// A confirmed change of the public state.
#[derive(Debug, Clone, PartialEq)]
pub enum InetTransition {
    /// Carries the verdict as it stood before `time_unavailable` was cleared.
    Available(InternetVerdict),
    Slowdown(InternetVerdict),
    Unavailable(InternetVerdict),
}

/// Classify one cycle against both threshold pairs.
pub fn classify(cfg: &PingerConfig, hosts_available: u32, duration_ms: f64, loss: f64) -> InetState {
    if hosts_available == 0
        || duration_ms >= cfg.unavailable_duration_ms
        || loss > cfg.unavailable_loss
    {
        InetState::Unavailable
    } else if duration_ms >= cfg.slowdown_duration_ms || loss >= cfg.slowdown_loss {
        InetState::Slowdown
    } else {
        InetState::Available
    }
}

/// Holds the verdict and applies one cycle at a time.
#[derive(Debug, Clone)]
pub struct VerdictMachine {
    verdict: InternetVerdict,
}

impl VerdictMachine {
    pub fn new(hosts_count: u32) -> Self {
        Self {
            verdict: InternetVerdict::new(hosts_count),
        }
    }

    pub fn verdict(&self) -> &InternetVerdict {
        &self.verdict
    }

    pub fn state(&self) -> InetState {
        self.verdict.state
    }

    /// Forget the public state so the next cycle is announced again.
    pub fn reset(&mut self) {
        self.verdict = InternetVerdict::new(self.verdict.hosts_count);
    }

    /// Apply one cycle: `sample` carries the raw figures with the filtered
    /// latency already substituted into `duration_ms_total`.
    pub fn update(
        &mut self,
        cfg: &PingerConfig,
        sample: &AggregateSample,
        now: i64,
    ) -> (InetState, Option<InetTransition>) {
        let v = &mut self.verdict;
        v.hosts_available = sample.hosts_available;
        v.duration_ms_total = sample.duration_ms_total;
        v.duration_ms_min = sample.duration_ms_min;
        v.duration_ms_max = sample.duration_ms_max;
        v.loss_total = sample.loss_total;
        v.loss_min = sample.loss_min;
        v.loss_max = sample.loss_max;

        let candidate = classify(cfg, sample.hosts_available, sample.duration_ms_total, sample.loss_total);
        let transition = match candidate {
            InetState::Available => {
                tracing::info!("Internet access is available ({:.0} ms)", v.duration_ms_total);
                v.count_unavailable = 0;
                if v.state != InetState::Available {
                    v.state = InetState::Available;
                    let event = v.clone();
                    v.time_unavailable = 0;
                    Some(InetTransition::Available(event))
                } else {
                    None
                }
            }
            InetState::Slowdown => {
                tracing::warn!("Internet access is slowed ({:.0} ms)", v.duration_ms_total);
                v.count_unavailable = 0;
                if v.state != InetState::Slowdown {
                    if v.time_unavailable == 0 {
                        v.time_unavailable = now;
                    }
                    v.state = InetState::Slowdown;
                    Some(InetTransition::Slowdown(v.clone()))
                } else {
                    None
                }
            }
            InetState::Unavailable => {
                tracing::error!("Internet access is not available!");
                if v.state == InetState::Unavailable {
                    None
                } else {
                    v.count_unavailable += 1;
                    if v.count_unavailable >= cfg.unavailable_threshold {
                        if v.time_unavailable == 0 {
                            v.time_unavailable = now;
                        }
                        v.state = InetState::Unavailable;
                        Some(InetTransition::Unavailable(v.clone()))
                    } else {
                        tracing::warn!(
                            "Internet unavailable, unconfirmed ({} of {})",
                            v.count_unavailable,
                            cfg.unavailable_threshold
                        );
                        None
                    }
                }
            }
            InetState::Unknown => None,
        };

        (candidate, transition)
    }
}

/// Wait before the next cycle: the steady interval less the time the cycle
/// took while everything is clean, the faster degraded interval otherwise.
pub fn next_interval(cfg: &PingerConfig, clean: bool, elapsed: Duration) -> Duration {
    if clean {
        cfg.interval_available
            .checked_sub(elapsed)
            .filter(|d| *d > MIN_WAIT)
            .unwrap_or(MIN_WAIT)
    } else {
        cfg.interval_unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u32) -> PingerConfig {
        PingerConfig {
            slowdown_duration_ms: 200.0,
            slowdown_loss: 20.0,
            unavailable_duration_ms: 1000.0,
            unavailable_loss: 80.0,
            unavailable_threshold: threshold,
            ..PingerConfig::default()
        }
    }

    fn sample(hosts_available: u32, duration: f64, loss: f64) -> AggregateSample {
        AggregateSample {
            hosts_available,
            duration_ms_min: duration,
            duration_ms_max: duration,
            duration_ms_total: duration,
            loss_min: loss,
            loss_max: loss,
            loss_total: loss,
        }
    }

    fn good() -> AggregateSample {
        sample(1, 20.0, 0.0)
    }

    fn down() -> AggregateSample {
        sample(0, 1000.0, 100.0)
    }

    fn slow() -> AggregateSample {
        sample(1, 400.0, 0.0)
    }

    #[test]
    fn test_classify_boundaries() {
        let c = cfg(1);
        assert_eq!(classify(&c, 1, 199.0, 19.9), InetState::Available);
        assert_eq!(classify(&c, 1, 200.0, 0.0), InetState::Slowdown);
        assert_eq!(classify(&c, 1, 10.0, 20.0), InetState::Slowdown);
        assert_eq!(classify(&c, 1, 10.0, 80.0), InetState::Slowdown);
        assert_eq!(classify(&c, 1, 10.0, 80.1), InetState::Unavailable);
        assert_eq!(classify(&c, 1, 1000.0, 0.0), InetState::Unavailable);
        assert_eq!(classify(&c, 0, 10.0, 0.0), InetState::Unavailable);
    }

    #[test]
    fn test_first_clean_cycle_announces_available() {
        let c = cfg(3);
        let mut m = VerdictMachine::new(1);
        let (_, t) = m.update(&c, &good(), 10);
        assert!(matches!(t, Some(InetTransition::Available(_))));

        let (candidate, t) = m.update(&c, &good(), 20);
        assert_eq!(candidate, InetState::Available);
        assert!(t.is_none());
    }

    #[test]
    fn test_unavailable_needs_threshold_cycles() {
        let c = cfg(3);
        let mut m = VerdictMachine::new(1);
        m.update(&c, &good(), 0);

        assert!(m.update(&c, &down(), 1).1.is_none());
        assert!(m.update(&c, &down(), 2).1.is_none());
        assert_eq!(m.state(), InetState::Available);
        assert_eq!(m.verdict().time_unavailable, 0);

        match m.update(&c, &down(), 3).1 {
            Some(InetTransition::Unavailable(v)) => {
                assert_eq!(v.count_unavailable, 3);
                assert_eq!(v.time_unavailable, 3);
            }
            other => panic!("expected unavailable, got {:?}", other),
        }

        // Further bad cycles are silent
        assert!(m.update(&c, &down(), 4).1.is_none());
        assert_eq!(m.verdict().count_unavailable, 3);
    }

    #[test]
    fn test_recovery_is_immediate() {
        let c = cfg(3);
        let mut m = VerdictMachine::new(1);
        for t in 0..3 {
            m.update(&c, &down(), 100 + t);
        }
        assert_eq!(m.state(), InetState::Unavailable);

        match m.update(&c, &good(), 200).1 {
            Some(InetTransition::Available(v)) => assert_eq!(v.time_unavailable, 102),
            other => panic!("expected available, got {:?}", other),
        }
        assert_eq!(m.state(), InetState::Available);
        assert_eq!(m.verdict().time_unavailable, 0);
        assert_eq!(m.verdict().count_unavailable, 0);
    }

    #[test]
    fn test_interrupted_streak_restarts_count() {
        let c = cfg(3);
        let mut m = VerdictMachine::new(1);
        m.update(&c, &good(), 0);
        m.update(&c, &down(), 1);
        m.update(&c, &down(), 2);
        m.update(&c, &good(), 3);
        m.update(&c, &down(), 4);
        assert!(m.update(&c, &down(), 5).1.is_none());
        assert!(matches!(m.update(&c, &down(), 6).1, Some(InetTransition::Unavailable(_))));
    }

    #[test]
    fn test_slowdown_is_immediate_both_ways() {
        let c = cfg(3);
        let mut m = VerdictMachine::new(1);
        m.update(&c, &good(), 0);

        assert!(matches!(m.update(&c, &slow(), 50).1, Some(InetTransition::Slowdown(_))));
        assert_eq!(m.verdict().time_unavailable, 50);
        assert!(m.update(&c, &slow(), 60).1.is_none());

        assert!(matches!(m.update(&c, &good(), 70).1, Some(InetTransition::Available(_))));
        assert_eq!(m.verdict().time_unavailable, 0);
    }

    #[test]
    fn test_slowdown_then_unavailable_keeps_first_timestamp() {
        let c = cfg(1);
        let mut m = VerdictMachine::new(1);
        m.update(&c, &good(), 0);
        m.update(&c, &slow(), 10);
        let (_, t) = m.update(&c, &down(), 20);
        match t {
            Some(InetTransition::Unavailable(v)) => assert_eq!(v.time_unavailable, 10),
            other => panic!("expected unavailable, got {:?}", other),
        }

        // Unavailable straight to slowdown
        assert!(matches!(m.update(&c, &slow(), 30).1, Some(InetTransition::Slowdown(_))));
        assert_eq!(m.verdict().time_unavailable, 10);
    }

    #[test]
    fn test_time_unavailable_tracks_state() {
        let c = cfg(2);
        let mut m = VerdictMachine::new(1);
        let script = [good(), slow(), down(), down(), good(), down(), slow(), good()];
        for (t, s) in script.iter().enumerate() {
            m.update(&c, s, 1 + t as i64);
            let v = m.verdict();
            let degraded = matches!(v.state, InetState::Slowdown | InetState::Unavailable);
            assert_eq!(v.time_unavailable != 0, degraded, "cycle {}: {:?}", t, v.state);
        }
    }

    #[test]
    fn test_reset_forgets_state() {
        let c = cfg(1);
        let mut m = VerdictMachine::new(2);
        m.update(&c, &good(), 0);
        m.reset();
        assert_eq!(m.state(), InetState::Unknown);
        assert_eq!(m.verdict().hosts_count, 2);
        assert!(m.update(&c, &good(), 1).1.is_some());
    }

    #[test]
    fn test_next_interval() {
        let c = PingerConfig {
            interval_available: Duration::from_secs(60),
            interval_unavailable: Duration::from_secs(10),
            ..PingerConfig::default()
        };
        assert_eq!(next_interval(&c, true, Duration::from_secs(2)), Duration::from_secs(58));
        assert_eq!(next_interval(&c, true, Duration::from_secs(90)), MIN_WAIT);
        assert_eq!(next_interval(&c, false, Duration::from_secs(2)), Duration::from_secs(10));
    }
}
