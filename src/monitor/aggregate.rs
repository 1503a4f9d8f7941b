//! Aggregator: collapse the cycle's per-host results into one sample.

use serde::Serialize;

use crate::config::ResultMode;

use super::HostBatchResult;

/// Per-cycle aggregate over all internet hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateSample {
    pub hosts_available: u32,
    pub duration_ms_min: f64,
    pub duration_ms_max: f64,
    /// Selected by the result mode
    pub duration_ms_total: f64,
    pub loss_min: f64,
    pub loss_max: f64,
    pub loss_total: f64,
}

/// Fold host results in order.
///
/// The first host seeds min, max and total. Each later host updates the
/// running mean, and only lowers a minimum when its other figure is below
/// the unavailability bound, so a fast but lossy host cannot pose as the
/// best result.
pub fn aggregate(
    results: &[HostBatchResult],
    mode: ResultMode,
    unavailable_duration_ms: f64,
    unavailable_loss: f64,
) -> AggregateSample {
    let mut sample = AggregateSample::default();

    for (k, host) in results.iter().enumerate() {
        if host.is_available() {
            sample.hosts_available += 1;
        }

        if k == 0 {
            sample.duration_ms_min = host.duration_ms;
            sample.duration_ms_max = host.duration_ms;
            sample.duration_ms_total = host.duration_ms;
            sample.loss_min = host.loss;
            sample.loss_max = host.loss;
            sample.loss_total = host.loss;
            continue;
        }

        let n = (k + 1) as f64;
        sample.duration_ms_total += (host.duration_ms - sample.duration_ms_total) / n;
        sample.loss_total += (host.loss - sample.loss_total) / n;

        if host.duration_ms < sample.duration_ms_min && host.loss < unavailable_loss {
            sample.duration_ms_min = host.duration_ms;
        }
        if host.duration_ms > sample.duration_ms_max {
            sample.duration_ms_max = host.duration_ms;
        }
        if host.loss < sample.loss_min && host.duration_ms < unavailable_duration_ms {
            sample.loss_min = host.loss;
        }
        if host.loss > sample.loss_max {
            sample.loss_max = host.loss;
        }
    }

    match mode {
        ResultMode::Min => {
            sample.duration_ms_total = sample.duration_ms_min;
            sample.loss_total = sample.loss_min;
        }
        ResultMode::Max => {
            sample.duration_ms_total = sample.duration_ms_max;
            sample.loss_total = sample.loss_max;
        }
        ResultMode::Average => {}
    }

    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::HostState;

    fn host(duration_ms: f64, loss: f64) -> HostBatchResult {
        HostBatchResult {
            host: "h".to_string(),
            address: None,
            transmitted: 4,
            received: if loss < 100.0 { 4 } else { 0 },
            total_time_ms: duration_ms * 4.0,
            duration_ms,
            loss,
            ttl: 64,
            state: if loss < 100.0 { HostState::Ok } else { HostState::Unavailable },
            time_unavailable: 0,
        }
    }

    #[test]
    fn test_two_hosts_average() {
        let sample = aggregate(&[host(50.0, 0.0), host(150.0, 0.0)], ResultMode::Average, 1000.0, 80.0);
        assert_eq!(sample.hosts_available, 2);
        assert_eq!(sample.duration_ms_total, 100.0);
        assert_eq!(sample.duration_ms_min, 50.0);
        assert_eq!(sample.duration_ms_max, 150.0);
        assert_eq!(sample.loss_total, 0.0);
    }

    #[test]
    fn test_three_hosts_running_mean() {
        let hosts = [host(30.0, 0.0), host(60.0, 25.0), host(90.0, 50.0)];
        let sample = aggregate(&hosts, ResultMode::Average, 1000.0, 80.0);
        assert!((sample.duration_ms_total - 60.0).abs() < 1e-9);
        assert!((sample.loss_total - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_modes_select_extremes() {
        let hosts = [host(40.0, 0.0), host(20.0, 10.0)];
        let min = aggregate(&hosts, ResultMode::Min, 1000.0, 80.0);
        assert_eq!((min.duration_ms_total, min.loss_total), (20.0, 0.0));

        let max = aggregate(&hosts, ResultMode::Max, 1000.0, 80.0);
        assert_eq!((max.duration_ms_total, max.loss_total), (40.0, 10.0));
    }

    #[test]
    fn test_lossy_host_does_not_lower_minimum() {
        let hosts = [host(80.0, 0.0), host(5.0, 100.0)];
        let sample = aggregate(&hosts, ResultMode::Min, 1000.0, 80.0);
        assert_eq!(sample.duration_ms_min, 80.0);
        assert_eq!(sample.hosts_available, 1);
    }

    #[test]
    fn test_slow_host_does_not_lower_loss_minimum() {
        let hosts = [host(100.0, 40.0), host(1500.0, 0.0)];
        let sample = aggregate(&hosts, ResultMode::Min, 1000.0, 80.0);
        assert_eq!(sample.loss_min, 40.0);
        assert_eq!(sample.duration_ms_max, 1500.0);
    }

    #[test]
    fn test_no_hosts() {
        let sample = aggregate(&[], ResultMode::Average, 1000.0, 80.0);
        assert_eq!(sample, AggregateSample::default());
    }
}
