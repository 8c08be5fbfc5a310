//! Adaptive retransmission timeout estimation
//!
//! Implements the Jacobson/Karels smoothing algorithm (RFC 6298 style) used
//! by both reliability strategies to size their retransmission timers.

use std::time::Duration;

/// Configuration for the retransmission timeout estimator
#[derive(Debug, Clone)]
pub struct ReliableConfig {
    /// Initial RTO before any RTT sample has been taken
    pub initial_rto: Duration,
    /// Minimum RTO regardless of how tight the RTT estimate is
    pub min_rto: Duration,
    /// Maximum RTO, including after repeated backoff
    pub max_rto: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(8),
        }
    }
}

/// Smoothed RTT/RTTVAR tracker producing the current retransmission timeout
///
/// Samples must never be taken from a retransmitted segment (Karn's
/// algorithm); callers are responsible for only calling [`Self::sample`]
/// for a segment that was acknowledged on its first transmission.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    config: ReliableConfig,
    srtt: Option<Duration>,
    rttvar: Duration,
    current_rto: Duration,
}

impl RtoEstimator {
    /// Build an estimator with the given configuration
    pub fn new(config: ReliableConfig) -> Self {
        let current_rto = config.initial_rto;
        Self {
            config,
            srtt: None,
            rttvar: Duration::from_millis(0),
            current_rto,
        }
    }

    /// The timeout to use for the next send
    pub fn rto(&self) -> Duration {
        self.current_rto
    }

    /// Record a fresh (non-retransmitted) RTT sample and recompute the RTO
    pub fn sample(&mut self, rtt: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
            Some(srtt) => {
                let diff = if rtt > srtt { rtt - srtt } else { srtt - rtt };
                self.rttvar = Duration::from_secs_f64(
                    0.75 * self.rttvar.as_secs_f64() + 0.25 * diff.as_secs_f64(),
                );
                self.srtt = Some(Duration::from_secs_f64(
                    0.875 * srtt.as_secs_f64() + 0.125 * rtt.as_secs_f64(),
                ));
            }
        }

        let srtt = self.srtt.unwrap();
        let rto = srtt + self.rttvar * 4;
        self.current_rto = rto.clamp(self.config.min_rto, self.config.max_rto);
    }

    /// Apply exponential backoff after a retransmission timeout fires
    ///
    /// Does not touch SRTT/RTTVAR: a timeout is not an RTT sample.
    pub fn backoff(&mut self) {
        self.current_rto = (self.current_rto * 2).min(self.config.max_rto);
    }

    /// Reset the backed-off RTO back to the steady-state estimate
    pub fn reset_backoff(&mut self) {
        self.current_rto = match self.srtt {
            Some(srtt) => (srtt + self.rttvar * 4).clamp(self.config.min_rto, self.config.max_rto),
            None => self.config.initial_rto,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_initializes_srtt_and_half_rttvar() {
        let mut est = RtoEstimator::new(ReliableConfig::default());
        est.sample(Duration::from_millis(100));
        assert_eq!(est.srtt, Some(Duration::from_millis(100)));
        assert_eq!(est.rttvar, Duration::from_millis(50));
    }

    #[test]
    fn rto_clamped_to_floor() {
        let mut est = RtoEstimator::new(ReliableConfig::default());
        est.sample(Duration::from_millis(1));
        est.sample(Duration::from_millis(1));
        assert!(est.rto() >= Duration::from_millis(200));
    }

    #[test]
    fn backoff_doubles_and_caps_at_max() {
        let mut est = RtoEstimator::new(ReliableConfig::default());
        assert_eq!(est.rto(), Duration::from_secs(1));
        est.backoff();
        assert_eq!(est.rto(), Duration::from_secs(2));
        est.backoff();
        est.backoff();
        est.backoff();
        est.backoff();
        // 1 -> 2 -> 4 -> 8 -> 8 (capped)
        assert_eq!(est.rto(), Duration::from_secs(8));
    }

    #[test]
    fn backoff_does_not_disturb_srtt() {
        let mut est = RtoEstimator::new(ReliableConfig::default());
        est.sample(Duration::from_millis(300));
        let srtt_before = est.srtt;
        est.backoff();
        assert_eq!(est.srtt, srtt_before);
    }
}
