use common::model::TaskAnnouncement;
use std::time::Duration;

/// GP kept in reserve so a claimed download cannot drain the account.
pub const GP_RESERVE: i64 = 1000;

/// Fixed penalty for claiming a free-tier task without free quota. Nodes
/// that still have free quota should win that race.
pub const FREE_TIER_CLAIM_DELAY: Duration = Duration::from_secs(2);

/// Decides whether (and after how long) this node races for an announced
/// task.
///
/// The delay curve is what makes the fleet self-balancing: within the
/// `[GP_RESERVE, base_balance_gp]` band a higher balance always means a
/// strictly smaller delay, so rich nodes claim first and poor nodes drain
/// slower.
#[derive(Debug, Clone)]
pub struct ClaimPolicy {
    base_balance_gp: i64,
    base_claim_delay: Duration,
}

impl ClaimPolicy {
    pub fn new(base_balance_gp: i64, base_claim_delay: Duration) -> Self {
        ClaimPolicy {
            base_balance_gp,
            base_claim_delay,
        }
    }

    /// `None` means skip this announcement entirely.
    pub fn decide(
        &self,
        ann: &TaskAnnouncement,
        have_free_quota: bool,
        gp_balance: i64,
    ) -> Option<Duration> {
        if ann.free_tier && have_free_quota {
            return Some(Duration::ZERO);
        }

        if gp_balance >= ann.estimated_gp + GP_RESERVE {
            if ann.free_tier {
                // Willing to burn paid quota on a free task, but only after
                // giving free-quota nodes a head start.
                return Some(FREE_TIER_CLAIM_DELAY);
            }
            return Some(self.balance_based_delay(gp_balance));
        }

        None
    }

    /// Quadratic delay: zero at or above the base balance, the full base
    /// delay at the reserve floor. The square keeps delays short near the
    /// top of the band and steep near the bottom.
    fn balance_based_delay(&self, current_balance: i64) -> Duration {
        if current_balance >= self.base_balance_gp {
            return Duration::ZERO;
        }

        let span = (self.base_balance_gp - GP_RESERVE) as f64;
        if span <= 0.0 {
            return Duration::ZERO;
        }

        let linear = ((self.base_balance_gp - current_balance) as f64 / span).clamp(0.0, 1.0);
        self.base_claim_delay.mul_f64(linear * linear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_BALANCE: i64 = 50_000;
    const BASE_DELAY: Duration = Duration::from_secs(10);

    fn policy() -> ClaimPolicy {
        ClaimPolicy::new(BASE_BALANCE, BASE_DELAY)
    }

    fn announcement(free_tier: bool, estimated_gp: i64) -> TaskAnnouncement {
        TaskAnnouncement {
            trace_id: "t-1".into(),
            free_tier,
            estimated_gp,
            queue_len: 0,
        }
    }

    #[test]
    fn free_task_with_free_quota_claims_immediately() {
        let delay = policy().decide(&announcement(true, 500), true, 0);
        assert_eq!(delay, Some(Duration::ZERO));
    }

    #[test]
    fn free_task_without_free_quota_waits_the_fixed_penalty() {
        let delay = policy().decide(&announcement(true, 500), false, 10_000);
        assert_eq!(delay, Some(FREE_TIER_CLAIM_DELAY));
    }

    #[test]
    fn paid_task_below_the_reserve_is_skipped() {
        // Needs estimated + reserve = 1500; 1499 is not enough.
        assert_eq!(policy().decide(&announcement(false, 500), false, 1499), None);
        assert!(policy()
            .decide(&announcement(false, 500), false, 1500)
            .is_some());
    }

    #[test]
    fn delay_is_zero_at_the_base_balance() {
        assert_eq!(
            policy().decide(&announcement(false, 500), false, BASE_BALANCE),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn delay_reaches_the_full_base_delay_at_the_reserve_floor() {
        assert_eq!(
            policy().decide(&announcement(false, 0), false, GP_RESERVE),
            Some(BASE_DELAY)
        );
    }

    #[test]
    fn delay_is_monotone_decreasing_in_balance() {
        let p = policy();
        let mut previous = Duration::MAX;
        for balance in (GP_RESERVE..=BASE_BALANCE).step_by(1000) {
            let delay = p.balance_based_delay(balance);
            assert!(
                delay <= previous,
                "delay grew from {previous:?} to {delay:?} at balance {balance}"
            );
            previous = delay;
        }
    }

    #[test]
    fn delay_curve_is_convex() {
        // Quadratic: the midpoint delay is below the chord.
        let p = policy();
        let low = p.balance_based_delay(GP_RESERVE);
        let high = p.balance_based_delay(BASE_BALANCE);
        let mid = p.balance_based_delay((GP_RESERVE + BASE_BALANCE) / 2);
        assert!(mid < (low + high) / 2);
        // And the exact midpoint ratio is one quarter.
        assert_eq!(mid, BASE_DELAY.mul_f64(0.25));
    }
}
