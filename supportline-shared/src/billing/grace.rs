/// Grace deadline derivation
///
/// After a subscription goes inactive the tenant spends `billing_grace_days`
/// in the grace state (denied with a softer message, no lock stamp) before
/// the hard lock engages. The window is anchored on the end of the last paid
/// period when known, otherwise the last billing-provider event. With
/// neither anchor there is no grace window at all: an inactive subscription
/// with no billing history locks immediately.

use chrono::{DateTime, Duration, Utc};

use crate::models::tenant::BillingStatus;

/// When grace ends for a tenant in `status`, or `None` when no grace window
/// applies.
///
/// Active and trialing subscriptions have no grace window because they need
/// none. Inactive statuses get `anchor + grace_days`, where the anchor
/// prefers `period_end` over `last_event_at`.
pub fn grace_end(
    status: BillingStatus,
    grace_days: i32,
    period_end: Option<DateTime<Utc>>,
    last_event_at: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    if matches!(status, BillingStatus::Active | BillingStatus::Trialing) {
        return None;
    }

    let anchor = period_end.or(last_event_at)?;
    Some(anchor + Duration::days(i64::from(grace_days.max(0))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_prefers_period_end_over_last_event() {
        let end = grace_end(BillingStatus::PastDue, 7, Some(at(10)), Some(at(1)));
        assert_eq!(end, Some(at(17)));
    }

    #[test]
    fn test_falls_back_to_last_event() {
        let end = grace_end(BillingStatus::PastDue, 7, None, Some(at(1)));
        assert_eq!(end, Some(at(8)));
    }

    #[test]
    fn test_no_anchor_means_no_grace() {
        assert_eq!(grace_end(BillingStatus::Unpaid, 7, None, None), None);
    }

    #[test]
    fn test_active_statuses_have_no_grace_window() {
        assert_eq!(
            grace_end(BillingStatus::Active, 7, Some(at(10)), None),
            None
        );
        assert_eq!(
            grace_end(BillingStatus::Trialing, 7, Some(at(10)), None),
            None
        );
    }

    #[test]
    fn test_negative_grace_days_treated_as_zero() {
        let end = grace_end(BillingStatus::Canceled, -3, Some(at(10)), None);
        assert_eq!(end, Some(at(10)));
    }
}
