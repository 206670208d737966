//! Campaign scheduling — derived state + policy + time to exactly one action.
//!
//! `decide` is pure: it reads a snapshot and the clock value it is handed,
//! mutates nothing, and calls nothing. The returned plan is executed (and
//! re-verified) by the dispatcher.

use chrono::{DateTime, Utc};

use crate::config::Policy;
use crate::state::{DerivedState, PendingReply};

/// The single action decided for a contact in one sweep cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send the next follow-up message.
    SendFollowUp,
    /// Follow-up cap reached without a reply — unsubscribe the contact.
    Unsubscribe,
    /// Answer a pending inbound reply. Classification happens at dispatch,
    /// where network calls belong.
    SendReply { inbound: PendingReply },
    /// Nothing to do this cycle.
    NoOp,
}

impl Action {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SendFollowUp => "send_follow_up",
            Self::Unsubscribe => "unsubscribe",
            Self::SendReply { .. } => "send_reply",
            Self::NoOp => "no_op",
        }
    }
}

/// Decide the action for one contact.
///
/// Precedence, top to bottom:
/// 1. pending inbound reply → answer it (overrides everything this cycle)
/// 2. unsubscribed → nothing, permanently
/// 3. has replied → nothing, permanently (any reply stops automated outreach)
/// 4. follow-up cap reached and waiting window elapsed → unsubscribe
/// 5. under the cap and waiting window elapsed → follow up
/// 6. otherwise → nothing (still inside the waiting window)
pub fn decide(derived: &DerivedState, policy: &Policy, now: DateTime<Utc>) -> Action {
    if let Some(ref pending) = derived.pending_reply {
        return Action::SendReply {
            inbound: pending.clone(),
        };
    }

    if derived.is_unsubscribed {
        return Action::NoOp;
    }

    if derived.has_replied {
        return Action::NoOp;
    }

    // Never contacted: the initial send belongs to the upstream producer,
    // not the follow-up scheduler.
    let Some(last_contact_at) = derived.last_contact_at else {
        return Action::NoOp;
    };

    if now.signed_duration_since(last_contact_at) >= policy.follow_up_delay {
        if derived.follow_up_count >= policy.max_follow_ups {
            return Action::Unsubscribe;
        }
        return Action::SendFollowUp;
    }

    Action::NoOp
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use uuid::Uuid;

    use crate::state::LifecycleStage;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn policy() -> Policy {
        Policy {
            follow_up_delay: ChronoDuration::minutes(2),
            max_follow_ups: 1,
        }
    }

    fn contacted(follow_up_count: u32, last_contact_at: DateTime<Utc>) -> DerivedState {
        DerivedState {
            contact_id: Uuid::nil(),
            stage: LifecycleStage::Contacted,
            outbound_count: 1 + follow_up_count,
            follow_up_count,
            has_replied: false,
            last_contact_at: Some(last_contact_at),
            is_unsubscribed: false,
            pending_reply: None,
        }
    }

    fn pending() -> PendingReply {
        PendingReply {
            inbound_id: "m1".into(),
            subject: "Re: Hello".into(),
            body: "tell me more".into(),
            received_at: t0(),
        }
    }

    #[test]
    fn follow_up_after_delay_elapsed() {
        // One sent at T0, delay 2min, cap 1, now T0+3min.
        let state = contacted(0, t0());
        let action = decide(&state, &policy(), t0() + ChronoDuration::minutes(3));
        assert_eq!(action, Action::SendFollowUp);
    }

    #[test]
    fn no_op_inside_waiting_window() {
        // Follow-up recorded, now 10s later — still waiting.
        let followed_up_at = t0() + ChronoDuration::minutes(3);
        let state = contacted(1, followed_up_at);
        let action = decide(&state, &policy(), followed_up_at + ChronoDuration::seconds(10));
        assert_eq!(action, Action::NoOp);
    }

    #[test]
    fn unsubscribe_at_cap_after_delay() {
        let state = contacted(1, t0());
        let action = decide(&state, &policy(), t0() + ChronoDuration::minutes(3));
        assert_eq!(action, Action::Unsubscribe);
    }

    #[test]
    fn reply_anywhere_in_history_stops_everything() {
        let mut state = contacted(0, t0());
        state.has_replied = true;
        state.stage = LifecycleStage::Replied;
        // Regardless of counts and elapsed time, forever after.
        for days in [0, 1, 30, 365] {
            let action = decide(&state, &policy(), t0() + ChronoDuration::days(days));
            assert_eq!(action, Action::NoOp);
        }
    }

    #[test]
    fn unsubscribed_is_permanent() {
        let mut state = contacted(1, t0());
        state.is_unsubscribed = true;
        state.stage = LifecycleStage::Unsubscribed;
        for days in [0, 1, 30, 365] {
            let action = decide(&state, &policy(), t0() + ChronoDuration::days(days));
            assert_eq!(action, Action::NoOp);
        }
    }

    #[test]
    fn terminal_stages_never_follow_up_or_unsubscribe_again() {
        let mut replied = contacted(5, t0());
        replied.has_replied = true;
        let mut unsubscribed = contacted(5, t0());
        unsubscribed.is_unsubscribed = true;

        for state in [replied, unsubscribed] {
            let action = decide(&state, &policy(), t0() + ChronoDuration::days(90));
            assert!(!matches!(action, Action::SendFollowUp | Action::Unsubscribe));
        }
    }

    #[test]
    fn pending_reply_overrides_waiting_window() {
        let mut state = contacted(0, t0());
        state.pending_reply = Some(pending());
        // Inside the delay window, a pending reply still wins.
        let action = decide(&state, &policy(), t0() + ChronoDuration::seconds(30));
        assert_eq!(
            action,
            Action::SendReply { inbound: pending() }
        );
    }

    #[test]
    fn pending_reply_overrides_cap() {
        let mut state = contacted(3, t0());
        state.pending_reply = Some(pending());
        let action = decide(&state, &policy(), t0() + ChronoDuration::days(1));
        assert!(matches!(action, Action::SendReply { .. }));
    }

    #[test]
    fn never_contacted_is_no_op() {
        let state = DerivedState {
            contact_id: Uuid::nil(),
            stage: LifecycleStage::New,
            outbound_count: 0,
            follow_up_count: 0,
            has_replied: false,
            last_contact_at: None,
            is_unsubscribed: false,
            pending_reply: None,
        };
        assert_eq!(decide(&state, &policy(), t0()), Action::NoOp);
    }

    #[test]
    fn delay_boundary_is_inclusive() {
        let state = contacted(0, t0());
        let action = decide(&state, &policy(), t0() + ChronoDuration::minutes(2));
        assert_eq!(action, Action::SendFollowUp);
    }
}
