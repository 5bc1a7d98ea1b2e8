//! Property-based tests for the trade state machine and the event chain.
//!
//! Random action sequences are thrown at a trade to check the invariants
//! that must hold whatever order requests arrive in: terminal statuses are
//! final, the agreed price is written exactly once, and rejected actions
//! leave the trade untouched.

use agri_trade::InspectionFailPolicy;
use agri_trade::event::{EventType, TradeEvent, verify_chain};
use agri_trade::trade::{Trade, TradeAction, TradeStatus};
use agri_trade::types::{EventId, ListingId, TimeStamp, TradeId, UserId};
use proptest::prelude::*;

fn action_strategy() -> impl Strategy<Value = TradeAction> {
    prop_oneof![
        Just(TradeAction::Accept),
        Just(TradeAction::Cancel),
        Just(TradeAction::RequestInspection),
        Just(TradeAction::DeclineInspection),
        Just(TradeAction::InspectionPassed),
        Just(TradeAction::InspectionFailed(InspectionFailPolicy::Dispute)),
        Just(TradeAction::InspectionFailed(InspectionFailPolicy::Cancel)),
        Just(TradeAction::Dispatch),
        Just(TradeAction::Deliver),
        Just(TradeAction::Settle),
        Just(TradeAction::Dispute),
        any::<bool>().prop_map(|resolve_to_buyer| TradeAction::ForceClose { resolve_to_buyer }),
    ]
}

fn status_strategy() -> impl Strategy<Value = TradeStatus> {
    prop::sample::select(TradeStatus::ALL.to_vec())
}

fn trade(offer_price: u64) -> Trade {
    Trade::new(
        TradeId::from("trade_prop"),
        ListingId::from("listing_prop"),
        UserId::from("user_farmer"),
        UserId::from("user_buyer"),
        offer_price,
        "Punjab".into(),
    )
}

/// A well formed timeline of `len` events.
fn chain(len: usize) -> Vec<TradeEvent> {
    let mut events: Vec<TradeEvent> = Vec::with_capacity(len);
    for n in 0..len {
        let mut event = TradeEvent {
            id: EventId::from(format!("event_{n}")),
            trade_id: TradeId::from("trade_prop"),
            seq: n as u64 + 1,
            event_type: EventType::TradeInitiated,
            description: format!("step {n}"),
            actor_id: UserId::from("user_buyer"),
            timestamp: TimeStamp::new_with(2025, 3, 1, 8, n as u32 % 60, 0),
            prev_hash: events.last().map(|e| e.hash.clone()),
            hash: String::new(),
        };
        event.hash = event.compute_hash().unwrap();
        events.push(event);
    }
    events
}

proptest! {
    /// Property: no action leads out of COMPLETED or CANCELLED
    #[test]
    fn terminal_statuses_are_final(action in action_strategy()) {
        prop_assert!(action.target(TradeStatus::Completed).is_err());
        prop_assert!(action.target(TradeStatus::Cancelled).is_err());
    }

    /// Property: DISPUTED is only reachable after agreement
    #[test]
    fn disputes_need_an_agreement(from in status_strategy()) {
        let res = TradeAction::Dispute.target(from);
        prop_assert_eq!(res.is_ok(), from.is_post_agreement() && !from.is_terminal() && from != TradeStatus::Disputed);
    }

    /// Property: a rejected action changes nothing
    #[test]
    fn rejected_actions_leave_trade_untouched(
        price in 1u64..1_000_000,
        actions in prop::collection::vec(action_strategy(), 0..24),
    ) {
        let mut t = trade(price);
        for action in actions {
            let before = t.clone();
            if t.apply(action).is_err() {
                prop_assert_eq!(&t, &before);
            }
        }
    }

    /// Property: final price is set once, to the offer, and only by accepting
    #[test]
    fn final_price_written_once(
        price in 1u64..1_000_000,
        actions in prop::collection::vec(action_strategy(), 0..24),
    ) {
        let mut t = trade(price);
        let mut accepted = false;
        for action in actions {
            let was_terminal = t.status().is_terminal();
            let applied = t.apply(action).is_ok();
            prop_assert!(!(was_terminal && applied), "left a terminal status");
            if applied && action == TradeAction::Accept {
                prop_assert!(!accepted, "accepted twice");
                accepted = true;
            }
            prop_assert_eq!(t.final_price(), accepted.then_some(price));
        }
    }

    /// Property: any single tampered field breaks the chain
    #[test]
    fn tampering_is_detected(len in 1usize..12, victim in any::<prop::sample::Index>(), field in 0u8..4) {
        let mut events = chain(len);
        prop_assert!(verify_chain(&events).unwrap());

        let idx = victim.index(len);
        match field {
            0 => events[idx].description.push('!'),
            1 => events[idx].event_type = EventType::DisputeResolved,
            2 => events[idx].actor_id = UserId::from("user_mallory"),
            _ => events[idx].seq += 1,
        }
        prop_assert!(!verify_chain(&events).unwrap());
    }

    /// Property: dropping an event from the middle breaks the chain
    #[test]
    fn gaps_are_detected(len in 3usize..12, victim in any::<prop::sample::Index>()) {
        let mut events = chain(len);
        let idx = 1 + victim.index(len - 2);
        events.remove(idx);
        prop_assert!(!verify_chain(&events).unwrap());
    }
}
