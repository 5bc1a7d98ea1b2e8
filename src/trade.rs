//! Trade record and the trade state machine
use crate::config::InspectionFailPolicy;
use crate::error::EngineError;
use crate::event::{self, EventType, TradeEvent};
use crate::ledger::{LedgerTx, Table, TxResult};
use crate::types::{ListingId, TimeStamp, TradeId, UserId};
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeStatus {
    #[n(0)]
    Requested,
    #[n(1)]
    Agreed,
    #[n(2)]
    InspectionRequested,
    #[n(3)]
    Shipped,
    #[n(4)]
    Delivered,
    #[n(5)]
    Completed,
    #[n(6)]
    Cancelled,
    #[n(7)]
    Disputed,
}

impl TradeStatus {
    pub const ALL: [TradeStatus; 8] = [
        TradeStatus::Requested,
        TradeStatus::Agreed,
        TradeStatus::InspectionRequested,
        TradeStatus::Shipped,
        TradeStatus::Delivered,
        TradeStatus::Completed,
        TradeStatus::Cancelled,
        TradeStatus::Disputed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Completed | TradeStatus::Cancelled)
    }

    /// Agreed or later and not yet closed.
    pub fn is_post_agreement(self) -> bool {
        matches!(
            self,
            TradeStatus::Agreed
                | TradeStatus::InspectionRequested
                | TradeStatus::Shipped
                | TradeStatus::Delivered
                | TradeStatus::Disputed
        )
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradeStatus::Requested => "REQUESTED",
            TradeStatus::Agreed => "AGREED",
            TradeStatus::InspectionRequested => "INSPECTION_REQUESTED",
            TradeStatus::Shipped => "SHIPPED",
            TradeStatus::Delivered => "DELIVERED",
            TradeStatus::Completed => "COMPLETED",
            TradeStatus::Cancelled => "CANCELLED",
            TradeStatus::Disputed => "DISPUTED",
        };
        f.write_str(name)
    }
}

/// Every way a trade's status can change. Each accepted action is recorded
/// as exactly one timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    /// Farmer accepts the buyer's offer.
    Accept,
    /// Farmer or buyer withdraws before fulfilment starts.
    Cancel,
    RequestInspection,
    DeclineInspection,
    InspectionPassed,
    InspectionFailed(InspectionFailPolicy),
    /// Logistics starts without an inspection.
    Dispatch,
    Deliver,
    Settle,
    Dispute,
    ForceClose { resolve_to_buyer: bool },
}

impl TradeAction {
    /// The status `from` moves to under this action.
    pub fn target(self, from: TradeStatus) -> Result<TradeStatus, EngineError> {
        use TradeAction as A;
        use TradeStatus as S;

        let to = match (from, self) {
            (S::Requested, A::Accept) => S::Agreed,
            (S::Requested | S::Agreed, A::Cancel) => S::Cancelled,
            (S::Agreed, A::RequestInspection) => S::InspectionRequested,
            (S::InspectionRequested, A::DeclineInspection) => S::Agreed,
            (S::InspectionRequested, A::InspectionPassed) => S::Shipped,
            (S::InspectionRequested, A::InspectionFailed(InspectionFailPolicy::Dispute)) => {
                S::Disputed
            }
            (S::InspectionRequested, A::InspectionFailed(InspectionFailPolicy::Cancel)) => {
                S::Cancelled
            }
            (S::Agreed, A::Dispatch) => S::Shipped,
            (S::Shipped, A::Deliver) => S::Delivered,
            (S::Delivered, A::Settle) => S::Completed,
            (S::Agreed | S::InspectionRequested | S::Shipped | S::Delivered, A::Dispute) => {
                S::Disputed
            }
            (S::Disputed, A::ForceClose { resolve_to_buyer }) => {
                if resolve_to_buyer {
                    S::Completed
                } else {
                    S::Cancelled
                }
            }
            (from, action) => return Err(EngineError::invalid_transition("trade", from, action)),
        };
        Ok(to)
    }
}

impl TradeAction {
    pub fn event_type(self) -> EventType {
        match self {
            TradeAction::Accept => EventType::OfferAccepted,
            TradeAction::Cancel => EventType::TradeCancelled,
            TradeAction::RequestInspection => EventType::InspectionRequested,
            TradeAction::DeclineInspection => EventType::InspectionDeclined,
            TradeAction::InspectionPassed => EventType::InspectionPassed,
            TradeAction::InspectionFailed(_) => EventType::InspectionFailed,
            TradeAction::Dispatch => EventType::ShipmentDispatched,
            TradeAction::Deliver => EventType::ShipmentDelivered,
            TradeAction::Settle => EventType::TradeCompleted,
            TradeAction::Dispute => EventType::DisputeRaised,
            TradeAction::ForceClose { .. } => EventType::DisputeResolved,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Accept => f.write_str("AGREED"),
            TradeAction::Cancel => f.write_str("CANCELLED"),
            TradeAction::RequestInspection => f.write_str("INSPECTION_REQUESTED"),
            TradeAction::DeclineInspection => f.write_str("AGREED (inspection declined)"),
            TradeAction::InspectionPassed => f.write_str("SHIPPED (inspection passed)"),
            TradeAction::InspectionFailed(policy) => {
                write!(f, "inspection failed ({policy:?})")
            }
            TradeAction::Dispatch => f.write_str("SHIPPED"),
            TradeAction::Deliver => f.write_str("DELIVERED"),
            TradeAction::Settle => f.write_str("COMPLETED"),
            TradeAction::Dispute => f.write_str("DISPUTED"),
            TradeAction::ForceClose { resolve_to_buyer } => {
                write!(f, "force close (resolve_to_buyer={resolve_to_buyer})")
            }
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    #[n(0)]
    pub id: TradeId,
    #[n(1)]
    pub listing_id: ListingId,
    #[n(2)]
    pub farmer_id: UserId,
    #[n(3)]
    pub buyer_id: UserId,
    #[n(4)]
    pub offer_price: u64,
    #[n(5)]
    final_price: Option<u64>, // written once, on AGREED
    #[n(6)]
    status: TradeStatus,
    #[n(7)]
    pub farmer_state: String, // region of the listing, used to match inspectors
    #[n(8)]
    pub created_at: TimeStamp,
    #[n(9)]
    pub(crate) event_seq: u64,
    #[n(10)]
    pub(crate) last_event_at: Option<TimeStamp>,
    #[n(11)]
    pub(crate) last_event_hash: Option<String>,
}

impl Trade {
    pub fn new(
        id: TradeId,
        listing_id: ListingId,
        farmer_id: UserId,
        buyer_id: UserId,
        offer_price: u64,
        farmer_state: String,
    ) -> Self {
        Self {
            id,
            listing_id,
            farmer_id,
            buyer_id,
            offer_price,
            final_price: None,
            status: TradeStatus::Requested,
            farmer_state,
            created_at: TimeStamp::now(),
            event_seq: 0,
            last_event_at: None,
            last_event_hash: None,
        }
    }

    pub fn status(&self) -> TradeStatus {
        self.status
    }

    pub fn final_price(&self) -> Option<u64> {
        self.final_price
    }

    pub fn is_party(&self, user: &UserId) -> bool {
        &self.farmer_id == user || &self.buyer_id == user
    }

    /// The other side of the trade from `user`, if `user` is a party.
    pub fn counterparty_of(&self, user: &UserId) -> Option<&UserId> {
        if &self.farmer_id == user {
            Some(&self.buyer_id)
        } else if &self.buyer_id == user {
            Some(&self.farmer_id)
        } else {
            None
        }
    }

    /// Number of events recorded on this trade's timeline.
    pub fn event_count(&self) -> u64 {
        self.event_seq
    }

    /// Applies `action`, returning the status the trade left.
    ///
    /// Fails without touching the record when the action is illegal from the
    /// current status. Accepting the offer fixes `final_price`.
    pub fn apply(&mut self, action: TradeAction) -> Result<TradeStatus, EngineError> {
        let to = action.target(self.status)?;
        if action == TradeAction::Accept {
            if self.final_price.is_some() {
                return Err(EngineError::AlreadyFinalized("final price"));
            }
            self.final_price = Some(self.offer_price);
        }
        let from = self.status;
        self.status = to;
        Ok(from)
    }
}

/// Applies `action` to `trade`, records its timeline event and stores the
/// trade, all inside the caller's transaction.
pub(crate) fn advance(
    tx: &LedgerTx<'_>,
    trade: &mut Trade,
    action: TradeAction,
    description: String,
    actor_id: &UserId,
) -> TxResult<TradeEvent> {
    trade.apply(action)?;
    let event = event::append(tx, trade, action.event_type(), description, actor_id)?;
    store(tx, trade)?;
    Ok(event)
}

pub(crate) fn load(tx: &LedgerTx<'_>, trade_id: &TradeId) -> TxResult<Trade> {
    tx.load(Table::Trades, trade_id.as_bytes(), "trade")
}

pub(crate) fn store(tx: &LedgerTx<'_>, trade: &Trade) -> TxResult<()> {
    tx.put(Table::Trades, trade.id.as_bytes(), trade)
}
