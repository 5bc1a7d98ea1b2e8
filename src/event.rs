//! Append-only, hash chained timeline per trade
use crate::error::EngineError;
use crate::ledger::{LedgerTx, Table, TxResult};
use crate::trade::Trade;
use crate::types::{EventId, TimeStamp, TradeId, UserId};
use crate::utils;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    #[n(0)]
    TradeInitiated,
    #[n(1)]
    OfferAccepted,
    #[n(2)]
    TradeCancelled,
    #[n(3)]
    InspectionRequested,
    #[n(4)]
    InspectionAccepted,
    #[n(5)]
    InspectionDeclined,
    #[n(6)]
    InspectionPassed,
    #[n(7)]
    InspectionFailed,
    #[n(8)]
    ShipmentDispatched,
    #[n(9)]
    ShipmentInTransit,
    #[n(10)]
    ShipmentDelivered,
    #[n(11)]
    TradeCompleted,
    #[n(12)]
    DisputeRaised,
    #[n(13)]
    DisputeResolved,
    #[n(14)]
    RatingSubmitted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::TradeInitiated => "TRADE_INITIATED",
            EventType::OfferAccepted => "OFFER_ACCEPTED",
            EventType::TradeCancelled => "TRADE_CANCELLED",
            EventType::InspectionRequested => "INSPECTION_REQUESTED",
            EventType::InspectionAccepted => "INSPECTION_ACCEPTED",
            EventType::InspectionDeclined => "INSPECTION_DECLINED",
            EventType::InspectionPassed => "INSPECTION_PASSED",
            EventType::InspectionFailed => "INSPECTION_FAILED",
            EventType::ShipmentDispatched => "SHIPMENT_DISPATCHED",
            EventType::ShipmentInTransit => "SHIPMENT_IN_TRANSIT",
            EventType::ShipmentDelivered => "SHIPMENT_DELIVERED",
            EventType::TradeCompleted => "TRADE_COMPLETED",
            EventType::DisputeRaised => "DISPUTE_RAISED",
            EventType::DisputeResolved => "DISPUTE_RESOLVED",
            EventType::RatingSubmitted => "RATING_SUBMITTED",
        };
        f.write_str(name)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TradeEvent {
    #[n(0)]
    pub id: EventId,
    #[n(1)]
    pub trade_id: TradeId,
    #[n(2)]
    pub seq: u64,
    #[n(3)]
    pub event_type: EventType,
    #[n(4)]
    pub description: String,
    #[n(5)]
    pub actor_id: UserId,
    #[n(6)]
    pub timestamp: TimeStamp,
    #[n(7)]
    pub prev_hash: Option<String>,
    #[n(8)]
    pub hash: String,
}

// the hashed part of an event, everything but the hash itself
#[derive(minicbor::Encode)]
struct EventBody<'a> {
    #[n(0)]
    id: &'a EventId,
    #[n(1)]
    trade_id: &'a TradeId,
    #[n(2)]
    seq: u64,
    #[n(3)]
    event_type: EventType,
    #[n(4)]
    description: &'a str,
    #[n(5)]
    actor_id: &'a UserId,
    #[n(6)]
    timestamp: TimeStamp,
    #[n(7)]
    prev_hash: Option<&'a str>,
}

impl TradeEvent {
    fn body(&self) -> EventBody<'_> {
        EventBody {
            id: &self.id,
            trade_id: &self.trade_id,
            seq: self.seq,
            event_type: self.event_type,
            description: &self.description,
            actor_id: &self.actor_id,
            timestamp: self.timestamp,
            prev_hash: self.prev_hash.as_deref(),
        }
    }

    pub fn compute_hash(&self) -> Result<String, EngineError> {
        utils::digest_cbor(&self.body())
    }
}

/// Events of one trade share this key prefix; the big-endian sequence
/// number that follows keeps a prefix scan oldest first.
pub(crate) fn timeline_prefix(trade_id: &TradeId) -> Vec<u8> {
    let mut key = trade_id.as_bytes().to_vec();
    key.push(b'/');
    key
}

fn event_key(trade_id: &TradeId, seq: u64) -> Vec<u8> {
    let mut key = timeline_prefix(trade_id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Appends the next event of `trade`'s timeline and advances the trade's
/// sequence, timestamp and hash head. The caller stores `trade` in the same
/// transaction.
pub(crate) fn append(
    tx: &LedgerTx<'_>,
    trade: &mut Trade,
    event_type: EventType,
    description: String,
    actor_id: &UserId,
) -> TxResult<TradeEvent> {
    let seq = trade.event_seq + 1;
    // wall clocks can step backwards, the timeline must not
    let now = TimeStamp::now();
    let timestamp = match trade.last_event_at {
        Some(last) if last > now => last,
        _ => now,
    };

    let mut event = TradeEvent {
        id: EventId::generate()?,
        trade_id: trade.id.clone(),
        seq,
        event_type,
        description,
        actor_id: actor_id.clone(),
        timestamp,
        prev_hash: trade.last_event_hash.clone(),
        hash: String::new(),
    };
    event.hash = event.compute_hash()?;

    tx.put_new(
        Table::Events,
        &event_key(&trade.id, seq),
        &event,
        EngineError::AlreadyFinalized("timeline entry"),
    )?;

    trade.event_seq = seq;
    trade.last_event_at = Some(timestamp);
    trade.last_event_hash = Some(event.hash.clone());

    Ok(event)
}

/// Checks sequence numbers, timestamps and the hash chain of a timeline.
pub fn verify_chain(events: &[TradeEvent]) -> Result<bool, EngineError> {
    let mut prev_hash: Option<&str> = None;
    let mut prev_at: Option<TimeStamp> = None;

    for (idx, event) in events.iter().enumerate() {
        if event.seq != idx as u64 + 1 || event.prev_hash.as_deref() != prev_hash {
            return Ok(false);
        }
        if prev_at.is_some_and(|at| event.timestamp < at) {
            return Ok(false);
        }
        if event.compute_hash()? != event.hash {
            return Ok(false);
        }
        prev_hash = Some(&event.hash);
        prev_at = Some(event.timestamp);
    }
    Ok(true)
}
