//! Forward-only shipment tracking; each step is mirrored onto the trade in
//! the same transaction.
use crate::error::EngineError;
use crate::event::{self, EventType};
use crate::ledger::{LedgerTx, Table, TxResult};
use crate::trade::{self, Trade, TradeAction, TradeStatus};
use crate::types::{TimeStamp, TradeId, UserId};
use crate::utils;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogisticsStatus {
    #[n(0)]
    PickedUp,
    #[n(1)]
    InTransit,
    #[n(2)]
    Delivered,
}

impl LogisticsStatus {
    pub fn next(self) -> Option<LogisticsStatus> {
        match self {
            LogisticsStatus::PickedUp => Some(LogisticsStatus::InTransit),
            LogisticsStatus::InTransit => Some(LogisticsStatus::Delivered),
            LogisticsStatus::Delivered => None,
        }
    }
}

impl fmt::Display for LogisticsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogisticsStatus::PickedUp => "PICKED_UP",
            LogisticsStatus::InTransit => "IN_TRANSIT",
            LogisticsStatus::Delivered => "DELIVERED",
        };
        f.write_str(name)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LogisticsRecord {
    #[n(0)]
    pub trade_id: TradeId,
    #[n(1)]
    pub tracking_id: String,
    #[n(2)]
    status: LogisticsStatus,
    #[n(3)]
    pub current_location: String,
    #[n(4)]
    pub updated_at: TimeStamp,
}

impl LogisticsRecord {
    pub fn status(&self) -> LogisticsStatus {
        self.status
    }

    fn step(&mut self, next: LogisticsStatus, location: String) -> Result<(), EngineError> {
        if self.status.next() != Some(next) {
            return Err(EngineError::invalid_transition("shipment", self.status, next));
        }
        self.status = next;
        self.current_location = location;
        self.updated_at = TimeStamp::now();
        Ok(())
    }
}

/// Creates the shipment at PICKED_UP for a trade that just cleared for
/// fulfilment and moves the trade to SHIPPED under `action`.
pub(crate) fn open(
    tx: &LedgerTx<'_>,
    trade: &mut Trade,
    action: TradeAction,
    origin_state: &str,
    description: String,
    actor_id: &UserId,
) -> TxResult<LogisticsRecord> {
    let record = LogisticsRecord {
        trade_id: trade.id.clone(),
        tracking_id: utils::new_tracking_id(),
        status: LogisticsStatus::PickedUp,
        current_location: format!("Origin: {origin_state}"),
        updated_at: TimeStamp::now(),
    };
    tx.put_new(
        Table::Logistics,
        trade.id.as_bytes(),
        &record,
        EngineError::AlreadyFinalized("shipment"),
    )?;

    let description = format!("{description}; tracking {}", record.tracking_id);
    trade::advance(tx, trade, action, description, actor_id)?;
    Ok(record)
}

/// Moves the shipment one step forward and mirrors it on the trade:
/// IN_TRANSIT keeps the trade SHIPPED, DELIVERED delivers the trade.
pub(crate) fn advance(
    tx: &LedgerTx<'_>,
    trade_id: &TradeId,
    next: LogisticsStatus,
    location: &str,
    actor_id: &UserId,
) -> TxResult<(LogisticsRecord, Trade)> {
    let mut record: LogisticsRecord = tx.load(Table::Logistics, trade_id.as_bytes(), "logistics record")?;
    let mut trade = trade::load(tx, trade_id)?;

    record.step(next, location.to_string())?;
    if trade.status() != TradeStatus::Shipped {
        return Err(EngineError::invalid_transition("trade", trade.status(), next).into());
    }

    let description = format!("Shipment {} is {} at {}", record.tracking_id, next, location);
    match next {
        LogisticsStatus::InTransit => {
            event::append(tx, &mut trade, EventType::ShipmentInTransit, description, actor_id)?;
            trade::store(tx, &trade)?;
        }
        LogisticsStatus::Delivered => {
            trade::advance(tx, &mut trade, TradeAction::Deliver, description, actor_id)?;
        }
        LogisticsStatus::PickedUp => {
            return Err(EngineError::invalid_transition("shipment", record.status, next).into());
        }
    }

    tx.put(Table::Logistics, trade_id.as_bytes(), &record)?;
    Ok((record, trade))
}
