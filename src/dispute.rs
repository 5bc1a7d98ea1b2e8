//! Dispute resolution and the hand-off to settlement.
//!
//! Either party can put a post-agreement trade into DISPUTED; only an admin
//! can take it out again, closing it as COMPLETED or CANCELLED. Moving money
//! is not the engine's job: every close is announced to a
//! [`SettlementGateway`] once the transaction has committed.
use crate::error::EngineError;
use crate::ledger::{LedgerTx, TxResult};
use crate::listing;
use crate::trade::{self, Trade, TradeAction, TradeStatus};
use crate::types::{TradeId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Pay the farmer the agreed price.
    Release,
    /// Return the buyer's funds.
    Refund,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementNotice {
    pub trade_id: TradeId,
    pub outcome: SettlementOutcome,
    pub amount: u64,
    pub decided_by: UserId,
}

impl SettlementNotice {
    pub(crate) fn for_trade(trade: &Trade, outcome: SettlementOutcome, decided_by: &UserId) -> Self {
        Self {
            trade_id: trade.id.clone(),
            outcome,
            amount: trade.final_price().unwrap_or(trade.offer_price),
            decided_by: decided_by.clone(),
        }
    }
}

/// Payment rails, invoked after a trade is closed for good.
pub trait SettlementGateway: Send + Sync {
    fn settle(&self, notice: &SettlementNotice) -> anyhow::Result<()>;
}

/// Records settlement decisions in the log only.
#[derive(Debug, Default)]
pub struct LoggingSettlement;

impl SettlementGateway for LoggingSettlement {
    fn settle(&self, notice: &SettlementNotice) -> anyhow::Result<()> {
        tracing::info!(
            trade_id = %notice.trade_id,
            outcome = ?notice.outcome,
            amount = notice.amount,
            decided_by = %notice.decided_by,
            "settlement handed off"
        );
        Ok(())
    }
}

/// Marks the trade DISPUTED. The flag is false when it already was, in
/// which case the record and timeline are untouched.
pub(crate) fn raise(
    tx: &LedgerTx<'_>,
    trade_id: &TradeId,
    party: &UserId,
    reason: &str,
) -> TxResult<(Trade, bool)> {
    let mut trade = trade::load(tx, trade_id)?;
    if !trade.is_party(party) {
        return Err(EngineError::forbidden("only the farmer or buyer may raise a dispute").into());
    }
    if trade.status() == TradeStatus::Disputed {
        return Ok((trade, false));
    }

    let description = if reason.trim().is_empty() {
        format!("Dispute raised by {party}")
    } else {
        format!("Dispute raised by {party}: {reason}")
    };
    trade::advance(tx, &mut trade, TradeAction::Dispute, description, party)?;
    Ok((trade, true))
}

pub(crate) fn force_close(
    tx: &LedgerTx<'_>,
    trade_id: &TradeId,
    resolve_to_buyer: bool,
    admin_id: &UserId,
) -> TxResult<Trade> {
    let mut trade = trade::load(tx, trade_id)?;
    if trade.status().is_terminal() {
        return Err(EngineError::AlreadyFinalized("trade").into());
    }

    let action = TradeAction::ForceClose { resolve_to_buyer };
    let outcome = if resolve_to_buyer {
        "settlement proceeds"
    } else {
        "trade cancelled"
    };
    trade::advance(
        tx,
        &mut trade,
        action,
        format!("Administrative override by admin {admin_id}: {outcome}"),
        admin_id,
    )?;

    if resolve_to_buyer {
        listing::mark_sold(tx, &trade.listing_id, &trade.id)?;
    } else {
        listing::release(tx, &trade.listing_id, &trade.id)?;
    }
    Ok(trade)
}
