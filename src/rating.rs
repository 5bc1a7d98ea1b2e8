//! Once-per-party feedback on completed trades and the reputation it adds up to
use crate::error::EngineError;
use crate::event::{self, EventType};
use crate::ledger::{LedgerTx, Table, TxResult};
use crate::trade::{self, TradeStatus};
use crate::types::{TimeStamp, TradeId, UserId};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Rating {
    #[n(0)]
    pub trade_id: TradeId,
    #[n(1)]
    pub rater_id: UserId,
    #[n(2)]
    pub target_id: UserId,
    #[n(3)]
    pub score: u8,
    #[n(4)]
    pub comment: String,
    #[n(5)]
    pub created_at: TimeStamp,
}

/// Running totals of the scores a user has received.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reputation {
    #[n(0)]
    pub total: u64,
    #[n(1)]
    pub count: u64,
}

impl Reputation {
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total as f64 / self.count as f64
    }

    fn add(&mut self, score: u8) {
        self.total += u64::from(score);
        self.count += 1;
    }
}

pub fn validate_score(score: u8) -> Result<(), EngineError> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(EngineError::InvalidInput(format!(
            "score {score} outside {MIN_SCORE}..={MAX_SCORE}"
        )));
    }
    Ok(())
}

fn rating_key(trade_id: &TradeId, rater_id: &UserId) -> Vec<u8> {
    let mut key = trade_id.as_bytes().to_vec();
    key.push(b'/');
    key.extend_from_slice(rater_id.as_bytes());
    key
}

pub(crate) fn submit(
    tx: &LedgerTx<'_>,
    trade_id: &TradeId,
    rater_id: &UserId,
    score: u8,
    comment: &str,
) -> TxResult<Rating> {
    validate_score(score)?;
    let mut trade = trade::load(tx, trade_id)?;
    if trade.status() != TradeStatus::Completed {
        return Err(EngineError::invalid_transition("trade", trade.status(), "rated").into());
    }
    let Some(target_id) = trade.counterparty_of(rater_id).cloned() else {
        return Err(EngineError::forbidden("only the farmer or buyer may rate a trade").into());
    };

    let rating = Rating {
        trade_id: trade_id.clone(),
        rater_id: rater_id.clone(),
        target_id: target_id.clone(),
        score,
        comment: comment.to_string(),
        created_at: TimeStamp::now(),
    };
    tx.put_new(
        Table::Ratings,
        &rating_key(trade_id, rater_id),
        &rating,
        EngineError::Duplicate,
    )?;

    let mut reputation: Reputation = tx
        .get(Table::Reputation, target_id.as_bytes())?
        .unwrap_or_default();
    reputation.add(score);
    tx.put(Table::Reputation, target_id.as_bytes(), &reputation)?;

    event::append(
        tx,
        &mut trade,
        EventType::RatingSubmitted,
        format!("{rater_id} rated {target_id} {score}/{MAX_SCORE}"),
        rater_id,
    )?;
    trade::store(tx, &trade)?;

    Ok(rating)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reputation_averages_zero() {
        assert_eq!(Reputation::default().average(), 0.0);
    }

    #[test]
    fn average_is_arithmetic_mean() {
        let mut rep = Reputation::default();
        for score in [5, 4, 3] {
            rep.add(score);
        }
        assert_eq!(rep.average(), 4.0);
    }

    #[test]
    fn score_bounds_are_inclusive() {
        assert!(validate_score(0).is_err());
        assert!(validate_score(1).is_ok());
        assert!(validate_score(5).is_ok());
        assert!(validate_score(6).is_err());
    }
}
