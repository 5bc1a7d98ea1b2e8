//! Inspection assignment protocol.
//!
//! An admin names an inspector for an AGREED trade, the inspector accepts or
//! declines, and an accepted inspector submits a one-time verdict that drives
//! the trade onwards. At most one assignment per trade is REQUESTED or
//! ACCEPTED at a time; the `ActiveAssignments` index holds that slot.
use crate::config::InspectionFailPolicy;
use crate::error::EngineError;
use crate::event::{self, EventType};
use crate::ledger::{LedgerTx, Table, TxResult};
use crate::listing;
use crate::logistics::{self, LogisticsRecord};
use crate::trade::{self, Trade, TradeAction, TradeStatus};
use crate::types::{AssignmentId, TimeStamp, TradeId, UserId};
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentStatus {
    #[n(0)]
    Requested,
    #[n(1)]
    Accepted,
    #[n(2)]
    Declined,
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssignmentStatus::Requested => "REQUESTED",
            AssignmentStatus::Accepted => "ACCEPTED",
            AssignmentStatus::Declined => "DECLINED",
        };
        f.write_str(name)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InspectionResult {
    #[n(0)]
    Pending,
    #[n(1)]
    Passed,
    #[n(2)]
    Failed,
}

/// The outcome an inspector reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
}

impl From<Verdict> for InspectionResult {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Passed => InspectionResult::Passed,
            Verdict::Failed => InspectionResult::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionReport {
    pub verdict: Verdict,
    pub grade: String,
    pub certificate_ref: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct InspectionAssignment {
    #[n(0)]
    pub id: AssignmentId,
    #[n(1)]
    pub trade_id: TradeId,
    #[n(2)]
    pub inspector_id: UserId,
    #[n(3)]
    pub requested_by: UserId,
    #[n(4)]
    pub status: AssignmentStatus,
    #[n(5)]
    pub result: InspectionResult,
    #[n(6)]
    pub grade: Option<String>,
    #[n(7)]
    pub certificate_ref: Option<String>,
    #[n(8)]
    pub created_at: TimeStamp,
}

impl InspectionAssignment {
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            AssignmentStatus::Requested | AssignmentStatus::Accepted
        )
    }

    fn respond(&mut self, accept: bool) -> Result<(), EngineError> {
        let next = if accept {
            AssignmentStatus::Accepted
        } else {
            AssignmentStatus::Declined
        };
        match self.status {
            AssignmentStatus::Requested => {
                self.status = next;
                Ok(())
            }
            AssignmentStatus::Accepted | AssignmentStatus::Declined => {
                Err(EngineError::invalid_transition("assignment", self.status, next))
            }
        }
    }

    fn record_result(&mut self, report: &InspectionReport) -> Result<(), EngineError> {
        if self.result != InspectionResult::Pending {
            return Err(EngineError::AlreadyFinalized("inspection result"));
        }
        if self.status != AssignmentStatus::Accepted {
            return Err(EngineError::invalid_transition(
                "assignment",
                self.status,
                "result submitted",
            ));
        }
        self.result = report.verdict.into();
        self.grade = Some(report.grade.clone());
        self.certificate_ref = Some(report.certificate_ref.clone());
        Ok(())
    }
}

/// Verdict side effects on the trade.
#[derive(Debug, Clone)]
pub struct InspectionOutcome {
    pub assignment: InspectionAssignment,
    pub trade: Trade,
    pub logistics: Option<LogisticsRecord>,
}

fn store(tx: &LedgerTx<'_>, assignment: &InspectionAssignment) -> TxResult<()> {
    tx.put(Table::Assignments, assignment.id.as_bytes(), assignment)
}

pub(crate) fn active_for(tx: &LedgerTx<'_>, trade_id: &TradeId) -> TxResult<Option<AssignmentId>> {
    tx.get(Table::ActiveAssignments, trade_id.as_bytes())
}

pub(crate) fn request(
    tx: &LedgerTx<'_>,
    assignment_id: &AssignmentId,
    trade_id: &TradeId,
    inspector_id: &UserId,
    admin_id: &UserId,
) -> TxResult<(InspectionAssignment, Trade)> {
    let mut trade = trade::load(tx, trade_id)?;
    if active_for(tx, trade_id)?.is_some() && trade.status() == TradeStatus::InspectionRequested {
        return Err(EngineError::AlreadyAssigned.into());
    }
    if trade.status() != TradeStatus::Agreed {
        return Err(EngineError::invalid_transition(
            "trade",
            trade.status(),
            TradeAction::RequestInspection,
        )
        .into());
    }

    let assignment = InspectionAssignment {
        id: assignment_id.clone(),
        trade_id: trade_id.clone(),
        inspector_id: inspector_id.clone(),
        requested_by: admin_id.clone(),
        status: AssignmentStatus::Requested,
        result: InspectionResult::Pending,
        grade: None,
        certificate_ref: None,
        created_at: TimeStamp::now(),
    };

    trade::advance(
        tx,
        &mut trade,
        TradeAction::RequestInspection,
        format!("Inspection requested from inspector {inspector_id}"),
        admin_id,
    )?;
    store(tx, &assignment)?;
    tx.put(Table::ActiveAssignments, trade_id.as_bytes(), &assignment.id)?;

    Ok((assignment, trade))
}

pub(crate) fn respond(
    tx: &LedgerTx<'_>,
    assignment_id: &AssignmentId,
    inspector_id: &UserId,
    accept: bool,
) -> TxResult<(InspectionAssignment, Trade)> {
    let mut assignment: InspectionAssignment =
        tx.load(Table::Assignments, assignment_id.as_bytes(), "inspection assignment")?;
    if &assignment.inspector_id != inspector_id {
        return Err(EngineError::forbidden("assignment names a different inspector").into());
    }
    assignment.respond(accept)?;

    let mut trade = trade::load(tx, &assignment.trade_id)?;
    if trade.status() != TradeStatus::InspectionRequested {
        return Err(EngineError::invalid_transition(
            "trade",
            trade.status(),
            "inspection response",
        )
        .into());
    }
    if accept {
        event::append(
            tx,
            &mut trade,
            EventType::InspectionAccepted,
            format!("Inspector {inspector_id} accepted the inspection"),
            inspector_id,
        )?;
        trade::store(tx, &trade)?;
    } else {
        trade::advance(
            tx,
            &mut trade,
            TradeAction::DeclineInspection,
            format!("Inspector {inspector_id} declined; trade open for reassignment"),
            inspector_id,
        )?;
        tx.remove(Table::ActiveAssignments, assignment.trade_id.as_bytes())?;
    }
    store(tx, &assignment)?;

    Ok((assignment, trade))
}

pub(crate) fn submit_result(
    tx: &LedgerTx<'_>,
    assignment_id: &AssignmentId,
    inspector_id: &UserId,
    report: &InspectionReport,
    policy: InspectionFailPolicy,
) -> TxResult<InspectionOutcome> {
    let mut assignment: InspectionAssignment =
        tx.load(Table::Assignments, assignment_id.as_bytes(), "inspection assignment")?;
    if &assignment.inspector_id != inspector_id {
        return Err(EngineError::forbidden("assignment names a different inspector").into());
    }
    assignment.record_result(report)?;

    let mut trade = trade::load(tx, &assignment.trade_id)?;
    let summary = format!(
        "Inspection {} with grade {} (certificate {})",
        match report.verdict {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
        },
        report.grade,
        report.certificate_ref
    );

    let logistics = match report.verdict {
        Verdict::Passed => {
            let origin = listing::load(tx, &trade.listing_id)?.location_state;
            Some(logistics::open(
                tx,
                &mut trade,
                TradeAction::InspectionPassed,
                &origin,
                summary,
                inspector_id,
            )?)
        }
        Verdict::Failed => {
            let action = TradeAction::InspectionFailed(policy);
            trade::advance(tx, &mut trade, action, summary, inspector_id)?;
            if policy == InspectionFailPolicy::Cancel {
                listing::release(tx, &trade.listing_id, &trade.id)?;
            }
            None
        }
    };
    store(tx, &assignment)?;
    // a final verdict frees the trade's assignment slot
    tx.remove(Table::ActiveAssignments, assignment.trade_id.as_bytes())?;

    Ok(InspectionOutcome {
        assignment,
        trade,
        logistics,
    })
}
