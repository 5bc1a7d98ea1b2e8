mod common;

use agri_trade::dispute::{SettlementGateway, SettlementNotice, SettlementOutcome};
use agri_trade::event::EventType;
use agri_trade::inspection::{AssignmentStatus, InspectionReport, InspectionResult, Verdict};
use agri_trade::listing::ListingStatus;
use agri_trade::logistics::LogisticsStatus;
use agri_trade::trade::{Trade, TradeStatus};
use agri_trade::types::{AssignmentId, Role};
use agri_trade::{EngineConfig, EngineError, InspectionFailPolicy, MarketService};
use anyhow::Context;
use common::{Market, market, market_with};
use std::sync::{Arc, Mutex};

fn agreed_trade(m: &Market) -> anyhow::Result<Trade> {
    let trade = m.service.create_trade(&m.buyer, &m.listing.id, Some(500))?;
    Ok(m.service.accept_offer(&m.farmer, &trade.id)?)
}

fn accepted_assignment(m: &Market, trade: &Trade) -> anyhow::Result<AssignmentId> {
    let assignment = m
        .service
        .assign_inspector(&m.admin, &trade.id, &m.inspector.user_id)?;
    m.service
        .respond_to_assignment(&m.inspector, &assignment.id, true)?;
    Ok(assignment.id)
}

fn report(verdict: Verdict) -> InspectionReport {
    InspectionReport {
        verdict,
        grade: "A".into(),
        certificate_ref: "CERT-PB-0042".into(),
    }
}

fn event_types(m: &Market, trade: &Trade) -> anyhow::Result<Vec<EventType>> {
    Ok(m.service
        .events(&m.admin, &trade.id)?
        .into_iter()
        .map(|e| e.event_type)
        .collect())
}

#[derive(Default)]
struct RecordingSettlement {
    notices: Mutex<Vec<SettlementNotice>>,
}

impl SettlementGateway for RecordingSettlement {
    fn settle(&self, notice: &SettlementNotice) -> anyhow::Result<()> {
        self.notices
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .push(notice.clone());
        Ok(())
    }
}

struct BrokenSettlement;

impl SettlementGateway for BrokenSettlement {
    fn settle(&self, _notice: &SettlementNotice) -> anyhow::Result<()> {
        anyhow::bail!("payment rail offline")
    }
}

#[test]
fn buyer_offer_reserves_listing() -> anyhow::Result<()> {
    common::init_tracing();
    let m = market()?;

    let trade = m
        .service
        .create_trade(&m.buyer, &m.listing.id, Some(500))
        .context("create trade")?;

    assert_eq!(trade.status(), TradeStatus::Requested);
    assert_eq!(trade.offer_price, 500);
    assert_eq!(trade.final_price(), None);
    assert_eq!(trade.farmer_id, m.farmer.user_id);

    let listing = m.service.listing(&m.listing.id)?;
    assert_eq!(
        listing.status(),
        &ListingStatus::Reserved {
            trade_id: trade.id.clone()
        }
    );
    assert_eq!(event_types(&m, &trade)?, vec![EventType::TradeInitiated]);
    Ok(())
}

#[test]
fn offer_defaults_to_asking_price() -> anyhow::Result<()> {
    let m = market()?;
    let trade = m.service.create_trade(&m.buyer, &m.listing.id, None)?;
    assert_eq!(trade.offer_price, m.listing.price_per_unit);
    Ok(())
}

#[test]
fn farmer_accepts_offer() -> anyhow::Result<()> {
    let m = market()?;

    let trade = agreed_trade(&m)?;

    assert_eq!(trade.status(), TradeStatus::Agreed);
    assert_eq!(trade.final_price(), Some(500));
    assert_eq!(
        event_types(&m, &trade)?,
        vec![EventType::TradeInitiated, EventType::OfferAccepted]
    );
    Ok(())
}

#[test]
fn declined_inspection_allows_reassignment() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;
    let second = m.another_inspector("Kiran", "Haryana")?;

    let first = m
        .service
        .assign_inspector(&m.admin, &trade.id, &m.inspector.user_id)?;
    assert_eq!(
        m.service.trade(&m.admin, &trade.id)?.status(),
        TradeStatus::InspectionRequested
    );

    let declined = m
        .service
        .respond_to_assignment(&m.inspector, &first.id, false)?;
    assert_eq!(declined.status, AssignmentStatus::Declined);
    assert_eq!(
        m.service.trade(&m.admin, &trade.id)?.status(),
        TradeStatus::Agreed
    );
    let pending = m.service.pending_assignment(&m.admin)?;
    assert!(pending.iter().any(|t| t.id == trade.id));

    let reassigned = m
        .service
        .assign_inspector(&m.admin, &trade.id, &second.user_id)?;
    assert_eq!(reassigned.status, AssignmentStatus::Requested);
    assert_eq!(
        m.service
            .assignment_for_trade(&m.admin, &trade.id)?
            .map(|a| a.id),
        Some(reassigned.id)
    );
    Ok(())
}

#[test]
fn second_assignment_while_active_is_refused() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;
    let second = m.another_inspector("Kiran", "Haryana")?;

    m.service
        .assign_inspector(&m.admin, &trade.id, &m.inspector.user_id)?;
    let res = m.service.assign_inspector(&m.admin, &trade.id, &second.user_id);

    assert_eq!(res.unwrap_err(), EngineError::AlreadyAssigned);
    Ok(())
}

#[test]
fn failed_inspection_disputes_then_admin_releases() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;
    let assignment = accepted_assignment(&m, &trade)?;

    let outcome = m
        .service
        .submit_inspection_result(&m.inspector, &assignment, &report(Verdict::Failed))?;
    assert_eq!(outcome.trade.status(), TradeStatus::Disputed);
    assert_eq!(outcome.assignment.result, InspectionResult::Failed);
    assert!(outcome.logistics.is_none());

    let closed = m.service.force_close(&m.admin, &trade.id, true)?;
    assert_eq!(closed.status(), TradeStatus::Completed);
    assert!(matches!(
        m.service.listing(&m.listing.id)?.status(),
        ListingStatus::Sold { .. }
    ));
    assert_eq!(
        event_types(&m, &trade)?.last(),
        Some(&EventType::DisputeResolved)
    );
    Ok(())
}

#[test]
fn failed_inspection_with_cancel_policy_frees_listing() -> anyhow::Result<()> {
    let config = EngineConfig {
        on_inspection_fail: InspectionFailPolicy::Cancel,
        ..EngineConfig::default()
    };
    let m = market_with(config)?;
    let trade = agreed_trade(&m)?;
    let assignment = accepted_assignment(&m, &trade)?;

    let outcome = m
        .service
        .submit_inspection_result(&m.inspector, &assignment, &report(Verdict::Failed))?;

    assert_eq!(outcome.trade.status(), TradeStatus::Cancelled);
    assert!(m.service.listing(&m.listing.id)?.is_available());
    Ok(())
}

#[test]
fn completed_trade_rated_once_per_party() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;
    let assignment = accepted_assignment(&m, &trade)?;
    m.service
        .submit_inspection_result(&m.inspector, &assignment, &report(Verdict::Failed))?;
    m.service.force_close(&m.admin, &trade.id, true)?;

    let rating = m
        .service
        .submit_rating(&m.buyer, &trade.id, 5, "Clean grain, on time")?;
    assert_eq!(rating.target_id, m.farmer.user_id);
    assert_eq!(m.service.average_for(&m.buyer, &m.farmer.user_id)?, 5.0);

    let again = m.service.submit_rating(&m.buyer, &trade.id, 1, "changed my mind");
    assert_eq!(again.unwrap_err(), EngineError::Duplicate);
    assert_eq!(m.service.average_for(&m.buyer, &m.farmer.user_id)?, 5.0);

    // the farmer rates the buyer independently
    m.service.submit_rating(&m.farmer, &trade.id, 4, "prompt payment")?;
    assert_eq!(m.service.average_for(&m.farmer, &m.buyer.user_id)?, 4.0);
    assert_eq!(m.service.ratings_for(&m.admin, &m.farmer.user_id)?.len(), 1);
    Ok(())
}

#[test]
fn rating_requires_completed_trade() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;

    let res = m.service.submit_rating(&m.buyer, &trade.id, 5, "");

    assert!(matches!(res, Err(EngineError::InvalidTransition { .. })));
    assert_eq!(m.service.average_for(&m.buyer, &m.farmer.user_id)?, 0.0);
    Ok(())
}

#[test]
fn full_lifecycle_through_logistics() -> anyhow::Result<()> {
    let settlement = Arc::new(RecordingSettlement::default());
    let dir = tempfile::tempdir()?;
    let service = MarketService::new(
        Arc::new(sled::open(dir.path().join("wired.db"))?),
        EngineConfig::default(),
    )?
    .with_settlement(settlement.clone());

    let admin = agri_trade::Actor::from(&service.register_user("Asha", Role::Admin, "Delhi")?);
    let farmer =
        agri_trade::Actor::from(&service.register_user("Gurpreet", Role::Farmer, "Punjab")?);
    let buyer = agri_trade::Actor::from(&service.register_user("Meera", Role::Buyer, "Goa")?);
    let inspector =
        agri_trade::Actor::from(&service.register_user("Ravi", Role::Inspector, "Punjab")?);
    service.set_kyc_verified(&admin, &buyer.user_id, true)?;
    let listing = service.create_listing(&farmer, common::basmati())?;

    let trade = service.create_trade(&buyer, &listing.id, Some(480))?;
    service.accept_offer(&farmer, &trade.id)?;
    let assignment = service.assign_inspector(&admin, &trade.id, &inspector.user_id)?;
    service.respond_to_assignment(&inspector, &assignment.id, true)?;

    let outcome =
        service.complete_inspection(&inspector, &trade.id, &report(Verdict::Passed))?;
    assert_eq!(outcome.trade.status(), TradeStatus::Shipped);
    let shipment = outcome.logistics.context("passed inspection opens logistics")?;
    assert_eq!(shipment.status(), LogisticsStatus::PickedUp);
    assert_eq!(shipment.current_location, "Origin: Punjab");
    assert_eq!(shipment.tracking_id.len(), 8);

    let skipped =
        service.advance_logistics(&inspector, &trade.id, LogisticsStatus::Delivered, "Pune");
    assert!(matches!(skipped, Err(EngineError::InvalidTransition { .. })));

    service.advance_logistics(&inspector, &trade.id, LogisticsStatus::InTransit, "Delhi hub")?;
    let delivered =
        service.advance_logistics(&admin, &trade.id, LogisticsStatus::Delivered, "Pune")?;
    assert_eq!(delivered.current_location, "Pune");
    assert_eq!(
        service.trade(&buyer, &trade.id)?.status(),
        TradeStatus::Delivered
    );

    let completed = service.settle(&buyer, &trade.id)?;
    assert_eq!(completed.status(), TradeStatus::Completed);
    assert!(matches!(
        service.listing(&listing.id)?.status(),
        ListingStatus::Sold { .. }
    ));

    let notices = settlement
        .notices
        .lock()
        .map_err(|_| anyhow::anyhow!("poisoned"))?
        .clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].outcome, SettlementOutcome::Release);
    assert_eq!(notices[0].amount, 480);

    let types: Vec<EventType> = service
        .events(&admin, &trade.id)?
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            EventType::TradeInitiated,
            EventType::OfferAccepted,
            EventType::InspectionRequested,
            EventType::InspectionAccepted,
            EventType::InspectionPassed,
            EventType::ShipmentInTransit,
            EventType::ShipmentDelivered,
            EventType::TradeCompleted,
        ]
    );
    assert!(service.verify_timeline(&admin, &trade.id)?);

    let spend = service.trade_summary(&buyer)?;
    assert_eq!(spend.completed_trades, 1);
    assert_eq!(spend.total_value, 480);
    Ok(())
}

#[test]
fn settlement_failure_does_not_undo_close() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let service = MarketService::new(
        Arc::new(sled::open(dir.path().join("broken.db"))?),
        EngineConfig {
            require_inspection: false,
            ..EngineConfig::default()
        },
    )?
    .with_settlement(Arc::new(BrokenSettlement));
    let admin = agri_trade::Actor::from(&service.register_user("Asha", Role::Admin, "Delhi")?);
    let farmer = agri_trade::Actor::from(&service.register_user("Gurpreet", Role::Farmer, "Punjab")?);
    let buyer = agri_trade::Actor::from(&service.register_user("Meera", Role::Buyer, "Goa")?);
    service.set_kyc_verified(&admin, &buyer.user_id, true)?;
    let listing = service.create_listing(&farmer, common::basmati())?;

    let trade = service.create_trade(&buyer, &listing.id, None)?;
    service.accept_offer(&farmer, &trade.id)?;
    service.raise_dispute(&buyer, &trade.id, "moisture too high")?;

    let closed = service.force_close(&admin, &trade.id, false)?;

    assert_eq!(closed.status(), TradeStatus::Cancelled);
    assert!(service.listing(&listing.id)?.is_available());
    Ok(())
}

#[test]
fn direct_dispatch_when_inspection_optional() -> anyhow::Result<()> {
    let m = market_with(EngineConfig {
        require_inspection: false,
        ..EngineConfig::default()
    })?;
    let trade = agreed_trade(&m)?;

    let shipment = m.service.start_logistics(&m.admin, &trade.id)?;

    assert_eq!(shipment.status(), LogisticsStatus::PickedUp);
    assert_eq!(
        m.service.trade(&m.buyer, &trade.id)?.status(),
        TradeStatus::Shipped
    );
    assert_eq!(
        event_types(&m, &trade)?.last(),
        Some(&EventType::ShipmentDispatched)
    );
    Ok(())
}

#[test]
fn direct_dispatch_refused_when_inspection_required() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;

    let res = m.service.start_logistics(&m.admin, &trade.id);

    assert!(matches!(res, Err(EngineError::InvalidTransition { .. })));
    assert!(m.service.logistics(&m.admin, &trade.id).is_err());
    Ok(())
}

#[test]
fn cancel_returns_listing_to_market() -> anyhow::Result<()> {
    let m = market()?;
    let trade = m.service.create_trade(&m.buyer, &m.listing.id, None)?;

    let cancelled = m
        .service
        .update_trade_status(&m.buyer, &trade.id, TradeStatus::Cancelled)?;

    assert_eq!(cancelled.status(), TradeStatus::Cancelled);
    assert!(m.service.listing(&m.listing.id)?.is_available());
    let available = m.service.available_listings(Some("punjab"))?;
    assert_eq!(available.len(), 1);

    // terminal trades stay put
    let again = m.service.accept_offer(&m.farmer, &trade.id);
    assert!(matches!(again, Err(EngineError::InvalidTransition { .. })));
    Ok(())
}

#[test]
fn status_endpoint_only_accepts_or_cancels() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;

    for status in [
        TradeStatus::Shipped,
        TradeStatus::Delivered,
        TradeStatus::Completed,
        TradeStatus::Disputed,
    ] {
        let res = m.service.update_trade_status(&m.farmer, &trade.id, status);
        assert!(matches!(res, Err(EngineError::Forbidden(_))), "{status}");
    }
    assert_eq!(
        m.service.trade(&m.farmer, &trade.id)?.status(),
        TradeStatus::Agreed
    );
    Ok(())
}

#[test]
fn unverified_buyer_cannot_trade() -> anyhow::Result<()> {
    let m = market()?;
    let newcomer = agri_trade::Actor::from(&m.service.register_user(
        "Iqbal",
        Role::Buyer,
        "Bihar",
    )?);

    let res = m.service.create_trade(&newcomer, &m.listing.id, None);

    assert!(matches!(res, Err(EngineError::Forbidden(_))));
    assert!(m.service.listing(&m.listing.id)?.is_available());
    Ok(())
}

#[test]
fn claimed_role_must_match_registration() -> anyhow::Result<()> {
    let m = market()?;
    let impostor = agri_trade::Actor::new(m.buyer.user_id.clone(), Role::Admin);

    let res = m.service.metrics(&impostor);

    assert!(matches!(res, Err(EngineError::Forbidden(_))));
    Ok(())
}

#[test]
fn deactivated_user_is_locked_out() -> anyhow::Result<()> {
    let m = market()?;
    m.service
        .set_user_active(&m.admin, &m.buyer.user_id, false)?;

    let res = m.service.create_trade(&m.buyer, &m.listing.id, None);

    assert!(matches!(res, Err(EngineError::Forbidden(_))));
    Ok(())
}

#[test]
fn only_the_listing_farmer_accepts() -> anyhow::Result<()> {
    let m = market()?;
    let other = agri_trade::Actor::from(&m.service.register_user(
        "Baldev",
        Role::Farmer,
        "Punjab",
    )?);
    let trade = m.service.create_trade(&m.buyer, &m.listing.id, None)?;

    let res = m.service.accept_offer(&other, &trade.id);

    assert!(matches!(res, Err(EngineError::Forbidden(_))));
    Ok(())
}

#[test]
fn wrong_inspector_cannot_respond() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;
    let outsider = m.another_inspector("Kiran", "Haryana")?;
    let assignment = m
        .service
        .assign_inspector(&m.admin, &trade.id, &m.inspector.user_id)?;

    let res = m.service.respond_to_assignment(&outsider, &assignment.id, true);

    assert!(matches!(res, Err(EngineError::Forbidden(_))));
    Ok(())
}

#[test]
fn inspection_result_is_final() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;
    let assignment = accepted_assignment(&m, &trade)?;
    m.service
        .submit_inspection_result(&m.inspector, &assignment, &report(Verdict::Passed))?;

    let second =
        m.service
            .submit_inspection_result(&m.inspector, &assignment, &report(Verdict::Failed));

    assert_eq!(
        second.unwrap_err(),
        EngineError::AlreadyFinalized("inspection result")
    );
    assert_eq!(
        m.service.trade(&m.admin, &trade.id)?.status(),
        TradeStatus::Shipped
    );
    Ok(())
}

#[test]
fn repeated_dispute_is_idempotent() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;

    m.service.raise_dispute(&m.buyer, &trade.id, "wrong variety")?;
    let count = m.service.events(&m.admin, &trade.id)?.len();
    let again = m.service.raise_dispute(&m.farmer, &trade.id, "")?;

    assert_eq!(again.status(), TradeStatus::Disputed);
    assert_eq!(m.service.events(&m.admin, &trade.id)?.len(), count);
    Ok(())
}

#[test]
fn force_close_rules() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;

    let not_disputed = m.service.force_close(&m.admin, &trade.id, true);
    assert!(matches!(not_disputed, Err(EngineError::InvalidTransition { .. })));

    m.service.raise_dispute(&m.buyer, &trade.id, "short weight")?;
    let by_farmer = m.service.force_close(&m.farmer, &trade.id, true);
    assert!(matches!(by_farmer, Err(EngineError::Forbidden(_))));

    m.service.force_close(&m.admin, &trade.id, false)?;
    let twice = m.service.force_close(&m.admin, &trade.id, true);
    assert_eq!(twice.unwrap_err(), EngineError::AlreadyFinalized("trade"));
    Ok(())
}

#[test]
fn admin_views() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;
    m.service.create_listing(&m.farmer, common::basmati())?;

    let metrics = m.service.metrics(&m.admin)?;
    assert_eq!(metrics.total_users, 4);
    assert_eq!(metrics.total_listings, 2);
    assert_eq!(metrics.total_trades, 1);
    assert!(metrics.trades_by_status.contains(&(TradeStatus::Agreed, 1)));
    assert!(metrics.trades_by_status.contains(&(TradeStatus::Requested, 0)));

    let inspectors = m.service.inspectors(&m.admin, Some("Punjab"))?;
    assert_eq!(inspectors.len(), 1);
    assert_eq!(m.service.users(&m.admin)?.len(), 4);
    assert_eq!(m.service.my_trades(&m.farmer)?[0].id, trade.id);
    assert!(m.service.my_inspections(&m.inspector)?.is_empty());
    Ok(())
}

#[test]
fn complete_inspection_checks_role_before_lookup() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;

    let res = m
        .service
        .complete_inspection(&m.buyer, &trade.id, &report(Verdict::Passed));

    assert!(matches!(res, Err(EngineError::Forbidden(_))));
    // a real inspector with nothing assigned gets the lookup result
    let res = m
        .service
        .complete_inspection(&m.inspector, &trade.id, &report(Verdict::Passed));
    assert_eq!(res.unwrap_err(), EngineError::NotFound("inspection assignment"));
    Ok(())
}

#[test]
fn assignment_after_verdict_is_an_invalid_transition() -> anyhow::Result<()> {
    let m = market()?;
    let trade = agreed_trade(&m)?;
    let assignment = accepted_assignment(&m, &trade)?;
    m.service
        .submit_inspection_result(&m.inspector, &assignment, &report(Verdict::Passed))?;
    let second = m.another_inspector("Kiran", "Haryana")?;

    let res = m.service.assign_inspector(&m.admin, &trade.id, &second.user_id);

    assert!(matches!(res, Err(EngineError::InvalidTransition { .. })));
    // the verdict released the slot, so the trade has no current assignment
    let again = m
        .service
        .complete_inspection(&m.inspector, &trade.id, &report(Verdict::Passed));
    assert_eq!(again.unwrap_err(), EngineError::NotFound("inspection assignment"));
    Ok(())
}
