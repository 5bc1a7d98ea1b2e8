//! Service layer API: the role-gated request surface of the marketplace.
//!
//! Every call names the authenticated [`Actor`] it runs for. The actor is
//! checked against the stored user before anything else happens, then the
//! operation runs as one ledger transaction.
use crate::config::EngineConfig;
use crate::dispute::{self, LoggingSettlement, SettlementGateway, SettlementNotice, SettlementOutcome};
use crate::error::{EngineError, ErrorKind};
use crate::event::{self, EventType, TradeEvent};
use crate::inspection::{self, InspectionAssignment, InspectionOutcome, InspectionReport};
use crate::ledger::{Ledger, Table};
use crate::listing::{self, Listing, NewListing};
use crate::logistics::{self, LogisticsRecord, LogisticsStatus};
use crate::rating::{self, Rating, Reputation};
use crate::trade::{self, Trade, TradeAction, TradeStatus};
use crate::types::{AssignmentId, ListingId, Role, TradeId, UserId};
use crate::user::{self, Actor, User};
use std::sync::Arc;

const ANY_ROLE: &[Role] = &[Role::Farmer, Role::Buyer, Role::Inspector, Role::Admin];

/// Read-only totals for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminMetrics {
    pub total_users: usize,
    pub total_listings: usize,
    pub total_trades: usize,
    pub trades_by_status: Vec<(TradeStatus, usize)>,
}

/// Completed business of one user: revenue for a farmer, spend for a buyer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TradeSummary {
    pub completed_trades: usize,
    pub total_value: u64,
}

pub struct MarketService {
    ledger: Ledger,
    config: EngineConfig,
    settlement: Arc<dyn SettlementGateway>,
}

fn logged<T>(op: &'static str, result: Result<T, EngineError>) -> Result<T, EngineError> {
    if let Err(err) = &result {
        match err.kind() {
            ErrorKind::StorageUnavailable => tracing::error!(op, error = %err, "request failed"),
            kind => tracing::warn!(op, %kind, error = %err, "request rejected"),
        }
    }
    result
}

impl MarketService {
    pub fn new(instance: Arc<sled::Db>, config: EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            ledger: Ledger::new(instance)?,
            config,
            settlement: Arc::new(LoggingSettlement),
        })
    }

    /// Opens the ledger at the configured `data_dir`.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let Some(dir) = config.data_dir.clone() else {
            return Err(EngineError::InvalidInput("data_dir is not configured".into()));
        };
        let db = sled::open(dir)?;
        Self::new(Arc::new(db), config)
    }

    pub fn with_settlement(mut self, gateway: Arc<dyn SettlementGateway>) -> Self {
        self.settlement = gateway;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Authorizes `actor` for `roles`, then runs `body`; failures are logged.
    fn guarded<T>(
        &self,
        op: &'static str,
        actor: &Actor,
        roles: &[Role],
        body: impl FnOnce(User) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        logged(
            op,
            user::authorize(&self.ledger, actor, roles).and_then(body),
        )
    }

    fn hand_off(&self, notice: SettlementNotice) {
        if let Err(err) = self.settlement.settle(&notice) {
            // the trade is closed either way, the missing settlement must be chased
            tracing::error!(
                trade_id = %notice.trade_id,
                outcome = ?notice.outcome,
                amount = notice.amount,
                error = %err,
                "settlement hand-off failed, trade closed without settlement"
            );
        }
    }

    // ---- users ----

    /// Registration is open; the account starts active without KYC.
    pub fn register_user(
        &self,
        name: &str,
        role: Role,
        home_state: &str,
    ) -> Result<User, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidInput("name is empty".into()));
        }
        let user = User::new(UserId::generate()?, name.to_string(), role, home_state.to_string());
        logged(
            "register_user",
            self.ledger.transact(|tx| {
                tx.put_new(
                    Table::Users,
                    user.id.as_bytes(),
                    &user,
                    EngineError::Duplicate,
                )
            }),
        )?;
        tracing::info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    fn update_user(
        &self,
        op: &'static str,
        admin: &Actor,
        user_id: &UserId,
        change: impl Fn(&mut User),
    ) -> Result<User, EngineError> {
        self.guarded(op, admin, &[Role::Admin], |_| {
            self.ledger.transact(|tx| {
                let mut user: User = tx.load(Table::Users, user_id.as_bytes(), "user")?;
                change(&mut user);
                tx.put(Table::Users, user_id.as_bytes(), &user)?;
                Ok(user)
            })
        })
    }

    pub fn set_kyc_verified(
        &self,
        admin: &Actor,
        user_id: &UserId,
        verified: bool,
    ) -> Result<User, EngineError> {
        let user = self.update_user("set_kyc_verified", admin, user_id, |u| {
            u.kyc_verified = verified
        })?;
        tracing::info!(user_id = %user.id, verified, "kyc flag updated");
        Ok(user)
    }

    pub fn set_user_active(
        &self,
        admin: &Actor,
        user_id: &UserId,
        active: bool,
    ) -> Result<User, EngineError> {
        let user = self.update_user("set_user_active", admin, user_id, |u| u.active = active)?;
        tracing::info!(user_id = %user.id, active, "account status updated");
        Ok(user)
    }

    pub fn users(&self, admin: &Actor) -> Result<Vec<User>, EngineError> {
        self.guarded("users", admin, &[Role::Admin], |_| {
            self.ledger.values(Table::Users)
        })
    }

    /// Candidate inspectors for `region`, falling back to the whole pool.
    pub fn inspectors(&self, admin: &Actor, region: Option<&str>) -> Result<Vec<User>, EngineError> {
        self.guarded("inspectors", admin, &[Role::Admin], |_| {
            let users: Vec<User> = self.ledger.values(Table::Users)?;
            Ok(user::match_inspectors(users, region))
        })
    }

    // ---- listings ----

    pub fn create_listing(&self, farmer: &Actor, draft: NewListing) -> Result<Listing, EngineError> {
        self.guarded("create_listing", farmer, &[Role::Farmer], |farmer| {
            draft.validate()?;
            let listing = Listing::new(ListingId::generate()?, farmer.id, draft);
            self.ledger.transact(|tx| listing::store(tx, &listing))?;
            tracing::info!(listing_id = %listing.id, farmer_id = %listing.farmer_id, "listing created");
            Ok(listing)
        })
    }

    pub fn listing(&self, listing_id: &ListingId) -> Result<Listing, EngineError> {
        self.ledger
            .get(Table::Listings, listing_id.as_bytes())?
            .ok_or(EngineError::NotFound("listing"))
    }

    /// AVAILABLE listings, optionally only those in `state`.
    pub fn available_listings(&self, state: Option<&str>) -> Result<Vec<Listing>, EngineError> {
        let listings: Vec<Listing> = self.ledger.values(Table::Listings)?;
        Ok(listings
            .into_iter()
            .filter(|l| l.is_available())
            .filter(|l| state.is_none_or(|s| l.location_state.eq_ignore_ascii_case(s)))
            .collect())
    }

    pub fn my_listings(&self, farmer: &Actor) -> Result<Vec<Listing>, EngineError> {
        self.guarded("my_listings", farmer, &[Role::Farmer], |farmer| {
            let listings: Vec<Listing> = self.ledger.values(Table::Listings)?;
            Ok(listings
                .into_iter()
                .filter(|l| l.farmer_id == farmer.id)
                .collect())
        })
    }

    // ---- trades ----

    /// A buyer's offer on an AVAILABLE listing. Reserving the listing and
    /// creating the trade commit together or not at all. The offer defaults
    /// to the listing's asking price.
    pub fn create_trade(
        &self,
        buyer: &Actor,
        listing_id: &ListingId,
        offer_price: Option<u64>,
    ) -> Result<Trade, EngineError> {
        self.guarded("create_trade", buyer, &[Role::Buyer], |buyer| {
            if !buyer.kyc_verified {
                return Err(EngineError::forbidden("KYC verification required to trade"));
            }
            if offer_price == Some(0) {
                return Err(EngineError::InvalidInput("offer price is set to zero".into()));
            }
            let trade_id = TradeId::generate()?;

            let trade = self.ledger.transact(|tx| {
                let current = listing::load(tx, listing_id)?;
                if current.farmer_id == buyer.id {
                    return Err(EngineError::forbidden("cannot buy your own listing").into());
                }
                let listing = listing::reserve(tx, listing_id, &trade_id)?;

                let price = offer_price.unwrap_or(listing.price_per_unit);
                let mut trade = Trade::new(
                    trade_id.clone(),
                    listing.id.clone(),
                    listing.farmer_id.clone(),
                    buyer.id.clone(),
                    price,
                    listing.location_state.clone(),
                );
                event::append(
                    tx,
                    &mut trade,
                    EventType::TradeInitiated,
                    format!(
                        "Trade request created by {} offering {} for {}",
                        buyer.name, price, listing.crop_name
                    ),
                    &buyer.id,
                )?;
                trade::store(tx, &trade)?;
                Ok(trade)
            })?;

            tracing::info!(
                trade_id = %trade.id,
                listing_id = %trade.listing_id,
                buyer_id = %trade.buyer_id,
                offer_price = trade.offer_price,
                "trade requested"
            );
            Ok(trade)
        })
    }

    /// The status endpoint only moves a trade to AGREED or CANCELLED.
    pub fn update_trade_status(
        &self,
        actor: &Actor,
        trade_id: &TradeId,
        status: TradeStatus,
    ) -> Result<Trade, EngineError> {
        match status {
            TradeStatus::Agreed => self.accept_offer(actor, trade_id),
            TradeStatus::Cancelled => self.cancel_trade(actor, trade_id),
            other => logged(
                "update_trade_status",
                Err(EngineError::forbidden(format!(
                    "status {other} cannot be set directly"
                ))),
            ),
        }
    }

    pub fn accept_offer(&self, farmer: &Actor, trade_id: &TradeId) -> Result<Trade, EngineError> {
        self.guarded("accept_offer", farmer, &[Role::Farmer], |farmer| {
            let trade = self.ledger.transact(|tx| {
                let mut trade = trade::load(tx, trade_id)?;
                if trade.farmer_id != farmer.id {
                    return Err(EngineError::forbidden("only the listing's farmer may accept").into());
                }
                let description = format!("Offer of {} accepted by {}", trade.offer_price, farmer.name);
                trade::advance(tx, &mut trade, TradeAction::Accept, description, &farmer.id)?;
                Ok(trade)
            })?;
            tracing::info!(trade_id = %trade.id, final_price = ?trade.final_price(), "offer accepted");
            Ok(trade)
        })
    }

    pub fn cancel_trade(&self, actor: &Actor, trade_id: &TradeId) -> Result<Trade, EngineError> {
        self.guarded("cancel_trade", actor, &[Role::Farmer, Role::Buyer], |party| {
            let trade = self.ledger.transact(|tx| {
                let mut trade = trade::load(tx, trade_id)?;
                if !trade.is_party(&party.id) {
                    return Err(EngineError::forbidden("only the farmer or buyer may cancel").into());
                }
                let description = format!("Trade cancelled by {}", party.name);
                trade::advance(tx, &mut trade, TradeAction::Cancel, description, &party.id)?;
                listing::release(tx, &trade.listing_id, &trade.id)?;
                Ok(trade)
            })?;
            tracing::info!(trade_id = %trade.id, actor = %party.id, "trade cancelled");
            Ok(trade)
        })
    }

    /// Confirms a delivered trade: COMPLETED, listing SOLD, payment released.
    pub fn settle(&self, actor: &Actor, trade_id: &TradeId) -> Result<Trade, EngineError> {
        self.guarded("settle", actor, &[Role::Buyer, Role::Admin], |settler| {
            let trade = self.ledger.transact(|tx| {
                let mut trade = trade::load(tx, trade_id)?;
                if settler.role == Role::Buyer && trade.buyer_id != settler.id {
                    return Err(EngineError::forbidden("only the trade's buyer may confirm receipt").into());
                }
                let description = format!("Delivery confirmed by {}, trade settled", settler.name);
                trade::advance(tx, &mut trade, TradeAction::Settle, description, &settler.id)?;
                listing::mark_sold(tx, &trade.listing_id, &trade.id)?;
                Ok(trade)
            })?;
            tracing::info!(trade_id = %trade.id, "trade completed");
            self.hand_off(SettlementNotice::for_trade(
                &trade,
                SettlementOutcome::Release,
                &settler.id,
            ));
            Ok(trade)
        })
    }

    pub fn trade(&self, actor: &Actor, trade_id: &TradeId) -> Result<Trade, EngineError> {
        self.guarded("trade", actor, ANY_ROLE, |_| {
            self.ledger
                .get(Table::Trades, trade_id.as_bytes())?
                .ok_or(EngineError::NotFound("trade"))
        })
    }

    /// Trades the actor is a party to.
    pub fn my_trades(&self, actor: &Actor) -> Result<Vec<Trade>, EngineError> {
        self.guarded("my_trades", actor, &[Role::Farmer, Role::Buyer], |party| {
            let trades: Vec<Trade> = self.ledger.values(Table::Trades)?;
            Ok(trades.into_iter().filter(|t| t.is_party(&party.id)).collect())
        })
    }

    /// AGREED trades waiting for an inspector, including declined ones.
    pub fn pending_assignment(&self, admin: &Actor) -> Result<Vec<Trade>, EngineError> {
        self.guarded("pending_assignment", admin, &[Role::Admin], |_| {
            let trades: Vec<Trade> = self.ledger.values(Table::Trades)?;
            Ok(trades
                .into_iter()
                .filter(|t| t.status() == TradeStatus::Agreed)
                .collect())
        })
    }

    pub fn trade_summary(&self, actor: &Actor) -> Result<TradeSummary, EngineError> {
        self.guarded("trade_summary", actor, &[Role::Farmer, Role::Buyer], |party| {
            let trades: Vec<Trade> = self.ledger.values(Table::Trades)?;
            let summary = trades
                .iter()
                .filter(|t| t.status() == TradeStatus::Completed && t.is_party(&party.id))
                .fold(TradeSummary::default(), |mut acc, t| {
                    acc.completed_trades += 1;
                    acc.total_value += t.final_price().unwrap_or(t.offer_price);
                    acc
                });
            Ok(summary)
        })
    }

    // ---- inspection ----

    pub fn assign_inspector(
        &self,
        admin: &Actor,
        trade_id: &TradeId,
        inspector_id: &UserId,
    ) -> Result<InspectionAssignment, EngineError> {
        self.guarded("assign_inspector", admin, &[Role::Admin], |admin| {
            let inspector: User = self
                .ledger
                .get(Table::Users, inspector_id.as_bytes())?
                .ok_or(EngineError::NotFound("inspector"))?;
            if inspector.role != Role::Inspector || !inspector.active {
                return Err(EngineError::InvalidInput(format!(
                    "user {inspector_id} is not an active inspector"
                )));
            }
            let assignment_id = AssignmentId::generate()?;

            let (assignment, _) = self.ledger.transact(|tx| {
                inspection::request(tx, &assignment_id, trade_id, inspector_id, &admin.id)
            })?;
            tracing::info!(
                trade_id = %trade_id,
                assignment_id = %assignment.id,
                inspector_id = %inspector_id,
                "inspector assigned"
            );
            Ok(assignment)
        })
    }

    pub fn respond_to_assignment(
        &self,
        inspector: &Actor,
        assignment_id: &AssignmentId,
        accept: bool,
    ) -> Result<InspectionAssignment, EngineError> {
        self.guarded("respond_to_assignment", inspector, &[Role::Inspector], |inspector| {
            let (assignment, trade) = self
                .ledger
                .transact(|tx| inspection::respond(tx, assignment_id, &inspector.id, accept))?;
            tracing::info!(
                assignment_id = %assignment.id,
                trade_id = %trade.id,
                accept,
                trade_status = %trade.status(),
                "inspection assignment answered"
            );
            Ok(assignment)
        })
    }

    pub fn submit_inspection_result(
        &self,
        inspector: &Actor,
        assignment_id: &AssignmentId,
        report: &InspectionReport,
    ) -> Result<InspectionOutcome, EngineError> {
        self.guarded("submit_inspection_result", inspector, &[Role::Inspector], |inspector| {
            let policy = self.config.on_inspection_fail;
            let outcome = self.ledger.transact(|tx| {
                inspection::submit_result(tx, assignment_id, &inspector.id, report, policy)
            })?;
            tracing::info!(
                assignment_id = %assignment_id,
                trade_id = %outcome.trade.id,
                verdict = ?report.verdict,
                trade_status = %outcome.trade.status(),
                "inspection result recorded"
            );
            Ok(outcome)
        })
    }

    /// Submits the result for the trade's current assignment.
    pub fn complete_inspection(
        &self,
        inspector: &Actor,
        trade_id: &TradeId,
        report: &InspectionReport,
    ) -> Result<InspectionOutcome, EngineError> {
        self.guarded("complete_inspection", inspector, &[Role::Inspector], |inspector| {
            let policy = self.config.on_inspection_fail;
            let outcome = self.ledger.transact(|tx| {
                let Some(assignment_id) = inspection::active_for(tx, trade_id)? else {
                    return Err(EngineError::NotFound("inspection assignment").into());
                };
                inspection::submit_result(tx, &assignment_id, &inspector.id, report, policy)
            })?;
            tracing::info!(
                assignment_id = %outcome.assignment.id,
                trade_id = %trade_id,
                verdict = ?report.verdict,
                trade_status = %outcome.trade.status(),
                "inspection result recorded"
            );
            Ok(outcome)
        })
    }

    pub fn my_inspections(&self, inspector: &Actor) -> Result<Vec<InspectionAssignment>, EngineError> {
        self.guarded("my_inspections", inspector, &[Role::Inspector], |inspector| {
            let assignments: Vec<InspectionAssignment> = self.ledger.values(Table::Assignments)?;
            Ok(assignments
                .into_iter()
                .filter(|a| a.inspector_id == inspector.id)
                .collect())
        })
    }

    /// The most recent assignment made for a trade, if any.
    pub fn assignment_for_trade(
        &self,
        actor: &Actor,
        trade_id: &TradeId,
    ) -> Result<Option<InspectionAssignment>, EngineError> {
        self.guarded("assignment_for_trade", actor, ANY_ROLE, |_| {
            let assignments: Vec<InspectionAssignment> = self.ledger.values(Table::Assignments)?;
            Ok(assignments
                .into_iter()
                .filter(|a| &a.trade_id == trade_id)
                .max_by_key(|a| a.created_at))
        })
    }

    // ---- logistics ----

    /// Ships an AGREED trade directly when inspections are not required.
    pub fn start_logistics(
        &self,
        actor: &Actor,
        trade_id: &TradeId,
    ) -> Result<LogisticsRecord, EngineError> {
        self.guarded("start_logistics", actor, &[Role::Inspector, Role::Admin], |operator| {
            let require_inspection = self.config.require_inspection;
            let record = self.ledger.transact(|tx| {
                let mut trade = trade::load(tx, trade_id)?;
                if require_inspection {
                    return Err(EngineError::invalid_transition(
                        "trade",
                        trade.status(),
                        "SHIPPED without inspection",
                    )
                    .into());
                }
                let origin = listing::load(tx, &trade.listing_id)?.location_state;
                logistics::open(
                    tx,
                    &mut trade,
                    TradeAction::Dispatch,
                    &origin,
                    format!("Shipment picked up by {}", operator.name),
                    &operator.id,
                )
            })?;
            tracing::info!(trade_id = %trade_id, tracking_id = %record.tracking_id, "shipment dispatched");
            Ok(record)
        })
    }

    pub fn logistics(&self, actor: &Actor, trade_id: &TradeId) -> Result<LogisticsRecord, EngineError> {
        self.guarded("logistics", actor, ANY_ROLE, |_| {
            self.ledger
                .get(Table::Logistics, trade_id.as_bytes())?
                .ok_or(EngineError::NotFound("logistics record"))
        })
    }

    pub fn advance_logistics(
        &self,
        actor: &Actor,
        trade_id: &TradeId,
        next: LogisticsStatus,
        location: &str,
    ) -> Result<LogisticsRecord, EngineError> {
        self.guarded("advance_logistics", actor, &[Role::Inspector, Role::Admin], |operator| {
            let (record, trade) = self
                .ledger
                .transact(|tx| logistics::advance(tx, trade_id, next, location, &operator.id))?;
            tracing::info!(
                trade_id = %trade_id,
                shipment = %record.status(),
                trade_status = %trade.status(),
                location,
                "shipment advanced"
            );
            Ok(record)
        })
    }

    // ---- disputes ----

    /// Either party disputes a post-agreement trade; repeating it is a no-op.
    pub fn raise_dispute(
        &self,
        actor: &Actor,
        trade_id: &TradeId,
        reason: &str,
    ) -> Result<Trade, EngineError> {
        self.guarded("raise_dispute", actor, &[Role::Farmer, Role::Buyer], |party| {
            let (trade, changed) = self
                .ledger
                .transact(|tx| dispute::raise(tx, trade_id, &party.id, reason))?;
            if changed {
                tracing::info!(trade_id = %trade.id, actor = %party.id, "dispute raised");
            } else {
                tracing::debug!(trade_id = %trade.id, "trade already disputed");
            }
            Ok(trade)
        })
    }

    pub fn force_close(
        &self,
        admin: &Actor,
        trade_id: &TradeId,
        resolve_to_buyer: bool,
    ) -> Result<Trade, EngineError> {
        self.guarded("force_close", admin, &[Role::Admin], |admin| {
            let trade = self
                .ledger
                .transact(|tx| dispute::force_close(tx, trade_id, resolve_to_buyer, &admin.id))?;
            tracing::info!(
                trade_id = %trade.id,
                admin_id = %admin.id,
                status = %trade.status(),
                "dispute force closed"
            );
            let outcome = if resolve_to_buyer {
                SettlementOutcome::Release
            } else {
                SettlementOutcome::Refund
            };
            self.hand_off(SettlementNotice::for_trade(&trade, outcome, &admin.id));
            Ok(trade)
        })
    }

    // ---- ratings ----

    pub fn submit_rating(
        &self,
        actor: &Actor,
        trade_id: &TradeId,
        score: u8,
        comment: &str,
    ) -> Result<Rating, EngineError> {
        self.guarded("submit_rating", actor, &[Role::Farmer, Role::Buyer], |rater| {
            let rating = self
                .ledger
                .transact(|tx| rating::submit(tx, trade_id, &rater.id, score, comment))?;
            tracing::info!(
                trade_id = %trade_id,
                rater_id = %rating.rater_id,
                target_id = %rating.target_id,
                score,
                "rating submitted"
            );
            Ok(rating)
        })
    }

    /// Mean score received by `user_id`; 0 when nobody rated them yet.
    pub fn average_for(&self, actor: &Actor, user_id: &UserId) -> Result<f64, EngineError> {
        self.guarded("average_for", actor, ANY_ROLE, |_| {
            let reputation: Reputation = self
                .ledger
                .get(Table::Reputation, user_id.as_bytes())?
                .unwrap_or_default();
            Ok(reputation.average())
        })
    }

    pub fn ratings_for(&self, actor: &Actor, user_id: &UserId) -> Result<Vec<Rating>, EngineError> {
        self.guarded("ratings_for", actor, ANY_ROLE, |_| {
            let ratings: Vec<Rating> = self.ledger.values(Table::Ratings)?;
            Ok(ratings
                .into_iter()
                .filter(|r| &r.target_id == user_id)
                .collect())
        })
    }

    // ---- timeline ----

    /// The trade's timeline, oldest first.
    pub fn events(&self, actor: &Actor, trade_id: &TradeId) -> Result<Vec<TradeEvent>, EngineError> {
        self.guarded("events", actor, ANY_ROLE, |_| {
            self.ledger
                .values_with_prefix(Table::Events, &event::timeline_prefix(trade_id))
        })
    }

    /// Recomputes the timeline's hash chain and checks it against the trade.
    ///
    /// The trade is read first and the timeline only up to the trade's event
    /// count, so an append committing in between is not mistaken for damage.
    pub fn verify_timeline(&self, actor: &Actor, trade_id: &TradeId) -> Result<bool, EngineError> {
        let trade = self.trade(actor, trade_id)?;
        let mut events = self.events(actor, trade_id)?;
        let recorded = usize::try_from(trade.event_count())
            .map_err(|_| EngineError::Codec("event count overflows usize".into()))?;
        if events.len() < recorded {
            return Ok(false);
        }
        events.truncate(recorded);
        let head_matches =
            events.last().map(|e| e.hash.as_str()) == trade.last_event_hash.as_deref();
        Ok(head_matches && event::verify_chain(&events)?)
    }

    // ---- admin ----

    pub fn metrics(&self, admin: &Actor) -> Result<AdminMetrics, EngineError> {
        self.guarded("metrics", admin, &[Role::Admin], |_| {
            let trades: Vec<Trade> = self.ledger.values(Table::Trades)?;
            let trades_by_status = TradeStatus::ALL
                .iter()
                .map(|status| {
                    let n = trades.iter().filter(|t| t.status() == *status).count();
                    (*status, n)
                })
                .collect();
            Ok(AdminMetrics {
                total_users: self.ledger.count(Table::Users),
                total_listings: self.ledger.count(Table::Listings),
                total_trades: trades.len(),
                trades_by_status,
            })
        })
    }
}
