#![allow(dead_code)]

use agri_trade::listing::{Listing, NewListing};
use agri_trade::types::Role;
use agri_trade::{Actor, EngineConfig, MarketService};
use std::sync::Arc;
use tempfile::TempDir;

/// A fresh marketplace on its own temp database with one of each role
/// registered, the buyer KYC verified, and one AVAILABLE listing.
pub struct Market {
    // keeps the database directory alive for the duration of the test
    _dir: TempDir,
    pub service: Arc<MarketService>,
    pub admin: Actor,
    pub farmer: Actor,
    pub buyer: Actor,
    pub inspector: Actor,
    pub listing: Listing,
}

pub fn market() -> anyhow::Result<Market> {
    market_with(EngineConfig::default())
}

pub fn market_with(config: EngineConfig) -> anyhow::Result<Market> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("market.db"))?);
    let service = MarketService::new(db, config)?;

    let admin = Actor::from(&service.register_user("Asha", Role::Admin, "Delhi")?);
    let farmer = Actor::from(&service.register_user("Gurpreet", Role::Farmer, "Punjab")?);
    let buyer = Actor::from(&service.register_user("Meera", Role::Buyer, "Maharashtra")?);
    let inspector = Actor::from(&service.register_user("Ravi", Role::Inspector, "Punjab")?);
    service.set_kyc_verified(&admin, &buyer.user_id, true)?;

    let listing = service.create_listing(&farmer, basmati())?;

    Ok(Market {
        _dir: dir,
        service: Arc::new(service),
        admin,
        farmer,
        buyer,
        inspector,
        listing,
    })
}

pub fn basmati() -> NewListing {
    NewListing {
        crop_name: "Basmati Rice".into(),
        category: "Cereals".into(),
        quantity: 1_000,
        price_per_unit: 450,
        location_state: "Punjab".into(),
    }
}

impl Market {
    /// Registers another verified buyer.
    pub fn another_buyer(&self, name: &str) -> anyhow::Result<Actor> {
        let buyer = Actor::from(&self.service.register_user(name, Role::Buyer, "Karnataka")?);
        self.service
            .set_kyc_verified(&self.admin, &buyer.user_id, true)?;
        Ok(buyer)
    }

    pub fn another_inspector(&self, name: &str, state: &str) -> anyhow::Result<Actor> {
        Ok(Actor::from(
            &self.service.register_user(name, Role::Inspector, state)?,
        ))
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
