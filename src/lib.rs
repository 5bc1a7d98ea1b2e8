//! Trade lifecycle engine for an agricultural marketplace.
//!
//! Farmers list crop batches, KYC-verified buyers open trades against them,
//! inspectors grade the goods and the shipment is tracked to delivery. Every
//! state change is persisted to a sled ledger together with a hash-chained
//! timeline entry in the same transaction.

pub mod config;
pub mod dispute;
pub mod error;
pub mod event;
pub mod inspection;
pub mod ledger;
pub mod listing;
pub mod logistics;
pub mod rating;
pub mod service;
pub mod trade;
pub mod types;
pub mod user;
pub mod utils;

pub use config::{EngineConfig, InspectionFailPolicy};
pub use error::{EngineError, ErrorKind};
pub use service::MarketService;
pub use user::Actor;
