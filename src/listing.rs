//! Listing manager: availability of crop listings and their exclusive
//! reservation by a single trade.
use crate::error::EngineError;
use crate::ledger::{LedgerTx, Table, TxResult};
use crate::types::{ListingId, TimeStamp, TradeId, UserId};
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum ListingStatus {
    #[n(0)]
    Available,
    #[n(1)]
    Reserved {
        #[n(0)]
        trade_id: TradeId,
    },
    #[n(2)]
    Sold {
        #[n(0)]
        trade_id: TradeId,
    },
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingStatus::Available => f.write_str("AVAILABLE"),
            ListingStatus::Reserved { .. } => f.write_str("RESERVED"),
            ListingStatus::Sold { .. } => f.write_str("SOLD"),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    #[n(0)]
    pub id: ListingId,
    #[n(1)]
    pub farmer_id: UserId,
    #[n(2)]
    pub crop_name: String,
    #[n(3)]
    pub category: String,
    #[n(4)]
    pub quantity: u64, // kg
    #[n(5)]
    pub price_per_unit: u64,
    #[n(6)]
    pub location_state: String,
    #[n(7)]
    status: ListingStatus,
    #[n(8)]
    pub created_at: TimeStamp,
}

/// What a farmer submits to put a crop batch on the market.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub crop_name: String,
    pub category: String,
    pub quantity: u64,
    pub price_per_unit: u64,
    pub location_state: String,
}

impl NewListing {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.crop_name.trim().is_empty() {
            return Err(EngineError::InvalidInput("crop name is empty".into()));
        }
        if self.quantity == 0 {
            return Err(EngineError::InvalidInput("quantity is set to zero".into()));
        }
        if self.price_per_unit == 0 {
            return Err(EngineError::InvalidInput("price per unit is set to zero".into()));
        }
        Ok(())
    }
}

impl Listing {
    pub fn new(id: ListingId, farmer_id: UserId, draft: NewListing) -> Self {
        Self {
            id,
            farmer_id,
            crop_name: draft.crop_name,
            category: draft.category,
            quantity: draft.quantity,
            price_per_unit: draft.price_per_unit,
            location_state: draft.location_state,
            status: ListingStatus::Available,
            created_at: TimeStamp::now(),
        }
    }

    pub fn status(&self) -> &ListingStatus {
        &self.status
    }

    pub fn is_available(&self) -> bool {
        self.status == ListingStatus::Available
    }

    pub fn reserve(&mut self, trade_id: &TradeId) -> Result<(), EngineError> {
        match &self.status {
            ListingStatus::Available => {
                self.status = ListingStatus::Reserved {
                    trade_id: trade_id.clone(),
                };
                Ok(())
            }
            ListingStatus::Reserved { .. } => Err(EngineError::AlreadyReserved),
            ListingStatus::Sold { .. } => Err(EngineError::NotAvailable),
        }
    }

    /// Returns the listing to the market. Releasing an available listing is
    /// a no-op; a listing held by another trade or already sold is refused.
    pub fn release(&mut self, trade_id: &TradeId) -> Result<(), EngineError> {
        match &self.status {
            ListingStatus::Available => Ok(()),
            ListingStatus::Reserved { trade_id: holder } if holder == trade_id => {
                self.status = ListingStatus::Available;
                Ok(())
            }
            other => Err(EngineError::invalid_transition("listing", other, "AVAILABLE")),
        }
    }

    pub fn mark_sold(&mut self, trade_id: &TradeId) -> Result<(), EngineError> {
        match &self.status {
            ListingStatus::Reserved { trade_id: holder } if holder == trade_id => {
                self.status = ListingStatus::Sold {
                    trade_id: trade_id.clone(),
                };
                Ok(())
            }
            ListingStatus::Sold { trade_id: holder } if holder == trade_id => Ok(()),
            other => Err(EngineError::invalid_transition("listing", other, "SOLD")),
        }
    }
}

pub(crate) fn load(tx: &LedgerTx<'_>, listing_id: &ListingId) -> TxResult<Listing> {
    tx.load(Table::Listings, listing_id.as_bytes(), "listing")
}

pub(crate) fn store(tx: &LedgerTx<'_>, listing: &Listing) -> TxResult<()> {
    tx.put(Table::Listings, listing.id.as_bytes(), listing)
}

pub(crate) fn reserve(
    tx: &LedgerTx<'_>,
    listing_id: &ListingId,
    trade_id: &TradeId,
) -> TxResult<Listing> {
    let mut listing = load(tx, listing_id)?;
    listing.reserve(trade_id)?;
    store(tx, &listing)?;
    Ok(listing)
}

pub(crate) fn release(tx: &LedgerTx<'_>, listing_id: &ListingId, trade_id: &TradeId) -> TxResult<()> {
    let mut listing = load(tx, listing_id)?;
    listing.release(trade_id)?;
    store(tx, &listing)
}

pub(crate) fn mark_sold(
    tx: &LedgerTx<'_>,
    listing_id: &ListingId,
    trade_id: &TradeId,
) -> TxResult<()> {
    let mut listing = load(tx, listing_id)?;
    listing.mark_sold(trade_id)?;
    store(tx, &listing)
}
