//! Durable keyed storage for every entity of the engine.
//!
//! Each entity kind lives in its own sled tree and records are stored as
//! CBOR. Every mutating operation runs inside [`Ledger::transact`], a single
//! transaction spanning all trees: guards read the committed record, and an
//! aborted guard leaves every tree untouched.
//!
//! sled holds its process-wide transaction write lock while the closure runs,
//! so all writes through the ledger are serialized, including writes to
//! unrelated trades and listings. The loser of a race therefore always runs
//! after the winner has committed and fails its guard.
use crate::error::EngineError;
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::path::Path;
use std::sync::Arc;

pub type TxResult<T> = ConflictableTransactionResult<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Users,
    Listings,
    Trades,
    Assignments,
    // trade id -> assignment id of the assignment currently REQUESTED or ACCEPTED
    ActiveAssignments,
    Logistics,
    Ratings,
    Reputation,
    Events,
}

impl Table {
    const ALL: [Table; 9] = [
        Table::Users,
        Table::Listings,
        Table::Trades,
        Table::Assignments,
        Table::ActiveAssignments,
        Table::Logistics,
        Table::Ratings,
        Table::Reputation,
        Table::Events,
    ];

    fn tree_name(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Listings => "listings",
            Table::Trades => "trades",
            Table::Assignments => "assignments",
            Table::ActiveAssignments => "active_assignments",
            Table::Logistics => "logistics",
            Table::Ratings => "ratings",
            Table::Reputation => "reputation",
            Table::Events => "events",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl From<EngineError> for ConflictableTransactionError<EngineError> {
    fn from(err: EngineError) -> Self {
        ConflictableTransactionError::Abort(err)
    }
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, EngineError> {
    Ok(minicbor::to_vec(value)?)
}

fn decode<T>(bytes: &[u8]) -> Result<T, EngineError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

pub struct Ledger {
    db: Arc<sled::Db>,
    trees: Vec<sled::Tree>,
}

impl Ledger {
    pub fn new(db: Arc<sled::Db>) -> Result<Self, EngineError> {
        let trees = Table::ALL
            .iter()
            .map(|table| db.open_tree(table.tree_name()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { db, trees })
    }

    pub fn open(path: &Path) -> Result<Self, EngineError> {
        Self::new(Arc::new(sled::open(path)?))
    }

    pub fn db(&self) -> &Arc<sled::Db> {
        &self.db
    }

    fn tree(&self, table: Table) -> &sled::Tree {
        &self.trees[table.index()]
    }

    /// Runs `op` as one all-or-nothing transaction over every table.
    ///
    /// Transactions run one at a time. `op` must still be free of side
    /// effects outside the transaction since sled may re-run it.
    pub fn transact<T, F>(&self, op: F) -> Result<T, EngineError>
    where
        F: Fn(&LedgerTx<'_>) -> TxResult<T>,
    {
        self.trees
            .as_slice()
            .transaction(|trees| op(&LedgerTx { trees: &trees[..] }))
            .map_err(|err| match err {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => EngineError::from(err),
            })
    }

    pub fn get<T>(&self, table: Table, key: &[u8]) -> Result<Option<T>, EngineError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.tree(table).get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All records of a table in key order.
    pub fn values<T>(&self, table: Table) -> Result<Vec<T>, EngineError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        self.tree(table)
            .iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    /// Records whose key starts with `prefix`, in key order.
    pub fn values_with_prefix<T>(&self, table: Table, prefix: &[u8]) -> Result<Vec<T>, EngineError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        self.tree(table)
            .scan_prefix(prefix)
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    pub fn count(&self, table: Table) -> usize {
        self.tree(table).len()
    }
}

/// The view of every table inside one [`Ledger::transact`] call.
pub struct LedgerTx<'a> {
    trees: &'a [TransactionalTree],
}

impl LedgerTx<'_> {
    fn tree(&self, table: Table) -> &TransactionalTree {
        &self.trees[table.index()]
    }

    pub fn get<T>(&self, table: Table, key: &[u8]) -> TxResult<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.tree(table).get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`LedgerTx::get`] but a missing record is `NotFound(entity)`.
    pub fn load<T>(&self, table: Table, key: &[u8], entity: &'static str) -> TxResult<T>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.get(table, key)? {
            Some(value) => Ok(value),
            None => Err(EngineError::NotFound(entity).into()),
        }
    }

    pub fn contains(&self, table: Table, key: &[u8]) -> TxResult<bool> {
        Ok(self.tree(table).get(key)?.is_some())
    }

    pub fn put<T: minicbor::Encode<()>>(&self, table: Table, key: &[u8], value: &T) -> TxResult<()> {
        let bytes = encode(value)?;
        self.tree(table).insert(key, bytes)?;
        Ok(())
    }

    /// Inserts only when `key` is vacant; an occupied key aborts with `occupied`.
    pub fn put_new<T: minicbor::Encode<()>>(
        &self,
        table: Table,
        key: &[u8],
        value: &T,
        occupied: EngineError,
    ) -> TxResult<()> {
        if self.contains(table, key)? {
            return Err(occupied.into());
        }
        self.put(table, key, value)
    }

    pub fn remove(&self, table: Table, key: &[u8]) -> TxResult<()> {
        self.tree(table).remove(key)?;
        Ok(())
    }
}
