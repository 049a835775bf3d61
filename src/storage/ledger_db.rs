// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! Record tables hold JSON-encoded records keyed by their id:
//!
//! - `accounts`, `transactions`, `topups`, `orders`, `payins`
//! - `balance_entries`, `discrepancies`, `audit_events`
//!
//! Index tables map a lookup key to a record id:
//!
//! - `account_by_provider_ref`: partner account id → account id
//! - `active_account`: `user|currency|provider` → the single ACTIVE account
//! - `transaction_by_external_id`: partner transaction id → transaction id
//! - `topup_by_reference`, `order_by_reference`: normalized reference → id
//! - `pending_topup_by_account`: `account|request` → id, PENDING requests only
//! - `awaiting_order_by_owner`: `owner|order` → id, AWAITING_PAYMENT orders only
//!
//! The last two are open sets: a record is linked while it can still be
//! paid and unlinked in the same write that moves it out of that status, so
//! candidate searches never scan settled history.
//!
//! ## Write Semantics
//!
//! redb admits one write transaction at a time. Every state transition reads
//! the current record and writes the new one inside the same
//! [`LedgerDb::write`] call, which makes the status check a compare-and-swap:
//! a competing writer either commits before us (and we observe its result) or
//! waits until we commit.

use std::path::Path;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, TableHandle,
    WriteTransaction,
};
use serde::{de::DeserializeOwned, Serialize};

// =============================================================================
// Table Definitions
// =============================================================================

/// Record table: id → JSON bytes.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Index table: lookup key → record id.
pub type IndexTable = TableDefinition<'static, &'static str, &'static str>;

pub const ACCOUNTS: RecordTable = TableDefinition::new("accounts");
pub const TRANSACTIONS: RecordTable = TableDefinition::new("transactions");
pub const TOPUPS: RecordTable = TableDefinition::new("topups");
pub const ORDERS: RecordTable = TableDefinition::new("orders");
pub const PAYINS: RecordTable = TableDefinition::new("payins");
pub const BALANCE_ENTRIES: RecordTable = TableDefinition::new("balance_entries");
pub const DISCREPANCIES: RecordTable = TableDefinition::new("discrepancies");
pub const AUDIT_EVENTS: RecordTable = TableDefinition::new("audit_events");

pub const ACCOUNT_BY_PROVIDER_REF: IndexTable = TableDefinition::new("account_by_provider_ref");
pub const ACTIVE_ACCOUNT: IndexTable = TableDefinition::new("active_account");
pub const TRANSACTION_BY_EXTERNAL_ID: IndexTable =
    TableDefinition::new("transaction_by_external_id");
pub const TOPUP_BY_REFERENCE: IndexTable = TableDefinition::new("topup_by_reference");
pub const ORDER_BY_REFERENCE: IndexTable = TableDefinition::new("order_by_reference");
pub const PENDING_TOPUP_BY_ACCOUNT: IndexTable = TableDefinition::new("pending_topup_by_account");
pub const AWAITING_ORDER_BY_OWNER: IndexTable = TableDefinition::new("awaiting_order_by_owner");

const RECORD_TABLES: [RecordTable; 8] = [
    ACCOUNTS,
    TRANSACTIONS,
    TOPUPS,
    ORDERS,
    PAYINS,
    BALANCE_ENTRIES,
    DISCREPANCIES,
    AUDIT_EVENTS,
];

const INDEX_TABLES: [IndexTable; 7] = [
    ACCOUNT_BY_PROVIDER_REF,
    ACTIVE_ACCOUNT,
    TRANSACTION_BY_EXTERNAL_ID,
    TOPUP_BY_REFERENCE,
    ORDER_BY_REFERENCE,
    PENDING_TOPUP_BY_ACCOUNT,
    AWAITING_ORDER_BY_OWNER,
];

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("index {index} points at missing record {id}")]
    DanglingIndex { index: String, id: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// =============================================================================
// Records
// =============================================================================

/// A JSON-encoded entity stored in its own record table.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: RecordTable;

    /// Primary key of this record.
    fn key(&self) -> &str;
}

/// Read access shared by read and write transactions.
pub trait LedgerRead {
    /// Load a single record by primary key.
    fn load<R: Record>(&self, key: &str) -> LedgerResult<Option<R>>;

    /// Load every record of a table.
    fn load_all<R: Record>(&self) -> LedgerResult<Vec<R>>;

    /// Resolve an index key to a record id.
    fn lookup(&self, index: IndexTable, key: &str) -> LedgerResult<Option<String>>;

    /// Record ids of every index key starting with `prefix`, in key order.
    fn scan_index(&self, index: IndexTable, prefix: &str) -> LedgerResult<Vec<String>>;

    /// Load the records behind every index key starting with `prefix`.
    fn load_by_prefix<R: Record>(&self, index: IndexTable, prefix: &str) -> LedgerResult<Vec<R>> {
        let mut records = Vec::new();
        for id in self.scan_index(index, prefix)? {
            match self.load::<R>(&id)? {
                Some(record) => records.push(record),
                None => {
                    return Err(LedgerError::DanglingIndex {
                        index: index.name().to_string(),
                        id,
                    })
                }
            }
        }
        Ok(records)
    }

    /// Resolve an index key straight to the record it points at.
    fn load_by_index<R: Record>(&self, index: IndexTable, key: &str) -> LedgerResult<Option<R>> {
        let Some(id) = self.lookup(index, key)? else {
            return Ok(None);
        };
        match self.load::<R>(&id)? {
            Some(record) => Ok(Some(record)),
            None => Err(LedgerError::DanglingIndex {
                index: index.name().to_string(),
                id,
            }),
        }
    }
}

/// Mutations, only available inside a write transaction.
pub trait LedgerWrite: LedgerRead {
    /// Insert or replace a record under its primary key.
    fn store<R: Record>(&self, record: &R) -> LedgerResult<()>;

    /// Point an index key at a record id.
    fn link(&self, index: IndexTable, key: &str, id: &str) -> LedgerResult<()>;

    /// Remove an index key.
    fn unlink(&self, index: IndexTable, key: &str) -> LedgerResult<()>;
}

fn decode_one<R: Record>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> LedgerResult<Option<R>> {
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

fn decode_all<R: Record>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> LedgerResult<Vec<R>> {
    let mut records = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        records.push(serde_json::from_slice(value.value())?);
    }
    Ok(records)
}

fn index_value(
    table: &impl ReadableTable<&'static str, &'static str>,
    key: &str,
) -> LedgerResult<Option<String>> {
    Ok(table.get(key)?.map(|value| value.value().to_string()))
}

fn index_scan(
    table: &impl ReadableTable<&'static str, &'static str>,
    prefix: &str,
) -> LedgerResult<Vec<String>> {
    let mut ids = Vec::new();
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        if !key.value().starts_with(prefix) {
            break;
        }
        ids.push(value.value().to_string());
    }
    Ok(ids)
}

impl LedgerRead for ReadTransaction {
    fn load<R: Record>(&self, key: &str) -> LedgerResult<Option<R>> {
        decode_one(&self.open_table(R::TABLE)?, key)
    }

    fn load_all<R: Record>(&self) -> LedgerResult<Vec<R>> {
        decode_all(&self.open_table(R::TABLE)?)
    }

    fn lookup(&self, index: IndexTable, key: &str) -> LedgerResult<Option<String>> {
        index_value(&self.open_table(index)?, key)
    }

    fn scan_index(&self, index: IndexTable, prefix: &str) -> LedgerResult<Vec<String>> {
        index_scan(&self.open_table(index)?, prefix)
    }
}

impl LedgerRead for WriteTransaction {
    fn load<R: Record>(&self, key: &str) -> LedgerResult<Option<R>> {
        decode_one(&self.open_table(R::TABLE)?, key)
    }

    fn load_all<R: Record>(&self) -> LedgerResult<Vec<R>> {
        decode_all(&self.open_table(R::TABLE)?)
    }

    fn lookup(&self, index: IndexTable, key: &str) -> LedgerResult<Option<String>> {
        index_value(&self.open_table(index)?, key)
    }

    fn scan_index(&self, index: IndexTable, prefix: &str) -> LedgerResult<Vec<String>> {
        index_scan(&self.open_table(index)?, prefix)
    }
}

impl LedgerWrite for WriteTransaction {
    fn store<R: Record>(&self, record: &R) -> LedgerResult<()> {
        let json = serde_json::to_vec(record)?;
        let mut table = self.open_table(R::TABLE)?;
        table.insert(record.key(), json.as_slice())?;
        Ok(())
    }

    fn link(&self, index: IndexTable, key: &str, id: &str) -> LedgerResult<()> {
        let mut table = self.open_table(index)?;
        table.insert(key, id)?;
        Ok(())
    }

    fn unlink(&self, index: IndexTable, key: &str) -> LedgerResult<()> {
        let mut table = self.open_table(index)?;
        table.remove(key)?;
        Ok(())
    }
}

// =============================================================================
// LedgerDb
// =============================================================================

/// Embedded ACID ledger database.
pub struct LedgerDb {
    db: Database,
}

impl LedgerDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            for table in RECORD_TABLES {
                let _ = write_txn.open_table(table)?;
            }
            for index in INDEX_TABLES {
                let _ = write_txn.open_table(index)?;
            }
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Run `f` against a consistent read snapshot.
    pub fn read<T, E>(&self, f: impl FnOnce(&ReadTransaction) -> Result<T, E>) -> Result<T, E>
    where
        E: From<LedgerError>,
    {
        let read_txn = self.db.begin_read().map_err(LedgerError::from)?;
        f(&read_txn)
    }

    /// Run `f` inside a write transaction.
    ///
    /// Commits when `f` returns `Ok`, aborts (discarding every write made by
    /// `f`) when it returns `Err`.
    pub fn write<T, E>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T, E>) -> Result<T, E>
    where
        E: From<LedgerError>,
    {
        let write_txn = self.db.begin_write().map_err(LedgerError::from)?;
        match f(&write_txn) {
            Ok(value) => {
                write_txn.commit().map_err(LedgerError::from)?;
                Ok(value)
            }
            Err(error) => {
                if let Err(abort_error) = write_txn.abort() {
                    tracing::warn!(error = %abort_error, "Failed to abort ledger write transaction");
                }
                Err(error)
            }
        }
    }

    /// Verify the database answers a read transaction.
    pub fn health_check(&self) -> LedgerResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(ACCOUNTS)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
