//! Durable attestation store.
//!
//! One SQLite database holds four tables, one per (direction, kind):
//! claim attestations and create-account attestations for each corridor.
//! Rows are keyed by the corridor's semantic sequence number (claim ID or
//! create count) and inserts are first-writer-wins, so replays of the same
//! source transaction cannot produce duplicates. Amounts, bridges and
//! accounts are stored as canonical serialized blobs so the store survives
//! field-definition upgrades of the chain.

use std::{
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Result};
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::events::Direction;

pub const DB_NAME: &str = "xchain_txns.db";

const DB_PRAGMA: &str = "PRAGMA journal_size_limit=1582080;";

fn claim_table(direction: Direction) -> &'static str {
    match direction {
        Direction::LockingToIssuing => "XChainTxnLockingToIssuing",
        Direction::IssuingToLocking => "XChainTxnIssuingToLocking",
    }
}

fn create_account_table(direction: Direction) -> &'static str {
    match direction {
        Direction::LockingToIssuing => "XChainCreateAccountLockingToIssuing",
        Direction::IssuingToLocking => "XChainCreateAccountIssuingToLocking",
    }
}

/// One stored claim attestation. Blob fields hold canonical serializations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimRow {
    pub claim_id: u64,
    pub txn_id: String,
    pub ledger_seq: u32,
    pub success: bool,
    pub delivered_amount: Option<Vec<u8>>,
    pub bridge: Vec<u8>,
    pub sending_account: Vec<u8>,
    pub reward_account: Vec<u8>,
    pub other_chain_account: Option<Vec<u8>>,
    pub public_key: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

/// One stored create-account attestation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateAccountRow {
    pub create_count: u64,
    pub txn_id: String,
    pub ledger_seq: u32,
    pub success: bool,
    pub delivered_amount: Option<Vec<u8>>,
    pub reward_amount: Vec<u8>,
    pub bridge: Vec<u8>,
    pub sending_account: Vec<u8>,
    pub reward_account: Vec<u8>,
    pub other_chain_account: Vec<u8>,
    pub public_key: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

/// The tuple a counterparty quotes back when asking for a stored signature.
#[derive(Clone, Debug)]
pub struct ClaimLookup {
    pub claim_id: u64,
    pub delivered_amount: Vec<u8>,
    pub bridge: Vec<u8>,
    pub sending_account: Vec<u8>,
    pub other_chain_account: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct CreateAccountLookup {
    pub create_count: u64,
    pub delivered_amount: Vec<u8>,
    pub reward_amount: Vec<u8>,
    pub bridge: Vec<u8>,
    pub sending_account: Vec<u8>,
    pub other_chain_account: Vec<u8>,
}

#[derive(Debug)]
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the store under `data_dir`; `None` opens an
    /// in-memory database.
    pub fn new(data_dir: Option<&Path>) -> Result<Db> {
        let conn = match data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating data dir {}", dir.display()))?;
                Connection::open(dir.join(DB_NAME))?
            }
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(DB_PRAGMA)?;
        Self::ensure_schema(&conn)?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        for direction in [Direction::LockingToIssuing, Direction::IssuingToLocking] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    ClaimID           INTEGER PRIMARY KEY,
                    TransID           CHARACTER(64) NOT NULL,
                    LedgerSeq         INTEGER NOT NULL,
                    Success           INTEGER NOT NULL,
                    DeliveredAmt      BLOB,
                    Bridge            BLOB NOT NULL,
                    SendingAccount    BLOB NOT NULL,
                    RewardAccount     BLOB NOT NULL,
                    OtherChainAccount BLOB,
                    PublicKey         BLOB NOT NULL,
                    Signature         BLOB);
                CREATE INDEX IF NOT EXISTS {table}TransIdx ON {table}(TransID);",
                table = claim_table(direction),
            ))?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    CreateCount       INTEGER PRIMARY KEY,
                    TransID           CHARACTER(64) NOT NULL,
                    LedgerSeq         INTEGER NOT NULL,
                    Success           INTEGER NOT NULL,
                    DeliveredAmt      BLOB,
                    RewardAmt         BLOB NOT NULL,
                    Bridge            BLOB NOT NULL,
                    SendingAccount    BLOB NOT NULL,
                    RewardAccount     BLOB NOT NULL,
                    OtherChainAccount BLOB NOT NULL,
                    PublicKey         BLOB NOT NULL,
                    Signature         BLOB);
                CREATE INDEX IF NOT EXISTS {table}TransIdx ON {table}(TransID);",
                table = create_account_table(direction),
            ))?;
        }
        Ok(())
    }

    /// Insert a claim attestation. Returns false when a row with this claim
    /// ID already exists (the original row wins).
    pub fn insert_claim(&self, direction: Direction, row: &ClaimRow) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {table}
                 (ClaimID, TransID, LedgerSeq, Success, DeliveredAmt, Bridge,
                  SendingAccount, RewardAccount, OtherChainAccount, PublicKey, Signature)
                 VALUES
                 (:claim_id, :txn_id, :ledger_seq, :success, :amt, :bridge,
                  :sending_account, :reward_account, :other_chain_account, :pk, :sig)",
                table = claim_table(direction),
            ),
            named_params! {
                ":claim_id": row.claim_id as i64,
                ":txn_id": row.txn_id,
                ":ledger_seq": row.ledger_seq,
                ":success": row.success,
                ":amt": row.delivered_amount,
                ":bridge": row.bridge,
                ":sending_account": row.sending_account,
                ":reward_account": row.reward_account,
                ":other_chain_account": row.other_chain_account,
                ":pk": row.public_key,
                ":sig": row.signature,
            },
        )?;
        Ok(inserted > 0)
    }

    pub fn claim_exists(&self, direction: Direction, claim_id: u64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT count(*) FROM {table} WHERE ClaimID = :claim_id",
                table = claim_table(direction),
            ),
            named_params! { ":claim_id": claim_id as i64 },
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_claim(&self, direction: Direction, claim_id: u64) -> Result<Option<ClaimRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!(
                    "SELECT ClaimID, TransID, LedgerSeq, Success, DeliveredAmt, Bridge,
                            SendingAccount, RewardAccount, OtherChainAccount, PublicKey, Signature
                     FROM {table} WHERE ClaimID = :claim_id",
                    table = claim_table(direction),
                ),
                named_params! { ":claim_id": claim_id as i64 },
                claim_row_from_sql,
            )
            .optional()?;
        Ok(row)
    }

    /// Look up the stored signature for the exact transfer a counterparty
    /// quotes back. Only successful rows match.
    pub fn find_claim(&self, direction: Direction, q: &ClaimLookup) -> Result<Option<ClaimRow>> {
        let conn = self.conn.lock().unwrap();
        let dst_clause = if q.other_chain_account.is_some() {
            "OtherChainAccount = :other_chain_account"
        } else {
            "OtherChainAccount IS NULL"
        };
        let sql = format!(
            "SELECT ClaimID, TransID, LedgerSeq, Success, DeliveredAmt, Bridge,
                    SendingAccount, RewardAccount, OtherChainAccount, PublicKey, Signature
             FROM {table}
             WHERE ClaimID = :claim_id AND
                   Success = 1 AND
                   DeliveredAmt = :amt AND
                   Bridge = :bridge AND
                   SendingAccount = :sending_account AND
                   {dst_clause}",
            table = claim_table(direction),
        );
        let mut stmt = conn.prepare(&sql)?;
        let row = if let Some(dst) = &q.other_chain_account {
            stmt.query_row(
                named_params! {
                    ":claim_id": q.claim_id as i64,
                    ":amt": q.delivered_amount,
                    ":bridge": q.bridge,
                    ":sending_account": q.sending_account,
                    ":other_chain_account": dst,
                },
                claim_row_from_sql,
            )
            .optional()?
        } else {
            stmt.query_row(
                named_params! {
                    ":claim_id": q.claim_id as i64,
                    ":amt": q.delivered_amount,
                    ":bridge": q.bridge,
                    ":sending_account": q.sending_account,
                },
                claim_row_from_sql,
            )
            .optional()?
        };
        Ok(row)
    }

    /// Drop a claim row once the destination side reports the transfer
    /// complete. Returns false when there was nothing to delete.
    pub fn delete_claim(&self, direction: Direction, claim_id: u64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            &format!(
                "DELETE FROM {table} WHERE ClaimID = :claim_id",
                table = claim_table(direction),
            ),
            named_params! { ":claim_id": claim_id as i64 },
        )?;
        Ok(deleted > 0)
    }

    pub fn insert_create_account(
        &self,
        direction: Direction,
        row: &CreateAccountRow,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {table}
                 (CreateCount, TransID, LedgerSeq, Success, DeliveredAmt, RewardAmt, Bridge,
                  SendingAccount, RewardAccount, OtherChainAccount, PublicKey, Signature)
                 VALUES
                 (:create_count, :txn_id, :ledger_seq, :success, :amt, :reward_amt, :bridge,
                  :sending_account, :reward_account, :other_chain_account, :pk, :sig)",
                table = create_account_table(direction),
            ),
            named_params! {
                ":create_count": row.create_count as i64,
                ":txn_id": row.txn_id,
                ":ledger_seq": row.ledger_seq,
                ":success": row.success,
                ":amt": row.delivered_amount,
                ":reward_amt": row.reward_amount,
                ":bridge": row.bridge,
                ":sending_account": row.sending_account,
                ":reward_account": row.reward_account,
                ":other_chain_account": row.other_chain_account,
                ":pk": row.public_key,
                ":sig": row.signature,
            },
        )?;
        Ok(inserted > 0)
    }

    pub fn create_account_exists(&self, direction: Direction, create_count: u64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT count(*) FROM {table} WHERE CreateCount = :create_count",
                table = create_account_table(direction),
            ),
            named_params! { ":create_count": create_count as i64 },
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_create_account(
        &self,
        direction: Direction,
        create_count: u64,
    ) -> Result<Option<CreateAccountRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!(
                    "SELECT CreateCount, TransID, LedgerSeq, Success, DeliveredAmt, RewardAmt,
                            Bridge, SendingAccount, RewardAccount, OtherChainAccount, PublicKey,
                            Signature
                     FROM {table} WHERE CreateCount = :create_count",
                    table = create_account_table(direction),
                ),
                named_params! { ":create_count": create_count as i64 },
                create_account_row_from_sql,
            )
            .optional()?;
        Ok(row)
    }

    pub fn find_create_account(
        &self,
        direction: Direction,
        q: &CreateAccountLookup,
    ) -> Result<Option<CreateAccountRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!(
                    "SELECT CreateCount, TransID, LedgerSeq, Success, DeliveredAmt, RewardAmt,
                            Bridge, SendingAccount, RewardAccount, OtherChainAccount, PublicKey,
                            Signature
                     FROM {table}
                     WHERE CreateCount = :create_count AND
                           Success = 1 AND
                           DeliveredAmt = :amt AND
                           RewardAmt = :reward_amt AND
                           Bridge = :bridge AND
                           SendingAccount = :sending_account AND
                           OtherChainAccount = :other_chain_account",
                    table = create_account_table(direction),
                ),
                named_params! {
                    ":create_count": q.create_count as i64,
                    ":amt": q.delivered_amount,
                    ":reward_amt": q.reward_amount,
                    ":bridge": q.bridge,
                    ":sending_account": q.sending_account,
                    ":other_chain_account": q.other_chain_account,
                },
                create_account_row_from_sql,
            )
            .optional()?;
        Ok(row)
    }
}

fn claim_row_from_sql(row: &Row<'_>) -> rusqlite::Result<ClaimRow> {
    Ok(ClaimRow {
        claim_id: row.get::<_, i64>(0)? as u64,
        txn_id: row.get(1)?,
        ledger_seq: row.get(2)?,
        success: row.get(3)?,
        delivered_amount: row.get(4)?,
        bridge: row.get(5)?,
        sending_account: row.get(6)?,
        reward_account: row.get(7)?,
        other_chain_account: row.get(8)?,
        public_key: row.get(9)?,
        signature: row.get(10)?,
    })
}

fn create_account_row_from_sql(row: &Row<'_>) -> rusqlite::Result<CreateAccountRow> {
    Ok(CreateAccountRow {
        create_count: row.get::<_, i64>(0)? as u64,
        txn_id: row.get(1)?,
        ledger_seq: row.get(2)?,
        success: row.get(3)?,
        delivered_amount: row.get(4)?,
        reward_amount: row.get(5)?,
        bridge: row.get(6)?,
        sending_account: row.get(7)?,
        reward_account: row.get(8)?,
        other_chain_account: row.get(9)?,
        public_key: row.get(10)?,
        signature: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn claim_row(claim_id: u64) -> ClaimRow {
        ClaimRow {
            claim_id,
            txn_id: "AB".repeat(32),
            ledger_seq: 1000,
            success: true,
            delivered_amount: Some(vec![1, 2, 3]),
            bridge: vec![4, 5, 6],
            sending_account: vec![7; 20],
            reward_account: vec![8; 20],
            other_chain_account: Some(vec![9; 20]),
            public_key: vec![10; 33],
            signature: Some(vec![11; 64]),
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let db = Db::new(None).unwrap();
        let row = claim_row(7);
        assert!(db.insert_claim(Direction::LockingToIssuing, &row).unwrap());
        assert!(!db.insert_claim(Direction::LockingToIssuing, &row).unwrap());

        // First writer wins: a conflicting later row does not replace it.
        let mut other = claim_row(7);
        other.ledger_seq = 2000;
        assert!(!db.insert_claim(Direction::LockingToIssuing, &other).unwrap());
        let stored = db.get_claim(Direction::LockingToIssuing, 7).unwrap().unwrap();
        assert_eq!(stored.ledger_seq, 1000);
    }

    #[test]
    fn directions_are_independent() {
        let db = Db::new(None).unwrap();
        let row = claim_row(7);
        db.insert_claim(Direction::LockingToIssuing, &row).unwrap();
        assert!(db.claim_exists(Direction::LockingToIssuing, 7).unwrap());
        assert!(!db.claim_exists(Direction::IssuingToLocking, 7).unwrap());
    }

    #[test]
    fn find_claim_matches_full_tuple() {
        let db = Db::new(None).unwrap();
        let row = claim_row(7);
        db.insert_claim(Direction::LockingToIssuing, &row).unwrap();

        let mut lookup = ClaimLookup {
            claim_id: 7,
            delivered_amount: vec![1, 2, 3],
            bridge: vec![4, 5, 6],
            sending_account: vec![7; 20],
            other_chain_account: Some(vec![9; 20]),
        };
        let found = db.find_claim(Direction::LockingToIssuing, &lookup).unwrap();
        assert_eq!(found, Some(row));

        lookup.delivered_amount = vec![9, 9, 9];
        assert!(db.find_claim(Direction::LockingToIssuing, &lookup).unwrap().is_none());
    }

    #[test]
    fn find_claim_failed_rows_invisible() {
        let db = Db::new(None).unwrap();
        let mut row = claim_row(7);
        row.success = false;
        row.signature = None;
        db.insert_claim(Direction::LockingToIssuing, &row).unwrap();

        let lookup = ClaimLookup {
            claim_id: 7,
            delivered_amount: vec![1, 2, 3],
            bridge: vec![4, 5, 6],
            sending_account: vec![7; 20],
            other_chain_account: Some(vec![9; 20]),
        };
        assert!(db.find_claim(Direction::LockingToIssuing, &lookup).unwrap().is_none());
    }

    #[test]
    fn delete_claim_removes_row() {
        let db = Db::new(None).unwrap();
        db.insert_claim(Direction::IssuingToLocking, &claim_row(3)).unwrap();
        assert!(db.delete_claim(Direction::IssuingToLocking, 3).unwrap());
        assert!(!db.delete_claim(Direction::IssuingToLocking, 3).unwrap());
        assert!(!db.claim_exists(Direction::IssuingToLocking, 3).unwrap());
    }

    #[test]
    fn create_account_round_trip() {
        let db = Db::new(None).unwrap();
        let row = CreateAccountRow {
            create_count: 3,
            txn_id: "CD".repeat(32),
            ledger_seq: 500,
            success: true,
            delivered_amount: Some(vec![1]),
            reward_amount: vec![2],
            bridge: vec![3],
            sending_account: vec![4; 20],
            reward_account: vec![5; 20],
            other_chain_account: vec![6; 20],
            public_key: vec![7; 33],
            signature: Some(vec![8; 70]),
        };
        assert!(db.insert_create_account(Direction::LockingToIssuing, &row).unwrap());
        assert!(!db.insert_create_account(Direction::LockingToIssuing, &row).unwrap());
        assert!(db.create_account_exists(Direction::LockingToIssuing, 3).unwrap());

        let lookup = CreateAccountLookup {
            create_count: 3,
            delivered_amount: vec![1],
            reward_amount: vec![2],
            bridge: vec![3],
            sending_account: vec![4; 20],
            other_chain_account: vec![6; 20],
        };
        let found = db.find_create_account(Direction::LockingToIssuing, &lookup).unwrap();
        assert_eq!(found, Some(row));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let db = Db::new(Some(dir.path())).unwrap();
            db.insert_claim(Direction::LockingToIssuing, &claim_row(1)).unwrap();
        }
        let db = Db::new(Some(dir.path())).unwrap();
        assert!(db.claim_exists(Direction::LockingToIssuing, 1).unwrap());
    }
}
