//! Persistent store for accounts, commitments, verifications, and
//! conversation transcripts.

mod schema;

pub use schema::*;

use crate::stage::AccountSnapshot;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("No account for address: {0}")]
    AccountNotFound(String),
    #[error("No commitment found: {0}")]
    CommitmentNotFound(String),
    #[error("Account already has an active commitment: {0}")]
    ActiveCommitmentExists(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Account Operations ====================

    /// Look up the account for an address, creating it if absent.
    /// Returns the account and whether it was just created.
    pub fn get_or_create_account(&self, address: &str) -> DbResult<(Account, bool)> {
        let conn = self.conn.lock().unwrap();

        if let Some(account) = Self::query_account(&conn, address)? {
            return Ok((account, false));
        }

        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO accounts (id, address, name, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?3)",
            params![id, address, now.to_rfc3339()],
        )?;

        Ok((
            Account {
                id,
                address: address.to_string(),
                name: None,
                created_at: now,
                updated_at: now,
            },
            true,
        ))
    }

    /// Get the account for an address
    pub fn get_account(&self, address: &str) -> DbResult<Account> {
        let conn = self.conn.lock().unwrap();
        Self::query_account(&conn, address)?
            .ok_or_else(|| DbError::AccountNotFound(address.to_string()))
    }

    /// Record the account's display name
    pub fn set_account_name(&self, address: &str, name: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE accounts SET name = ?1, updated_at = ?2 WHERE address = ?3",
            params![name, Utc::now().to_rfc3339(), address],
        )?;
        if updated == 0 {
            return Err(DbError::AccountNotFound(address.to_string()));
        }
        Ok(())
    }

    /// Snapshot of the persisted state the stage resolver consumes
    pub fn account_snapshot(&self, address: &str) -> DbResult<AccountSnapshot> {
        let conn = self.conn.lock().unwrap();
        let account = Self::query_account(&conn, address)?
            .ok_or_else(|| DbError::AccountNotFound(address.to_string()))?;

        let has_active: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM commitments WHERE account_id = ?1 AND status = 'active')",
            params![account.id],
            |row| row.get(0),
        )?;

        Ok(AccountSnapshot {
            name: account.name,
            has_active_commitment: has_active,
        })
    }

    fn query_account(conn: &Connection, address: &str) -> rusqlite::Result<Option<Account>> {
        conn.query_row(
            "SELECT id, address, name, created_at, updated_at FROM accounts WHERE address = ?1",
            params![address],
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    address: row.get(1)?,
                    name: row.get(2)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                    updated_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            },
        )
        .optional()
    }

    // ==================== Commitment Operations ====================

    /// Persist a new active commitment for an account.
    ///
    /// The one-active-commitment invariant is enforced by the partial unique
    /// index; a violation surfaces as `ActiveCommitmentExists`, so of two
    /// racing creates exactly one succeeds.
    pub fn create_commitment(
        &self,
        account_id: &str,
        new: &NewCommitment,
    ) -> DbResult<Commitment> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let schedule_json = serde_json::to_string(&new.schedule).unwrap();

        let inserted = conn.execute(
            "INSERT INTO commitments (id, account_id, goal_description, task_description,
                 start_date, end_date, stake_amount, stake_type, schedule,
                 verification_method, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active', ?11)",
            params![
                id,
                account_id,
                new.goal_description,
                new.task_description,
                new.start_date,
                new.end_date,
                new.stake_amount,
                new.stake_type.as_str(),
                schedule_json,
                new.verification_method,
                now.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => Ok(Commitment {
                id,
                account_id: account_id.to_string(),
                goal_description: new.goal_description.clone(),
                task_description: new.task_description.clone(),
                start_date: new.start_date.clone(),
                end_date: new.end_date.clone(),
                stake_amount: new.stake_amount,
                stake_type: new.stake_type,
                schedule: new.schedule.clone(),
                verification_method: new.verification_method.clone(),
                status: CommitmentStatus::Active,
                created_at: now,
            }),
            Err(rusqlite::Error::SqliteFailure(e, msg))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                tracing::debug!(account_id = %account_id, error = ?msg, "Active commitment conflict");
                Err(DbError::ActiveCommitmentExists(account_id.to_string()))
            }
            Err(other) => Err(DbError::Sqlite(other)),
        }
    }

    /// Get the active commitment for an account
    pub fn active_commitment(&self, account_id: &str) -> DbResult<Commitment> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, account_id, goal_description, task_description, start_date, end_date,
                    stake_amount, stake_type, schedule, verification_method, status, created_at
             FROM commitments WHERE account_id = ?1 AND status = 'active'",
            params![account_id],
            parse_commitment_row,
        )
        .optional()?
        .ok_or_else(|| DbError::CommitmentNotFound(account_id.to_string()))
    }

    /// Mark a commitment closed (completion/failure logic lives outside the
    /// conversation core; the store just records the transition)
    #[allow(dead_code)] // Used in tests
    pub fn close_commitment(&self, commitment_id: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE commitments SET status = 'closed' WHERE id = ?1",
            params![commitment_id],
        )?;
        if updated == 0 {
            return Err(DbError::CommitmentNotFound(commitment_id.to_string()));
        }
        Ok(())
    }

    // ==================== Verification Operations ====================

    /// Append a verification record against a commitment
    pub fn create_verification(
        &self,
        commitment_id: &str,
        due_date: &str,
        proof_reference: Option<&str>,
        justification: Option<&str>,
    ) -> DbResult<Verification> {
        let conn = self.conn.lock().unwrap();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM commitments WHERE id = ?1)",
            params![commitment_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DbError::CommitmentNotFound(commitment_id.to_string()));
        }

        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO verifications (id, commitment_id, due_date, proof_reference,
                 justification, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'completed_on_time', ?6)",
            params![
                id,
                commitment_id,
                due_date,
                proof_reference,
                justification,
                now.to_rfc3339(),
            ],
        )?;

        Ok(Verification {
            id,
            commitment_id: commitment_id.to_string(),
            due_date: due_date.to_string(),
            proof_reference: proof_reference.map(String::from),
            justification: justification.map(String::from),
            status: "completed_on_time".to_string(),
            created_at: now,
        })
    }

    // ==================== Transcript Operations ====================

    /// Append a turn to a thread, allocating the next sequence id
    pub fn append_turn(&self, thread_id: &str, content: &TurnContent) -> DbResult<Turn> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM turns WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;

        let id = uuid::Uuid::new_v4().to_string();
        let role = content.role();
        let content_json = serde_json::to_string(&content.to_json()).unwrap();

        conn.execute(
            "INSERT INTO turns (id, thread_id, sequence_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                thread_id,
                sequence_id,
                role.to_string(),
                content_json,
                now.to_rfc3339(),
            ],
        )?;

        Ok(Turn {
            id,
            thread_id: thread_id.to_string(),
            sequence_id,
            role,
            content: content.clone(),
            created_at: now,
        })
    }

    /// Load a thread's turns in insertion order
    pub fn get_turns(&self, thread_id: &str) -> DbResult<Vec<Turn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, thread_id, sequence_id, role, content, created_at
             FROM turns WHERE thread_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![thread_id], parse_turn_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn parse_commitment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Commitment> {
    let stake_type_str: String = row.get(7)?;
    let schedule_str: String = row.get(8)?;
    let status_str: String = row.get(10)?;

    Ok(Commitment {
        id: row.get(0)?,
        account_id: row.get(1)?,
        goal_description: row.get(2)?,
        task_description: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        stake_amount: row.get(6)?,
        stake_type: StakeType::parse(&stake_type_str).unwrap_or(StakeType::OneTimeOnFailure),
        schedule: serde_json::from_str(&schedule_str).unwrap_or_default(),
        verification_method: row.get(9)?,
        status: if status_str == "active" {
            CommitmentStatus::Active
        } else {
            CommitmentStatus::Closed
        },
        created_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

fn parse_turn_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Turn> {
    let role = schema::parse_role_or_user(&row.get::<_, String>(3)?);
    let content_str: String = row.get(4)?;
    let content_value: serde_json::Value = serde_json::from_str(&content_str).unwrap_or_default();
    let content = TurnContent::from_json(role, &content_value)
        .unwrap_or_else(|| TurnContent::user("[unreadable turn]"));

    Ok(Turn {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        sequence_id: row.get(2)?,
        role,
        content,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_commitment() -> NewCommitment {
        NewCommitment {
            goal_description: "Run a marathon".to_string(),
            task_description: Some("Run 5km every morning".to_string()),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-02-01".to_string(),
            stake_amount: 50.0,
            stake_type: StakeType::OneTimeOnFailure,
            schedule: Schedule::Daily,
            verification_method: Some("daily photo".to_string()),
        }
    }

    #[test]
    fn test_get_or_create_account_is_idempotent() {
        let db = Database::open_in_memory().unwrap();

        let (first, created) = db.get_or_create_account("whatsapp:+15550001111").unwrap();
        assert!(created);
        assert!(first.name.is_none());

        let (second, created) = db.get_or_create_account("whatsapp:+15550001111").unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn test_set_name_requires_account() {
        let db = Database::open_in_memory().unwrap();

        let err = db.set_account_name("whatsapp:+15550009999", "Alex");
        assert!(matches!(err, Err(DbError::AccountNotFound(_))));

        db.get_or_create_account("whatsapp:+15550009999").unwrap();
        db.set_account_name("whatsapp:+15550009999", "Alex").unwrap();

        let account = db.get_account("whatsapp:+15550009999").unwrap();
        assert_eq!(account.name.as_deref(), Some("Alex"));
    }

    #[test]
    fn test_snapshot_tracks_name_and_active_goal() {
        let db = Database::open_in_memory().unwrap();
        let (account, _) = db.get_or_create_account("whatsapp:+15550002222").unwrap();

        let snap = db.account_snapshot("whatsapp:+15550002222").unwrap();
        assert!(snap.name.is_none());
        assert!(!snap.has_active_commitment);

        db.set_account_name("whatsapp:+15550002222", "Sam").unwrap();
        db.create_commitment(&account.id, &new_commitment()).unwrap();

        let snap = db.account_snapshot("whatsapp:+15550002222").unwrap();
        assert_eq!(snap.name.as_deref(), Some("Sam"));
        assert!(snap.has_active_commitment);
    }

    #[test]
    fn test_second_active_commitment_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let (account, _) = db.get_or_create_account("whatsapp:+15550003333").unwrap();

        db.create_commitment(&account.id, &new_commitment()).unwrap();
        let err = db.create_commitment(&account.id, &new_commitment());
        assert!(matches!(err, Err(DbError::ActiveCommitmentExists(_))));
    }

    #[test]
    fn test_closed_commitment_frees_the_slot() {
        let db = Database::open_in_memory().unwrap();
        let (account, _) = db.get_or_create_account("whatsapp:+15550004444").unwrap();

        let first = db.create_commitment(&account.id, &new_commitment()).unwrap();
        db.close_commitment(&first.id).unwrap();

        let second = db.create_commitment(&account.id, &new_commitment()).unwrap();
        assert_ne!(second.id, first.id);

        let active = db.active_commitment(&account.id).unwrap();
        assert_eq!(active.id, second.id);
    }

    #[test]
    fn test_concurrent_creates_have_one_winner() {
        let db = Database::open_in_memory().unwrap();
        let (account, _) = db.get_or_create_account("whatsapp:+15550005555").unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let db = db.clone();
                let account_id = account.id.clone();
                std::thread::spawn(move || db.create_commitment(&account_id, &new_commitment()))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(DbError::ActiveCommitmentExists(_))))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(conflicts, 1);
    }

    #[test]
    fn test_verification_requires_commitment() {
        let db = Database::open_in_memory().unwrap();

        let err = db.create_verification("missing", "2024-01-05", None, None);
        assert!(matches!(err, Err(DbError::CommitmentNotFound(_))));

        let (account, _) = db.get_or_create_account("whatsapp:+15550006666").unwrap();
        let commitment = db.create_commitment(&account.id, &new_commitment()).unwrap();

        let verification = db
            .create_verification(
                &commitment.id,
                "2024-01-05",
                Some("https://proofs.example/1.jpg"),
                Some("Morning run done"),
            )
            .unwrap();
        assert_eq!(verification.status, "completed_on_time");
    }

    #[test]
    fn test_turns_replay_in_insertion_order() {
        use crate::llm::ContentBlock;

        let db = Database::open_in_memory().unwrap();
        let thread = derive_thread_id("whatsapp:+15550007777");

        db.append_turn(&thread, &TurnContent::user("Hi")).unwrap();
        db.append_turn(
            &thread,
            &TurnContent::assistant(vec![ContentBlock::tool_use(
                "call-1",
                "get_account_status",
                serde_json::json!({}),
            )]),
        )
        .unwrap();
        db.append_turn(&thread, &TurnContent::tool("call-1", "new_user", false))
            .unwrap();

        let turns = db.get_turns(&thread).unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(
            turns.iter().map(|t| t.sequence_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[2].content, TurnContent::tool("call-1", "new_user", false));
    }

    #[test]
    fn test_open_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("momentum.db");

        {
            let db = Database::open(&path).unwrap();
            db.get_or_create_account("whatsapp:+15550009998").unwrap();
            db.set_account_name("whatsapp:+15550009998", "Pat").unwrap();
        }

        let db = Database::open(&path).unwrap();
        let account = db.get_account("whatsapp:+15550009998").unwrap();
        assert_eq!(account.name.as_deref(), Some("Pat"));
    }

    #[test]
    fn test_threads_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        let a = derive_thread_id("whatsapp:+15550008881");
        let b = derive_thread_id("whatsapp:+15550008882");

        db.append_turn(&a, &TurnContent::user("from a")).unwrap();
        db.append_turn(&b, &TurnContent::user("from b")).unwrap();

        let turns_a = db.get_turns(&a).unwrap();
        assert_eq!(turns_a.len(), 1);
        assert_eq!(turns_a[0].content, TurnContent::user("from a"));
    }
}
