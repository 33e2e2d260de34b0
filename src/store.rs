//! SQLite persistence for users, sessions and prediction records
//!
//! A single connection guarded by a mutex; every async entry point hops onto
//! the blocking pool so handlers never block the runtime on disk I/O.

use crate::types::application::LoanApplication;
use crate::types::assessment::RiskAssessment;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Table holding prediction records
pub const PREDICTIONS_TABLE: &str = "loan_applications";

/// Name given to a predictions table left over from the anonymous schema
pub const LEGACY_PREDICTIONS_TABLE: &str = "loan_applications_legacy";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
    CREATE TABLE IF NOT EXISTS loan_applications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        annual_income REAL NOT NULL,
        debt_to_income_ratio REAL NOT NULL,
        credit_score REAL NOT NULL,
        loan_amount REAL NOT NULL,
        interest_rate REAL NOT NULL,
        gender TEXT NOT NULL,
        marital_status TEXT NOT NULL,
        education_level TEXT NOT NULL,
        employment_status TEXT NOT NULL,
        loan_purpose TEXT NOT NULL,
        grade_subgrade TEXT NOT NULL,
        loan_paid_back_probability REAL NOT NULL,
        is_default_predicted INTEGER NOT NULL,
        risk_level TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_loan_applications_user
        ON loan_applications(user_id, created_at);
";

/// Registered user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub username: String,
    /// Argon2 PHC string, never serialized
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Prediction to be stored
#[derive(Debug, Clone)]
pub struct NewPrediction {
    /// Owner, `None` for anonymous requests
    pub user_id: Option<i64>,
    pub application: LoanApplication,
    pub assessment: RiskAssessment,
    pub created_at: DateTime<Utc>,
}

/// Stored prediction as returned by the history endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    #[serde(flatten)]
    pub application: LoanApplication,
    pub loan_paid_back_probability: f64,
    pub is_default_predicted: bool,
    pub risk_level: String,
    pub created_at: DateTime<Utc>,
}

/// Unique column a new user collided with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserConflict {
    Username,
    Email,
}

/// Shared handle to the service database
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and bring the schema up to date.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        if path == ":memory:" {
            return Self::in_memory();
        }

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path).with_context(|| format!("Failed to open database {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to configure database")?;

        info!(path = %path, "Database opened");
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            f(&conn)
        })
        .await
        .context("Database task failed")?
    }

    /// Store a prediction record, returning its id
    pub async fn insert_prediction(&self, prediction: NewPrediction) -> Result<i64> {
        self.with_conn(move |conn| {
            let app = &prediction.application;
            conn.execute(
                "INSERT INTO loan_applications (
                    user_id, annual_income, debt_to_income_ratio, credit_score, loan_amount,
                    interest_rate, gender, marital_status, education_level, employment_status,
                    loan_purpose, grade_subgrade, loan_paid_back_probability,
                    is_default_predicted, risk_level, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    prediction.user_id,
                    app.annual_income,
                    app.debt_to_income_ratio,
                    app.credit_score,
                    app.loan_amount,
                    app.interest_rate,
                    app.gender,
                    app.marital_status,
                    app.education_level,
                    app.employment_status,
                    app.loan_purpose,
                    app.grade_subgrade,
                    prediction.assessment.probability,
                    prediction.assessment.is_default_predicted(),
                    prediction.assessment.risk_level.as_str(),
                    timestamp(&prediction.created_at),
                ],
            )
            .context("Failed to insert prediction")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// A user's most recent predictions, newest first
    pub async fn recent_predictions(&self, user_id: i64, limit: usize) -> Result<Vec<PredictionRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, annual_income, debt_to_income_ratio, credit_score, loan_amount,
                        interest_rate, gender, marital_status, education_level, employment_status,
                        loan_purpose, grade_subgrade, loan_paid_back_probability,
                        is_default_predicted, risk_level, created_at
                 FROM loan_applications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64], prediction_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Create a user. A unique-constraint hit comes back as the conflicting column.
    pub async fn create_user(
        &self,
        email: String,
        username: String,
        password_hash: String,
    ) -> Result<std::result::Result<UserRecord, UserConflict>> {
        self.with_conn(move |conn| {
            let created_at = Utc::now();
            let inserted = conn.execute(
                "INSERT INTO users (email, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![email, username, password_hash, timestamp(&created_at)],
            );
            match inserted {
                Ok(_) => Ok(Ok(UserRecord {
                    id: conn.last_insert_rowid(),
                    email,
                    username,
                    password_hash,
                    created_at: parse_timestamp(&timestamp(&created_at))?,
                })),
                Err(rusqlite::Error::SqliteFailure(e, message)) if e.code == ErrorCode::ConstraintViolation => {
                    // SQLite names the column: "UNIQUE constraint failed: users.email"
                    let conflict = match message.as_deref() {
                        Some(msg) if msg.contains("users.email") => UserConflict::Email,
                        _ => UserConflict::Username,
                    };
                    Ok(Err(conflict))
                }
                Err(e) => Err(e).context("Failed to insert user"),
            }
        })
        .await
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, email, username, password_hash, created_at FROM users WHERE username = ?1",
                params![username],
                user_from_row,
            )
            .optional()
            .context("Failed to look up user")
        })
        .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, email, username, password_hash, created_at FROM users WHERE email = ?1",
                params![email],
                user_from_row,
            )
            .optional()
            .context("Failed to look up user")
        })
        .await
    }

    /// Record an issued access token
    pub async fn create_session(&self, token: &str, user_id: i64, expires_at: DateTime<Utc>) -> Result<()> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![token, user_id, timestamp(&Utc::now()), timestamp(&expires_at)],
            )
            .context("Failed to insert session")?;
            Ok(())
        })
        .await
    }

    /// Resolve a token to its user if it has not expired at `now`
    pub async fn find_session_user(&self, token: &str, now: DateTime<Utc>) -> Result<Option<UserRecord>> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT u.id, u.email, u.username, u.password_hash, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1 AND s.expires_at > ?2",
                params![token, timestamp(&now)],
                user_from_row,
            )
            .optional()
            .context("Failed to look up session")
        })
        .await
    }

    /// Revoke a token. Returns whether it existed.
    pub async fn delete_session(&self, token: &str) -> Result<bool> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM sessions WHERE token = ?1", params![token])
                .context("Failed to delete session")?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Run raw SQL against the database
    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| conn.execute_batch(&sql).context("Failed to run SQL"))
            .await
    }

    /// Drop sessions that expired before `now`
    pub async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![timestamp(&now)])
                .context("Failed to purge sessions")
        })
        .await
    }
}

/// Create the schema, moving an old-style predictions table aside first
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .context("Failed to enable foreign keys")?;

    let columns = table_columns(conn, PREDICTIONS_TABLE)?;
    if columns.iter().any(|c| c == "income") && !columns.iter().any(|c| c == "annual_income") {
        let mut target = LEGACY_PREDICTIONS_TABLE.to_string();
        let mut suffix = 1;
        while !table_columns(conn, &target)?.is_empty() {
            suffix += 1;
            target = format!("{}_{}", LEGACY_PREDICTIONS_TABLE, suffix);
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {} RENAME TO {};",
            PREDICTIONS_TABLE, target
        ))
        .context("Failed to rename legacy predictions table")?;
        // The old index name would collide with the new table's
        conn.execute_batch("DROP INDEX IF EXISTS idx_loan_applications_user;")?;
        warn!(table = %target, "Moved legacy predictions table aside");
    }

    conn.execute_batch(SCHEMA)
        .context("Failed to initialize database schema")?;
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{}'", s))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<PredictionRecord> {
    Ok(PredictionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        application: LoanApplication {
            annual_income: row.get(2)?,
            debt_to_income_ratio: row.get(3)?,
            credit_score: row.get(4)?,
            loan_amount: row.get(5)?,
            interest_rate: row.get(6)?,
            gender: row.get(7)?,
            marital_status: row.get(8)?,
            education_level: row.get(9)?,
            employment_status: row.get(10)?,
            loan_purpose: row.get(11)?,
            grade_subgrade: row.get(12)?,
        },
        loan_paid_back_probability: row.get(13)?,
        is_default_predicted: row.get(14)?,
        risk_level: row.get(15)?,
        created_at: timestamp_column(row, 16)?,
    })
}
