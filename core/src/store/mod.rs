//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The session and the runner call store methods, they never execute SQL.
//!
//! Connectivity failures surface as `CalibError::Database` and propagate to
//! the caller; there is no safe default for a save or load against the store.

use crate::error::{CalibError, CalibResult};
use crate::types::Period;
use chrono::NaiveDate;
use rusqlite::Connection;

mod params;
mod series;

pub use params::{NewParams, PersistedParams};

const DATE_FMT: &str = "%Y-%m-%d";

pub struct CalibStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file or URI
}

impl CalibStore {
    pub fn open(path: &str) -> CalibResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> CalibResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> CalibResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Idempotent.
    pub fn migrate(&self) -> CalibResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_monthly_series.sql"))?;
        self.ensure_params_table()?;
        Ok(())
    }

    /// Create the parameter table if it does not exist yet.
    pub fn ensure_params_table(&self) -> CalibResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/002_forecast_params.sql"))?;
        Ok(())
    }
}

fn format_date(date: Period) -> String {
    date.format(DATE_FMT).to_string()
}

fn parse_date(value: &str) -> CalibResult<Period> {
    NaiveDate::parse_from_str(value, DATE_FMT).map_err(|_| CalibError::InvalidDate {
        value: value.to_string(),
    })
}
