use crate::crypto::{self, CryptoError, SealingKey};
use chrono::{NaiveDate, NaiveDateTime};
use presenz_core::resolver::SessionRecord;
use presenz_core::types::{Encoding, EnrolledIdentity};
use rusqlite::params;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identity (
    id            TEXT PRIMARY KEY,
    employee_code TEXT NOT NULL UNIQUE,
    display_name  TEXT NOT NULL,
    org_unit      TEXT,
    active        INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS face_encoding (
    id            TEXT PRIMARY KEY,
    identity_id   TEXT NOT NULL REFERENCES identity(id),
    vector        BLOB NOT NULL,
    model_version TEXT,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance_session (
    id                   TEXT PRIMARY KEY,
    identity_id          TEXT NOT NULL REFERENCES identity(id),
    session_date         TEXT NOT NULL,
    check_in             TEXT NOT NULL,
    check_out            TEXT,
    location             TEXT NOT NULL,
    check_in_confidence  REAL NOT NULL,
    check_out_confidence REAL,
    total_hours          REAL
);
CREATE INDEX IF NOT EXISTS idx_session_identity_date
    ON attendance_session (identity_id, session_date);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("employee code {0} is already enrolled")]
    DuplicateEmployeeCode(String),
    #[error("session {0} is already closed")]
    SessionAlreadyClosed(String),
    #[error("invalid timestamp in session {0}")]
    BadTimestamp(String),
}

/// Enrollment attributes for a new identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub employee_code: String,
    pub display_name: String,
    pub org_unit: Option<String>,
}

/// One row of the identity listing.
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub id: String,
    pub employee_code: String,
    pub display_name: String,
    pub org_unit: Option<String>,
    pub active: bool,
    pub encodings: i64,
}

/// Headline counts for the daemon status reply.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
    pub active_identities: i64,
    pub sessions_today: i64,
}

/// Async handle to the attendance database.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
    key: SealingKey,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn open(path: &Path, key: SealingKey) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path.to_path_buf()).await?;
        let store = Self { conn, key };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database for tests and dry runs.
    pub async fn open_in_memory(key: SealingKey) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn, key };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .call(|c| {
                c.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert an identity with its encoding samples in one transaction.
    pub async fn insert_identity(
        &self,
        new: NewIdentity,
        encodings: Vec<Encoding>,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = now_text();

        let mut sealed = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            sealed.push((
                Uuid::new_v4().to_string(),
                self.key.seal(&crypto::vector_to_bytes(&encoding.values))?,
                encoding.model_version.clone(),
            ));
        }

        let row_id = id.clone();
        let code = new.employee_code.clone();
        let inserted = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let duplicates: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM identity WHERE employee_code = ?1",
                    params![new.employee_code],
                    |row| row.get(0),
                )?;
                if duplicates > 0 {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO identity (id, employee_code, display_name, org_unit, active, created_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                    params![row_id, new.employee_code, new.display_name, new.org_unit, now],
                )?;
                for (encoding_id, blob, model_version) in &sealed {
                    tx.execute(
                        "INSERT INTO face_encoding (id, identity_id, vector, model_version, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![encoding_id, row_id, blob, model_version, now],
                    )?;
                }
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::DuplicateEmployeeCode(code));
        }
        tracing::info!(identity = %id, encodings = encodings.len(), "identity enrolled");
        Ok(id)
    }

    /// Load every active identity with its unsealed encodings.
    ///
    /// Encodings that fail to unseal are skipped with a warning rather
    /// than poisoning the whole gallery.
    pub async fn list_active(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let rows = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(
                    "SELECT i.id, i.employee_code, i.display_name, i.org_unit,
                            e.id, e.vector, e.model_version
                     FROM identity i
                     JOIN face_encoding e ON e.identity_id = i.id
                     WHERE i.active = 1
                     ORDER BY i.id, e.created_at",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Vec<u8>>(5)?,
                            row.get::<_, Option<String>>(6)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut gallery: Vec<EnrolledIdentity> = Vec::new();
        for (id, code, name, unit, encoding_id, blob, model_version) in rows {
            let values = self
                .key
                .unseal(&blob)
                .ok()
                .and_then(|bytes| crypto::vector_from_bytes(&bytes));
            let Some(values) = values else {
                tracing::warn!(encoding = %encoding_id, identity = %id, "skipping unreadable stored encoding");
                continue;
            };
            let encoding = Encoding {
                values,
                model_version,
            };
            match gallery.last_mut() {
                Some(last) if last.id == id => last.encodings.push(encoding),
                _ => gallery.push(EnrolledIdentity {
                    id,
                    employee_code: code,
                    display_name: name,
                    org_unit: unit,
                    encodings: vec![encoding],
                }),
            }
        }
        Ok(gallery)
    }

    /// Mark an identity inactive. Returns false if the id is unknown.
    pub async fn deactivate(&self, identity_id: &str) -> Result<bool, StoreError> {
        let identity_id = identity_id.to_string();
        let changed = self
            .conn
            .call(move |c| {
                let n = c.execute(
                    "UPDATE identity SET active = 0 WHERE id = ?1",
                    params![identity_id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    /// Summaries of every identity, active or not.
    pub async fn list_summaries(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        let rows = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(
                    "SELECT i.id, i.employee_code, i.display_name, i.org_unit, i.active, COUNT(e.id)
                     FROM identity i
                     LEFT JOIN face_encoding e ON e.identity_id = i.id
                     GROUP BY i.id
                     ORDER BY i.employee_code",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(IdentitySummary {
                            id: row.get(0)?,
                            employee_code: row.get(1)?,
                            display_name: row.get(2)?,
                            org_unit: row.get(3)?,
                            active: row.get::<_, i64>(4)? != 0,
                            encodings: row.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Summary for one identity, if it exists.
    pub async fn get_summary(&self, identity_id: &str) -> Result<Option<IdentitySummary>, StoreError> {
        let identity_id = identity_id.to_string();
        let row = self
            .conn
            .call(move |c| {
                use rusqlite::OptionalExtension;
                let row = c
                    .query_row(
                        "SELECT i.id, i.employee_code, i.display_name, i.org_unit, i.active, COUNT(e.id)
                         FROM identity i
                         LEFT JOIN face_encoding e ON e.identity_id = i.id
                         WHERE i.id = ?1
                         GROUP BY i.id",
                        params![identity_id],
                        |row| {
                            Ok(IdentitySummary {
                                id: row.get(0)?,
                                employee_code: row.get(1)?,
                                display_name: row.get(2)?,
                                org_unit: row.get(3)?,
                                active: row.get::<_, i64>(4)? != 0,
                                encodings: row.get(5)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(row)
    }

    /// The identity's sessions for one calendar date, oldest first.
    pub async fn today_sessions(
        &self,
        identity_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let identity_id = identity_id.to_string();
        let date_text = date.format(DATE_FORMAT).to_string();
        let rows = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare(
                    "SELECT id, check_in, check_out, location FROM attendance_session
                     WHERE identity_id = ?1 AND session_date = ?2
                     ORDER BY check_in",
                )?;
                let rows = stmt
                    .query_map(params![identity_id, date_text], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, check_in, check_out, location)| {
                let check_in = parse_time(&check_in)
                    .ok_or_else(|| StoreError::BadTimestamp(id.clone()))?;
                let check_out = match check_out {
                    Some(t) => {
                        Some(parse_time(&t).ok_or_else(|| StoreError::BadTimestamp(id.clone()))?)
                    }
                    None => None,
                };
                Ok(SessionRecord {
                    id,
                    check_in,
                    check_out,
                    location,
                })
            })
            .collect()
    }

    /// Open a new session (check-in side). Returns the session id.
    pub async fn open_check_in(
        &self,
        identity_id: &str,
        at: NaiveDateTime,
        location: &str,
        confidence: f32,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let row_id = id.clone();
        let identity_id = identity_id.to_string();
        let location = location.to_string();
        let date_text = at.date().format(DATE_FORMAT).to_string();
        let time = time_text(at);
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO attendance_session
                         (id, identity_id, session_date, check_in, location, check_in_confidence)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![row_id, identity_id, date_text, time, location, confidence],
                )?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    /// Close an open session (check-out side).
    ///
    /// Conditional on the check-out column still being unset, so a lost
    /// race surfaces as [`StoreError::SessionAlreadyClosed`] instead of a
    /// silent overwrite.
    pub async fn close_session(
        &self,
        session_id: &str,
        at: NaiveDateTime,
        hours: f64,
        confidence: f32,
    ) -> Result<(), StoreError> {
        let id = session_id.to_string();
        let row_id = id.clone();
        let time = time_text(at);
        let closed = self
            .conn
            .call(move |c| {
                let n = c.execute(
                    "UPDATE attendance_session
                     SET check_out = ?1, total_hours = ?2, check_out_confidence = ?3
                     WHERE id = ?4 AND check_out IS NULL",
                    params![time, hours, confidence, row_id],
                )?;
                Ok(n > 0)
            })
            .await?;
        if !closed {
            return Err(StoreError::SessionAlreadyClosed(id));
        }
        Ok(())
    }

    /// Headline counts for the status reply.
    pub async fn counts(&self, today: NaiveDate) -> Result<StoreCounts, StoreError> {
        let date_text = today.format(DATE_FORMAT).to_string();
        let counts = self
            .conn
            .call(move |c| {
                let active_identities: i64 = c.query_row(
                    "SELECT COUNT(*) FROM identity WHERE active = 1",
                    [],
                    |row| row.get(0),
                )?;
                let sessions_today: i64 = c.query_row(
                    "SELECT COUNT(*) FROM attendance_session WHERE session_date = ?1",
                    params![date_text],
                    |row| row.get(0),
                )?;
                Ok(StoreCounts {
                    active_identities,
                    sessions_today,
                })
            })
            .await?;
        Ok(counts)
    }
}

fn time_text(t: NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn parse_time(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT).ok()
}

fn now_text() -> String {
    time_text(chrono::Local::now().naive_local())
}
