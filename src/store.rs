use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::charts::{AggregateQuery, AggregateSource};
use crate::datasets::{AggregateRow, Bucket};
use crate::error::StoreError;
use crate::labels::WEEKS_PER_YEAR;
use crate::models::{AnnualClientCount, Entry, EntryPatch, NewEntry, Page, Participant, RecordKind};
use crate::pagination::PageParams;
use crate::period::{year_bounds, GroupKey};

pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS meal (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    type TEXT NOT NULL,
    number_of_clients INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS special_event (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    type TEXT NOT NULL,
    number_of_clients INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS core_activity (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    type TEXT NOT NULL,
    number_of_clients INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS project_activity (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    type TEXT NOT NULL,
    number_of_clients INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS harm_reduction (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    description TEXT
);
CREATE TABLE IF NOT EXISTS referral (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    description TEXT
);
CREATE TABLE IF NOT EXISTS core_activity_participants (
    activity_id TEXT NOT NULL REFERENCES core_activity(id) ON DELETE CASCADE,
    client_id TEXT NOT NULL,
    date_registered TEXT NOT NULL,
    PRIMARY KEY (activity_id, client_id)
);
CREATE TABLE IF NOT EXISTS project_activity_participants (
    activity_id TEXT NOT NULL REFERENCES project_activity(id) ON DELETE CASCADE,
    client_id TEXT NOT NULL,
    date_registered TEXT NOT NULL,
    PRIMARY KEY (activity_id, client_id)
);

CREATE INDEX IF NOT EXISTS idx_meal_date ON meal(date);
CREATE INDEX IF NOT EXISTS idx_special_event_date ON special_event(date);
CREATE INDEX IF NOT EXISTS idx_core_activity_date ON core_activity(date);
CREATE INDEX IF NOT EXISTS idx_project_activity_date ON project_activity(date);
CREATE INDEX IF NOT EXISTS idx_harm_reduction_date ON harm_reduction(date);
CREATE INDEX IF NOT EXISTS idx_referral_date ON referral(date);
";

/// SQLite-backed record store.
///
/// The connection sits behind a mutex; async callers go through
/// [`Store::call`], which moves the work onto the blocking pool.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (and migrates) the database at `path`. `:memory:` gives a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` on the blocking thread pool.
    pub async fn call<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Store) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub fn ping(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn insert_entry(&self, kind: RecordKind, entry: &NewEntry) -> StoreResult<Entry> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        if kind.is_typed() {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, date, type, number_of_clients) VALUES (?1, ?2, ?3, ?4)",
                    kind.table()
                ),
                params![
                    id,
                    entry.date,
                    entry.entry_type,
                    entry.number_of_clients.unwrap_or(0)
                ],
            )?;
        } else {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, date, description) VALUES (?1, ?2, ?3)",
                    kind.table()
                ),
                params![id, entry.date, entry.description],
            )?;
        }
        fetch_entry(&conn, kind, &id)?.ok_or(StoreError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_entry(&self, kind: RecordKind, id: &str) -> StoreResult<Option<Entry>> {
        let conn = self.conn.lock();
        fetch_entry(&conn, kind, id)
    }

    pub fn update_entry(&self, kind: RecordKind, id: &str, patch: &EntryPatch) -> StoreResult<Option<Entry>> {
        let conn = self.conn.lock();
        let changed = if kind.is_typed() {
            conn.execute(
                &format!(
                    "UPDATE {} SET date = COALESCE(?1, date), type = COALESCE(?2, type),
                     number_of_clients = COALESCE(?3, number_of_clients) WHERE id = ?4",
                    kind.table()
                ),
                params![patch.date, patch.entry_type, patch.number_of_clients, id],
            )?
        } else {
            conn.execute(
                &format!(
                    "UPDATE {} SET date = COALESCE(?1, date), description = COALESCE(?2, description)
                     WHERE id = ?3",
                    kind.table()
                ),
                params![patch.date, patch.description, id],
            )?
        };
        if changed == 0 {
            return Ok(None);
        }
        fetch_entry(&conn, kind, id)
    }

    /// Deletes an entry and, for activities, its participants.
    pub fn delete_entry(&self, kind: RecordKind, id: &str) -> StoreResult<Option<Entry>> {
        let mut conn = self.conn.lock();
        let Some(entry) = fetch_entry(&conn, kind, id)? else {
            return Ok(None);
        };

        let tx = conn.transaction()?;
        if let Some(participants) = kind.participant_table() {
            tx.execute(
                &format!("DELETE FROM {} WHERE activity_id = ?1", participants),
                params![id],
            )?;
        }
        tx.execute(&format!("DELETE FROM {} WHERE id = ?1", kind.table()), params![id])?;
        tx.commit()?;
        Ok(Some(entry))
    }

    /// Newest first.
    pub fn list_entries(&self, kind: RecordKind, page: PageParams) -> StoreResult<Page<Entry>> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY date DESC, id ASC LIMIT ?1 OFFSET ?2",
            entry_columns(kind),
            kind.table()
        ))?;
        let rows = stmt
            .query_map(params![page.limit, page.offset], map_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page { rows, count })
    }

    /// Entries dated on or after `from`, soonest first.
    pub fn upcoming_entries(&self, kind: RecordKind, from: NaiveDate) -> StoreResult<Vec<Entry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE date >= ?1 ORDER BY date ASC, id ASC",
            entry_columns(kind),
            kind.table()
        ))?;
        let rows = stmt
            .query_map(params![from], map_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Registers clients on an activity and bumps its `number_of_clients` by
    /// the number of new registrations. Already registered clients are ignored.
    ///
    /// Returns `None` when the activity does not exist.
    pub fn add_participants(
        &self,
        kind: RecordKind,
        activity_id: &str,
        client_ids: &[String],
        date_registered: NaiveDate,
    ) -> StoreResult<Option<(Entry, usize)>> {
        let Some(participants) = kind.participant_table() else {
            return Ok(None);
        };
        let mut conn = self.conn.lock();
        if fetch_entry(&conn, kind, activity_id)?.is_none() {
            return Ok(None);
        }

        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} (activity_id, client_id, date_registered) VALUES (?1, ?2, ?3)",
                participants
            ))?;
            for client_id in client_ids {
                added += stmt.execute(params![activity_id, client_id, date_registered])?;
            }
        }
        tx.execute(
            &format!(
                "UPDATE {} SET number_of_clients = number_of_clients + ?1 WHERE id = ?2",
                kind.table()
            ),
            params![added as i64, activity_id],
        )?;
        tx.commit()?;

        debug!(kind = %kind, activity_id, added, "participants registered");
        Ok(fetch_entry(&conn, kind, activity_id)?.map(|entry| (entry, added)))
    }

    /// Unregisters one client. Returns `None` when no such registration exists.
    pub fn remove_participant(
        &self,
        kind: RecordKind,
        activity_id: &str,
        client_id: &str,
    ) -> StoreResult<Option<Entry>> {
        let Some(participants) = kind.participant_table() else {
            return Ok(None);
        };
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            &format!(
                "DELETE FROM {} WHERE activity_id = ?1 AND client_id = ?2",
                participants
            ),
            params![activity_id, client_id],
        )?;
        if removed == 0 {
            return Ok(None);
        }
        tx.execute(
            &format!(
                "UPDATE {} SET number_of_clients = MAX(number_of_clients - 1, 0) WHERE id = ?1",
                kind.table()
            ),
            params![activity_id],
        )?;
        tx.commit()?;
        fetch_entry(&conn, kind, activity_id)
    }

    /// One page of an activity's participants, earliest registration first.
    pub fn list_participants(
        &self,
        kind: RecordKind,
        activity_id: &str,
        page: PageParams,
    ) -> StoreResult<Page<Participant>> {
        let Some(participants) = kind.participant_table() else {
            return Ok(Page {
                rows: Vec::new(),
                count: 0,
            });
        };
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE activity_id = ?1", participants),
            params![activity_id],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "SELECT activity_id, client_id, date_registered FROM {}
             WHERE activity_id = ?1 ORDER BY date_registered ASC, client_id ASC
             LIMIT ?2 OFFSET ?3",
            participants
        ))?;
        let rows = stmt
            .query_map(params![activity_id, page.limit, page.offset], |row| {
                Ok(Participant {
                    activity_id: row.get(0)?,
                    client_id: row.get(1)?,
                    date_registered: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { rows, count })
    }

    /// Grouped aggregate over `[query.start, query.end]`.
    ///
    /// SQL groups by raw date (and type); the calendar bucket is folded here
    /// so weeks follow ISO numbering. Output is sorted by bucket, then type.
    pub fn aggregate(&self, kind: RecordKind, query: &AggregateQuery) -> StoreResult<Vec<AggregateRow>> {
        let by_type = query.group_by_type && kind.is_typed();
        let type_column = if by_type { "type" } else { "NULL" };
        let clients = if kind.is_typed() {
            "COALESCE(SUM(number_of_clients), 0)"
        } else {
            "0"
        };
        let group_by = if by_type { "date, type" } else { "date" };

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT date, {type_column}, COUNT(*), {clients} FROM {table}
             WHERE date >= ?1 AND date <= ?2
             GROUP BY {group_by} ORDER BY {group_by}",
            table = kind.table(),
        ))?;
        let raw = stmt
            .query_map(params![query.start, query.end], |row| {
                Ok((
                    row.get::<_, NaiveDate>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut folded: BTreeMap<(Bucket, Option<String>), (i64, i64)> = BTreeMap::new();
        for (date, entry_type, count, clients) in raw {
            let slot = folded
                .entry((bucket_for(date, query.group_key), entry_type))
                .or_insert((0, 0));
            slot.0 += count;
            slot.1 += clients;
        }

        Ok(folded
            .into_iter()
            .map(|((bucket, entry_type), (count, number_of_clients))| AggregateRow {
                bucket,
                entry_type,
                count,
                number_of_clients,
            })
            .collect())
    }

    /// Yearly headline numbers for the reports page.
    pub fn annual_client_count(&self, year: i32) -> StoreResult<AnnualClientCount> {
        let (start, end) = year_bounds(year);
        let conn = self.conn.lock();

        let harm_reduction: i64 = conn.query_row(
            "SELECT COUNT(*) FROM harm_reduction WHERE date >= ?1 AND date <= ?2",
            params![start, end],
            |row| row.get(0),
        )?;

        let referrals: i64 = conn.query_row(
            "SELECT COUNT(*) FROM referral WHERE date >= ?1 AND date <= ?2",
            params![start, end],
            |row| row.get(0),
        )?;

        let mut total_clients = harm_reduction;
        for kind in RecordKind::ALL.into_iter().filter(|k| k.is_typed()) {
            let sum: i64 = conn.query_row(
                &format!(
                    "SELECT COALESCE(SUM(number_of_clients), 0) FROM {} WHERE date >= ?1 AND date <= ?2",
                    kind.table()
                ),
                params![start, end],
                |row| row.get(0),
            )?;
            total_clients += sum;
        }

        let participants: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (
                SELECT p.client_id FROM core_activity_participants p
                JOIN core_activity a ON a.id = p.activity_id
                WHERE a.date >= ?1 AND a.date <= ?2
                UNION
                SELECT p.client_id FROM project_activity_participants p
                JOIN project_activity a ON a.id = p.activity_id
                WHERE a.date >= ?1 AND a.date <= ?2
            )",
            params![start, end],
            |row| row.get(0),
        )?;

        Ok(AnnualClientCount {
            year,
            total_clients,
            // harm reduction and referral rows carry no client id, each one counts once
            unique_clients: participants + harm_reduction + referrals,
        })
    }
}

#[async_trait]
impl AggregateSource for Store {
    async fn query_aggregates(&self, kind: RecordKind, query: AggregateQuery) -> StoreResult<Vec<AggregateRow>> {
        self.call(move |store| store.aggregate(kind, &query)).await
    }
}

pub fn bucket_for(date: NaiveDate, key: Option<GroupKey>) -> Bucket {
    match key {
        None => Bucket::Day(date),
        Some(GroupKey::Week) => Bucket::Week(week_of_year(date)),
        Some(GroupKey::Month) => Bucket::Month(date.month()),
        Some(GroupKey::Year) => Bucket::Year(date.year()),
    }
}

/// ISO week number kept inside the calendar year of `date`, so it always
/// lands on one of the 52 `Week N {year}` labels. Early January days that
/// ISO assigns to the previous year count as week 1; late December days in
/// next year's week 1, or in week 53, count as week 52.
fn week_of_year(date: NaiveDate) -> u32 {
    let iso = date.iso_week();
    if iso.year() < date.year() {
        1
    } else if iso.year() > date.year() {
        WEEKS_PER_YEAR
    } else {
        iso.week().min(WEEKS_PER_YEAR)
    }
}

fn entry_columns(kind: RecordKind) -> &'static str {
    if kind.is_typed() {
        "id, date, type, number_of_clients, NULL"
    } else {
        "id, date, NULL, NULL, description"
    }
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        date: row.get(1)?,
        entry_type: row.get(2)?,
        number_of_clients: row.get(3)?,
        description: row.get(4)?,
    })
}

fn fetch_entry(conn: &Connection, kind: RecordKind, id: &str) -> StoreResult<Option<Entry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE id = ?1", entry_columns(kind), kind.table()),
            params![id],
            map_entry,
        )
        .optional()?;
    Ok(entry)
}
