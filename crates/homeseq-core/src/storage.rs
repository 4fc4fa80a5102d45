//! SQLite persistence (C6): conditions, events, learned event sequences,
//! and per-group delays. Schema and query shapes are grounded directly on
//! the source's `sqlite3`-backed store (`SPEC_FULL.md` §4.6).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::catalog::Catalog;
use crate::condition::Condition;
use crate::error::{Error, Result};
use crate::event::{Event, Item};
use crate::sequence::EventSequence;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conditions (
    conditions_id INTEGER PRIMARY KEY AUTOINCREMENT
);
CREATE TABLE IF NOT EXISTS condition_data (
    conditions_id INTEGER NOT NULL,
    condition_kind INTEGER NOT NULL,
    condition_bin INTEGER NOT NULL,
    item_name TEXT NOT NULL,
    PRIMARY KEY (conditions_id, condition_kind, item_name)
);
CREATE TABLE IF NOT EXISTS events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_name TEXT NOT NULL,
    old_state TEXT NOT NULL,
    new_state TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    conditions_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS event_sequences (
    event_sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
    \"group\" TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS event_sequence_data (
    event_sequence_id INTEGER NOT NULL,
    event_u_id INTEGER NOT NULL,
    event_u_occurrence INTEGER NOT NULL,
    event_v_id INTEGER NOT NULL,
    event_v_occurrence INTEGER NOT NULL,
    weight INTEGER NOT NULL,
    PRIMARY KEY (event_sequence_id, event_u_id, event_v_id)
);
CREATE TABLE IF NOT EXISTS event_delays (
    \"group\" TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
";

/// One open SQLite connection, exclusively owned for the duration of a
/// learning run (`SPEC_FULL.md` §5). Closed on `Drop`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (creating if absent) `{name}.db` in autocommit mode and ensures
    /// the schema exists.
    pub fn open(name: &str) -> Result<Self> {
        let conn = Connection::open(format!("{name}.db"))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Drops and recreates the three *learned* tables; raw events and
    /// conditions survive (`SPEC_FULL.md` §4.6).
    pub fn clear_learned(&self) -> Result<()> {
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS event_sequence_data;
             DROP TABLE IF EXISTS event_sequences;
             DROP TABLE IF EXISTS event_delays;",
        )?;
        self.conn.execute_batch(SCHEMA)?;
        tracing::info!("cleared learned sequences and delays");
        Ok(())
    }

    fn load_conditions(&self, conditions_id: i64) -> Result<BTreeSet<Condition>> {
        let mut stmt = self.conn.prepare(
            "SELECT condition_kind, condition_bin, item_name FROM condition_data WHERE conditions_id = ?1",
        )?;
        let rows = stmt.query_map(params![conditions_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
        })?;
        let mut set = BTreeSet::new();
        for row in rows {
            let (kind, bin, item_name) = row?;
            if let Some(condition) = Condition::decode(kind, bin, &item_name) {
                set.insert(condition);
            }
        }
        Ok(set)
    }

    /// Allocates a fresh id and inserts one `condition_data` row per member.
    pub fn store_conditions(&self, conditions: &BTreeSet<Condition>) -> Result<i64> {
        self.conn.execute("INSERT INTO conditions DEFAULT VALUES", [])?;
        let conditions_id = self.conn.last_insert_rowid();
        for condition in conditions {
            let (kind, bin, item_name) = condition.encode();
            self.conn.execute(
                "INSERT INTO condition_data (conditions_id, condition_kind, condition_bin, item_name)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conditions_id, kind, bin, item_name],
            )?;
        }
        Ok(conditions_id)
    }

    /// Scans stored condition sets for one that is set-equal to `conditions`.
    pub fn get_conditions_id(&self, conditions: &BTreeSet<Condition>) -> Result<i64> {
        let mut stmt = self.conn.prepare("SELECT conditions_id FROM conditions")?;
        let ids: Vec<i64> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        for id in ids {
            if self.load_conditions(id)? == *conditions {
                return Ok(id);
            }
        }
        Err(Error::NotFound(format!(
            "no stored conditions set matches {conditions:?}"
        )))
    }

    fn conditions_id_for(&self, conditions: &BTreeSet<Condition>) -> Result<i64> {
        match self.get_conditions_id(conditions) {
            Ok(id) => Ok(id),
            Err(Error::NotFound(_)) => self.store_conditions(conditions),
            Err(e) => Err(e),
        }
    }

    /// Looks up the stored conditions id for `event`'s conditions, inserting
    /// a fresh one if no match exists yet, then inserts the event row.
    pub fn store_event(&self, event: &Event) -> Result<i64> {
        let conditions_id = self.conditions_id_for(&event.conditions)?;
        self.conn.execute(
            "INSERT INTO events (item_name, old_state, new_state, timestamp, conditions_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.item.name,
                event.item.old_state,
                event.item.new_state,
                event.timestamp.to_rfc3339(),
                conditions_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Loads events, optionally restricted to the last `interval_days` days,
    /// in ascending `event_id` order. The `group` filter is applied via the
    /// catalog's `is_valid` check here, in process, not in the SQL query
    /// (`SPEC_FULL.md` §9 — this mirrors the source exactly).
    pub fn get_events(
        &self,
        catalog: &Catalog,
        group: Option<&str>,
        interval_days: Option<i64>,
    ) -> Result<Vec<Event>> {
        let mut sql = "SELECT event_id, item_name, old_state, new_state, timestamp, conditions_id FROM events".to_string();
        if interval_days.is_some() {
            sql.push_str(" WHERE timestamp >= ?1");
        }
        sql.push_str(" ORDER BY event_id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(days) = interval_days {
            let cutoff = (now() - Duration::days(days)).to_rfc3339();
            stmt.query_map(params![cutoff], Self::row_to_raw_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([], Self::row_to_raw_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut events = Vec::with_capacity(rows.len());
        for (event_id, item_name, old_state, new_state, timestamp, conditions_id) in rows {
            if !catalog.is_valid(&item_name, &old_state, &new_state, group) {
                continue;
            }
            let conditions = self.load_conditions(conditions_id)?;
            let timestamp: DateTime<Utc> = timestamp
                .parse()
                .map_err(|_| Error::Storage(format!("unparsable stored timestamp '{timestamp}'")))?;
            let mut event = Event::new(Item::new(item_name, old_state, new_state), timestamp, conditions);
            event.id = Some(event_id);
            events.push(event);
        }
        Ok(events)
    }

    #[allow(clippy::type_complexity)]
    fn row_to_raw_event(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(i64, String, String, String, String, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    /// Persists a sequence's positive-weight edges under `group`. Sequences
    /// with fewer than two nodes are skipped (returns `Ok(None)`); virtual
    /// edges are never persisted.
    pub fn store_event_sequence(&self, sequence: &EventSequence, group: &str) -> Result<Option<i64>> {
        if sequence.node_count() < 2 {
            return Ok(None);
        }
        self.conn
            .execute("INSERT INTO event_sequences (\"group\") VALUES (?1)", params![group])?;
        let sequence_id = self.conn.last_insert_rowid();

        let occurrence_by_id: HashMap<i64, u32> = sequence
            .nodes()
            .filter_map(|(event, occ)| event.id.map(|id| (id, occ)))
            .collect();

        for (u, v, weight) in sequence.edges() {
            if weight == 0 {
                continue;
            }
            let (Some(u_id), Some(v_id)) = (u.id, v.id) else {
                continue;
            };
            let u_occ = occurrence_by_id.get(&u_id).copied().unwrap_or(1);
            let v_occ = occurrence_by_id.get(&v_id).copied().unwrap_or(1);
            self.conn.execute(
                "INSERT INTO event_sequence_data
                 (event_sequence_id, event_u_id, event_u_occurrence, event_v_id, event_v_occurrence, weight)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![sequence_id, u_id, u_occ, v_id, v_occ, weight],
            )?;
        }
        Ok(Some(sequence_id))
    }

    /// Reconstructs every learned sequence for `group`, grouped by the
    /// sequence's conditions. Sequences referencing an event no longer valid
    /// under the catalog are skipped.
    pub fn get_event_sequences(
        &self,
        catalog: &Catalog,
        group: &str,
    ) -> Result<BTreeMap<BTreeSet<Condition>, Vec<EventSequence>>> {
        let events = self.get_events(catalog, Some(group), None)?;
        let events_by_id: HashMap<i64, Event> =
            events.into_iter().filter_map(|e| e.id.map(|id| (id, e))).collect();

        let mut stmt = self
            .conn
            .prepare("SELECT event_sequence_id FROM event_sequences WHERE \"group\" = ?1")?;
        let sequence_ids: Vec<i64> = stmt
            .query_map(params![group], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut out: BTreeMap<BTreeSet<Condition>, Vec<EventSequence>> = BTreeMap::new();
        for sequence_id in sequence_ids {
            let mut edge_stmt = self.conn.prepare(
                "SELECT event_u_id, event_u_occurrence, event_v_id, event_v_occurrence, weight
                 FROM event_sequence_data WHERE event_sequence_id = ?1",
            )?;
            let rows: Vec<(i64, u32, i64, u32, u32)> = edge_stmt
                .query_map(params![sequence_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut missing = false;
            let mut node_occ: HashMap<i64, u32> = HashMap::new();
            let mut targets: BTreeSet<i64> = BTreeSet::new();
            for &(u_id, u_occ, v_id, v_occ, _) in &rows {
                if !events_by_id.contains_key(&u_id) || !events_by_id.contains_key(&v_id) {
                    missing = true;
                    break;
                }
                node_occ.insert(u_id, u_occ);
                node_occ.insert(v_id, v_occ);
                targets.insert(v_id);
            }
            if missing || rows.is_empty() {
                continue;
            }

            let root_id = match node_occ.keys().find(|id| !targets.contains(id)) {
                Some(&id) => id,
                None => continue,
            };
            let nodes: Vec<(Event, u32)> = node_occ
                .iter()
                .map(|(&id, &occ)| (events_by_id[&id].clone(), occ))
                .collect();
            let edges: Vec<((Item, Item), u32)> = rows
                .iter()
                .map(|&(u_id, _, v_id, _, w)| {
                    (
                        (events_by_id[&u_id].item.clone(), events_by_id[&v_id].item.clone()),
                        w,
                    )
                })
                .collect();
            let root_item = events_by_id[&root_id].item.clone();
            let sequence = EventSequence::from_stored(nodes, edges, &root_item);
            out.entry(sequence.conditions()).or_default().push(sequence);
        }
        Ok(out)
    }

    pub fn store_event_delay(&self, group: &str, value: u64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO event_delays (\"group\", value) VALUES (?1, ?2)
             ON CONFLICT(\"group\") DO UPDATE SET value = excluded.value",
            params![group, value as i64],
        )?;
        Ok(())
    }

    pub fn get_event_delay(&self, group: &str) -> Result<u64> {
        self.conn
            .query_row(
                "SELECT value FROM event_delays WHERE \"group\" = ?1",
                params![group],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|v| v as u64)
            .ok_or_else(|| Error::NotFound(format!("no stored delay for group '{group}'")))
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}
