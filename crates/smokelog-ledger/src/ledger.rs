use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use smokelog_store::{Database, DayRepo, DayRow, EntryRepo, EntryRow, StoreError};

use crate::clock::{Clock, SystemClock};
use crate::config::{CounterScope, LedgerConfig};
use crate::error::LedgerError;

pub type Event = EntryRow;
pub type DaySession = DayRow;

/// Step direction for day navigation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    fn apply(self, day_id: i64) -> i64 {
        match self {
            Self::Next => day_id + 1,
            Self::Previous => day_id - 1,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Next => write!(f, "next"),
            Self::Previous => write!(f, "previous"),
        }
    }
}

/// Owns the day-session store and its in-memory projection.
///
/// Every mutating method talks to the store first and only touches the
/// projection once the store call has succeeded, so a `StoreUnavailable`
/// error never leaves the two out of step. The ledger does no locking of its
/// own; callers that share it across threads wrap it in a single mutex.
pub struct Ledger {
    db: Database,
    entries: EntryRepo,
    days: DayRepo,
    clock: Arc<dyn Clock>,
    counter_scope: CounterScope,
    active_day_id: i64,
    events: BTreeMap<i64, Event>,
    sessions: BTreeMap<i64, DaySession>,
    counter: i64,
}

impl Ledger {
    /// Bootstrap a ledger over `db` using the wall clock.
    pub fn open(db: Database, config: LedgerConfig) -> Result<Self, LedgerError> {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db: Database,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self {
            entries: EntryRepo::new(db.clone()),
            days: DayRepo::new(db.clone()),
            db,
            clock,
            counter_scope: config.counter_scope,
            active_day_id: 0,
            events: BTreeMap::new(),
            sessions: BTreeMap::new(),
            counter: 0,
        };
        ledger.reload()?;
        Ok(ledger)
    }

    /// Rebuild the whole projection from the store.
    ///
    /// Creates an open day if the store has none, focuses the newest day,
    /// loads its entries and seeds the counter from the most recently
    /// recorded entry. On error the previous projection is kept.
    #[instrument(skip(self))]
    pub fn reload(&mut self) -> Result<(), LedgerError> {
        if self.days.count()? == 0 {
            let day = self.days.create(self.clock.now())?;
            info!(day_id = day.id, "no days found, opened initial day");
        }

        let sessions: BTreeMap<i64, DaySession> =
            self.days.list()?.into_iter().map(|d| (d.id, d)).collect();
        let active = sessions
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| StoreError::NotFound("open day after bootstrap".into()))?;
        let events = self.load_entries_for_session(&active)?;
        let counter = self.entries.latest_value()?.unwrap_or(0);

        self.sessions = sessions;
        self.active_day_id = active.id;
        self.events = events.into_iter().map(|e| (e.id, e)).collect();
        self.counter = counter;

        info!(
            days = self.sessions.len(),
            active_day_id = self.active_day_id,
            loaded_entries = self.events.len(),
            counter = self.counter,
            "ledger loaded"
        );
        Ok(())
    }

    /// Record one entry at "now" carrying the next counter value.
    ///
    /// The counter only advances once the row is stored, so a failed insert
    /// can be retried without skipping a value.
    #[instrument(skip(self))]
    pub fn record_event(&mut self) -> Result<Event, LedgerError> {
        let next = self.counter + 1;
        let event = self.entries.insert(self.clock.now(), next)?;

        self.counter = event.value;
        self.events.insert(event.id, event.clone());
        debug!(entry_id = event.id, value = event.value, "entry recorded");
        Ok(event)
    }

    /// Delete an entry. Returns whether the store held a row with that id.
    ///
    /// When anything was removed the counter is recomputed over the
    /// configured [`CounterScope`]. With the default `Loaded` scope that is
    /// the maximum value among the entries currently in memory (0 if none),
    /// which may be lower than the maximum across all history.
    #[instrument(skip(self))]
    pub fn remove_event(&mut self, id: i64) -> Result<bool, LedgerError> {
        let (deleted, history_max) = match self.counter_scope {
            CounterScope::Loaded => (self.entries.delete(id)?, None),
            CounterScope::History => self.entries.delete_with_max(id)?,
        };
        let evicted = self.events.remove(&id).is_some();
        if !deleted && !evicted {
            return Ok(false);
        }

        let previous = self.counter;
        self.counter = match self.counter_scope {
            CounterScope::Loaded => self.events.values().map(|e| e.value).max().unwrap_or(0),
            CounterScope::History => history_max.unwrap_or(0),
        };
        debug!(entry_id = id, previous, counter = self.counter, scope = %self.counter_scope, "entry removed");
        Ok(deleted)
    }

    /// Entries with timestamps in `[start, end]` of `session`, oldest first.
    /// An open session is bounded by "now". Reads only; every call re-queries.
    #[instrument(skip(self, session), fields(day_id = session.id))]
    pub fn load_entries_for_session(&self, session: &DaySession) -> Result<Vec<Event>, LedgerError> {
        let end = session.end_timestamp.unwrap_or_else(|| self.clock.now());
        Ok(self.entries.list_between(&session.start_timestamp, &end)?)
    }

    /// Fresh query of the active day's entries.
    pub fn entries_for_active_day(&self) -> Result<Vec<Event>, LedgerError> {
        match self.sessions.get(&self.active_day_id) {
            Some(day) => self.load_entries_for_session(day),
            None => Ok(Vec::new()),
        }
    }

    /// Fresh query of a known day's entries. `None` if no such day is loaded.
    pub fn entries_for_day(&self, day_id: i64) -> Result<Option<Vec<Event>>, LedgerError> {
        self.sessions
            .get(&day_id)
            .map(|day| self.load_entries_for_session(day))
            .transpose()
    }

    /// Close every open day and open a new one, which becomes active.
    ///
    /// Loaded entries are kept; only navigation replaces them.
    #[instrument(skip(self))]
    pub fn open_new_day(&mut self) -> Result<DaySession, LedgerError> {
        let (closed, day) = self.days.rollover(self.clock.now())?;

        for session in self.sessions.values_mut().filter(|s| s.is_open()) {
            session.end_timestamp = Some(day.start_timestamp);
        }
        self.sessions.insert(day.id, day.clone());
        let previous = std::mem::replace(&mut self.active_day_id, day.id);

        info!(previous_day_id = previous, day_id = day.id, closed, "opened new day");
        Ok(day)
    }

    /// Move focus to the day whose id is one above or below the active one.
    ///
    /// Adjacency is by id, not by time: a missing id fails with `DayNotFound`
    /// even when an earlier or later day exists. On success the loaded
    /// entries are replaced by the target day's entries.
    #[instrument(skip(self), fields(from = self.active_day_id))]
    pub fn navigate_day(&mut self, direction: Direction) -> Result<DaySession, LedgerError> {
        let target = direction.apply(self.active_day_id);
        let Some(day) = self.sessions.get(&target).cloned() else {
            warn!(day_id = target, %direction, "no day to navigate to");
            return Err(LedgerError::DayNotFound { id: target });
        };

        let events = self.load_entries_for_session(&day)?;
        self.events = events.into_iter().map(|e| (e.id, e)).collect();
        self.active_day_id = day.id;

        info!(day_id = day.id, %direction, loaded_entries = self.events.len(), "navigated");
        Ok(day)
    }

    /// Irreversibly delete every entry and day from the store.
    ///
    /// Does not reload. Until [`Ledger::reload`] is called the projection
    /// still reports the pre-clear days, entries and counter, range queries
    /// return nothing, and `record_event` inserts into the empty table with
    /// the stale counter plus one. Returns (entries, days) deleted.
    #[instrument(skip(self))]
    pub fn clear_all(&mut self) -> Result<(usize, usize), LedgerError> {
        let (entries, days) = self.db.purge()?;
        warn!(entries, days, "store cleared, projection is stale until reload");
        Ok((entries, days))
    }

    /// Store lookup of a single entry. Absent is `Ok(None)`.
    pub fn get_event(&self, id: i64) -> Result<Option<Event>, LedgerError> {
        Ok(self.entries.get(id)?)
    }

    pub fn active_day_id(&self) -> i64 {
        self.active_day_id
    }

    pub fn active_day(&self) -> Option<&DaySession> {
        self.sessions.get(&self.active_day_id)
    }

    pub fn day(&self, id: i64) -> Option<&DaySession> {
        self.sessions.get(&id)
    }

    /// All known days, ordered by id.
    pub fn days(&self) -> Vec<DaySession> {
        self.sessions.values().cloned().collect()
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }

    pub fn counter_scope(&self) -> CounterScope {
        self.counter_scope
    }

    /// Entries currently held in memory, oldest first.
    pub fn loaded_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.values().cloned().collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 7, 0, 0).unwrap()
    }

    fn setup_with(scope: CounterScope) -> (Database, Arc<ManualClock>, Ledger) {
        let db = Database::in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let ledger = Ledger::with_clock(
            db.clone(),
            LedgerConfig { counter_scope: scope },
            clock.clone(),
        )
        .unwrap();
        (db, clock, ledger)
    }

    fn setup() -> (Database, Arc<ManualClock>, Ledger) {
        setup_with(CounterScope::Loaded)
    }

    fn loaded_ids(ledger: &Ledger) -> Vec<i64> {
        ledger.loaded_events().iter().map(|e| e.id).collect()
    }

    #[test]
    fn bootstrap_empty_store_creates_one_open_day() {
        let (_db, _clock, ledger) = setup();
        let days = ledger.days();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].id, 1);
        assert!(days[0].is_open());
        assert_eq!(ledger.active_day_id(), 1);
        assert_eq!(ledger.counter(), 0);
        assert!(ledger.loaded_events().is_empty());
    }

    #[test]
    fn bootstrap_existing_store_focuses_newest_day() {
        let (db, clock, mut ledger) = setup();
        ledger.record_event().unwrap();
        ledger.open_new_day().unwrap();
        let e2 = ledger.record_event().unwrap();
        drop(ledger);

        let reopened =
            Ledger::with_clock(db.clone(), LedgerConfig::default(), clock.clone()).unwrap();
        assert_eq!(reopened.days().len(), 2);
        assert_eq!(reopened.active_day_id(), 2);
        assert_eq!(reopened.counter(), 2);
        assert_eq!(loaded_ids(&reopened), vec![e2.id]);
    }

    #[test]
    fn values_are_sequential_across_days() {
        let (_db, _clock, mut ledger) = setup();
        let mut values = Vec::new();
        for round in 0..3 {
            for _ in 0..=round {
                values.push(ledger.record_event().unwrap().value);
            }
            ledger.open_new_day().unwrap();
        }
        assert_eq!(values, (1..=6).collect::<Vec<i64>>());
        assert_eq!(ledger.counter(), 6);
    }

    #[test]
    fn day_rollover_scenario() {
        let (_db, _clock, mut ledger) = setup();

        let e1 = ledger.record_event().unwrap();
        assert_eq!((e1.id, e1.value), (1, 1));

        let day2 = ledger.open_new_day().unwrap();
        assert_eq!(day2.id, 2);
        assert!(day2.is_open());
        assert_eq!(ledger.active_day_id(), 2);
        let day1 = ledger.day(1).unwrap();
        assert_eq!(day1.end_timestamp, Some(day2.start_timestamp));

        let e2 = ledger.record_event().unwrap();
        assert_eq!((e2.id, e2.value), (2, 2));

        let today: Vec<i64> = ledger
            .entries_for_active_day()
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(today, vec![2]);
        let yesterday: Vec<i64> = ledger
            .entries_for_day(1)
            .unwrap()
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(yesterday, vec![1]);
    }

    #[test]
    fn open_new_day_keeps_loaded_entries() {
        let (_db, _clock, mut ledger) = setup();
        ledger.record_event().unwrap();
        ledger.open_new_day().unwrap();
        ledger.record_event().unwrap();
        assert_eq!(loaded_ids(&ledger), vec![1, 2]);
    }

    #[test]
    fn open_new_day_then_previous_restores_focus() {
        let (_db, _clock, mut ledger) = setup();
        ledger.record_event().unwrap();
        ledger.record_event().unwrap();
        let before = ledger.active_day_id();

        ledger.open_new_day().unwrap();
        ledger.record_event().unwrap();
        let back = ledger.navigate_day(Direction::Previous).unwrap();

        assert_eq!(back.id, before);
        assert_eq!(ledger.active_day_id(), before);
        assert_eq!(loaded_ids(&ledger), vec![1, 2]);

        let forward = ledger.navigate_day(Direction::Next).unwrap();
        assert_eq!(forward.id, 2);
        assert_eq!(loaded_ids(&ledger), vec![3]);
    }

    #[test]
    fn navigate_past_newest_day_fails_without_mutation() {
        let (_db, _clock, mut ledger) = setup();
        ledger.record_event().unwrap();
        let before = loaded_ids(&ledger);

        let err = ledger.navigate_day(Direction::Next).unwrap_err();
        assert!(matches!(err, LedgerError::DayNotFound { id: 2 }));
        assert_eq!(ledger.active_day_id(), 1);
        assert_eq!(loaded_ids(&ledger), before);
    }

    #[test]
    fn navigate_before_first_day_fails() {
        let (_db, _clock, mut ledger) = setup();
        let err = ledger.navigate_day(Direction::Previous).unwrap_err();
        assert!(matches!(err, LedgerError::DayNotFound { id: 0 }));
        assert_eq!(ledger.active_day_id(), 1);
    }

    #[test]
    fn navigation_does_not_skip_id_gaps() {
        let (db, _clock, mut ledger) = setup();
        ledger.open_new_day().unwrap();
        ledger.open_new_day().unwrap();
        db.with_conn(|conn| {
            conn.execute("DELETE FROM days WHERE id = 2", [])?;
            Ok(())
        })
        .unwrap();
        ledger.reload().unwrap();
        assert_eq!(ledger.active_day_id(), 3);

        // Day 1 is the chronological neighbour, but id 2 is gone
        let err = ledger.navigate_day(Direction::Previous).unwrap_err();
        assert!(matches!(err, LedgerError::DayNotFound { id: 2 }));
        assert_eq!(ledger.active_day_id(), 3);
    }

    #[test]
    fn failed_navigation_load_keeps_focus_and_entries() {
        let (db, _clock, mut ledger) = setup();
        ledger.record_event().unwrap();
        ledger.open_new_day().unwrap();
        ledger.record_event().unwrap();
        let before = ledger.loaded_events();

        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE smoke_entries")?;
            Ok(())
        })
        .unwrap();
        let err = ledger.navigate_day(Direction::Previous).unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert_eq!(ledger.active_day_id(), 2);
        assert_eq!(ledger.loaded_events(), before);
    }

    #[test]
    fn projected_days_match_store_with_system_clock() {
        let db = Database::in_memory().unwrap();
        let mut ledger = Ledger::open(db.clone(), LedgerConfig::default()).unwrap();
        let day = ledger.open_new_day().unwrap();

        let stored = DayRepo::new(db.clone()).list().unwrap();
        assert_eq!(ledger.days(), stored);
        assert_eq!(ledger.active_day(), Some(&day));

        ledger.reload().unwrap();
        assert_eq!(ledger.days(), stored);
    }

    #[test]
    fn load_entries_is_idempotent() {
        let (_db, _clock, mut ledger) = setup();
        for _ in 0..3 {
            ledger.record_event().unwrap();
        }
        ledger.open_new_day().unwrap();
        let day1 = ledger.day(1).unwrap().clone();

        let first = ledger.load_entries_for_session(&day1).unwrap();
        let second = ledger.load_entries_for_session(&day1).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn entries_for_unknown_day_is_none() {
        let (_db, _clock, ledger) = setup();
        assert!(ledger.entries_for_day(99).unwrap().is_none());
    }

    #[test]
    fn removing_max_lowers_counter() {
        let (_db, _clock, mut ledger) = setup();
        for _ in 0..3 {
            ledger.record_event().unwrap();
        }
        assert!(ledger.remove_event(3).unwrap());
        assert_eq!(ledger.counter(), 2);
        assert!(ledger.get_event(3).unwrap().is_none());

        // The freed value is handed out again
        assert_eq!(ledger.record_event().unwrap().value, 3);
    }

    #[test]
    fn removing_non_max_keeps_counter() {
        let (_db, _clock, mut ledger) = setup();
        for _ in 0..3 {
            ledger.record_event().unwrap();
        }
        assert!(ledger.remove_event(2).unwrap());
        assert_eq!(ledger.counter(), 3);
        assert_eq!(loaded_ids(&ledger), vec![1, 3]);
    }

    #[test]
    fn removing_last_entry_resets_counter() {
        let (_db, _clock, mut ledger) = setup();
        ledger.record_event().unwrap();
        assert!(ledger.remove_event(1).unwrap());
        assert_eq!(ledger.counter(), 0);
    }

    #[test]
    fn removing_missing_entry_is_absent_not_error() {
        let (_db, _clock, mut ledger) = setup();
        ledger.record_event().unwrap();
        assert!(!ledger.remove_event(42).unwrap());
        assert_eq!(ledger.counter(), 1);
    }

    fn history_fixture(scope: CounterScope) -> Ledger {
        let (_db, _clock, mut ledger) = setup_with(scope);
        for _ in 0..3 {
            ledger.record_event().unwrap();
        }
        ledger.open_new_day().unwrap();
        ledger.record_event().unwrap();
        ledger.navigate_day(Direction::Previous).unwrap();
        ledger
    }

    #[test]
    fn loaded_scope_recomputes_over_memory_only() {
        let mut ledger = history_fixture(CounterScope::Loaded);
        assert_eq!(ledger.counter(), 4);
        ledger.remove_event(3).unwrap();
        assert_eq!(ledger.counter(), 2);
    }

    #[test]
    fn history_scope_recomputes_over_store() {
        let mut ledger = history_fixture(CounterScope::History);
        ledger.remove_event(3).unwrap();
        assert_eq!(ledger.counter(), 4);
        assert_eq!(ledger.counter_scope(), CounterScope::History);
    }

    #[test]
    fn failed_history_remove_keeps_projection() {
        let (db, _clock, mut ledger) = setup_with(CounterScope::History);
        for _ in 0..2 {
            ledger.record_event().unwrap();
        }

        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE smoke_entries")?;
            Ok(())
        })
        .unwrap();
        let err = ledger.remove_event(2).unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert_eq!(loaded_ids(&ledger), vec![1, 2]);
        assert_eq!(ledger.counter(), 2);
    }

    #[test]
    fn failed_record_does_not_advance_counter() {
        let (db, _clock, mut ledger) = setup();
        ledger.record_event().unwrap();

        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE smoke_entries")?;
            Ok(())
        })
        .unwrap();
        let err = ledger.record_event().unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert_eq!(ledger.counter(), 1);
        assert_eq!(loaded_ids(&ledger), vec![1]);

        db.with_conn(|conn| {
            conn.execute_batch(smokelog_store::schema::CREATE_TABLES)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(ledger.record_event().unwrap().value, 2);
    }

    #[test]
    fn open_new_day_repairs_multiple_open_days() {
        let (db, _clock, mut ledger) = setup();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO days (start_ts, end_ts) VALUES ('2026-06-01T07:00:00.500000Z', NULL)",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        ledger.reload().unwrap();
        assert_eq!(ledger.days().iter().filter(|d| d.is_open()).count(), 2);

        let day = ledger.open_new_day().unwrap();
        let open: Vec<i64> = ledger
            .days()
            .iter()
            .filter(|d| d.is_open())
            .map(|d| d.id)
            .collect();
        assert_eq!(open, vec![day.id]);

        ledger.reload().unwrap();
        let open_in_store = ledger.days().iter().filter(|d| d.is_open()).count();
        assert_eq!(open_in_store, 1);
    }

    #[test]
    fn clear_all_leaves_projection_stale_until_reload() {
        let (_db, _clock, mut ledger) = setup();
        ledger.record_event().unwrap();
        ledger.open_new_day().unwrap();
        ledger.record_event().unwrap();

        assert_eq!(ledger.clear_all().unwrap(), (2, 2));
        assert!(ledger.entries_for_active_day().unwrap().is_empty());
        assert_eq!(ledger.days().len(), 2);
        assert_eq!(ledger.counter(), 2);
        assert_eq!(ledger.loaded_events().len(), 2);

        // Recording without reload continues from the stale counter
        let e = ledger.record_event().unwrap();
        assert_eq!(e.value, 3);

        ledger.reload().unwrap();
        assert_eq!(ledger.days().len(), 1);
        assert_eq!(ledger.active_day_id(), 3);
        assert_eq!(ledger.counter(), 3);
    }

    #[test]
    fn reload_after_clear_starts_fresh() {
        let (_db, clock, mut ledger) = setup();
        ledger.record_event().unwrap();
        ledger.clear_all().unwrap();
        clock.advance(Duration::hours(1));

        ledger.reload().unwrap();
        assert_eq!(ledger.counter(), 0);
        assert!(ledger.loaded_events().is_empty());
        assert_eq!(ledger.days().len(), 1);
        assert!(ledger.active_day().unwrap().is_open());
        assert_eq!(ledger.record_event().unwrap().value, 1);
    }

    #[test]
    fn bootstrap_fails_when_store_is_broken() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE days")?;
            Ok(())
        })
        .unwrap();
        let result = Ledger::open(db, LedgerConfig::default());
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
    }
}
