//! Per-session change tracker.
//!
//! Keeps one entry per tracked entity, keyed by identity token, with the
//! row as last loaded or accepted (`original`) and the row as last reported
//! by the caller (`current`). Entries also carry the entity's shared
//! tracking handle, so every transition is visible to the caller.
//!
//! The tracker is synchronous and performs no I/O; the repository and the
//! unit of work hold its lock only between awaits.

use std::collections::{BTreeSet, HashMap, HashSet};

use tessera_core::{
    DataError, DataResult, Entity, EntitySet, EntityToken, Key, Row, Tracking, TrackingState,
};

use crate::store::{ChangeKind, RowChange};

/// Tracker-side view of one entity value.
#[derive(Debug, Clone)]
pub(crate) struct EntryInput {
    pub set: EntitySet,
    pub key: Key,
    pub row: Row,
    pub tracking: Tracking,
}

impl EntryInput {
    pub fn of<E: Entity>(entity: &E) -> DataResult<Self> {
        let row = entity.to_store_row()?;
        let key = Key::from_row(&row, E::SET.key)?;
        Ok(Self {
            set: E::SET,
            key,
            row,
            tracking: entity.tracking().clone(),
        })
    }

    fn token(&self) -> EntityToken {
        self.tracking.token()
    }
}

#[derive(Debug)]
pub(crate) struct TrackedEntry {
    seq: u64,
    set: EntitySet,
    key: Key,
    tracking: Tracking,
    /// `None` when the entity was never loaded (inserted, or updated while untracked).
    original: Option<Row>,
    current: Row,
}

impl TrackedEntry {
    pub fn state(&self) -> TrackingState {
        self.tracking.state()
    }

    pub fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    pub fn current(&self) -> &Row {
        &self.current
    }
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    next_seq: u64,
    entries: HashMap<EntityToken, TrackedEntry>,
    keys: HashMap<(&'static str, Key), EntityToken>,
}

/// Non-key columns whose values differ between the two rows.
fn diff(original: &Row, current: &Row, set: &EntitySet) -> BTreeSet<String> {
    original
        .keys()
        .chain(current.keys())
        .filter(|column| !set.is_key_column(column))
        .filter(|column| original.get(*column) != current.get(*column))
        .cloned()
        .collect()
}

fn non_key_columns(row: &Row, set: &EntitySet) -> BTreeSet<String> {
    row.keys()
        .filter(|column| !set.is_key_column(column))
        .cloned()
        .collect()
}

/// Apply a transition to the entry's handle and, when the caller holds a
/// different cell for the same token, to that one too.
fn sync(entry: &Tracking, incoming: &Tracking, state: TrackingState, modified: BTreeSet<String>) {
    if !incoming.shares_cell_with(entry) {
        incoming.transition(state, modified.clone());
    }
    entry.transition(state, modified);
}

fn already_tracked(set: &EntitySet, key: &Key) -> DataError {
    DataError::already_tracked(format!("{} {key} is already tracked", set.name))
}

impl ChangeTracker {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, token: EntityToken) -> Option<&TrackedEntry> {
        self.entries.get(&token)
    }

    pub fn by_key(&self, set: &EntitySet, key: &Key) -> Option<&TrackedEntry> {
        self.keys
            .get(&(set.name, key.clone()))
            .and_then(|token| self.entries.get(token))
    }

    fn key_owner(&self, set: &EntitySet, key: &Key) -> Option<EntityToken> {
        self.keys.get(&(set.name, key.clone())).copied()
    }

    fn add(
        &mut self,
        input: EntryInput,
        original: Option<Row>,
        state: TrackingState,
        modified: BTreeSet<String>,
    ) {
        let token = input.token();
        input.tracking.transition(state, modified);
        tracing::debug!(set = input.set.name, key = %input.key, state = ?state, "entity tracked");

        self.next_seq += 1;
        self.keys.insert((input.set.name, input.key.clone()), token);
        self.entries.insert(
            token,
            TrackedEntry {
                seq: self.next_seq,
                set: input.set,
                key: input.key,
                tracking: input.tracking,
                original,
                current: input.row,
            },
        );
    }

    /// Drop an entry without touching its handle.
    fn evict(&mut self, token: EntityToken) -> Option<TrackedEntry> {
        let entry = self.entries.remove(&token)?;
        let index = (entry.set.name, entry.key.clone());
        if self.keys.get(&index) == Some(&token) {
            self.keys.remove(&index);
        }
        Some(entry)
    }

    fn remove(&mut self, token: EntityToken) {
        if let Some(entry) = self.evict(token) {
            entry.tracking.transition(TrackingState::Detached, BTreeSet::new());
            tracing::debug!(set = entry.set.name, key = %entry.key, "entity detached");
        }
    }

    /// A key owned by a `Deleted` entry may be reused: the delete is flushed
    /// before the insert.
    pub fn insert(&mut self, input: EntryInput) -> DataResult<()> {
        let live_owner = self
            .key_owner(&input.set, &input.key)
            .and_then(|owner| self.entries.get(&owner))
            .is_some_and(|entry| entry.state() != TrackingState::Deleted);
        if self.entries.contains_key(&input.token()) || live_owner {
            return Err(DataError::duplicate_key(format!(
                "{} {} is already tracked",
                input.set.name, input.key
            )));
        }
        self.add(input, None, TrackingState::Added, BTreeSet::new());
        Ok(())
    }

    pub fn attach(&mut self, input: EntryInput) -> DataResult<()> {
        if self.entries.contains_key(&input.token()) || self.key_owner(&input.set, &input.key).is_some() {
            return Err(already_tracked(&input.set, &input.key));
        }
        let original = Some(input.row.clone());
        self.add(input, original, TrackingState::Unchanged, BTreeSet::new());
        Ok(())
    }

    pub fn update(&mut self, input: EntryInput) -> DataResult<()> {
        let token = input.token();
        if let Some(entry) = self.entries.get_mut(&token) {
            if entry.key != input.key {
                return Err(DataError::invalid_data(format!(
                    "primary key of tracked {} {} cannot change to {}",
                    entry.set.name, entry.key, input.key
                )));
            }
            let (state, modified) = match entry.state() {
                TrackingState::Added => (TrackingState::Added, BTreeSet::new()),
                _ => {
                    let modified = match &entry.original {
                        Some(original) => diff(original, &input.row, &entry.set),
                        None => non_key_columns(&input.row, &entry.set),
                    };
                    if modified.is_empty() {
                        (TrackingState::Unchanged, modified)
                    } else {
                        (TrackingState::Modified, modified)
                    }
                }
            };
            entry.current = input.row;
            sync(&entry.tracking, &input.tracking, state, modified);
            return Ok(());
        }

        if self.key_owner(&input.set, &input.key).is_some() {
            return Err(already_tracked(&input.set, &input.key));
        }
        // no snapshot to diff against: every non-key property is written
        let modified = non_key_columns(&input.row, &input.set);
        self.add(input, None, TrackingState::Modified, modified);
        Ok(())
    }

    pub fn delete(&mut self, input: EntryInput) -> DataResult<()> {
        let token = input.token();
        if let Some(entry) = self.entries.get(&token) {
            if entry.state() == TrackingState::Added {
                self.remove(token);
                input.tracking.transition(TrackingState::Detached, BTreeSet::new());
            } else {
                sync(&entry.tracking, &input.tracking, TrackingState::Deleted, BTreeSet::new());
            }
            return Ok(());
        }

        if self.key_owner(&input.set, &input.key).is_some() {
            return Err(already_tracked(&input.set, &input.key));
        }
        let original = Some(input.row.clone());
        self.add(input, original, TrackingState::Deleted, BTreeSet::new());
        Ok(())
    }

    /// Stop tracking; a no-op for untracked handles beyond marking them detached.
    pub fn detach(&mut self, tracking: &Tracking) {
        self.remove(tracking.token());
        tracking.transition(TrackingState::Detached, BTreeSet::new());
    }

    /// Reconcile entities whose state was recorded on their handles outside
    /// this session. Validates the whole set first; on error nothing changes.
    pub fn apply(&mut self, inputs: Vec<EntryInput>) -> DataResult<()> {
        let mut tokens = HashSet::new();
        let mut keys = HashSet::new();
        for input in &inputs {
            if !tokens.insert(input.token()) || !keys.insert((input.set.name, input.key.clone())) {
                return Err(DataError::duplicate_key(format!(
                    "{} {} appears more than once",
                    input.set.name, input.key
                )));
            }
            if let Some(owner) = self.key_owner(&input.set, &input.key) {
                if owner != input.token() {
                    return Err(already_tracked(&input.set, &input.key));
                }
            }
            if let Some(entry) = self.entries.get(&input.token()) {
                if entry.key != input.key {
                    return Err(DataError::invalid_data(format!(
                        "primary key of tracked {} {} cannot change to {}",
                        entry.set.name, entry.key, input.key
                    )));
                }
            }
        }

        for input in inputs {
            let desired = input.tracking.state();
            let recorded = input.tracking.modified_properties();
            let previous = self.evict(input.token());
            let original = previous.as_ref().and_then(|entry| entry.original.clone());
            let previous_handle = previous.map(|entry| entry.tracking);

            let (original, state, modified) = match desired {
                TrackingState::Detached => (None, TrackingState::Detached, BTreeSet::new()),
                TrackingState::Added => (None, TrackingState::Added, BTreeSet::new()),
                TrackingState::Unchanged => {
                    (Some(input.row.clone()), TrackingState::Unchanged, BTreeSet::new())
                }
                TrackingState::Modified => {
                    let modified = if !recorded.is_empty() {
                        recorded
                    } else {
                        match &original {
                            Some(original) => diff(original, &input.row, &input.set),
                            None => non_key_columns(&input.row, &input.set),
                        }
                    };
                    if modified.is_empty() {
                        (Some(input.row.clone()), TrackingState::Unchanged, modified)
                    } else {
                        (original, TrackingState::Modified, modified)
                    }
                }
                TrackingState::Deleted => (
                    original.or_else(|| Some(input.row.clone())),
                    TrackingState::Deleted,
                    BTreeSet::new(),
                ),
            };

            if let Some(handle) = &previous_handle {
                if !handle.shares_cell_with(&input.tracking) {
                    handle.transition(state, modified.clone());
                }
            }
            if state == TrackingState::Detached {
                input.tracking.transition(state, modified);
            } else {
                self.add(input, original, state, modified);
            }
        }
        Ok(())
    }

    /// Mark entities as persisted. Tracked entries move to `Unchanged`
    /// (deleted ones are evicted); untracked handles are only updated.
    pub fn accept(&mut self, inputs: Vec<EntryInput>) {
        for input in inputs {
            let token = input.token();
            match self.entries.get(&token).map(TrackedEntry::state) {
                Some(TrackingState::Deleted) => {
                    self.remove(token);
                    input.tracking.transition(TrackingState::Detached, BTreeSet::new());
                }
                Some(_) => {
                    if let Some(entry) = self.entries.get_mut(&token) {
                        entry.original = Some(input.row.clone());
                        entry.current = input.row;
                        sync(&entry.tracking, &input.tracking, TrackingState::Unchanged, BTreeSet::new());
                    }
                }
                None => {
                    let state = input.tracking.state().accepted();
                    input.tracking.transition(state, BTreeSet::new());
                }
            }
        }
    }

    /// Bookkeeping after the store acknowledged a batch.
    pub fn accept_committed(&mut self, tokens: &[EntityToken]) {
        for token in tokens {
            match self.entries.get(token).map(TrackedEntry::state) {
                Some(TrackingState::Deleted) => self.remove(*token),
                Some(_) => {
                    if let Some(entry) = self.entries.get_mut(token) {
                        entry.original = Some(entry.current.clone());
                        entry.tracking.transition(TrackingState::Unchanged, BTreeSet::new());
                    }
                }
                None => {}
            }
        }
    }

    /// Pending changes in tracking order.
    pub fn pending(&self) -> Vec<(EntityToken, RowChange)> {
        let mut entries: Vec<(&EntityToken, &TrackedEntry)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state().is_pending())
            .collect();
        entries.sort_by_key(|(_, entry)| entry.seq);

        entries
            .into_iter()
            .filter_map(|(token, entry)| {
                let kind = match entry.state() {
                    TrackingState::Added => ChangeKind::Insert(entry.current.clone()),
                    TrackingState::Modified => ChangeKind::Update {
                        row: entry.current.clone(),
                        properties: entry.tracking.modified_properties(),
                    },
                    TrackingState::Deleted => ChangeKind::Delete,
                    TrackingState::Unchanged | TrackingState::Detached => return None,
                };
                Some((
                    *token,
                    RowChange {
                        set: entry.set,
                        key: entry.key.clone(),
                        kind,
                    },
                ))
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state().is_pending())
            .count()
    }

    /// Discard pending changes: added entries are dropped, the rest revert
    /// to their last known snapshot.
    pub fn rollback(&mut self) {
        let mut tokens: Vec<(bool, EntityToken)> = self
            .entries
            .iter()
            .map(|(token, entry)| (entry.state() != TrackingState::Added, *token))
            .collect();
        // added entries first, so a reused key falls back to its deleted owner
        tokens.sort();
        for (_, token) in tokens {
            match self.entries.get(&token).map(TrackedEntry::state) {
                Some(TrackingState::Added) => self.remove(token),
                Some(TrackingState::Modified | TrackingState::Deleted) => {
                    if let Some(entry) = self.entries.get_mut(&token) {
                        if let Some(original) = &entry.original {
                            entry.current = original.clone();
                        }
                        entry.original = Some(entry.current.clone());
                        entry.tracking.transition(TrackingState::Unchanged, BTreeSet::new());
                        self.keys.insert((entry.set.name, entry.key.clone()), token);
                    }
                }
                _ => {}
            }
        }
    }

    /// Record a freshly loaded column value in both snapshots.
    pub fn refresh_property(&mut self, token: EntityToken, name: &str, value: &serde_json::Value) {
        if let Some(entry) = self.entries.get_mut(&token) {
            entry.current.insert(name.to_string(), value.clone());
            if let Some(original) = entry.original.as_mut() {
                original.insert(name.to_string(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CUSTOMERS: EntitySet = EntitySet::new("customers", &["customer_id"]);

    fn input(tracking: &Tracking, value: serde_json::Value) -> EntryInput {
        let row = value.as_object().cloned().unwrap();
        EntryInput {
            set: CUSTOMERS,
            key: Key::from_row(&row, CUSTOMERS.key).unwrap(),
            row,
            tracking: tracking.clone(),
        }
    }

    fn alfki() -> serde_json::Value {
        json!({"customer_id": "ALFKI", "company_name": "Alfreds Futterkiste", "city": "Berlin"})
    }

    #[test]
    fn attach_then_update_computes_modified_set() {
        let mut tracker = ChangeTracker::default();
        let handle = Tracking::new();
        tracker.attach(input(&handle, alfki())).unwrap();
        assert_eq!(handle.state(), TrackingState::Unchanged);

        tracker
            .update(input(
                &handle,
                json!({"customer_id": "ALFKI", "company_name": "Alfreds", "city": "Berlin"}),
            ))
            .unwrap();
        assert_eq!(handle.state(), TrackingState::Modified);
        assert_eq!(handle.modified_properties(), BTreeSet::from(["company_name".to_string()]));

        // reverting the edit leaves nothing to write
        tracker.update(input(&handle, alfki())).unwrap();
        assert_eq!(handle.state(), TrackingState::Unchanged);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn update_of_untracked_marks_every_non_key_property() {
        let mut tracker = ChangeTracker::default();
        let handle = Tracking::new();
        tracker.update(input(&handle, alfki())).unwrap();

        assert_eq!(handle.state(), TrackingState::Modified);
        assert_eq!(
            handle.modified_properties(),
            BTreeSet::from(["city".to_string(), "company_name".to_string()])
        );
    }

    #[test]
    fn update_of_deleted_entry_cancels_the_delete() {
        let mut tracker = ChangeTracker::default();
        let handle = Tracking::new();
        tracker.attach(input(&handle, alfki())).unwrap();

        tracker.delete(input(&handle, alfki())).unwrap();
        tracker
            .update(input(
                &handle,
                json!({"customer_id": "ALFKI", "company_name": "Alfreds", "city": "Berlin"}),
            ))
            .unwrap();
        assert_eq!(handle.state(), TrackingState::Modified);
        assert_eq!(handle.modified_properties(), BTreeSet::from(["company_name".to_string()]));

        tracker.delete(input(&handle, alfki())).unwrap();
        tracker.update(input(&handle, alfki())).unwrap();
        assert_eq!(handle.state(), TrackingState::Unchanged);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn added_entity_stays_added_and_delete_evicts_it() {
        let mut tracker = ChangeTracker::default();
        let handle = Tracking::new();
        tracker.insert(input(&handle, alfki())).unwrap();
        tracker
            .update(input(&handle, json!({"customer_id": "ALFKI", "city": "Hamburg"})))
            .unwrap();
        assert_eq!(handle.state(), TrackingState::Added);

        tracker.delete(input(&handle, alfki())).unwrap();
        assert_eq!(handle.state(), TrackingState::Detached);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let mut tracker = ChangeTracker::default();
        let first = Tracking::new();
        tracker.attach(input(&first, alfki())).unwrap();

        let second = Tracking::new();
        let err = tracker.insert(input(&second, alfki())).unwrap_err();
        assert_eq!(err.kind(), tessera_core::ErrorKind::DuplicateKey);
        let err = tracker.attach(input(&second, alfki())).unwrap_err();
        assert_eq!(err.kind(), tessera_core::ErrorKind::AlreadyTracked);
        let err = tracker.attach(input(&first, alfki())).unwrap_err();
        assert_eq!(err.kind(), tessera_core::ErrorKind::AlreadyTracked);
        assert_eq!(second.state(), TrackingState::Detached);
    }

    #[test]
    fn deleted_key_can_be_reinserted() {
        let mut tracker = ChangeTracker::default();
        let old = Tracking::new();
        tracker.attach(input(&old, alfki())).unwrap();
        tracker.delete(input(&old, alfki())).unwrap();

        let replacement = Tracking::new();
        tracker.insert(input(&replacement, alfki())).unwrap();
        let kinds: Vec<_> = tracker.pending().into_iter().map(|(_, c)| c.kind).collect();
        assert_eq!(kinds[0], ChangeKind::Delete);
        assert!(matches!(kinds[1], ChangeKind::Insert(_)));

        tracker.rollback();
        assert_eq!(replacement.state(), TrackingState::Detached);
        assert_eq!(old.state(), TrackingState::Unchanged);
        let owner = tracker.by_key(&CUSTOMERS, &Key::from("ALFKI")).unwrap();
        assert!(owner.tracking().shares_cell_with(&old));
    }

    #[test]
    fn pending_preserves_tracking_order() {
        let mut tracker = ChangeTracker::default();
        let deleted = Tracking::new();
        let added = Tracking::new();
        tracker.delete(input(&deleted, json!({"customer_id": "WOLZA"}))).unwrap();
        tracker.insert(input(&added, json!({"customer_id": "COMP1"}))).unwrap();

        let pending = tracker.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].0, deleted.token());
        assert_eq!(pending[0].1.kind, ChangeKind::Delete);
        assert!(matches!(pending[1].1.kind, ChangeKind::Insert(_)));
    }

    #[test]
    fn accept_committed_settles_entries() {
        let mut tracker = ChangeTracker::default();
        let added = Tracking::new();
        let deleted = Tracking::new();
        tracker.insert(input(&added, json!({"customer_id": "COMP1"}))).unwrap();
        tracker.delete(input(&deleted, json!({"customer_id": "WOLZA"}))).unwrap();

        let tokens: Vec<_> = tracker.pending().into_iter().map(|(t, _)| t).collect();
        tracker.accept_committed(&tokens);

        assert_eq!(added.state(), TrackingState::Unchanged);
        assert_eq!(deleted.state(), TrackingState::Detached);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn apply_is_all_or_nothing() {
        let mut tracker = ChangeTracker::default();
        let owner = Tracking::new();
        tracker.attach(input(&owner, alfki())).unwrap();

        let fresh = Tracking::new();
        fresh.mark(TrackingState::Added);
        let clash = Tracking::new();
        clash.mark(TrackingState::Modified);

        let err = tracker
            .apply(vec![
                input(&fresh, json!({"customer_id": "COMP1"})),
                input(&clash, alfki()),
            ])
            .unwrap_err();
        assert_eq!(err.kind(), tessera_core::ErrorKind::AlreadyTracked);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get(fresh.token()).is_none());
    }

    #[test]
    fn apply_uses_recorded_states() {
        let mut tracker = ChangeTracker::default();
        let added = Tracking::new();
        added.mark(TrackingState::Added);
        let modified = Tracking::new();
        modified.transition(TrackingState::Modified, BTreeSet::from(["city".to_string()]));
        let deleted = Tracking::new();
        deleted.mark(TrackingState::Deleted);

        tracker
            .apply(vec![
                input(&added, json!({"customer_id": "COMP1"})),
                input(&modified, alfki()),
                input(&deleted, json!({"customer_id": "WOLZA"})),
            ])
            .unwrap();

        let kinds: Vec<_> = tracker.pending().into_iter().map(|(_, c)| c.kind).collect();
        assert!(matches!(kinds[0], ChangeKind::Insert(_)));
        assert!(matches!(
            &kinds[1],
            ChangeKind::Update { properties, .. } if properties == &BTreeSet::from(["city".to_string()])
        ));
        assert_eq!(kinds[2], ChangeKind::Delete);
    }

    #[test]
    fn rollback_reverts_to_snapshots() {
        let mut tracker = ChangeTracker::default();
        let handle = Tracking::new();
        tracker.attach(input(&handle, alfki())).unwrap();
        tracker
            .update(input(&handle, json!({"customer_id": "ALFKI", "company_name": "x", "city": "y"})))
            .unwrap();
        let added = Tracking::new();
        tracker.insert(input(&added, json!({"customer_id": "COMP1"}))).unwrap();

        tracker.rollback();

        assert_eq!(handle.state(), TrackingState::Unchanged);
        assert_eq!(added.state(), TrackingState::Detached);
        let entry = tracker.get(handle.token()).unwrap();
        assert_eq!(entry.current()["company_name"], json!("Alfreds Futterkiste"));
    }
}
