//! Page state for a live, ordered, paginated query.
//!
//! [`PageState`] is a plain value: every transition goes through
//! [`PageState::reduce`], which builds a fresh state (and a fresh item vector)
//! instead of mutating the previous one. The driver in
//! [`live_query`](super::live_query) publishes each new state as an `Arc`.

use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
};

use serde::Serialize;
use strum_macros::Display;
use thiserror::Error;
use tracing::{debug, trace};

/// A record that can be materialized in a live page.
pub trait LiveRecord: Clone + Send + Sync + 'static {
    /// Unique within a collection and stable across updates.
    type Id: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static;
    /// Total order used to place the record; pages are sorted by it descending.
    type SortKey: Clone + Ord + Debug + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
    fn sort_key(&self) -> Self::SortKey;
}

/// One server-side change to the query result.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<R: LiveRecord> {
    Added(R),
    Modified(R),
    Removed(R::Id),
}

/// Changes delivered together in one notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch<R: LiveRecord> {
    pub changes: Vec<ChangeEvent<R>>,
    /// Number of records in the server-side window after this notification.
    pub window_len: usize,
    /// Total number of records matching the query, when the source knows it.
    pub total: Option<usize>,
}

impl<R: LiveRecord> ChangeBatch<R> {
    pub fn new(changes: Vec<ChangeEvent<R>>, window_len: usize) -> Self {
        Self {
            changes,
            window_len,
            total: None,
        }
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
pub enum SubscriptionError {
    #[error("failed to establish subscription: {0}")]
    Establish(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("subscription terminated: {0}")]
    Terminated(String),
    #[error("subscription closed by source")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    LoadingMore,
    Error,
    ErrorMore,
}

/// Which caller action requested the window the live subscription is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Initial,
    Extended,
}

#[derive(Debug, Clone)]
pub enum PageAction<R: LiveRecord> {
    /// Start (or restart) the initial subscription.
    Open,
    /// Grow the window by one page.
    LoadMore,
    /// A change batch arrived from the live subscription.
    Applied(ChangeBatch<R>),
    /// The first batch of a new subscription. It lists the whole window, so
    /// resident records it does not mention are gone.
    Snapshot(ChangeBatch<R>),
    /// The live subscription failed or was terminated.
    Failed(SubscriptionError),
}

#[derive(Debug, Clone)]
pub struct PageState<R: LiveRecord> {
    items: Vec<R>,
    page_size: usize,
    limit: usize,
    has_more: bool,
    phase: Phase,
    window: Window,
    loading_error: Option<SubscriptionError>,
    loading_more_error: Option<SubscriptionError>,
}

impl<R: LiveRecord> PageState<R> {
    /// An idle state whose first window holds `page_size` records (at least one).
    pub fn new(page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            items: Vec::new(),
            page_size,
            limit: page_size,
            has_more: false,
            phase: Phase::Idle,
            window: Window::Initial,
            loading_error: None,
            loading_more_error: None,
        }
    }

    pub fn items(&self) -> &[R] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of records currently requested from the source.
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    pub fn loading_more(&self) -> bool {
        self.phase == Phase::LoadingMore
    }

    pub fn loading_error(&self) -> Option<&SubscriptionError> {
        self.loading_error.as_ref()
    }

    pub fn loading_more_error(&self) -> Option<&SubscriptionError> {
        self.loading_more_error.as_ref()
    }

    /// True while a subscription has been requested but has not delivered yet.
    pub fn is_pending(&self) -> bool {
        matches!(self.phase, Phase::Loading | Phase::LoadingMore)
    }

    pub fn reduce(&self, action: PageAction<R>) -> Self {
        match action {
            PageAction::Open => self.open(),
            PageAction::LoadMore => self.load_more(),
            PageAction::Applied(batch) => self.apply(batch, false),
            PageAction::Snapshot(batch) => self.apply(batch, true),
            PageAction::Failed(error) => self.fail(error),
        }
    }

    fn open(&self) -> Self {
        Self {
            phase: Phase::Loading,
            window: Window::Initial,
            loading_error: None,
            ..self.clone()
        }
    }

    fn load_more(&self) -> Self {
        match self.phase {
            Phase::Ready if self.has_more => Self {
                limit: self.limit + self.page_size,
                phase: Phase::LoadingMore,
                window: Window::Extended,
                loading_more_error: None,
                ..self.clone()
            },
            // A failed window is retried at the limit it already asked for.
            Phase::Error => Self {
                phase: Phase::Loading,
                loading_error: None,
                ..self.clone()
            },
            Phase::ErrorMore => Self {
                phase: Phase::LoadingMore,
                loading_more_error: None,
                ..self.clone()
            },
            Phase::Idle | Phase::Loading | Phase::LoadingMore | Phase::Ready => {
                trace!(phase = %self.phase, has_more = self.has_more, "load more ignored");
                self.clone()
            }
        }
    }

    fn apply(&self, batch: ChangeBatch<R>, snapshot: bool) -> Self {
        if matches!(self.phase, Phase::Idle | Phase::Error | Phase::ErrorMore) {
            debug!(phase = %self.phase, "dropping change batch outside a live subscription");
            return self.clone();
        }

        let has_more = match batch.total {
            Some(total) => total > self.limit,
            None => batch.window_len >= self.limit,
        };

        let (loading_error, loading_more_error) = match self.phase {
            Phase::Loading => (None, self.loading_more_error.clone()),
            Phase::LoadingMore => (self.loading_error.clone(), None),
            _ => (self.loading_error.clone(), self.loading_more_error.clone()),
        };

        let items = if snapshot {
            let window: HashSet<R::Id> = batch
                .changes
                .iter()
                .filter_map(|change| match change {
                    ChangeEvent::Added(record) | ChangeEvent::Modified(record) => Some(record.id()),
                    ChangeEvent::Removed(_) => None,
                })
                .collect();
            let kept: Vec<R> = self
                .items
                .iter()
                .filter(|record| window.contains(&record.id()))
                .cloned()
                .collect();
            if kept.len() < self.items.len() {
                debug!(dropped = self.items.len() - kept.len(), "snapshot dropped records no longer in the window");
            }
            merge(&kept, batch.changes)
        } else {
            merge(&self.items, batch.changes)
        };

        Self {
            items,
            page_size: self.page_size,
            limit: self.limit,
            has_more,
            phase: Phase::Ready,
            window: self.window,
            loading_error,
            loading_more_error,
        }
    }

    fn fail(&self, error: SubscriptionError) -> Self {
        let extended = match self.phase {
            Phase::Loading => false,
            Phase::LoadingMore => true,
            Phase::Ready => self.window == Window::Extended,
            Phase::Idle | Phase::Error | Phase::ErrorMore => {
                debug!(phase = %self.phase, error = %error, "ignoring failure without a live subscription");
                return self.clone();
            }
        };

        if extended {
            Self {
                phase: Phase::ErrorMore,
                loading_more_error: Some(error),
                ..self.clone()
            }
        } else {
            Self {
                phase: Phase::Error,
                loading_error: Some(error),
                ..self.clone()
            }
        }
    }
}

/// Apply `changes` on top of `items` and return a new vector sorted by sort key
/// descending, then id ascending.
pub fn merge<R: LiveRecord>(items: &[R], changes: Vec<ChangeEvent<R>>) -> Vec<R> {
    let mut by_id: HashMap<R::Id, R> = items.iter().map(|r| (r.id(), r.clone())).collect();

    for change in changes {
        match change {
            ChangeEvent::Added(record) => {
                by_id.insert(record.id(), record);
            }
            ChangeEvent::Modified(record) => {
                let id = record.id();
                if by_id.insert(id.clone(), record).is_none() {
                    // Can happen when the record sat outside a previous window.
                    trace!(id = ?id, "modified record was not resident, inserted");
                }
            }
            ChangeEvent::Removed(id) => {
                if by_id.remove(&id).is_none() {
                    trace!(id = ?id, "removed record was not resident");
                }
            }
        }
    }

    let mut merged: Vec<R> = by_id.into_values().collect();
    merged.sort_by_cached_key(|r| (Reverse(r.sort_key()), r.id()));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        updated_at: u64,
        body: &'static str,
    }

    impl LiveRecord for Note {
        type Id = String;
        type SortKey = u64;

        fn id(&self) -> String {
            self.id.clone()
        }

        fn sort_key(&self) -> u64 {
            self.updated_at
        }
    }

    fn note(id: &str, updated_at: u64) -> Note {
        Note {
            id: id.to_string(),
            updated_at,
            body: "",
        }
    }

    fn ids(state: &PageState<Note>) -> Vec<&str> {
        state.items().iter().map(|n| n.id.as_str()).collect()
    }

    fn assert_sorted(items: &[Note]) {
        for pair in items.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                a.updated_at > b.updated_at || (a.updated_at == b.updated_at && a.id < b.id),
                "{a:?} should sort before {b:?}"
            );
        }
    }

    fn added(notes: impl IntoIterator<Item = Note>) -> Vec<ChangeEvent<Note>> {
        notes.into_iter().map(ChangeEvent::Added).collect()
    }

    /// An opened state that has received `count` records with descending timestamps.
    fn ready_with(count: u64, page_size: usize) -> PageState<Note> {
        let notes = (1..=count).map(|i| note(&format!("n{i:02}"), 1_000 - i));
        PageState::new(page_size)
            .reduce(PageAction::Open)
            .reduce(PageAction::Applied(ChangeBatch::new(
                added(notes),
                count as usize,
            )))
    }

    #[test]
    fn test_open_moves_idle_to_loading() {
        let state = PageState::<Note>::new(25);
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.limit(), 25);

        let opened = state.reduce(PageAction::Open);
        assert!(opened.loading());
        assert!(opened.is_pending());
        assert!(!opened.has_more());
        assert!(opened.is_empty());
    }

    #[test]
    fn test_zero_page_size_is_clamped() {
        let state = PageState::<Note>::new(0);
        assert_eq!(state.page_size(), 1);
        assert_eq!(state.limit(), 1);
    }

    #[test]
    fn test_duplicate_added_events_yield_single_entry() {
        let state = PageState::new(10).reduce(PageAction::Open);
        let state = state.reduce(PageAction::Applied(ChangeBatch::new(
            added([note("a", 5), note("a", 5)]),
            1,
        )));
        let state = state.reduce(PageAction::Applied(ChangeBatch::new(
            added([note("a", 5)]),
            1,
        )));

        assert_eq!(ids(&state), vec!["a"]);
    }

    #[test]
    fn test_added_for_resident_record_updates_in_place() {
        let state = ready_with(3, 10);
        let mut revised = note("n02", 997);
        revised.body = "revised";

        let state = state.reduce(PageAction::Applied(ChangeBatch::new(
            vec![ChangeEvent::Added(revised.clone())],
            3,
        )));

        assert_eq!(state.len(), 3);
        assert_eq!(state.items()[1], revised);
    }

    #[test]
    fn test_items_sorted_descending_with_id_tiebreak() {
        let state = PageState::new(10).reduce(PageAction::Open);
        let state = state.reduce(PageAction::Applied(ChangeBatch::new(
            added([note("c", 1), note("b", 7), note("a", 7), note("d", 9)]),
            4,
        )));

        assert_eq!(ids(&state), vec!["d", "a", "b", "c"]);
        assert_sorted(state.items());
    }

    #[test]
    fn test_modified_moves_record_to_new_position() {
        let state = ready_with(5, 10);
        let state = state.reduce(PageAction::Applied(ChangeBatch::new(
            vec![ChangeEvent::Modified(note("n05", 2_000))],
            5,
        )));

        assert_eq!(ids(&state), vec!["n05", "n01", "n02", "n03", "n04"]);
    }

    #[test]
    fn test_modified_for_absent_record_is_inserted() {
        let state = ready_with(2, 10);
        let state = state.reduce(PageAction::Applied(ChangeBatch::new(
            vec![ChangeEvent::Modified(note("zz", 1))],
            3,
        )));

        assert_eq!(state.len(), 3);
        assert_eq!(ids(&state).last(), Some(&"zz"));
    }

    #[test]
    fn test_removed_deletes_only_that_record() {
        let before = ready_with(5, 10);
        let after = before.reduce(PageAction::Applied(ChangeBatch::new(
            vec![ChangeEvent::Removed("n03".to_string())],
            4,
        )));

        assert_eq!(ids(&after), vec!["n01", "n02", "n04", "n05"]);
        for item in after.items() {
            assert!(before.items().contains(item));
        }
        assert_sorted(after.items());
    }

    #[test]
    fn test_removed_for_absent_record_is_noop() {
        let before = ready_with(3, 10);
        let after = before.reduce(PageAction::Applied(ChangeBatch::new(
            vec![ChangeEvent::Removed("missing".to_string())],
            3,
        )));

        assert_eq!(after.items(), before.items());
    }

    #[test]
    fn test_events_within_batch_apply_in_order() {
        let state = ready_with(2, 10);
        let state = state.reduce(PageAction::Applied(ChangeBatch::new(
            vec![
                ChangeEvent::Added(note("x", 50)),
                ChangeEvent::Modified(note("x", 5_000)),
                ChangeEvent::Removed("n01".to_string()),
            ],
            2,
        )));

        assert_eq!(ids(&state), vec!["x", "n02"]);
        assert_eq!(state.items()[0].updated_at, 5_000);
    }

    #[test]
    fn test_has_more_follows_window_length() {
        let full = ready_with(25, 25);
        assert!(full.has_more());
        assert_eq!(full.phase(), Phase::Ready);

        let short = ready_with(24, 25);
        assert!(!short.has_more());
    }

    #[test]
    fn test_has_more_prefers_total_when_known() {
        let opened = PageState::new(2).reduce(PageAction::Open);
        let exhausted = opened.reduce(PageAction::Applied(
            ChangeBatch::new(added([note("a", 2), note("b", 1)]), 2).with_total(2),
        ));
        assert!(!exhausted.has_more());

        let more = opened.reduce(PageAction::Applied(
            ChangeBatch::new(added([note("a", 2), note("b", 1)]), 2).with_total(3),
        ));
        assert!(more.has_more());
    }

    #[test]
    fn test_load_more_extends_limit_by_page_size() {
        let state = ready_with(25, 25);
        let state = state.reduce(PageAction::LoadMore);

        assert!(state.loading_more());
        assert_eq!(state.limit(), 50);
        assert_eq!(state.len(), 25);
    }

    #[test]
    fn test_load_more_is_ignored_while_pending_or_exhausted() {
        let loading = PageState::<Note>::new(25).reduce(PageAction::Open);
        let after = loading.reduce(PageAction::LoadMore);
        assert!(after.loading());
        assert_eq!(after.limit(), 25);

        let loading_more = ready_with(25, 25).reduce(PageAction::LoadMore);
        let after = loading_more.reduce(PageAction::LoadMore);
        assert!(after.loading_more());
        assert_eq!(after.limit(), 50);

        let exhausted = ready_with(3, 25);
        let after = exhausted.reduce(PageAction::LoadMore);
        assert_eq!(after.phase(), Phase::Ready);
        assert_eq!(after.limit(), 25);

        let idle = PageState::<Note>::new(25).reduce(PageAction::LoadMore);
        assert_eq!(idle.phase(), Phase::Idle);
    }

    #[test]
    fn test_limit_never_decreases() {
        let mut state = ready_with(10, 10);
        let mut last_limit = state.limit();

        for round in 0..20u64 {
            let action = match round % 4 {
                0 => PageAction::LoadMore,
                1 => PageAction::Applied(ChangeBatch::new(
                    added([note(&format!("r{round}"), round)]),
                    state.limit(),
                )),
                2 => PageAction::Failed(SubscriptionError::Closed),
                _ => PageAction::LoadMore,
            };
            state = state.reduce(action);
            assert!(state.limit() >= last_limit);
            last_limit = state.limit();
        }
    }

    #[test]
    fn test_initial_failure_sets_loading_error() {
        let state = PageState::<Note>::new(25)
            .reduce(PageAction::Open)
            .reduce(PageAction::Failed(SubscriptionError::PermissionDenied(
                "recipes".to_string(),
            )));

        assert_eq!(state.phase(), Phase::Error);
        assert!(!state.loading());
        assert!(matches!(
            state.loading_error(),
            Some(SubscriptionError::PermissionDenied(_))
        ));
        assert!(state.loading_more_error().is_none());
        assert!(state.is_empty());
    }

    #[test]
    fn test_load_more_failure_keeps_items_and_has_more() {
        let ready = ready_with(25, 25);
        let pending = ready.reduce(PageAction::LoadMore);
        let failed = pending.reduce(PageAction::Failed(SubscriptionError::Terminated(
            "network lost".to_string(),
        )));

        assert_eq!(failed.phase(), Phase::ErrorMore);
        assert!(!failed.loading_more());
        assert_eq!(failed.items(), ready.items());
        assert_eq!(failed.has_more(), ready.has_more());
        assert!(failed.loading_error().is_none());
        assert_eq!(
            failed.loading_more_error(),
            Some(&SubscriptionError::Terminated("network lost".to_string()))
        );
    }

    #[test]
    fn test_failure_while_ready_reports_against_window_origin() {
        let initial = ready_with(5, 10).reduce(PageAction::Failed(SubscriptionError::Closed));
        assert_eq!(initial.phase(), Phase::Error);
        assert_eq!(initial.len(), 5);

        let extended = ready_with(10, 10)
            .reduce(PageAction::LoadMore)
            .reduce(PageAction::Applied(ChangeBatch::new(Vec::new(), 12)))
            .reduce(PageAction::Failed(SubscriptionError::Closed));
        assert_eq!(extended.phase(), Phase::ErrorMore);
        assert_eq!(extended.loading_more_error(), Some(&SubscriptionError::Closed));
    }

    #[test]
    fn test_errors_recover_only_through_load_more() {
        let errored = PageState::<Note>::new(10)
            .reduce(PageAction::Open)
            .reduce(PageAction::Failed(SubscriptionError::Closed));

        // Batches are not accepted without a live subscription.
        let ignored = errored.reduce(PageAction::Applied(ChangeBatch::new(
            added([note("a", 1)]),
            1,
        )));
        assert_eq!(ignored.phase(), Phase::Error);
        assert!(ignored.is_empty());

        let retry = errored.reduce(PageAction::LoadMore);
        assert!(retry.loading());
        assert_eq!(retry.limit(), 10);
        assert!(retry.loading_error().is_none());

        let failed_more = ready_with(10, 10)
            .reduce(PageAction::LoadMore)
            .reduce(PageAction::Failed(SubscriptionError::Closed));
        let retry_more = failed_more.reduce(PageAction::LoadMore);
        assert!(retry_more.loading_more());
        assert_eq!(retry_more.limit(), 20);
        assert!(retry_more.loading_more_error().is_none());
    }

    #[test]
    fn test_reduce_leaves_previous_state_untouched() {
        let before = ready_with(3, 10);
        let snapshot = before.items().to_vec();

        let _after = before.reduce(PageAction::Applied(ChangeBatch::new(
            vec![
                ChangeEvent::Removed("n01".to_string()),
                ChangeEvent::Added(note("new", 5_000)),
            ],
            3,
        )));

        assert_eq!(before.items(), snapshot.as_slice());
    }

    #[test]
    fn test_snapshot_drops_records_missing_from_new_window() {
        let state = ready_with(2, 2).reduce(PageAction::LoadMore);
        assert_eq!(state.limit(), 4);

        // n02 was deleted while the window was being extended.
        let state = state.reduce(PageAction::Snapshot(
            ChangeBatch::new(added([note("n01", 999), note("n03", 997)]), 2).with_total(2),
        ));

        assert_eq!(ids(&state), vec!["n01", "n03"]);
        assert!(!state.has_more());
        assert_eq!(state.phase(), Phase::Ready);
    }

    #[test]
    fn test_applied_batch_keeps_unmentioned_records() {
        let state = ready_with(3, 10).reduce(PageAction::Applied(ChangeBatch::new(
            added([note("n09", 1)]),
            4,
        )));
        assert_eq!(ids(&state), vec!["n01", "n02", "n03", "n09"]);
    }

    #[test]
    fn test_load_more_scenario_with_reordered_record() {
        // 25 records t1 > t2 > ... > t25, one full page.
        let state = ready_with(25, 25);
        assert_eq!(state.len(), 25);
        assert!(state.has_more());

        let state = state.reduce(PageAction::LoadMore);
        assert_eq!(state.limit(), 50);

        // The resubscribed window re-delivers the first 25, adds 25 older ones
        // and reports one of the originals with a newer timestamp.
        let mut changes: Vec<ChangeEvent<Note>> =
            (1..=25u64).map(|i| ChangeEvent::Added(note(&format!("n{i:02}"), 1_000 - i))).collect();
        changes.extend((26..=50u64).map(|i| ChangeEvent::Added(note(&format!("n{i:02}"), 1_000 - i))));
        changes.push(ChangeEvent::Modified(note("n20", 998)));

        let state = state.reduce(PageAction::Applied(ChangeBatch::new(changes, 50).with_total(50)));

        assert_eq!(state.len(), 50);
        assert_sorted(state.items());
        // n20 now ties with n02 on timestamp and sorts right after it by id.
        assert_eq!(state.items()[1].id, "n02");
        assert_eq!(state.items()[2].id, "n20");
        assert_eq!(state.items()[2].updated_at, 998);
        assert!(!state.has_more());
        assert_eq!(state.phase(), Phase::Ready);
    }
}
