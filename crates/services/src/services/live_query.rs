//! Live paginated query handle.
//!
//! A [`PaginatedLiveQuery`] owns one driver task. The driver holds the only
//! [`PageState`], the only live [`Subscription`], and processes caller commands
//! and change batches one at a time, publishing every new state through a
//! `watch` channel.

use std::{
    fmt::Debug,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pagination::{ChangeBatch, LiveRecord, PageAction, PageState, SubscriptionError};

type BatchResult<R> = Result<ChangeBatch<R>, SubscriptionError>;

/// Remote ordered query that can be subscribed to at a given window size.
#[async_trait]
pub trait LiveSource: Send + Sync + 'static {
    type Record: LiveRecord;
    type Query: Clone + Debug + Send + Sync + 'static;

    /// Subscribe to the first `limit` records of `query`.
    ///
    /// The first batch delivered must describe the whole window: resident
    /// records it does not list are dropped from the page.
    async fn subscribe(
        &self,
        query: &Self::Query,
        limit: usize,
    ) -> Result<Subscription<Self::Record>, SubscriptionError>;
}

/// Receiving end of a live subscription. Dropping it cancels the producer.
pub struct Subscription<R: LiveRecord> {
    batches: mpsc::Receiver<BatchResult<R>>,
    cancel: CancellationToken,
}

impl<R: LiveRecord> Subscription<R> {
    /// Create a connected sender/subscription pair for a source implementation.
    pub fn channel(capacity: usize) -> (BatchSender<R>, Self) {
        let (tx, batches) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        (
            BatchSender {
                tx,
                cancel: cancel.clone(),
            },
            Self { batches, cancel },
        )
    }

    /// Next batch, or `None` once the producer has gone away.
    pub async fn next_batch(&mut self) -> Option<BatchResult<R>> {
        self.batches.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<R: LiveRecord> Drop for Subscription<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Producing end of a [`Subscription`].
#[derive(Clone)]
pub struct BatchSender<R: LiveRecord> {
    tx: mpsc::Sender<BatchResult<R>>,
    cancel: CancellationToken,
}

impl<R: LiveRecord> BatchSender<R> {
    /// Deliver a batch. Returns false once the subscription is gone.
    pub async fn send(&self, batch: ChangeBatch<R>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(Ok(batch)).await.is_ok()
    }

    /// Terminate the subscription with `error`.
    pub async fn fail(&self, error: SubscriptionError) {
        if !self.cancel.is_cancelled() {
            let _ = self.tx.send(Err(error)).await;
        }
    }

    /// Resolves when the subscriber cancels or drops the subscription.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Close state shared by a handle and its driver.
///
/// The driver publishes and attaches subscriptions while holding the lock, so
/// once [`Lifecycle::close`] returns nothing more is published and the live
/// subscription is already cancelled.
#[derive(Default)]
struct Lifecycle {
    closed: CancellationToken,
    subscription: Mutex<Option<CancellationToken>>,
}

impl Lifecycle {
    /// The subscription slot, or `None` once closed.
    fn open_guard(&self) -> Option<MutexGuard<'_, Option<CancellationToken>>> {
        let slot = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        (!self.closed.is_cancelled()).then_some(slot)
    }

    /// Record `token` as the live subscription. Cancels it and returns false when closed.
    fn attach(&self, token: CancellationToken) -> bool {
        match self.open_guard() {
            Some(mut slot) => {
                *slot = Some(token);
                true
            }
            None => {
                token.cancel();
                false
            }
        }
    }

    fn detach(&self) {
        if let Some(mut slot) = self.open_guard() {
            slot.take();
        }
    }

    fn close(&self) {
        self.closed.cancel();
        let mut slot = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = slot.take() {
            token.cancel();
        }
    }
}

enum Command<Q> {
    LoadMore,
    Reopen { query: Q, generation: u64 },
}

/// Caller-facing handle over a live, paginated query.
///
/// Must be opened inside a Tokio runtime. Dropping the handle closes it.
pub struct PaginatedLiveQuery<S: LiveSource> {
    commands: mpsc::UnboundedSender<Command<S::Query>>,
    state: watch::Receiver<Arc<PageState<S::Record>>>,
    generation: Arc<AtomicU64>,
    lifecycle: Arc<Lifecycle>,
    task: JoinHandle<()>,
}

impl<S: LiveSource> PaginatedLiveQuery<S> {
    pub fn open(source: Arc<S>, query: S::Query, page_size: usize) -> Self {
        let initial = Arc::new(PageState::new(page_size).reduce(PageAction::Open));
        let (publisher, state) = watch::channel(Arc::clone(&initial));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));
        let lifecycle = Arc::new(Lifecycle::default());

        info!(query = ?query, page_size = initial.page_size(), "Opening live query");

        let driver = Driver {
            source,
            query,
            page_size: initial.page_size(),
            state: initial,
            publisher,
            generation: Arc::clone(&generation),
            lifecycle: Arc::clone(&lifecycle),
            epoch: 0,
            subscription: None,
            awaiting_snapshot: false,
        };
        let task = tokio::spawn(driver.run(command_rx));

        Self {
            commands,
            state,
            generation,
            lifecycle,
            task,
        }
    }

    /// Latest published state.
    pub fn state(&self) -> Arc<PageState<S::Record>> {
        Arc::clone(&self.state.borrow())
    }

    /// A receiver that observes every published state.
    pub fn watch(&self) -> watch::Receiver<Arc<PageState<S::Record>>> {
        self.state.clone()
    }

    /// Wait for the next published state. Returns `None` once the driver has stopped.
    pub async fn changed(&mut self) -> Option<Arc<PageState<S::Record>>> {
        self.state.changed().await.ok()?;
        Some(Arc::clone(&self.state.borrow_and_update()))
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&PageState<S::Record>) -> bool,
    ) -> Option<Arc<PageState<S::Record>>> {
        let state = self
            .state
            .wait_for(|state| predicate(&**state))
            .await
            .ok()?;
        Some(Arc::clone(&state))
    }

    /// Ask for one more page. Ignored while a load is in flight or the query is exhausted.
    pub fn load_more(&self) {
        let _ = self.commands.send(Command::LoadMore);
    }

    /// Replace the query, discarding all state from the previous one.
    pub fn reopen(&self, query: S::Query) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.commands.send(Command::Reopen { query, generation });
    }

    /// Cancel the live subscription and stop publishing. Both hold as soon as this returns.
    pub fn close(self) {}
}

impl<S: LiveSource> Drop for PaginatedLiveQuery<S> {
    fn drop(&mut self) {
        self.lifecycle.close();
        self.task.abort();
    }
}

struct Driver<S: LiveSource> {
    source: Arc<S>,
    query: S::Query,
    page_size: usize,
    state: Arc<PageState<S::Record>>,
    publisher: watch::Sender<Arc<PageState<S::Record>>>,
    generation: Arc<AtomicU64>,
    lifecycle: Arc<Lifecycle>,
    epoch: u64,
    subscription: Option<Subscription<S::Record>>,
    /// The next batch is the first of the current subscription.
    awaiting_snapshot: bool,
}

impl<S: LiveSource> Driver<S> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<S::Query>>) {
        self.resubscribe().await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::LoadMore) => {
                        if self.dispatch(PageAction::LoadMore) {
                            self.resubscribe().await;
                        }
                    }
                    Some(Command::Reopen { query, generation }) => {
                        self.reopen(query, generation).await;
                    }
                    None => break,
                },
                batch = next_batch(&mut self.subscription) => match batch {
                    Some(Ok(batch)) => {
                        let snapshot = std::mem::take(&mut self.awaiting_snapshot);
                        debug!(
                            changes = batch.changes.len(),
                            window_len = batch.window_len,
                            total = ?batch.total,
                            snapshot,
                            "Applying change batch"
                        );
                        if snapshot {
                            self.dispatch(PageAction::Snapshot(batch));
                        } else {
                            self.dispatch(PageAction::Applied(batch));
                        }
                    }
                    Some(Err(error)) => {
                        warn!(query = ?self.query, error = %error, "Live query subscription failed");
                        self.drop_subscription();
                        self.dispatch(PageAction::Failed(error));
                    }
                    None => {
                        warn!(query = ?self.query, "Live query subscription closed by source");
                        self.drop_subscription();
                        self.dispatch(PageAction::Failed(SubscriptionError::Closed));
                    }
                },
            }
        }

        self.drop_subscription();
        debug!(query = ?self.query, "Live query driver stopped");
    }

    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.epoch && !self.lifecycle.closed.is_cancelled()
    }

    /// Reduce `action` into a new published state.
    /// Returns true when the transition asks for a new subscription.
    fn dispatch(&mut self, action: PageAction<S::Record>) -> bool {
        if !self.is_current() {
            debug!(epoch = self.epoch, "Discarding transition for a stale query generation");
            return false;
        }

        let was_pending = self.state.is_pending();
        let next = Arc::new(self.state.reduce(action));
        let resubscribe = next.is_pending() && !was_pending;

        if next.phase() != self.state.phase() {
            debug!(from = %self.state.phase(), to = %next.phase(), limit = next.limit(), "Live query transition");
        }

        let Some(_open) = self.lifecycle.open_guard() else {
            return false;
        };
        self.state = Arc::clone(&next);
        self.publisher.send_replace(next);
        resubscribe
    }

    async fn reopen(&mut self, query: S::Query, generation: u64) {
        self.drop_subscription();
        if generation != self.generation.load(Ordering::SeqCst) {
            // A newer reopen is already queued behind this one.
            return;
        }

        info!(query = ?query, "Reopening live query");
        self.query = query;
        self.epoch = generation;
        self.state = Arc::new(PageState::new(self.page_size));
        if self.dispatch(PageAction::Open) {
            self.resubscribe().await;
        }
    }

    /// Cancel the current subscription (if any), then subscribe at the current limit.
    async fn resubscribe(&mut self) {
        self.drop_subscription();

        let limit = self.state.limit();
        match self.source.subscribe(&self.query, limit).await {
            Ok(subscription) => {
                if self.is_current() && self.lifecycle.attach(subscription.cancel.clone()) {
                    debug!(query = ?self.query, limit, "Live query subscribed");
                    self.subscription = Some(subscription);
                    self.awaiting_snapshot = true;
                }
            }
            Err(error) => {
                warn!(query = ?self.query, limit, error = %error, "Failed to subscribe live query");
                self.dispatch(PageAction::Failed(error));
            }
        }
    }

    fn drop_subscription(&mut self) {
        self.awaiting_snapshot = false;
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
            self.lifecycle.detach();
        }
    }
}

async fn next_batch<R: LiveRecord>(
    subscription: &mut Option<Subscription<R>>,
) -> Option<BatchResult<R>> {
    match subscription {
        Some(subscription) => subscription.next_batch().await,
        None => std::future::pending().await,
    }
}
