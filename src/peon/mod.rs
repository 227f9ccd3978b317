//! Per-server command queues for loading and dropping segments.
//!
//! Every server of the cluster gets its own [`LoadQueuePeon`]. Callers only enqueue requests;
//! the peon decides when to send them. Enqueueing never blocks and never talks to the network.
//! The peon's [drain loop](LoadQueuePeon::run) pops queued commands up to a per-server ceiling
//! of outstanding commands and sends each one as an independent task. When a command finishes
//! (acknowledged, rejected or timed out), all callbacks that were attached to it are invoked
//! exactly once.
//!
//! Failed commands are not retried. The next coordinator cycle sees that the segment is still
//! present (or still missing) and enqueues the command again.

pub use self::{
    client::{SegmentServerClient, TcpServerClient},
    registry::{PeonRegistry, RegistryChanges},
};
use crate::{
    config::LoadQueueConfig, messages::SegmentCommand, CommandFailure, CommandResult,
    DataSegment, SegmentAction, SegmentId,
};
use futures::{future::BoxFuture, FutureExt};
use std::{
    collections::{btree_map, BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

mod client;
mod registry;

/// Invoked once when a queued command finishes.
pub type LoadPeonCallback = Box<dyn FnOnce(CommandResult) + Send + 'static>;

/// A callback that ignores the command result.
pub fn no_op_callback() -> LoadPeonCallback {
    Box::new(|_| {})
}

/// A single command task created by [`LoadQueuePeon::drain_and_dispatch`].
pub type DispatchTask = BoxFuture<'static, ()>;

/// The result of enqueueing a load or drop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new command was added to the queue.
    Queued,
    /// The same command was already queued or in flight. The callback was attached to it and
    /// no additional command will be sent.
    AlreadyPending,
    /// The peon is stopped. The callback was invoked with [`CommandFailure::PeonStopped`].
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HolderState {
    Queued,
    InFlight,
}

struct SegmentHolder {
    segment: DataSegment,
    state: HolderState,
    callbacks: Vec<LoadPeonCallback>,
}

#[derive(Default)]
struct PeonState {
    segments_to_load: BTreeMap<SegmentId, SegmentHolder>,
    segments_to_drop: BTreeMap<SegmentId, SegmentHolder>,
    load_queue: VecDeque<SegmentId>,
    drop_queue: VecDeque<SegmentId>,
    segments_marked_to_drop: BTreeSet<DataSegment>,
    in_flight: usize,
    queued_size_bytes: u64,
    failed_assign_count: usize,
    stopped: bool,
}

impl PeonState {
    fn holders(&self, action: SegmentAction) -> &BTreeMap<SegmentId, SegmentHolder> {
        match action {
            SegmentAction::Load => &self.segments_to_load,
            SegmentAction::Drop => &self.segments_to_drop,
        }
    }

    fn holders_mut(&mut self, action: SegmentAction) -> &mut BTreeMap<SegmentId, SegmentHolder> {
        match action {
            SegmentAction::Load => &mut self.segments_to_load,
            SegmentAction::Drop => &mut self.segments_to_drop,
        }
    }

    fn queue_mut(&mut self, action: SegmentAction) -> &mut VecDeque<SegmentId> {
        match action {
            SegmentAction::Load => &mut self.load_queue,
            SegmentAction::Drop => &mut self.drop_queue,
        }
    }

    /// Drops are sent before loads to free up space on the server first.
    fn pop_next(&mut self) -> Option<(SegmentAction, SegmentId)> {
        if let Some(id) = self.drop_queue.pop_front() {
            return Some((SegmentAction::Drop, id));
        }
        self.load_queue
            .pop_front()
            .map(|id| (SegmentAction::Load, id))
    }
}

/// The command queue of a single server.
///
/// All state lives behind one lock that is only held for short, non-blocking sections.
/// Callbacks are never invoked while the lock is held.
pub struct LoadQueuePeon {
    server_name: String,
    config: LoadQueueConfig,
    client: Arc<dyn SegmentServerClient>,
    state: Mutex<PeonState>,
    wake_tx: smol::channel::Sender<()>,
    wake_rx: smol::channel::Receiver<()>,
}

impl LoadQueuePeon {
    /// Creates a peon for the given server.
    ///
    /// A `max_outstanding` of zero is raised to one so that queued commands are still sent.
    pub fn new(
        server_name: impl Into<String>,
        mut config: LoadQueueConfig,
        client: Arc<dyn SegmentServerClient>,
    ) -> Self {
        let server_name = server_name.into();
        if let Err(err) = config.validate() {
            log::warn!("Load queue of server {}: {}, using 1", server_name, err);
            config.max_outstanding = 1;
        }
        let (wake_tx, wake_rx) = smol::channel::bounded(1);
        Self {
            server_name,
            config,
            client,
            state: Default::default(),
            wake_tx,
            wake_rx,
        }
    }

    /// The name of the managed server.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The client used to reach the managed server.
    pub fn client(&self) -> &Arc<dyn SegmentServerClient> {
        &self.client
    }

    /// Requests that the server drops the given segment.
    ///
    /// If a drop of the segment is already queued or in flight, no second command is sent and
    /// `callback` is invoked together with the callbacks of the pending command.
    pub fn enqueue_drop(&self, segment: DataSegment, callback: LoadPeonCallback) -> EnqueueOutcome {
        self.enqueue(SegmentAction::Drop, segment, callback)
    }

    /// Requests that the server loads the given segment.
    ///
    /// Deduplicated like [`enqueue_drop`](Self::enqueue_drop). The segment size is added to
    /// the [load queue size](Self::load_queue_size_bytes) until the command finishes.
    pub fn enqueue_load(&self, segment: DataSegment, callback: LoadPeonCallback) -> EnqueueOutcome {
        self.enqueue(SegmentAction::Load, segment, callback)
    }

    fn enqueue(
        &self,
        action: SegmentAction,
        segment: DataSegment,
        callback: LoadPeonCallback,
    ) -> EnqueueOutcome {
        let mut state = self.lock();
        if state.stopped {
            drop(state);
            callback(Err(CommandFailure::PeonStopped));
            return EnqueueOutcome::Rejected;
        }

        let id = segment.id().clone();
        let size = segment.size_or_zero();
        let outcome = match state.holders_mut(action).entry(id.clone()) {
            btree_map::Entry::Occupied(mut entry) => {
                entry.get_mut().callbacks.push(callback);
                EnqueueOutcome::AlreadyPending
            }
            btree_map::Entry::Vacant(entry) => {
                entry.insert(SegmentHolder {
                    segment,
                    state: HolderState::Queued,
                    callbacks: vec![callback],
                });
                EnqueueOutcome::Queued
            }
        };

        if outcome == EnqueueOutcome::Queued {
            state.queue_mut(action).push_back(id);
            if action == SegmentAction::Load {
                state.queued_size_bytes = state.queued_size_bytes.saturating_add(size);
            }
            drop(state);
            self.wake();
        }
        outcome
    }

    /// The segments that are queued or in flight for dropping.
    pub fn segments_to_drop(&self) -> BTreeSet<DataSegment> {
        self.segments(SegmentAction::Drop)
    }

    /// The segments that are queued or in flight for loading.
    pub fn segments_to_load(&self) -> BTreeSet<DataSegment> {
        self.segments(SegmentAction::Load)
    }

    fn segments(&self, action: SegmentAction) -> BTreeSet<DataSegment> {
        self.lock()
            .holders(action)
            .values()
            .map(|holder| holder.segment.clone())
            .collect()
    }

    /// Returns `true` if a drop of the given segment is queued or in flight.
    pub fn is_dropping(&self, id: &SegmentId) -> bool {
        self.lock().segments_to_drop.contains_key(id)
    }

    /// Returns `true` if a load of the given segment is queued or in flight.
    pub fn is_loading(&self, id: &SegmentId) -> bool {
        self.lock().segments_to_load.contains_key(id)
    }

    /// Remembers that the segment is about to be dropped, without queueing a command yet.
    pub fn mark_segment_to_drop(&self, segment: DataSegment) {
        self.lock().segments_marked_to_drop.insert(segment);
    }

    /// Forgets a segment previously passed to [`mark_segment_to_drop`](Self::mark_segment_to_drop).
    pub fn unmark_segment_to_drop(&self, id: &SegmentId) {
        self.lock().segments_marked_to_drop.remove(id);
    }

    /// The segments that are marked to be dropped.
    pub fn segments_marked_to_drop(&self) -> BTreeSet<DataSegment> {
        self.lock().segments_marked_to_drop.clone()
    }

    /// The total size of all segments that are queued or in flight for loading.
    pub fn load_queue_size_bytes(&self) -> u64 {
        self.lock().queued_size_bytes
    }

    /// The number of load and drop commands that are queued or in flight.
    pub fn number_of_segments_in_queue(&self) -> usize {
        let state = self.lock();
        state.segments_to_load.len() + state.segments_to_drop.len()
    }

    /// The number of commands that were sent but did not finish yet.
    pub fn outstanding_commands(&self) -> usize {
        self.lock().in_flight
    }

    /// Returns the number of failed loads since the last call and resets the counter.
    pub fn get_and_reset_failed_assign_count(&self) -> usize {
        std::mem::take(&mut self.lock().failed_assign_count)
    }

    /// Returns `true` after [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Takes queued commands until the outstanding ceiling is reached and returns one task per
    /// taken command.
    ///
    /// The commands count as in flight immediately. Each task sends its command, waits for the
    /// acknowledgement up to the configured timeout and then completes the command. The caller
    /// decides where the tasks run; [`run`](Self::run) spawns them on the `smol` executor.
    pub fn drain_and_dispatch(self: &Arc<Self>) -> Vec<DispatchTask> {
        let mut commands = Vec::new();
        {
            let mut state = self.lock();
            if state.stopped {
                return Vec::new();
            }
            while state.in_flight < self.config.max_outstanding {
                let (action, id) = match state.pop_next() {
                    Some(next) => next,
                    None => break,
                };
                let segment = match state.holders_mut(action).get_mut(&id) {
                    Some(holder) => {
                        holder.state = HolderState::InFlight;
                        holder.segment.clone()
                    }
                    None => continue,
                };
                state.in_flight += 1;
                commands.push(SegmentCommand::new(action, segment));
            }
        }

        commands
            .into_iter()
            .map(|command| {
                let peon = Arc::clone(self);
                async move { peon.dispatch(command).await }.boxed()
            })
            .collect()
    }

    async fn dispatch(&self, command: SegmentCommand) {
        let action = command.action;
        let id = command.segment.id().clone();
        let timeout = self.config.command_timeout();
        log::debug!(
            "Server {}: sending {} command for segment {}.",
            self.server_name,
            action,
            id
        );

        let result = smol::future::or(self.client.execute(command), async move {
            smol::Timer::after(timeout).await;
            Err(CommandFailure::Timeout(timeout))
        })
        .await;

        self.complete(action, &id, result);
    }

    fn complete(&self, action: SegmentAction, id: &SegmentId, result: CommandResult) {
        let callbacks = {
            let mut state = self.lock();
            match state.holders_mut(action).remove(id) {
                Some(holder) => {
                    if holder.state == HolderState::InFlight {
                        state.in_flight = state.in_flight.saturating_sub(1);
                    }
                    if action == SegmentAction::Load {
                        state.queued_size_bytes = state
                            .queued_size_bytes
                            .saturating_sub(holder.segment.size_or_zero());
                        if result.is_err() {
                            state.failed_assign_count += 1;
                        }
                    }
                    holder.callbacks
                }
                // the peon was stopped while the command was in flight
                None => Vec::new(),
            }
        };

        match &result {
            Ok(()) => log::debug!(
                "Server {} completed {} of segment {}.",
                self.server_name,
                action,
                id
            ),
            Err(err) => log::warn!(
                "Server {} failed to {} segment {}: {}",
                self.server_name,
                action,
                id,
                err
            ),
        }

        for callback in callbacks {
            callback(result.clone());
        }
        self.wake();
    }

    /// Fails all queued and in-flight commands and rejects future requests.
    ///
    /// Also ends the [drain loop](Self::run).
    pub fn stop(&self) {
        let holders = {
            let mut state = self.lock();
            state.stopped = true;
            state.load_queue.clear();
            state.drop_queue.clear();
            state.segments_marked_to_drop.clear();
            state.in_flight = 0;
            state.queued_size_bytes = 0;
            let mut holders: Vec<_> = std::mem::take(&mut state.segments_to_drop)
                .into_values()
                .collect();
            holders.extend(std::mem::take(&mut state.segments_to_load).into_values());
            holders
        };
        self.wake_tx.close();

        for holder in holders {
            for callback in holder.callbacks {
                callback(Err(CommandFailure::PeonStopped));
            }
        }
    }

    /// Runs the drain loop until the peon is stopped.
    ///
    /// The queue is drained whenever a request is enqueued or a command finishes, and
    /// additionally every `drain_period` as a safety net.
    pub async fn run(self: Arc<Self>) {
        log::info!("Starting load queue for server {}.", self.server_name);
        loop {
            for task in self.drain_and_dispatch() {
                smol::spawn(task).detach();
            }

            let drain_period = self.config.drain_period();
            let woken = smol::future::or(async { self.wake_rx.recv().await.is_ok() }, async {
                smol::Timer::after(drain_period).await;
                true
            })
            .await;
            if !woken || self.is_stopped() {
                break;
            }
        }
        log::info!("Load queue for server {} stopped.", self.server_name);
    }

    fn wake(&self) {
        // a full channel means that a wakeup is already pending
        let _ = self.wake_tx.try_send(());
    }

    fn lock(&self) -> MutexGuard<'_, PeonState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for LoadQueuePeon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadQueuePeon")
            .field("server_name", &self.server_name)
            .field("config", &self.config)
            .finish()
    }
}
