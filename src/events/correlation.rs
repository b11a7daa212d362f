//! Request/response correlation keyed by the protocol request id.
//!
//! Network events for one request arrive as separate notifications.
//! The table folds them into a [`RequestRecord`] per request id and
//! lets callers wait for a specific lifecycle phase.
//!
//! # Phase semantics
//!
//! A wait for a phase is satisfied only when that exact phase has been
//! observed. A request that skips a phase (a failed fetch never reaches
//! `Completed`, a cached response may skip `ResponseReceived`) never
//! satisfies a wait for the skipped phase; the caller's timeout fires
//! instead.
//!
//! # Locking
//!
//! One `parking_lot::Mutex` guards the table. Registering a waiter and
//! checking the already-observed phases happen under the same lock
//! acquisition, so an event recorded after registration cannot be
//! missed.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{EventKind, Header, ResponseData, SessionEvent};

// ============================================================================
// RequestPhase
// ============================================================================

/// Lifecycle phase of a network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestPhase {
    /// The request was sent.
    Sent,
    /// Response headers were received.
    ResponseReceived,
    /// The response body completed.
    Completed,
    /// The fetch failed.
    Failed,
}

impl RequestPhase {
    /// All phases in lifecycle order.
    pub const ALL: [RequestPhase; 4] = [
        RequestPhase::Sent,
        RequestPhase::ResponseReceived,
        RequestPhase::Completed,
        RequestPhase::Failed,
    ];

    /// Returns `true` for phases that end the request lifecycle.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the event kind whose arrival marks this phase.
    #[inline]
    #[must_use]
    pub fn event_kind(self) -> EventKind {
        match self {
            Self::Sent => EventKind::RequestSent,
            Self::ResponseReceived => EventKind::ResponseStarted,
            Self::Completed => EventKind::ResponseCompleted,
            Self::Failed => EventKind::FetchError,
        }
    }

    #[inline]
    fn index(self) -> usize {
        match self {
            Self::Sent => 0,
            Self::ResponseReceived => 1,
            Self::Completed => 2,
            Self::Failed => 3,
        }
    }
}

// ============================================================================
// RequestRecord
// ============================================================================

/// Accumulated view of one network request.
///
/// Handed out by value; a record is a snapshot, not a live view.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Protocol-assigned request id.
    pub id: RequestId,
    /// HTTP method.
    pub method: String,
    /// Request URL.
    pub url: String,
    /// Request headers in wire order.
    pub headers: Vec<Header>,
    /// Response data, once headers were received.
    pub response: Option<ResponseData>,
    /// Error text, once the fetch failed.
    pub error_text: Option<String>,
    /// Most recently observed phase.
    pub phase: RequestPhase,
    /// Phases observed so far, by [`RequestPhase::index`].
    seen: [bool; 4],
}

impl RequestRecord {
    fn new(id: RequestId, phase: RequestPhase) -> Self {
        let mut seen = [false; 4];
        seen[phase.index()] = true;
        Self {
            id,
            method: String::new(),
            url: String::new(),
            headers: Vec::new(),
            response: None,
            error_text: None,
            phase,
            seen,
        }
    }

    /// A record for a request no event has described yet, installed so
    /// a waiter has somewhere to hang.
    fn placeholder(id: RequestId) -> Self {
        let mut record = Self::new(id, RequestPhase::Sent);
        record.seen = [false; 4];
        record
    }

    /// Returns `true` if `phase` has been observed for this request.
    #[inline]
    #[must_use]
    pub fn phase_seen(&self, phase: RequestPhase) -> bool {
        self.seen[phase.index()]
    }

    /// Returns `true` once any event has described this request.
    #[inline]
    #[must_use]
    pub fn any_phase_seen(&self) -> bool {
        RequestPhase::ALL.iter().any(|&phase| self.phase_seen(phase))
    }

    /// Returns `true` once the request reached a terminal phase.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase_seen(RequestPhase::Completed) || self.phase_seen(RequestPhase::Failed)
    }

    fn mark(&mut self, phase: RequestPhase) {
        self.seen[phase.index()] = true;
        self.phase = phase;
    }
}

// ============================================================================
// Table internals
// ============================================================================

/// Outcome of registering a phase wait.
pub enum WaitOutcome {
    /// The phase was already observed; the record is a snapshot.
    Ready(RequestRecord),
    /// The phase is pending; resolve via the receiver or cancel by id.
    Pending(u64, oneshot::Receiver<Result<RequestRecord>>),
}

struct PhaseWaiter {
    id: u64,
    phase: RequestPhase,
    tx: Option<oneshot::Sender<Result<RequestRecord>>>,
}

struct TableEntry {
    record: RequestRecord,
    waiters: Vec<PhaseWaiter>,
    /// Set when the record reached a terminal phase; drives retention.
    terminal_at: Option<Instant>,
}

struct TableState {
    entries: FxHashMap<RequestId, TableEntry>,
    next_waiter_id: u64,
    closed: bool,
}

// ============================================================================
// CorrelationTable
// ============================================================================

/// Correlation table folding network events into per-request records.
pub(crate) struct CorrelationTable {
    state: Mutex<TableState>,
    /// How long terminal records are kept for late lookups.
    retention: Duration,
    /// Upper bound on retained records.
    max_records: usize,
}

impl CorrelationTable {
    /// Creates a table with the given retention policy.
    pub fn new(retention: Duration, max_records: usize) -> Self {
        Self {
            state: Mutex::new(TableState {
                entries: FxHashMap::default(),
                next_waiter_id: 0,
                closed: false,
            }),
            retention,
            max_records,
        }
    }

    // ========================================================================
    // Event ingestion
    // ========================================================================

    /// Folds one event into the table.
    ///
    /// Non-network events are ignored. Waiters for the exact phase the
    /// event carries are resolved with a snapshot taken after the fold.
    pub fn record_event(&self, event: &SessionEvent) {
        let Some(id) = event.request_id() else {
            return;
        };
        let phase = match event {
            SessionEvent::RequestSent { .. } => RequestPhase::Sent,
            SessionEvent::ResponseStarted { .. } => RequestPhase::ResponseReceived,
            SessionEvent::ResponseCompleted { .. } => RequestPhase::Completed,
            SessionEvent::FetchError { .. } => RequestPhase::Failed,
            SessionEvent::ConsoleEntry(_) => return,
        };

        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let entry = state
            .entries
            .entry(id.clone())
            .or_insert_with(|| TableEntry {
                record: RequestRecord::new(id.clone(), phase),
                waiters: Vec::new(),
                terminal_at: None,
            });

        entry.record.mark(phase);
        match event {
            SessionEvent::RequestSent { request, .. } => {
                entry.record.method = request.method.clone();
                entry.record.url = request.url.clone();
                entry.record.headers = request.headers.clone();
            }
            SessionEvent::ResponseStarted { response, .. }
            | SessionEvent::ResponseCompleted { response, .. } => {
                entry.record.response = Some(response.clone());
            }
            SessionEvent::FetchError { error_text, .. } => {
                entry.record.error_text = Some(error_text.clone());
            }
            SessionEvent::ConsoleEntry(_) => {}
        }
        if phase.is_terminal() && entry.terminal_at.is_none() {
            entry.terminal_at = Some(Instant::now());
        }

        // Resolve waiters for this exact phase only.
        let snapshot = entry.record.clone();
        entry.waiters.retain_mut(|waiter| {
            if waiter.phase != phase {
                return true;
            }
            if let Some(tx) = waiter.tx.take() {
                let _ = tx.send(Ok(snapshot.clone()));
            }
            false
        });

        trace!(request = %id, ?phase, "Recorded request phase");
        Self::evict_locked(&mut state, self.retention, self.max_records);
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Registers a wait for `phase` on request `id`.
    ///
    /// If the phase was already observed, returns the record
    /// immediately. Otherwise a waiter is installed under the same lock
    /// acquisition, so no event can slip between check and wait. A
    /// request id the table has never seen gets a placeholder entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] after [`close`](Self::close).
    pub fn begin_wait(&self, id: &RequestId, phase: RequestPhase) -> Result<WaitOutcome> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::SessionClosed);
        }

        if let Some(entry) = state.entries.get(id)
            && entry.record.phase_seen(phase)
        {
            return Ok(WaitOutcome::Ready(entry.record.clone()));
        }

        let waiter_id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();

        let entry = state
            .entries
            .entry(id.clone())
            .or_insert_with(|| TableEntry {
                record: RequestRecord::placeholder(id.clone()),
                waiters: Vec::new(),
                terminal_at: None,
            });
        entry.waiters.push(PhaseWaiter {
            id: waiter_id,
            phase,
            tx: Some(tx),
        });

        Ok(WaitOutcome::Pending(waiter_id, rx))
    }

    /// Removes a waiter that timed out. Idempotent.
    pub fn cancel_wait(&self, id: &RequestId, waiter_id: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.waiters.retain(|waiter| waiter.id != waiter_id);
        }
        Self::evict_locked(&mut state, self.retention, self.max_records);
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Returns a snapshot of the record for `id`, if retained.
    #[must_use]
    pub fn get(&self, id: &RequestId) -> Option<RequestRecord> {
        let state = self.state.lock();
        state
            .entries
            .get(id)
            // Placeholder entries from `begin_wait` have no observed phase.
            .filter(|entry| entry.record.any_phase_seen())
            .map(|entry| entry.record.clone())
    }

    /// Number of retained records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Fails every pending waiter and drops all records. Idempotent.
    pub fn close<F>(&self, make_error: F)
    where
        F: Fn() -> Error,
    {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let mut failed = 0usize;
        for (_, mut entry) in state.entries.drain() {
            for waiter in &mut entry.waiters {
                if let Some(tx) = waiter.tx.take() {
                    let _ = tx.send(Err(make_error()));
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            debug!(count = failed, "Failed pending request waiters on close");
        }
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Drops waiterless placeholders and terminal records past
    /// retention, then enforces the record cap by evicting the oldest
    /// terminal records. Entries with pending waiters are never
    /// evicted.
    fn evict_locked(state: &mut TableState, retention: Duration, max_records: usize) {
        let now = Instant::now();
        state.entries.retain(|_, entry| {
            if !entry.waiters.is_empty() {
                return true;
            }
            // A placeholder whose last waiter cancelled has nothing
            // left to describe or resolve.
            if !entry.record.any_phase_seen() {
                return false;
            }
            match entry.terminal_at {
                Some(at) => now.duration_since(at) < retention,
                None => true,
            }
        });

        while state.entries.len() > max_records {
            let oldest = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.waiters.is_empty() && entry.terminal_at.is_some())
                .min_by_key(|(_, entry)| entry.terminal_at)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    state.entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
