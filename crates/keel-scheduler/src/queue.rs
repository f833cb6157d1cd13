//! One batch of tool calls: validate, authorize, run, deliver in order.
//!
//! Permission checks run in parallel; prompts are shown one at a time in
//! request order. Concurrency-safe calls then run together against the
//! context as it stood when execution began. Once all of them have ended, the
//! remaining calls run one after another, each seeing the context modifiers
//! of every result finalized before it. Progress is relayed as it arrives;
//! final results are released strictly in request order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future;
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use keel_core::{
    Behavior, DecisionReason, PermissionDecision, PermissionEngine, PermissionPrompter,
    permission_request, resolve_ask,
};
use keel_tools::{
    AuditEntry, AuditLogger, AuditResult, ContextModifier, ContextSnapshot, ExecutionContext,
    FailureKind, ToolCallRequest, ToolChunk, ToolContext, ToolDescriptor, ToolFailure,
    ToolRegistry, ValidationError,
};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::entry::{CallOutcome, EntryState, QueueEntry};
use crate::error::SchedulerError;

pub const DEFAULT_CHUNK_BUFFER: usize = 64;

/// Something the caller should see while a batch runs.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    State {
        index: usize,
        tool_use_id: String,
        state: EntryState,
    },
    /// Relayed as soon as the tool sends it, in any order across calls.
    Progress {
        index: usize,
        tool_use_id: String,
        text: String,
    },
    /// Final result of a call, emitted in request order.
    Finalized(CallResult),
}

#[derive(Debug, Clone)]
pub struct CallResult {
    pub index: usize,
    pub tool_use_id: String,
    pub tool_id: String,
    pub decision: Option<PermissionDecision>,
    pub outcome: CallOutcome,
}

/// Results of a batch in request order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<CallResult>,
}

impl BatchReport {
    fn count(&self, state: EntryState) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.state() == state)
            .count()
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.count(EntryState::Done)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(EntryState::Failed)
    }

    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(EntryState::Cancelled)
    }
}

type CallStream = BoxStream<'static, (usize, CallEvent)>;

enum CallEvent {
    /// The call holds its concurrency permit and is about to run.
    Started(Instant),
    Chunk(ToolChunk),
    /// The tool's channel closed.
    Closed,
}

/// Runs batches of tool calls for a session.
pub struct ToolUseQueue {
    registry: Arc<ToolRegistry>,
    engine: Arc<PermissionEngine>,
    prompter: Arc<dyn PermissionPrompter>,
    audit: Option<Arc<AuditLogger>>,
    limit: Option<Arc<Semaphore>>,
    chunk_buffer: usize,
}

impl fmt::Debug for ToolUseQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolUseQueue")
            .field("registry", &self.registry)
            .field("audit", &self.audit.is_some())
            .field("limit", &self.limit.as_ref().map(|s| s.available_permits()))
            .field("chunk_buffer", &self.chunk_buffer)
            .finish_non_exhaustive()
    }
}

impl ToolUseQueue {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        engine: Arc<PermissionEngine>,
        prompter: Arc<dyn PermissionPrompter>,
    ) -> Self {
        Self {
            registry,
            engine,
            prompter,
            audit: None,
            limit: None,
            chunk_buffer: DEFAULT_CHUNK_BUFFER,
        }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Cap concurrency-safe calls running at once. `None` or `0` is
    /// unbounded.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.limit = max.filter(|n| *n > 0).map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    #[must_use]
    pub fn with_chunk_buffer(mut self, capacity: usize) -> Self {
        self.chunk_buffer = capacity.max(1);
        self
    }

    /// Run one batch to completion.
    ///
    /// `ctx` is borrowed for the whole batch: the queue is its only writer,
    /// applying persisted permission updates and tool context modifiers.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] for faults outside any single call, such as
    /// a failed prompt bridge. Per-call failures are reported in the
    /// [`BatchReport`].
    pub async fn run_batch(
        &self,
        mut requests: Vec<ToolCallRequest>,
        ctx: &mut ExecutionContext,
        events: mpsc::UnboundedSender<QueueEvent>,
    ) -> Result<BatchReport, SchedulerError> {
        requests.sort_by_key(|r| r.index);
        let span = tracing::info_span!("tool_batch", calls = requests.len());
        self.run_sorted(requests, ctx, events).instrument(span).await
    }

    async fn run_sorted(
        &self,
        requests: Vec<ToolCallRequest>,
        ctx: &mut ExecutionContext,
        events: mpsc::UnboundedSender<QueueEvent>,
    ) -> Result<BatchReport, SchedulerError> {
        let mut batch = Batch::new(self, requests, events);
        let cancel = ctx.cancel.clone();

        let pending = batch.validate(&ctx.snapshot()).await;
        let approved = batch.authorize(pending, ctx, &cancel).await?;
        batch.execute(approved, ctx, &cancel).await;

        let report = batch.into_report();
        tracing::info!(
            completed = report.completed(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "batch finished"
        );
        Ok(report)
    }
}

/// State for one batch. Slots are positions in request order.
struct Batch<'q> {
    queue: &'q ToolUseQueue,
    entries: Vec<QueueEntry>,
    started: Vec<Option<Instant>>,
    pending: BTreeMap<usize, CallResult>,
    delivered: Vec<CallResult>,
    /// Prefix of `delivered` whose context modifiers have been applied.
    applied: usize,
    events: mpsc::UnboundedSender<QueueEvent>,
}

type Approved = (usize, Arc<dyn ToolDescriptor>);

impl<'q> Batch<'q> {
    fn new(
        queue: &'q ToolUseQueue,
        requests: Vec<ToolCallRequest>,
        events: mpsc::UnboundedSender<QueueEvent>,
    ) -> Self {
        let started = vec![None; requests.len()];
        Self {
            queue,
            entries: requests.into_iter().map(QueueEntry::new).collect(),
            started,
            pending: BTreeMap::new(),
            delivered: Vec::new(),
            applied: 0,
            events,
        }
    }

    fn set_state(&mut self, slot: usize, state: EntryState) {
        let entry = &mut self.entries[slot];
        if entry.transition(state) {
            let _ = self.events.send(QueueEvent::State {
                index: entry.request.index,
                tool_use_id: entry.request.tool_use_id.clone(),
                state,
            });
        }
    }

    /// Resolve the tool and check the input against `snapshot`.
    fn check_call(
        &self,
        slot: usize,
        snapshot: &ContextSnapshot,
    ) -> Result<Arc<dyn ToolDescriptor>, ValidationError> {
        let request = &self.entries[slot].request;
        let Some(tool) = self.queue.registry.get(&request.tool_id) else {
            return Err(ValidationError::new(
                ValidationError::UNKNOWN_TOOL,
                format!("unknown tool `{}`", request.tool_id),
            ));
        };
        if !snapshot.is_tool_allowed(&request.tool_id) {
            return Err(ValidationError::new(
                ValidationError::TOOL_NOT_ALLOWED,
                format!("tool `{}` is not allowed here", request.tool_id),
            ));
        }
        tool.validate_input(&request.input, snapshot)?;
        Ok(tool)
    }

    async fn validate(&mut self, snapshot: &ContextSnapshot) -> Vec<Approved> {
        let mut pending = Vec::with_capacity(self.entries.len());
        for slot in 0..self.entries.len() {
            self.set_state(slot, EntryState::Validating);
            match self.check_call(slot, snapshot) {
                Ok(tool) => pending.push((slot, tool)),
                Err(e) => {
                    tracing::debug!(slot, code = e.error_code, "validation failed: {e}");
                    self.finish(slot, CallOutcome::Failed(e.into())).await;
                }
            }
        }
        pending
    }

    /// Decide every pending call, prompting for `ask` decisions one at a time
    /// in request order.
    async fn authorize(
        &mut self,
        pending: Vec<Approved>,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<Approved>, SchedulerError> {
        let mut decisions = self.evaluate_all(&pending, &ctx.snapshot()).await?;
        let mut rules_changed = false;
        let mut approved = Vec::with_capacity(pending.len());

        for (slot, tool) in pending {
            if cancel.is_cancelled() {
                self.finish(slot, CallOutcome::Cancelled).await;
                continue;
            }
            let mut decision = decisions.remove(&slot).unwrap_or_else(check_failed);
            if rules_changed && decision.behavior() == Behavior::Ask {
                decision = self.evaluate_one(slot, &tool, ctx.snapshot()).await?;
            }
            tracing::debug!(
                slot,
                tool = tool.id(),
                decision = decision.behavior().as_str(),
                "permission decision"
            );

            let decision = match decision.behavior() {
                Behavior::Allow | Behavior::Deny => decision,
                Behavior::Ask | Behavior::Passthrough => {
                    self.set_state(slot, EntryState::AwaitingPermission);
                    let request = permission_request(
                        &self.entries[slot].request,
                        tool.as_ref(),
                        &decision,
                        ctx.permissions.mode,
                    );
                    let queue = self.queue;
                    let prompter = queue.prompter.as_ref();
                    let answer = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        answer = resolve_ask(prompter, request) => Some(answer),
                    };
                    let Some(answer) = answer else {
                        tracing::info!(slot, "cancelled while awaiting permission");
                        self.finish(slot, CallOutcome::Cancelled).await;
                        continue;
                    };
                    let resolved = answer?;
                    if !resolved.updates.is_empty() {
                        ctx.apply(ContextModifier::UpdatePermissions(resolved.updates));
                        rules_changed = true;
                    }
                    resolved.decision
                }
            };

            let denied = decision
                .is_deny()
                .then(|| decision.message().unwrap_or("permission denied").to_owned());
            self.entries[slot].decision = Some(decision);
            match denied {
                Some(message) => {
                    let failure = ToolFailure::new(FailureKind::PermissionDenied, message);
                    self.finish(slot, CallOutcome::Failed(failure)).await;
                }
                None => approved.push((slot, tool)),
            }
        }
        Ok(approved)
    }

    async fn evaluate_all(
        &self,
        pending: &[Approved],
        snapshot: &Arc<ContextSnapshot>,
    ) -> Result<HashMap<usize, PermissionDecision>, SchedulerError> {
        let mut set = JoinSet::new();
        let mut slots = HashMap::with_capacity(pending.len());
        for (slot, tool) in pending {
            let engine = Arc::clone(&self.queue.engine);
            let tool = Arc::clone(tool);
            let snapshot = Arc::clone(snapshot);
            let input = self.entries[*slot].request.input.clone();
            let handle =
                set.spawn_blocking(move || engine.evaluate(tool.as_ref(), &input, &snapshot));
            slots.insert(handle.id(), *slot);
        }

        let mut decisions = HashMap::with_capacity(pending.len());
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((id, decision)) => {
                    if let Some(slot) = slots.get(&id) {
                        decisions.insert(*slot, decision);
                    }
                }
                Err(e) if e.is_panic() => {
                    tracing::error!("permission check panicked");
                    if let Some(slot) = slots.get(&e.id()) {
                        decisions.insert(*slot, check_failed());
                    }
                }
                Err(e) => return Err(SchedulerError::PermissionTask(e.to_string())),
            }
        }
        Ok(decisions)
    }

    async fn evaluate_one(
        &self,
        slot: usize,
        tool: &Arc<dyn ToolDescriptor>,
        snapshot: Arc<ContextSnapshot>,
    ) -> Result<PermissionDecision, SchedulerError> {
        let engine = Arc::clone(&self.queue.engine);
        let tool = Arc::clone(tool);
        let input = self.entries[slot].request.input.clone();
        match tokio::task::spawn_blocking(move || engine.evaluate(tool.as_ref(), &input, &snapshot))
            .await
        {
            Ok(decision) => Ok(decision),
            Err(e) if e.is_panic() => {
                tracing::error!(slot, "permission check panicked");
                Ok(check_failed())
            }
            Err(e) => Err(SchedulerError::TaskJoin(e)),
        }
    }

    async fn execute(
        &mut self,
        approved: Vec<Approved>,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            self.cancel_remaining().await;
            return;
        }
        let (parallel, sequential): (Vec<Approved>, Vec<Approved>) = approved
            .into_iter()
            .partition(|(slot, tool)| tool.is_concurrency_safe(&self.entries[*slot].request.input));
        tracing::debug!(
            parallel = parallel.len(),
            sequential = sequential.len(),
            "executing batch"
        );

        let batch_snapshot = ctx.snapshot();
        let mut streams: SelectAll<CallStream> = SelectAll::new();
        for (slot, tool) in parallel {
            let limit = self.queue.limit.clone();
            streams.push(self.launch(slot, tool, Arc::clone(&batch_snapshot), cancel, limit));
        }
        self.drain(&mut streams, ctx, cancel).await;

        // Each sequential call is re-checked against the current context,
        // since earlier calls may have narrowed the allowed tools.
        for (slot, _) in sequential {
            if cancel.is_cancelled() {
                self.finish(slot, CallOutcome::Cancelled).await;
                continue;
            }
            let snapshot = ctx.snapshot();
            match self.check_call(slot, &snapshot) {
                Ok(tool) => {
                    streams.push(self.launch(slot, tool, snapshot, cancel, None));
                    self.drain(&mut streams, ctx, cancel).await;
                }
                Err(e) => {
                    tracing::debug!(slot, code = e.error_code, "validation failed: {e}");
                    self.finish(slot, CallOutcome::Failed(e.into())).await;
                }
            }
        }
        self.apply_finalized(ctx);
    }

    /// Relay events until every launched call has ended or the batch is
    /// cancelled.
    async fn drain(
        &mut self,
        streams: &mut SelectAll<CallStream>,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("batch cancelled");
                    self.cancel_remaining().await;
                    return;
                }
                next = streams.next() => next,
            };
            let Some((slot, event)) = next else {
                return;
            };
            match event {
                CallEvent::Started(at) => {
                    self.started[slot] = Some(at);
                    self.set_state(slot, EntryState::Running);
                }
                CallEvent::Chunk(ToolChunk::Progress(text)) => self.progress(slot, text),
                CallEvent::Chunk(terminal) => {
                    if let Some(outcome) = CallOutcome::from_chunk(terminal) {
                        self.complete(slot, outcome, ctx).await;
                    }
                }
                CallEvent::Closed if !self.entries[slot].state.is_terminal() => {
                    let failure =
                        ToolFailure::new(FailureKind::Execution, "tool stopped without a result");
                    self.complete(slot, CallOutcome::Failed(failure), ctx).await;
                }
                CallEvent::Closed => {}
            }
        }
    }

    /// Spawn one call. The entry stays `Queued` until the task holds its
    /// permit, which it reports with [`CallEvent::Started`].
    fn launch(
        &mut self,
        slot: usize,
        tool: Arc<dyn ToolDescriptor>,
        snapshot: Arc<ContextSnapshot>,
        cancel: &CancellationToken,
        limit: Option<Arc<Semaphore>>,
    ) -> CallStream {
        self.set_state(slot, EntryState::Queued);

        let request = &self.entries[slot].request;
        let (tx, rx) = mpsc::channel(self.queue.chunk_buffer);
        let (started_tx, started_rx) = oneshot::channel();
        let tool_ctx = ToolContext::new(
            request.tool_use_id.clone(),
            cancel.child_token(),
            snapshot,
            tx.clone(),
        );
        let input = request.input.clone();
        let span = tracing::info_span!(
            "tool_call",
            index = request.index,
            tool = %request.tool_id,
            tool_use_id = %request.tool_use_id,
        );

        tokio::spawn(
            async move {
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let started = Instant::now();
                let _ = started_tx.send(started);
                let result = AssertUnwindSafe(tool.execute(input, tool_ctx))
                    .catch_unwind()
                    .await;
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                let chunk = match result {
                    Ok(Ok(output)) => {
                        tracing::debug!(elapsed_ms, "tool finished");
                        ToolChunk::Result(output)
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(elapsed_ms, "tool failed: {e}");
                        ToolChunk::Failed(e.into())
                    }
                    Err(_) => {
                        tracing::error!(elapsed_ms, "tool panicked");
                        ToolChunk::Failed(ToolFailure::new(FailureKind::Execution, "tool panicked"))
                    }
                };
                let _ = tx.send(chunk).await;
            }
            .instrument(span),
        );

        stream::once(started_rx)
            .filter_map(|at| future::ready(at.ok().map(CallEvent::Started)))
            .chain(ReceiverStream::new(rx).map(CallEvent::Chunk))
            .chain(stream::once(future::ready(CallEvent::Closed)))
            .map(move |event| (slot, event))
            .boxed()
    }

    fn progress(&mut self, slot: usize, text: String) {
        if self.entries[slot].state.is_terminal() {
            return;
        }
        self.set_state(slot, EntryState::Streaming);
        let entry = &mut self.entries[slot];
        entry.chunks.push(ToolChunk::Progress(text.clone()));
        let _ = self.events.send(QueueEvent::Progress {
            index: entry.request.index,
            tool_use_id: entry.request.tool_use_id.clone(),
            text,
        });
    }

    /// Record a finished call, then apply the modifiers of every result it
    /// released so the next sequential call sees them.
    async fn complete(&mut self, slot: usize, outcome: CallOutcome, ctx: &mut ExecutionContext) {
        self.finish(slot, outcome).await;
        self.apply_finalized(ctx);
    }

    /// Apply context modifiers of newly delivered results, in request order.
    fn apply_finalized(&mut self, ctx: &mut ExecutionContext) {
        for result in &self.delivered[self.applied..] {
            if let CallOutcome::Completed(output) = &result.outcome {
                for modifier in &output.context_modifiers {
                    ctx.apply(modifier.clone());
                }
            }
        }
        self.applied = self.delivered.len();
    }

    async fn cancel_remaining(&mut self) {
        for slot in 0..self.entries.len() {
            self.finish(slot, CallOutcome::Cancelled).await;
        }
    }

    /// Make `slot` terminal and release every result now deliverable in
    /// request order. No-op for entries already terminal.
    async fn finish(&mut self, slot: usize, outcome: CallOutcome) {
        if self.entries[slot].state.is_terminal() {
            return;
        }
        self.set_state(slot, outcome.state());
        let entry = &mut self.entries[slot];
        entry.chunks.push(match &outcome {
            CallOutcome::Completed(output) => ToolChunk::Result(output.clone()),
            CallOutcome::Failed(failure) => ToolChunk::Failed(failure.clone()),
            CallOutcome::Cancelled => ToolChunk::Failed(ToolFailure::cancelled()),
        });

        if let Some(audit) = &self.queue.audit {
            let summary = self
                .queue
                .registry
                .get(&entry.request.tool_id)
                .map_or_else(|| entry.request.input.to_string(), |t| t.summarize(&entry.request.input));
            let duration = self.started[slot].map(|t| t.elapsed()).unwrap_or_default();
            audit
                .log(&AuditEntry::new(
                    entry.request.tool_id.clone(),
                    entry.request.tool_use_id.clone(),
                    summary,
                    audit_result(&outcome),
                    duration,
                ))
                .await;
        }

        self.pending.insert(
            slot,
            CallResult {
                index: entry.request.index,
                tool_use_id: entry.request.tool_use_id.clone(),
                tool_id: entry.request.tool_id.clone(),
                decision: entry.decision.clone(),
                outcome,
            },
        );
        while let Some(result) = self.pending.remove(&self.delivered.len()) {
            let _ = self.events.send(QueueEvent::Finalized(result.clone()));
            self.delivered.push(result);
        }
    }

    fn into_report(self) -> BatchReport {
        debug_assert!(self.pending.is_empty(), "undelivered results");
        BatchReport {
            results: self.delivered,
        }
    }
}

fn check_failed() -> PermissionDecision {
    PermissionDecision::deny(
        "permission check failed",
        Some(DecisionReason::Other {
            text: "evaluation did not complete".to_owned(),
        }),
    )
}

fn audit_result(outcome: &CallOutcome) -> AuditResult {
    match outcome {
        CallOutcome::Completed(_) => AuditResult::Success,
        CallOutcome::Cancelled => AuditResult::Cancelled,
        CallOutcome::Failed(failure) => match failure.kind {
            FailureKind::PermissionDenied => AuditResult::Blocked {
                reason: failure.message.clone(),
            },
            FailureKind::Timeout => AuditResult::Timeout,
            FailureKind::Cancelled => AuditResult::Cancelled,
            FailureKind::Validation { .. } | FailureKind::Sandbox | FailureKind::Execution => {
                AuditResult::Error {
                    message: failure.message.clone(),
                }
            }
        },
    }
}
