//! The session: the single writer over one document.
//!
//! A session owns the committed document, the annotation log, the reload
//! controller and the one collaborator request allowed in flight. The
//! pipeline a reply goes through is synchronous and runs in this order:
//!
//! ```text
//!  reply ─▶ patch ─▶ validate ─▶ stage reload ─▶ commit ─▶ activate
//!             │          │             │
//!             └──────────┴─────────────┴──▶ system turn, nothing changes
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use chrono::Utc;
use duet_config::AppConfig;
use duet_core::error::{GatewayError, ReloadError, StructureError, ValidationError};
use duet_core::{AnnotationTurn, DomainEvent, Error, ErrorKind, EventBus, Proposal};
use duet_document::{
    AnnotationLog, DocumentLayout, DocumentStore, PatchEngine, SourceDocument, Validator, persist,
};
use duet_kernel::{
    Invocation, KernelError, KernelInstance, Limits, LoadOptions, ReloadController, ReloadState,
    RuntimeError, Value,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gateway::CollaboratorGateway;

/// How a session lays out, loads and stores its document.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub layout: DocumentLayout,
    pub load: LoadOptions,

    /// Commit and reload succeed or fail together
    pub atomic_commit: bool,

    /// Where `save` writes; `None` keeps the document in memory
    pub path: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            layout: DocumentLayout::default(),
            load: LoadOptions::default(),
            atomic_commit: true,
            path: None,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            layout: DocumentLayout::new(
                config.document.separator.as_str(),
                config.document.comment_prefix.as_str(),
            ),
            load: LoadOptions {
                limits: Limits {
                    max_steps: config.kernel.max_steps,
                    max_call_depth: config.kernel.max_call_depth,
                },
                entry_points: config.kernel.entry_points.clone(),
            },
            atomic_commit: config.reload.atomic_commit,
            path: Some(PathBuf::from(&config.document.path)),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// A collaborator reply tagged with the invocation it answers.
#[derive(Debug)]
pub struct GatewayReply {
    pub ticket: u64,
    pub result: Result<Proposal, GatewayError>,
    pub elapsed: Duration,
}

/// An outstanding collaborator request. Await it for the reply, then hand
/// the reply to [`Session::finish`].
#[derive(Debug)]
pub struct PendingInvoke {
    ticket: u64,
    handle: JoinHandle<GatewayReply>,
}

impl PendingInvoke {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Stop the request. Awaiting afterwards yields an aborted reply.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Future for PendingInvoke {
    type Output = GatewayReply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let ticket = self.ticket;
        Pin::new(&mut self.handle).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| GatewayReply {
                ticket,
                result: Err(GatewayError::Aborted(e.to_string())),
                elapsed: Duration::ZERO,
            })
        })
    }
}

/// What a commit did to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub kernel_changed: bool,

    /// Generation of the newly active instance, when one was swapped in
    pub generation: Option<u64>,

    /// Set only outside atomic mode: the text committed but its kernel did
    /// not load, so the previous instance is still serving
    pub reload_error: Option<ReloadError>,
}

/// How [`Session::finish`] handled a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    Applied {
        edits: usize,
        message: String,
        report: CommitReport,
    },
    Rejected { kind: ErrorKind, reason: String },
    /// The reply did not belong to the current invocation
    Discarded,
}

/// A snapshot for `status` displays.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub generation: u64,
    pub reload_state: ReloadState,
    pub bindings: Vec<String>,
    pub in_flight: Option<u64>,
    pub turns: usize,
    pub pending_turns: usize,
    pub last_error: Option<String>,
    pub has_credential: bool,
    pub path: Option<PathBuf>,
}

pub struct Session {
    store: DocumentStore,
    validator: Validator,
    log: AnnotationLog,
    reload: ReloadController,
    gateway: Arc<CollaboratorGateway>,
    events: Arc<EventBus>,
    atomic_commit: bool,
    path: Option<PathBuf>,
    in_flight: Option<u64>,
    next_ticket: u64,
    last_error: Option<String>,
    closed: bool,
}

impl Session {
    /// Open a session over `text`.
    ///
    /// Only a broken structure is refused. A kernel that does not load is
    /// reported as a system turn and the empty instance serves until a
    /// reload succeeds.
    pub fn open(
        text: impl Into<String>,
        options: SessionOptions,
        gateway: CollaboratorGateway,
    ) -> Result<Self, StructureError> {
        let events = Arc::new(EventBus::default());
        let store = DocumentStore::open(options.layout.clone(), text)?.with_events(Arc::clone(&events));
        let log = AnnotationLog::for_layout(&options.layout, store.document().annotation_text());

        let mut session = Self {
            validator: Validator::new(options.layout),
            store,
            log,
            reload: ReloadController::new(options.load),
            gateway: Arc::new(gateway),
            events,
            atomic_commit: options.atomic_commit,
            path: options.path,
            in_flight: None,
            next_ticket: 1,
            last_error: None,
            closed: false,
        };

        // Startup failures are already reported as a system turn
        if let Err(e) = session.reload() {
            debug!(error = %e, "Kernel did not load at startup");
        }
        info!(
            generation = session.reload.generation(),
            turns = session.log.len(),
            "Session opened"
        );
        Ok(session)
    }

    // --- Accessors ---

    /// The committed document text.
    pub fn text(&self) -> &str {
        self.store.text()
    }

    pub fn document(&self) -> &SourceDocument {
        self.store.document()
    }

    pub fn log(&self) -> &AnnotationLog {
        &self.log
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn gateway(&self) -> &CollaboratorGateway {
        &self.gateway
    }

    pub fn kernel(&self) -> Arc<KernelInstance> {
        self.reload.current()
    }

    pub fn generation(&self) -> u64 {
        self.reload.generation()
    }

    pub fn reload_state(&self) -> ReloadState {
        self.reload.state()
    }

    /// Why the previous invocation failed; cleared by the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The committed kernel with the current annotation log below it.
    ///
    /// This is what the collaborator sees and what its edits apply to.
    pub fn working_text(&self) -> String {
        if !self.log.has_pending() {
            return self.store.text().to_string();
        }
        let doc = self.store.document();
        self.store.layout().compose(doc.kernel_text(), &self.log.render())
    }

    pub fn status(&self) -> SessionStatus {
        let kernel = self.reload.current();
        SessionStatus {
            generation: self.reload.generation(),
            reload_state: self.reload.state(),
            bindings: kernel.bindings().names().map(String::from).collect(),
            in_flight: self.in_flight,
            turns: self.log.len(),
            pending_turns: self.log.pending().len(),
            last_error: self.last_error.clone(),
            has_credential: self.gateway.has_credential(),
            path: self.path.clone(),
        }
    }

    // --- Collaborator ---

    /// Send the working text to the collaborator on a background task.
    ///
    /// Fails with [`Error::ConcurrentInvoke`] while another request is
    /// outstanding; nothing is queued.
    pub fn invoke(&mut self) -> Result<PendingInvoke, Error> {
        if self.closed {
            return Err(Error::Internal("session is closed".into()));
        }
        if let Some(ticket) = self.in_flight {
            debug!(ticket, "Invoke refused, request already in flight");
            return Err(Error::ConcurrentInvoke);
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let document = self.working_text();
        let last_error = self.last_error.clone();
        let gateway = Arc::clone(&self.gateway);
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = gateway.request(&document, last_error.as_deref()).await;
            GatewayReply {
                ticket,
                result,
                elapsed: started.elapsed(),
            }
        });

        self.in_flight = Some(ticket);
        self.events.publish(DomainEvent::GatewayRequested {
            ticket,
            timestamp: Utc::now(),
        });
        info!(ticket, model = %self.gateway.model(), "Collaborator invoked");
        Ok(PendingInvoke { ticket, handle })
    }

    /// Run a reply through patch, validate, commit and reload.
    ///
    /// Every failure becomes a system turn and leaves the committed text and
    /// the live kernel as they were.
    pub fn finish(&mut self, reply: GatewayReply) -> InvokeOutcome {
        if self.closed || self.in_flight != Some(reply.ticket) {
            info!(ticket = reply.ticket, "Discarding stale collaborator reply");
            self.events.publish(DomainEvent::ReplyDiscarded {
                ticket: reply.ticket,
                timestamp: Utc::now(),
            });
            return InvokeOutcome::Discarded;
        }

        self.in_flight = None;
        self.events.publish(DomainEvent::GatewayCompleted {
            ticket: reply.ticket,
            success: reply.result.is_ok(),
            duration_ms: reply.elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });

        let outcome = reply
            .result
            .map_err(Error::from)
            .and_then(|proposal| self.apply(&proposal).map(|report| (proposal, report)));

        match outcome {
            Ok((proposal, report)) => {
                self.last_error = report
                    .reload_error
                    .as_ref()
                    .map(|e| format!("{}: {e}", ErrorKind::ReloadError));
                InvokeOutcome::Applied {
                    edits: proposal.edits.len(),
                    message: proposal.message,
                    report,
                }
            }
            Err(e) => {
                let (kind, reason) = self.record_failure(&e, true);
                InvokeOutcome::Rejected { kind, reason }
            }
        }
    }

    /// Invoke and wait for the reply in one step.
    pub async fn invoke_and_wait(&mut self) -> Result<InvokeOutcome, Error> {
        let pending = self.invoke()?;
        let reply = pending.await;
        Ok(self.finish(reply))
    }

    fn apply(&mut self, proposal: &Proposal) -> Result<CommitReport, Error> {
        let patched = PatchEngine::apply(&proposal.edits, &self.working_text())?;
        let candidate = self.validator.validate(&patched)?;

        let mut log = self.log.clone();
        log.resync(candidate.annotation_text());
        if !proposal.message.trim().is_empty() {
            log.append(AnnotationTurn::collaborator(proposal.message.trim_end()));
        }

        let candidate = self.with_log(candidate, &log)?;
        self.commit_validated(candidate, log)
    }

    // --- Human ---

    /// Append a human turn. It is committed with the next commit or save.
    pub fn note(&mut self, text: &str) {
        let text = text.trim_end();
        if text.trim().is_empty() {
            return;
        }
        self.log.append(AnnotationTurn::human(text));
    }

    /// Commit a whole document edited by hand, through the same validation
    /// and reload path a collaborator reply takes. Uncommitted turns carry
    /// over below whatever annotations the new text has.
    pub fn submit(&mut self, text: &str) -> Result<CommitReport, Error> {
        let result = self.submit_inner(text);
        match &result {
            Ok(report) => {
                if let Some(e) = &report.reload_error {
                    debug!(error = %e, "Submitted kernel committed without a reload");
                }
            }
            Err(e) => {
                self.record_failure(e, false);
            }
        }
        result
    }

    fn submit_inner(&mut self, text: &str) -> Result<CommitReport, Error> {
        let candidate = self.validator.validate(text)?;
        let mut log = AnnotationLog::for_layout(self.store.layout(), candidate.annotation_text());
        for turn in self.log.pending() {
            log.append(turn.clone());
        }
        let candidate = self.with_log(candidate, &log)?;
        self.commit_validated(candidate, log)
    }

    /// Rebuild the kernel from the committed text.
    pub fn reload(&mut self) -> Result<u64, ReloadError> {
        match self.reload.reload(self.store.document().kernel_text()) {
            Ok(generation) => {
                self.publish_reloaded(generation);
                Ok(generation)
            }
            Err(e) => {
                self.events.publish(DomainEvent::ReloadFailed {
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                self.log.append(AnnotationTurn::failure(ErrorKind::ReloadError, &e));
                Err(e)
            }
        }
    }

    /// Evaluate an expression such as `f(2)` against the live kernel.
    pub fn eval(&self, expression: &str) -> Result<Invocation, KernelError> {
        self.reload.current().eval(expression)
    }

    /// Call a function bound by the live kernel.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Invocation, RuntimeError> {
        self.reload.current().call(name, args)
    }

    /// Commit pending annotation turns without touching the kernel.
    pub fn flush(&mut self) -> Result<(), Error> {
        if !self.log.has_pending() {
            return Ok(());
        }
        let candidate = self.validator.validate(&self.working_text())?;
        let region = candidate.annotation_text().to_string();
        self.store
            .commit(candidate.into_text())
            .map_err(ValidationError::from)?;
        self.log.resync(&region);
        Ok(())
    }

    /// Commit pending turns and write the committed text to the session
    /// path. Returns the path written, or `None` for an in-memory session.
    pub async fn save(&mut self) -> Result<Option<PathBuf>, Error> {
        self.flush()?;
        let Some(path) = self.path.clone() else {
            return Ok(None);
        };
        persist::save_atomic(&path, self.store.text()).await?;
        info!(path = %path.display(), "Document saved");
        Ok(Some(path))
    }

    /// Close the session. A reply still in flight is discarded on arrival.
    pub fn quit(&mut self) {
        if let Some(ticket) = self.in_flight.take() {
            info!(ticket, "Cancelling in-flight collaborator request");
        }
        self.closed = true;
    }

    // --- Pipeline internals ---

    /// Re-render `candidate` with `log` below its kernel, if the log has
    /// turns the text does not carry yet.
    fn with_log(
        &self,
        candidate: SourceDocument,
        log: &AnnotationLog,
    ) -> Result<SourceDocument, ValidationError> {
        if !log.has_pending() {
            return Ok(candidate);
        }
        let text = self
            .store
            .layout()
            .compose(candidate.kernel_text(), &log.render());
        self.validator.validate(&text)
    }

    /// Commit an already validated document and swap the kernel if it
    /// changed. In atomic mode a kernel that fails to load blocks the commit.
    fn commit_validated(
        &mut self,
        candidate: SourceDocument,
        mut log: AnnotationLog,
    ) -> Result<CommitReport, Error> {
        let kernel_changed = candidate.kernel_text() != self.store.document().kernel_text();

        let mut staged = None;
        let mut reload_error = None;
        if kernel_changed {
            match self.reload.stage(candidate.kernel_text()) {
                Ok(s) => staged = Some(s),
                Err(e) => {
                    self.events.publish(DomainEvent::ReloadFailed {
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    if self.atomic_commit {
                        return Err(Error::Reload(e));
                    }
                    reload_error = Some(e);
                }
            }
        }

        let region = candidate.annotation_text().to_string();
        let summary = match self.store.commit(candidate.into_text()) {
            Ok(summary) => summary,
            Err(e) => {
                if let Some(s) = staged {
                    self.reload.abandon(s);
                }
                return Err(ValidationError::from(e).into());
            }
        };

        log.resync(&region);
        self.log = log;

        let generation = staged.map(|s| {
            let generation = self.reload.activate(s);
            self.publish_reloaded(generation);
            generation
        });

        if let Some(e) = &reload_error {
            warn!(error = %e, "Kernel committed but not loaded, previous instance still serving");
            self.log.append(AnnotationTurn::failure(ErrorKind::ReloadError, e));
        }

        Ok(CommitReport {
            kernel_changed: summary.kernel_changed,
            generation,
            reload_error,
        })
    }

    fn publish_reloaded(&self, generation: u64) {
        self.events.publish(DomainEvent::KernelReloaded {
            generation,
            bindings: self.reload.current().bindings().len(),
            timestamp: Utc::now(),
        });
    }

    /// Log a failure as a system turn. With `feedback` set, the reason is
    /// also sent to the collaborator on the next invocation, except for
    /// gateway failures, which the collaborator cannot fix.
    fn record_failure(&mut self, error: &Error, feedback: bool) -> (ErrorKind, String) {
        let kind = error.kind().unwrap_or(ErrorKind::GatewayError);
        let reason = failure_reason(error);

        warn!(kind = %kind, reason = %reason, "Proposal rejected");
        self.log.append(AnnotationTurn::failure(kind, &reason));
        if feedback && kind != ErrorKind::GatewayError {
            self.last_error = Some(format!("{kind}: {reason}"));
        }
        self.events.publish(DomainEvent::ProposalRejected {
            kind,
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        (kind, reason)
    }
}

/// The stage error's own message, without the top-level prefix.
fn failure_reason(error: &Error) -> String {
    match error {
        Error::Patch(e) => e.to_string(),
        Error::Validation(e) => e.to_string(),
        Error::Reload(e) => e.to_string(),
        Error::Gateway(e) => e.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_core::Edit;
    use duet_core::error::ProviderError;
    use duet_core::message::{Message, MessageToolCall};
    use duet_core::provider::ProviderResponse;
    use duet_core::{Origin, Provider, ProviderRequest};

    const SEP: &str = "# === SEP ===";

    fn options() -> SessionOptions {
        SessionOptions {
            layout: DocumentLayout::new(SEP, "#"),
            ..SessionOptions::default()
        }
    }

    fn offline(text: &str) -> Session {
        Session::open(text, options(), CollaboratorGateway::new(None, "mock-model")).unwrap()
    }

    fn reply(ticket: u64, proposal: Proposal) -> GatewayReply {
        GatewayReply {
            ticket,
            result: Ok(proposal),
            elapsed: Duration::from_millis(5),
        }
    }

    /// Mark a ticket as in flight without spawning a request.
    fn arm(session: &mut Session) -> u64 {
        let ticket = session.next_ticket;
        session.next_ticket += 1;
        session.in_flight = Some(ticket);
        ticket
    }

    fn edit(old: &str, new: &str) -> Proposal {
        Proposal::new(vec![Edit::new(old, new)], "")
    }

    #[test]
    fn open_loads_kernel() {
        let session = offline("def f():\n    return 1\n# === SEP ===\n");
        assert_eq!(session.generation(), 1);
        assert_eq!(session.call("f", vec![]).unwrap().value, Value::Int(1));
    }

    #[test]
    fn open_refuses_broken_structure() {
        let err = Session::open("x = 1\n", options(), CollaboratorGateway::new(None, "m"));
        assert!(matches!(err, Err(StructureError::MissingSeparator)));
    }

    #[test]
    fn open_with_failing_kernel_serves_empty_instance() {
        let session = offline("x = 1 / 0\n# === SEP ===\n");
        assert_eq!(session.generation(), 0);
        assert_eq!(session.reload_state(), ReloadState::Failed);
        assert!(session.kernel().bindings().is_empty());
        assert_eq!(session.log().pending()[0].origin(), Origin::System);
    }

    #[test]
    fn applied_edit_reloads() {
        let mut session = offline("def f():\n    return 1\n# === SEP ===\n");
        let ticket = arm(&mut session);

        let outcome = session.finish(reply(ticket, edit("return 1", "return 2")));
        match outcome {
            InvokeOutcome::Applied { edits, report, .. } => {
                assert_eq!(edits, 1);
                assert!(report.kernel_changed);
                assert_eq!(report.generation, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.text(), "def f():\n    return 2\n# === SEP ===\n");
        assert_eq!(session.eval("f()").unwrap().value, Value::Int(2));
        assert!(!session.is_busy());
    }

    #[test]
    fn message_only_reply_appends_one_turn() {
        let mut session = offline("x = 1\n# === SEP ===\n");
        let ticket = arm(&mut session);

        session.finish(reply(ticket, Proposal::message_only("hello there")));
        assert_eq!(session.text(), "x = 1\n# === SEP ===\n# [collaborator] hello there\n");
        assert_eq!(session.log().len(), 1);
        assert_eq!(session.generation(), 1);
    }

    #[test]
    fn message_quoting_the_separator_still_applies() {
        let mut session = offline("def f():\n    return 1\n# === SEP ===\n");
        let ticket = arm(&mut session);

        let proposal = Proposal::new(
            vec![Edit::new("return 1", "return 2")],
            "Bumped f. The marker line is\n=== SEP ===\nand I left it alone.",
        );
        let outcome = session.finish(reply(ticket, proposal));
        assert!(matches!(outcome, InvokeOutcome::Applied { .. }), "{outcome:?}");
        assert_eq!(session.eval("f()").unwrap().value, Value::Int(2));
        assert_eq!(session.text().lines().filter(|l| *l == SEP).count(), 1);
        assert!(session.text().contains("\n#  === SEP ===\n"));
    }

    #[test]
    fn empty_message_adds_no_turn() {
        let mut session = offline("x = 1\n# === SEP ===\n");
        let ticket = arm(&mut session);
        session.finish(reply(ticket, Proposal::message_only("  ")));
        assert!(session.log().is_empty());
        assert_eq!(session.text(), "x = 1\n# === SEP ===\n");
    }

    #[test]
    fn ambiguous_edit_rejected_and_recorded() {
        let text = "x = 1\ny = 0\nx = 1\n# === SEP ===\n";
        let mut session = offline(text);
        let ticket = arm(&mut session);

        let outcome = session.finish(reply(ticket, edit("x = 1", "x = 2")));
        assert!(matches!(
            outcome,
            InvokeOutcome::Rejected {
                kind: ErrorKind::AmbiguousEdit,
                ..
            }
        ));
        assert_eq!(session.text(), text);
        assert_eq!(session.generation(), 1);
        assert!(session.last_error().unwrap().starts_with("AmbiguousEdit"));

        let turn = &session.log().pending()[0];
        assert_eq!(turn.origin(), Origin::System);
        assert!(turn.text().starts_with("AmbiguousEdit: "));
    }

    #[test]
    fn reload_failure_keeps_everything_in_atomic_mode() {
        let text = "def f():\n    return 1\n# === SEP ===\n";
        let mut session = offline(text);
        let ticket = arm(&mut session);

        let outcome = session.finish(reply(ticket, edit("return 1", "return 1\nboom()")));
        assert!(matches!(
            outcome,
            InvokeOutcome::Rejected {
                kind: ErrorKind::ReloadError,
                ..
            }
        ));
        assert_eq!(session.text(), text);
        assert_eq!(session.call("f", vec![]).unwrap().value, Value::Int(1));
    }

    #[test]
    fn reload_failure_commits_outside_atomic_mode() {
        let opts = SessionOptions {
            atomic_commit: false,
            ..options()
        };
        let mut session = Session::open(
            "def f():\n    return 1\n# === SEP ===\n",
            opts,
            CollaboratorGateway::new(None, "m"),
        )
        .unwrap();
        let ticket = arm(&mut session);

        let outcome = session.finish(reply(ticket, edit("return 1", "return 1\nboom()")));
        match outcome {
            InvokeOutcome::Applied { report, .. } => {
                assert!(report.reload_error.is_some());
                assert_eq!(report.generation, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.text().contains("boom()"));
        assert_eq!(session.call("f", vec![]).unwrap().value, Value::Int(1));
        assert_eq!(session.reload_state(), ReloadState::Failed);
        assert!(session.last_error().is_some());
    }

    #[test]
    fn gateway_failure_does_not_feed_back() {
        let mut session = offline("x = 1\n# === SEP ===\n");
        let ticket = arm(&mut session);
        let outcome = session.finish(GatewayReply {
            ticket,
            result: Err(GatewayError::MissingCredential),
            elapsed: Duration::ZERO,
        });
        assert!(matches!(
            outcome,
            InvokeOutcome::Rejected {
                kind: ErrorKind::GatewayError,
                ..
            }
        ));
        assert!(session.last_error().is_none());
        assert_eq!(session.log().pending().len(), 1);
    }

    #[test]
    fn success_clears_last_error() {
        let mut session = offline("def f():\n    return 1\n# === SEP ===\n");
        let ticket = arm(&mut session);
        session.finish(reply(ticket, edit("missing", "x")));
        assert!(session.last_error().is_some());

        let ticket = arm(&mut session);
        session.finish(reply(ticket, edit("return 1", "return 3")));
        assert!(session.last_error().is_none());
    }

    #[test]
    fn stale_ticket_is_discarded() {
        let text = "def f():\n    return 1\n# === SEP ===\n";
        let mut session = offline(text);
        let ticket = arm(&mut session);

        let outcome = session.finish(reply(ticket + 10, edit("return 1", "return 2")));
        assert_eq!(outcome, InvokeOutcome::Discarded);
        assert_eq!(session.text(), text);
        assert!(session.is_busy());
    }

    #[test]
    fn reply_after_quit_is_discarded() {
        let text = "def f():\n    return 1\n# === SEP ===\n";
        let mut session = offline(text);
        let ticket = arm(&mut session);
        session.quit();

        let outcome = session.finish(reply(ticket, edit("return 1", "return 2")));
        assert_eq!(outcome, InvokeOutcome::Discarded);
        assert_eq!(session.text(), text);
        assert!(session.log().is_empty());
        assert_eq!(session.generation(), 1);
    }

    #[test]
    fn notes_are_part_of_working_text() {
        let mut session = offline("x = 1\n# === SEP ===\n");
        session.note("make x bigger");
        assert_eq!(
            session.working_text(),
            "x = 1\n# === SEP ===\n# [human] make x bigger\n"
        );
        assert_eq!(session.text(), "x = 1\n# === SEP ===\n");

        let ticket = arm(&mut session);
        session.finish(reply(
            ticket,
            Proposal::new(vec![Edit::new("x = 1", "x = 100")], "Done."),
        ));
        assert_eq!(
            session.text(),
            "x = 100\n# === SEP ===\n# [human] make x bigger\n#\n# [collaborator] Done.\n"
        );
        assert!(!session.log().has_pending());
    }

    #[test]
    fn submit_validates_and_reloads() {
        let mut session = offline("def f():\n    return 1\n# === SEP ===\n");
        let report = session
            .submit("def f():\n    return 5\n# === SEP ===\n# hand note\n")
            .unwrap();
        assert_eq!(report.generation, Some(2));
        assert_eq!(session.call("f", vec![]).unwrap().value, Value::Int(5));

        let err = session.submit("def f(:\n# === SEP ===\n").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::SyntaxError));
        assert_eq!(session.call("f", vec![]).unwrap().value, Value::Int(5));
        assert!(session.last_error().is_none());
    }

    #[test]
    fn forced_reload() {
        let mut session = offline("x = 1\n# === SEP ===\n");
        assert_eq!(session.reload().unwrap(), 2);
        assert_eq!(session.reload_state(), ReloadState::Stable);
    }

    #[tokio::test]
    async fn save_commits_pending_turns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.dt");
        let mut session = Session::open(
            "x = 1\n# === SEP ===\n",
            options().with_path(&path),
            CollaboratorGateway::new(None, "m"),
        )
        .unwrap();
        session.note("remember this");

        assert_eq!(session.save().await.unwrap(), Some(path.clone()));
        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(saved, "x = 1\n# === SEP ===\n# [human] remember this\n");
        assert_eq!(session.text(), saved);
        assert!(!session.log().has_pending());
    }

    struct EchoProvider;

    #[async_trait::async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let mut message = Message::assistant("");
            message.tool_calls.push(MessageToolCall {
                id: "toolu_1".into(),
                name: crate::gateway::RESPOND_TOOL.into(),
                arguments: r#"{"edits": [{"old": "return 1", "new": "return 2"}], "message": "ok"}"#
                    .into(),
            });
            Ok(ProviderResponse {
                message,
                usage: None,
                model: "mock-model".into(),
            })
        }
    }

    #[tokio::test]
    async fn invoke_runs_the_whole_pipeline() {
        let gateway = CollaboratorGateway::new(Some(Arc::new(EchoProvider)), "mock-model");
        let mut session =
            Session::open("def f():\n    return 1\n# === SEP ===\n", options(), gateway).unwrap();
        let mut rx = session.events().subscribe();

        let outcome = session.invoke_and_wait().await.unwrap();
        assert!(matches!(outcome, InvokeOutcome::Applied { edits: 1, .. }));
        assert_eq!(session.eval("f()").unwrap().value, Value::Int(2));

        assert!(matches!(
            rx.recv().await.unwrap().as_ref(),
            DomainEvent::GatewayRequested { ticket: 1, .. }
        ));
    }

    #[tokio::test]
    async fn second_invoke_refused_while_in_flight() {
        let mut session = offline("x = 1\n# === SEP ===\n");
        let first = session.invoke().unwrap();
        assert!(matches!(session.invoke(), Err(Error::ConcurrentInvoke)));

        let reply = first.await;
        assert!(matches!(
            session.finish(reply),
            InvokeOutcome::Rejected {
                kind: ErrorKind::GatewayError,
                ..
            }
        ));
        assert!(session.invoke().is_ok());
    }
}
