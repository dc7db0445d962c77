//! DBGP session state machine.
//!
//! A [`Session`] owns everything about one engine connection: the
//! transaction counter, the pending table, the run status and the
//! handshake identity. It never touches the transport directly; encoded
//! command lines go out over one channel and [`SessionEvent`]s over
//! another.

use std::fmt;
use std::str::FromStr;

use tokio::sync::{mpsc, oneshot};

use crate::command::{write_command, Command};
use crate::error::DbgpError;
use crate::identity::SessionIdentity;
use crate::message::{CommandResponse, Message};
use crate::pending::{PendingTable, Reply, Resolution};
use crate::xml::Element;

/// The engine's run state as reported in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Before the handshake has completed.
    Starting,
    /// Executing script code.
    Running,
    /// Paused; inspection commands are available.
    Break,
    /// Script finished; the engine still answers post-mortem commands.
    Stopping,
    /// Detached or finished.
    Stopped,
}

impl Status {
    /// Protocol spelling of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Break => "break",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
        }
    }

    /// Whether the session is over once this status is reached.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Stopping | Status::Stopped)
    }
}

impl FromStr for Status {
    type Err = DbgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Status::Starting),
            "running" => Ok(Status::Running),
            "break" => Ok(Status::Break),
            "stopping" => Ok(Status::Stopping),
            "stopped" => Ok(Status::Stopped),
            other => Err(DbgpError::Protocol(format!("unknown status '{other}'"))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications raised by a session, in the order they happened.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake and bootstrap finished; commands may be issued.
    Ready(SessionIdentity),
    /// Status changed. Always followed by the event named after the status.
    StatusChanged(Status),
    Starting,
    Running,
    Break,
    Stopping,
    Stopped,
    /// A message was dropped or the bootstrap command failed.
    Error(DbgpError),
    /// A message with an unrecognised document element.
    Unhandled(String),
    /// The session is over. Sent once.
    Closed,
}

impl SessionEvent {
    fn named(status: Status) -> Self {
        match status {
            Status::Starting => SessionEvent::Starting,
            Status::Running => SessionEvent::Running,
            Status::Break => SessionEvent::Break,
            Status::Stopping => SessionEvent::Stopping,
            Status::Stopped => SessionEvent::Stopped,
        }
    }
}

/// Per-session behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Send `step_into` right after the handshake so the script stops on
    /// its first line.
    pub break_on_first_line: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            break_on_first_line: true,
        }
    }
}

/// Protocol state of a single engine connection.
#[derive(Debug)]
pub struct Session {
    options: SessionOptions,
    status: Status,
    identity: Option<SessionIdentity>,
    next_seq: u32,
    pending: PendingTable,
    events: mpsc::UnboundedSender<SessionEvent>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    closed: bool,
}

impl Session {
    /// Create a session in the `starting` state.
    pub fn new(
        options: SessionOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            options,
            status: Status::Starting,
            identity: None,
            next_seq: 1,
            pending: PendingTable::new(),
            events,
            outbound: Some(outbound),
            closed: false,
        }
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Handshake identity, once `init` has arrived.
    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }

    /// Whether the handshake has been processed.
    pub fn is_initialized(&self) -> bool {
        self.identity.is_some()
    }

    /// Whether the engine reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of commands awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send a command and return its transaction id and reply receiver.
    ///
    /// The transaction id is assigned here; any id already on `command` is
    /// replaced. A command that fails validation is not sent and leaves
    /// nothing pending.
    pub fn send_command(
        &mut self,
        command: Command,
    ) -> Result<(u32, oneshot::Receiver<Reply>), DbgpError> {
        let name = command.name.clone();
        let id = self.transmit(command)?;
        Ok((id, self.pending.register(id, name)))
    }

    /// Send a continuation command (`run`, `step_*`, `stop`), marking the
    /// session `running` before it goes out.
    pub fn continue_command(
        &mut self,
        command: Command,
    ) -> Result<(u32, oneshot::Receiver<Reply>), DbgpError> {
        if self.closed {
            return Err(DbgpError::SessionClosed);
        }
        command.clone().seq(self.next_seq).validate()?;
        self.set_status(Status::Running);
        self.send_command(command)
    }

    fn transmit(&mut self, command: Command) -> Result<u32, DbgpError> {
        if self.closed {
            return Err(DbgpError::SessionClosed);
        }
        let id = self.next_seq;
        let bytes = write_command(&command.seq(id))?;
        let outbound = self.outbound.as_ref().ok_or(DbgpError::SessionClosed)?;
        tracing::debug!(
            id,
            line = %String::from_utf8_lossy(&bytes[..bytes.len().saturating_sub(1)]),
            "command out"
        );
        outbound
            .send(bytes)
            .map_err(|_| DbgpError::Transport("outbound channel closed".into()))?;
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(id)
    }

    /// Decode and act on one inbound frame.
    ///
    /// `Parse` errors drop the message and leave the session usable;
    /// `Protocol` errors mean it must be closed. Frames arriving after
    /// [`Session::close`] are dropped.
    pub fn dispatch(&mut self, frame: &str) -> Result<(), DbgpError> {
        if self.closed {
            tracing::debug!(len = frame.len(), "message after close dropped");
            return Ok(());
        }
        tracing::debug!(len = frame.len(), "message in");
        match Message::parse(frame)? {
            Message::Init(init) => self.handle_init(&init),
            Message::Response(response) => self.handle_response(response),
            Message::Other(name) => {
                tracing::warn!(%name, "unhandled message type");
                self.emit(SessionEvent::Unhandled(name));
                Ok(())
            }
        }
    }

    fn handle_init(&mut self, init: &Element) -> Result<(), DbgpError> {
        if self.identity.is_some() {
            return Err(DbgpError::Protocol(
                "cannot initialize debugger session more than once".into(),
            ));
        }
        let identity = SessionIdentity::from_init(init);
        tracing::info!(
            app_id = %identity.app_id,
            ide_key = %identity.ide_key,
            language = %identity.language,
            engine = %identity.engine.name,
            "debugger engine connected"
        );
        self.identity = Some(identity.clone());

        if !self.options.break_on_first_line {
            self.emit(SessionEvent::Ready(identity));
            return Ok(());
        }

        self.set_status(Status::Running);
        match self.transmit(Command::new("step_into")) {
            Ok(id) => self.pending.register_bootstrap(id),
            Err(e) => {
                tracing::warn!(error = %e, "bootstrap step_into failed");
                self.emit(SessionEvent::Error(e));
            }
        }
        Ok(())
    }

    fn handle_response(&mut self, response: CommandResponse) -> Result<(), DbgpError> {
        let status = response.status.clone();

        if let Some(id) = response.transaction_id.filter(|_| !response.command.is_empty()) {
            let reply = match &response.error {
                Some(e) => Err(e.clone()),
                None => Ok(response),
            };
            if let Resolution::Bootstrap(reply) = self.pending.resolve(id, reply) {
                match reply {
                    Ok(_) => {
                        let identity = self.identity.clone().unwrap_or_default();
                        self.emit(SessionEvent::Ready(identity));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "bootstrap step_into rejected");
                        self.emit(SessionEvent::Error(e));
                    }
                }
            }
        }

        if let Some(status) = status {
            self.set_status(status.parse()?);
        }
        Ok(())
    }

    fn set_status(&mut self, status: Status) {
        if self.status == status {
            return;
        }
        tracing::info!(from = %self.status, to = %status, "status changed");
        self.status = status;
        self.emit(SessionEvent::StatusChanged(status));
        self.emit(SessionEvent::named(status));
    }

    /// Forget a command whose deadline passed. A late reply is ignored.
    pub fn expire(&mut self, id: u32) -> bool {
        let expired = self.pending.expire(id);
        if expired {
            tracing::warn!(id, "command expired without a reply");
        }
        expired
    }

    /// End the session: fail pending commands, stop the writer and emit
    /// [`SessionEvent::Closed`]. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.pending.fail_all(&DbgpError::SessionClosed) {
            self.emit(SessionEvent::Error(DbgpError::SessionClosed));
        }
        self.outbound = None;
        tracing::info!(status = %self.status, "session closed");
        self.emit(SessionEvent::Closed);
    }

    fn emit(&self, event: SessionEvent) {
        // The host may have stopped listening; the session carries on.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ArgValue;

    const NS: &str = r#"xmlns="urn:debugger_protocol_v1" xmlns:xdebug="https://xdebug.org/dbgp/xdebug""#;

    struct Harness {
        session: Session,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        wire: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    impl Harness {
        fn new(break_on_first_line: bool) -> Self {
            let (events_tx, events) = mpsc::unbounded_channel();
            let (wire_tx, wire) = mpsc::unbounded_channel();
            let session = Session::new(
                SessionOptions {
                    break_on_first_line,
                },
                events_tx,
                wire_tx,
            );
            Self {
                session,
                events,
                wire,
            }
        }

        fn sent(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(bytes) = self.wire.try_recv() {
                out.push(String::from_utf8(bytes).unwrap());
            }
            out
        }

        fn events(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            while let Ok(e) = self.events.try_recv() {
                out.push(e);
            }
            out
        }

        fn init(&mut self) {
            self.session
                .dispatch(&format!(
                    r#"<init {NS} appid="42" idekey="dbgp" language="PHP" protocol_version="1.0" fileuri="file:///a.php"><engine version="3.1.0">Xdebug</engine></init>"#
                ))
                .unwrap();
        }

        fn respond(&mut self, command: &str, id: u32, status: &str) {
            self.session
                .dispatch(&format!(
                    r#"<response {NS} command="{command}" transaction_id="{id}" status="{status}" reason="ok"/>"#
                ))
                .unwrap();
        }
    }

    fn names(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                SessionEvent::Ready(_) => "ready".to_string(),
                SessionEvent::StatusChanged(s) => format!("status:{s}"),
                SessionEvent::Starting => "starting".to_string(),
                SessionEvent::Running => "running".to_string(),
                SessionEvent::Break => "break".to_string(),
                SessionEvent::Stopping => "stopping".to_string(),
                SessionEvent::Stopped => "stopped".to_string(),
                SessionEvent::Error(e) => format!("error:{e}"),
                SessionEvent::Unhandled(n) => format!("unhandled:{n}"),
                SessionEvent::Closed => "closed".to_string(),
            })
            .collect()
    }

    #[test]
    fn status_parse_and_display() {
        for s in ["starting", "running", "break", "stopping", "stopped"] {
            assert_eq!(s.parse::<Status>().unwrap().to_string(), s);
        }
        assert!(matches!(
            "paused".parse::<Status>(),
            Err(DbgpError::Protocol(_))
        ));
    }

    #[test]
    fn session_starts_in_starting_state() {
        let h = Harness::new(true);
        assert_eq!(h.session.status(), Status::Starting);
        assert!(!h.session.is_initialized());
        assert!(h.session.identity().is_none());
    }

    #[test]
    fn session_init_sends_bootstrap_step_into() {
        let mut h = Harness::new(true);
        h.init();
        assert_eq!(h.sent(), vec!["step_into -i 1\0"]);
        assert_eq!(h.session.status(), Status::Running);
        assert_eq!(h.session.pending_count(), 1);
        assert_eq!(names(&h.events()), vec!["status:running", "running"]);

        h.respond("step_into", 1, "break");
        let events = h.events();
        assert_eq!(names(&events), vec!["ready", "status:break", "break"]);
        match &events[0] {
            SessionEvent::Ready(id) => {
                assert_eq!(id.app_id, "42");
                assert_eq!(id.engine.name, "Xdebug");
                assert_eq!(id.engine.version, "3.1.0");
            }
            other => panic!("expected ready, got {other:?}"),
        }
        assert_eq!(h.session.pending_count(), 0);
    }

    #[test]
    fn session_init_without_bootstrap_is_ready_at_once() {
        let mut h = Harness::new(false);
        h.init();
        assert!(h.sent().is_empty());
        assert_eq!(names(&h.events()), vec!["ready"]);
        assert_eq!(h.session.status(), Status::Starting);
    }

    #[test]
    fn session_bootstrap_failure_emits_error() {
        let mut h = Harness::new(true);
        h.init();
        h.events();
        h.session
            .dispatch(&format!(
                r#"<response {NS} command="step_into" transaction_id="1"><error code="5"><message>command is not available</message></error></response>"#
            ))
            .unwrap();
        let events = h.events();
        assert_eq!(names(&events), vec!["error:engine error 5: command is not available"]);
    }

    #[test]
    fn session_double_init_is_protocol_error() {
        let mut h = Harness::new(false);
        h.init();
        let err = h
            .session
            .dispatch(&format!(
                r#"<init {NS} appid="99" idekey="other"><engine version="9">Other</engine></init>"#
            ))
            .unwrap_err();
        assert!(matches!(err, DbgpError::Protocol(_)));
        assert!(err.is_fatal());
        let id = h.session.identity().unwrap();
        assert_eq!(id.app_id, "42");
        assert_eq!(id.engine.name, "Xdebug");
    }

    #[tokio::test]
    async fn session_routes_out_of_order_replies() {
        let mut h = Harness::new(false);
        h.init();
        let (id1, rx1) = h.session.send_command(Command::new("status")).unwrap();
        let (id2, mut rx2) = h.session.send_command(Command::new("eval").payload("1+1")).unwrap();
        assert_eq!((id1, id2), (1, 2));

        h.respond("status", id1, "break");
        let first = rx1.await.unwrap().unwrap();
        assert_eq!(first.transaction_id, Some(1));
        assert!(rx2.try_recv().is_err());
        assert_eq!(h.session.pending_count(), 1);
    }

    #[test]
    fn session_unknown_transaction_is_ignored() {
        let mut h = Harness::new(false);
        h.init();
        let _rx = h.session.send_command(Command::new("status")).unwrap();
        h.respond("status", 77, "break");
        assert_eq!(h.session.pending_count(), 1);
        assert_eq!(h.session.status(), Status::Break);
    }

    #[test]
    fn session_status_events_only_on_change() {
        let mut h = Harness::new(false);
        h.init();
        h.events();
        h.respond("status", 50, "break");
        h.respond("status", 51, "break");
        assert_eq!(names(&h.events()), vec!["status:break", "break"]);
    }

    #[test]
    fn session_unknown_status_is_protocol_error() {
        let mut h = Harness::new(false);
        h.init();
        let err = h
            .session
            .dispatch(&format!(
                r#"<response {NS} command="status" transaction_id="1" status="dancing"/>"#
            ))
            .unwrap_err();
        assert!(matches!(err, DbgpError::Protocol(_)));
    }

    #[test]
    fn session_continuation_sets_running_first() {
        let mut h = Harness::new(false);
        h.init();
        h.respond("status", 9, "break");
        h.events();

        let (id, _rx) = h.session.continue_command(Command::new("run")).unwrap();
        assert_eq!(h.session.status(), Status::Running);
        assert_eq!(names(&h.events()), vec!["status:running", "running"]);
        assert_eq!(h.sent(), vec![format!("run -i {id}\0")]);
    }

    #[test]
    fn session_invalid_command_registers_nothing() {
        let mut h = Harness::new(false);
        h.init();
        let err = h
            .session
            .send_command(Command::new("feature_get").arg("bad key", ArgValue::Int(1)))
            .unwrap_err();
        assert!(matches!(err, DbgpError::Validation(_)));
        assert_eq!(h.session.pending_count(), 0);
        assert!(h.sent().is_empty());

        // The failed command did not consume a transaction id.
        let (id, _rx) = h.session.send_command(Command::new("status")).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn session_invalid_continuation_keeps_status() {
        let mut h = Harness::new(false);
        h.init();
        h.respond("status", 9, "break");
        let err = h
            .session
            .continue_command(Command::new("run").arg("no good", 1))
            .unwrap_err();
        assert!(matches!(err, DbgpError::Validation(_)));
        assert_eq!(h.session.status(), Status::Break);
    }

    #[test]
    fn session_stopping_is_finished() {
        let mut h = Harness::new(false);
        h.init();
        assert!(!h.session.is_finished());
        h.respond("run", 3, "stopping");
        assert!(h.session.is_finished());
    }

    #[test]
    fn session_other_message_is_unhandled() {
        let mut h = Harness::new(false);
        h.init();
        h.events();
        h.session
            .dispatch(&format!(r#"<stream {NS} type="stdout">aGk=</stream>"#))
            .unwrap();
        assert_eq!(names(&h.events()), vec!["unhandled:stream"]);
    }

    #[test]
    fn session_parse_error_is_not_fatal() {
        let mut h = Harness::new(false);
        let err = h.session.dispatch("<foo>&such; this is not xml!").unwrap_err();
        assert!(matches!(err, DbgpError::Parse(_)));
        assert!(!err.is_fatal());
        h.init();
        assert!(h.session.is_initialized());
    }

    #[tokio::test]
    async fn session_engine_error_reaches_only_its_caller() {
        let mut h = Harness::new(false);
        h.init();
        h.events();
        let (id, rx) = h
            .session
            .send_command(Command::new("property_get").arg("n", "$nope"))
            .unwrap();
        h.session
            .dispatch(&format!(
                r#"<response {NS} command="property_get" transaction_id="{id}"><error code="300"><message>can not get property</message></error></response>"#
            ))
            .unwrap();
        assert!(matches!(
            rx.await.unwrap(),
            Err(DbgpError::Engine { code: Some(300), .. })
        ));
        assert!(h.events().is_empty());
    }

    #[tokio::test]
    async fn session_close_fails_pending_once() {
        let mut h = Harness::new(false);
        h.init();
        h.events();
        let (_, rx) = h.session.send_command(Command::new("run")).unwrap();
        h.session.close();
        h.session.close();

        assert!(matches!(rx.await.unwrap(), Err(DbgpError::SessionClosed)));
        assert_eq!(names(&h.events()), vec!["closed"]);
        assert!(h.session.is_closed());
        assert!(matches!(
            h.session.send_command(Command::new("status")),
            Err(DbgpError::SessionClosed)
        ));
    }

    #[test]
    fn session_expire_then_late_reply_is_discarded() {
        let mut h = Harness::new(false);
        h.init();
        let (id, _rx) = h.session.send_command(Command::new("eval")).unwrap();
        assert!(h.session.expire(id));
        h.respond("eval", id, "break");
        assert_eq!(h.session.pending_count(), 0);
    }

    #[test]
    fn session_ignores_frames_after_close() {
        let mut h = Harness::new(false);
        h.init();
        h.events();
        h.session.close();

        h.respond("run", 1, "break");
        assert!(h.session.dispatch("not xml at all").is_ok());
        assert_eq!(h.session.status(), Status::Starting);
        assert_eq!(names(&h.events()), vec!["closed"]);
    }

    #[test]
    fn session_continue_after_close_keeps_status() {
        let mut h = Harness::new(false);
        h.init();
        h.session.close();
        h.events();

        assert!(matches!(
            h.session.continue_command(Command::new("run")),
            Err(DbgpError::SessionClosed)
        ));
        assert_eq!(h.session.status(), Status::Starting);
        assert!(h.events().is_empty());
        assert!(h.sent().is_empty());
    }

    #[test]
    fn session_expire_after_reply_reports_nothing_expired() {
        let mut h = Harness::new(false);
        h.init();
        let (id, _rx) = h.session.send_command(Command::new("status")).unwrap();
        h.respond("status", id, "starting");
        assert!(!h.session.expire(id));
    }
}
