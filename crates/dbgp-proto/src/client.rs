//! Async command API over a shared [`Session`].
//!
//! Every call sends one command, then waits for its reply under the
//! session's command deadline. A reply that never arrives is expired from
//! the pending table and reported as [`DbgpError::Timeout`]. Continuation
//! commands only answer once the script breaks or ends, so they have their
//! own deadline, unbounded by default.
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};

use crate::breakpoint::{Breakpoint, BreakpointInfo, BreakpointState};
use crate::command::{ArgValue, Command};
use crate::error::DbgpError;
use crate::identity::SessionIdentity;
use crate::message::CommandResponse;
use crate::pending::Reply;
use crate::property::{decode_base64, ContextName, Property, StackFrame};
use crate::session::{Session, Status};

/// Default command deadline (seconds).
pub const COMMAND_TIMEOUT_SECS: u64 = 10;

/// A cloneable handle for issuing commands to one engine.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<Session>>,
    deadline: Duration,
    continuation_deadline: Option<Duration>,
}

impl SessionHandle {
    /// Wrap a session with the given command deadline. Continuation
    /// commands wait without a deadline.
    pub fn new(session: Arc<Mutex<Session>>, deadline: Duration) -> Self {
        Self {
            session,
            deadline,
            continuation_deadline: None,
        }
    }

    /// Bound how long `run`, `step_*` and `stop` wait for their reply.
    pub fn with_continuation_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.continuation_deadline = deadline;
        self
    }

    /// The underlying session.
    pub fn session(&self) -> Arc<Mutex<Session>> {
        self.session.clone()
    }

    /// Handshake identity, once the engine has sent `init`.
    pub async fn identity(&self) -> Option<SessionIdentity> {
        self.session.lock().await.identity().cloned()
    }

    /// Locally recorded status, without a round trip.
    pub async fn status_now(&self) -> Status {
        self.session.lock().await.status()
    }

    /// Whether the session has been closed.
    pub async fn is_closed(&self) -> bool {
        self.session.lock().await.is_closed()
    }

    /// Close the session; pending commands fail with `SessionClosed`.
    pub async fn close(&self) {
        self.session.lock().await.close();
    }

    /// Send any command and wait for its reply.
    pub async fn request(&self, command: Command) -> Result<CommandResponse, DbgpError> {
        let name = command.name.clone();
        let (id, rx) = self.session.lock().await.send_command(command)?;
        self.wait(name, id, rx, Some(self.deadline)).await
    }

    async fn continuation(&self, name: &str) -> Result<Status, DbgpError> {
        let (id, rx) = self
            .session
            .lock()
            .await
            .continue_command(Command::new(name))?;
        let response = self
            .wait(name.to_string(), id, rx, self.continuation_deadline)
            .await?;
        match response.status {
            Some(status) => status.parse(),
            None => Ok(self.status_now().await),
        }
    }

    async fn wait(
        &self,
        command: String,
        id: u32,
        rx: oneshot::Receiver<Reply>,
        deadline: Option<Duration>,
    ) -> Result<CommandResponse, DbgpError> {
        let received = match deadline {
            Some(deadline) => timeout(deadline, rx).await,
            None => Ok(rx.await),
        };
        match received {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(DbgpError::SessionClosed),
            Err(_) => {
                if !self.session.lock().await.expire(id) {
                    tracing::warn!(id, %command, "reply arrived as the deadline passed and was dropped");
                }
                Err(DbgpError::Timeout {
                    command,
                    transaction_id: id,
                })
            }
        }
    }

    // -- status & evaluation ------------------------------------------------

    /// Ask the engine for its status.
    pub async fn status(&self) -> Result<Status, DbgpError> {
        let response = self.request(Command::new("status")).await?;
        match response.status {
            Some(status) => status.parse(),
            None => Err(DbgpError::engine("status reply without a status")),
        }
    }

    /// Evaluate an expression in the current frame.
    pub async fn eval(&self, expression: &str) -> Result<Option<Property>, DbgpError> {
        let response = self
            .request(Command::new("eval").payload(expression))
            .await?;
        let property = response.children("property").next().map(Property::from_element);
        Ok(property)
    }

    // -- feature negotiation --------------------------------------------------

    /// Read an engine feature. Fails when the engine does not support it.
    pub async fn feature_get(&self, name: &str) -> Result<String, DbgpError> {
        let response = self
            .request(Command::new("feature_get").arg("n", name))
            .await?;
        if !response.flag("supported") {
            return Err(DbgpError::engine(format!(
                "no support for debugger feature: {name}"
            )));
        }
        Ok(response.text)
    }

    /// Set an engine feature. Fails when the engine refuses.
    pub async fn feature_set(
        &self,
        name: &str,
        value: impl Into<ArgValue>,
    ) -> Result<(), DbgpError> {
        let response = self
            .request(Command::new("feature_set").arg("n", name).arg("v", value))
            .await?;
        if !response.flag("success") {
            return Err(DbgpError::engine(format!(
                "could not set debugger feature: {name}"
            )));
        }
        Ok(())
    }

    /// Set `max_depth` ahead of an inspection command. A refusal is logged
    /// and the inspection goes ahead anyway.
    async fn limit_depth(&self, depth: u32) -> Result<(), DbgpError> {
        match self.feature_set("max_depth", depth).await {
            Err(e @ DbgpError::Engine { .. }) => {
                tracing::warn!(error = %e, depth, "max_depth not applied");
                Ok(())
            }
            other => other,
        }
    }

    // -- continuation ---------------------------------------------------------

    /// Resume until the next breakpoint or the end of the script.
    pub async fn run(&self) -> Result<Status, DbgpError> {
        self.continuation("run").await
    }

    /// Step to the next statement, entering calls.
    pub async fn step_into(&self) -> Result<Status, DbgpError> {
        self.continuation("step_into").await
    }

    /// Step to the next statement in the current frame.
    pub async fn step_over(&self) -> Result<Status, DbgpError> {
        self.continuation("step_over").await
    }

    /// Run until the current function returns.
    pub async fn step_out(&self) -> Result<Status, DbgpError> {
        self.continuation("step_out").await
    }

    /// End the script.
    pub async fn stop(&self) -> Result<Status, DbgpError> {
        self.continuation("stop").await
    }

    /// Let the script run on without the debugger.
    pub async fn detach(&self) -> Result<(), DbgpError> {
        self.request(Command::new("detach")).await.map(|_| ())
    }

    // -- stack & contexts -----------------------------------------------------

    /// Frames of the call stack, or the one at `depth`.
    pub async fn stack_get(&self, depth: Option<u32>) -> Result<Vec<StackFrame>, DbgpError> {
        let response = self
            .request(Command::new("stack_get").arg("d", depth))
            .await?;
        Ok(response.children("stack").map(StackFrame::from_element).collect())
    }

    /// Number of frames on the stack.
    pub async fn stack_depth(&self) -> Result<u32, DbgpError> {
        let response = self.request(Command::new("stack_depth")).await?;
        response
            .attr("depth")
            .and_then(|d| d.trim().parse().ok())
            .ok_or_else(|| DbgpError::engine("stack_depth reply without a depth"))
    }

    /// Variable scopes available at `depth`.
    pub async fn context_names(&self, depth: Option<u32>) -> Result<Vec<ContextName>, DbgpError> {
        let response = self
            .request(Command::new("context_names").arg("d", depth))
            .await?;
        Ok(response
            .children("context")
            .map(ContextName::from_element)
            .collect())
    }

    /// Properties of a context, fully expanded.
    pub async fn context_get(
        &self,
        depth: Option<u32>,
        context: Option<u32>,
    ) -> Result<Vec<Property>, DbgpError> {
        self.limit_depth(0).await?;
        let response = self
            .request(Command::new("context_get").arg("d", depth).arg("c", context))
            .await?;
        Ok(response
            .children("property")
            .map(Property::from_element)
            .collect())
    }

    /// Direct children of the property named `fullname`.
    pub async fn child_properties(
        &self,
        fullname: &str,
        context: Option<u32>,
    ) -> Result<Vec<Property>, DbgpError> {
        self.limit_depth(1).await?;
        let response = self
            .request(
                Command::new("property_get")
                    .arg("c", context)
                    .arg("n", fullname),
            )
            .await?;
        let children = response
            .children("property")
            .next()
            .map(|parent| Property::from_element(parent).children)
            .unwrap_or_default();
        Ok(children)
    }

    // -- properties -----------------------------------------------------------

    /// Assign `value` to a property and return its new state.
    pub async fn property_set(
        &self,
        fullname: &str,
        value: &str,
        depth: Option<u32>,
        context: Option<u32>,
    ) -> Result<Property, DbgpError> {
        let response = self
            .request(
                Command::new("property_set")
                    .arg("d", depth)
                    .arg("c", context)
                    .arg("n", fullname)
                    .payload(value),
            )
            .await?;
        if !response.flag("success") {
            return Err(DbgpError::engine("could not set value in debugger"));
        }
        self.property_value(fullname, depth, context).await
    }

    /// Read the full value of a property.
    pub async fn property_value(
        &self,
        fullname: &str,
        depth: Option<u32>,
        context: Option<u32>,
    ) -> Result<Property, DbgpError> {
        let response = self
            .request(
                Command::new("property_value")
                    .arg("d", depth)
                    .arg("c", context)
                    .arg("n", fullname),
            )
            .await?;
        let mut property = Property::from_element(&response.element);
        property.name = fullname.to_string();
        property.fullname = fullname.to_string();
        Ok(property)
    }

    /// Source of a file, or of the lines `begin..=end`.
    pub async fn source(
        &self,
        file: &str,
        begin: Option<u32>,
        end: Option<u32>,
    ) -> Result<String, DbgpError> {
        let response = self
            .request(
                Command::new("source")
                    .arg("f", file)
                    .arg("b", begin)
                    .arg("e", end),
            )
            .await?;
        if response.attr("success") == Some("0") {
            return Err(DbgpError::engine(format!("could not read source: {file}")));
        }
        Ok(decode_base64(&response.text))
    }

    // -- breakpoints ----------------------------------------------------------

    /// Set a breakpoint and return the engine's id for it.
    pub async fn breakpoint_set(&self, breakpoint: &Breakpoint) -> Result<String, DbgpError> {
        let response = self.request(breakpoint.to_command()).await?;
        response
            .attr("id")
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| DbgpError::engine("breakpoint_set reply without an id"))
    }

    /// Change an existing breakpoint. `None` fields stay as they are.
    pub async fn breakpoint_update(
        &self,
        id: &str,
        state: Option<BreakpointState>,
        line: Option<u32>,
        hit_value: Option<u32>,
        hit_condition: Option<&str>,
    ) -> Result<(), DbgpError> {
        self.request(
            Command::new("breakpoint_update")
                .arg("d", id)
                .arg("s", state.map(BreakpointState::as_str))
                .arg("n", line)
                .arg("h", hit_value)
                .arg("o", hit_condition),
        )
        .await
        .map(|_| ())
    }

    /// Remove a breakpoint.
    pub async fn breakpoint_remove(&self, id: &str) -> Result<(), DbgpError> {
        self.request(Command::new("breakpoint_remove").arg("d", id))
            .await
            .map(|_| ())
    }

    /// Breakpoints currently set on the engine.
    pub async fn breakpoint_list(&self) -> Result<Vec<BreakpointInfo>, DbgpError> {
        let response = self.request(Command::new("breakpoint_list")).await?;
        Ok(response
            .children("breakpoint")
            .map(BreakpointInfo::from_element)
            .collect())
    }
}
