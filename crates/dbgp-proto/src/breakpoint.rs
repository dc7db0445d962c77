//! Breakpoint descriptions for `breakpoint_set` and friends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::command::{ArgValue, Command};
use crate::error::DbgpError;
use crate::property::parse_or_default;
use crate::xml::Element;

/// Breakpoint type (`-t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointKind {
    Line,
    Call,
    Return,
    Exception,
    Conditional,
    Watch,
}

impl BreakpointKind {
    /// Protocol spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            BreakpointKind::Line => "line",
            BreakpointKind::Call => "call",
            BreakpointKind::Return => "return",
            BreakpointKind::Exception => "exception",
            BreakpointKind::Conditional => "conditional",
            BreakpointKind::Watch => "watch",
        }
    }
}

impl FromStr for BreakpointKind {
    type Err = DbgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "line" => BreakpointKind::Line,
            "call" => BreakpointKind::Call,
            "return" => BreakpointKind::Return,
            "exception" => BreakpointKind::Exception,
            "conditional" => BreakpointKind::Conditional,
            "watch" => BreakpointKind::Watch,
            other => {
                return Err(DbgpError::Protocol(format!(
                    "unknown breakpoint type '{other}'"
                )))
            }
        })
    }
}

impl fmt::Display for BreakpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breakpoint state (`-s`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointState {
    #[default]
    Enabled,
    Disabled,
}

impl BreakpointState {
    /// Protocol spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            BreakpointState::Enabled => "enabled",
            BreakpointState::Disabled => "disabled",
        }
    }
}

impl From<bool> for BreakpointState {
    fn from(enabled: bool) -> Self {
        if enabled {
            BreakpointState::Enabled
        } else {
            BreakpointState::Disabled
        }
    }
}

/// A breakpoint to set on the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub kind: BreakpointKind,
    pub state: BreakpointState,
    /// File URI (`-f`), for line and conditional breakpoints.
    pub file: Option<String>,
    /// 1-based line (`-n`).
    pub line: Option<u32>,
    /// Function name (`-m`), for call and return breakpoints.
    pub function: Option<String>,
    /// Exception class (`-x`).
    pub exception: Option<String>,
    /// Hit count the condition compares against (`-h`).
    pub hit_value: Option<u32>,
    /// `>=`, `==` or `%` (`-o`).
    pub hit_condition: Option<String>,
    /// Remove after the first hit (`-r`).
    pub temporary: bool,
    /// Condition or watch expression, sent as the command data.
    pub expression: Option<String>,
}

impl Breakpoint {
    fn new(kind: BreakpointKind) -> Self {
        Self {
            kind,
            state: BreakpointState::Enabled,
            file: None,
            line: None,
            function: None,
            exception: None,
            hit_value: None,
            hit_condition: None,
            temporary: false,
            expression: None,
        }
    }

    /// Break when execution reaches `file:line`.
    pub fn line(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line: Some(line),
            ..Self::new(BreakpointKind::Line)
        }
    }

    /// Break at `file:line` when `condition` holds.
    pub fn conditional(file: impl Into<String>, line: u32, condition: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            line: Some(line),
            expression: Some(condition.into()),
            ..Self::new(BreakpointKind::Conditional)
        }
    }

    /// Break on entry to `function`.
    pub fn call(function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            ..Self::new(BreakpointKind::Call)
        }
    }

    /// Break on return from `function`.
    pub fn on_return(function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            ..Self::new(BreakpointKind::Return)
        }
    }

    /// Break when `exception` is thrown.
    pub fn exception(exception: impl Into<String>) -> Self {
        Self {
            exception: Some(exception.into()),
            ..Self::new(BreakpointKind::Exception)
        }
    }

    /// Break when the value of `expression` changes.
    pub fn watch(expression: impl Into<String>) -> Self {
        Self {
            expression: Some(expression.into()),
            ..Self::new(BreakpointKind::Watch)
        }
    }

    /// Set the enabled state.
    pub fn with_state(mut self, state: impl Into<BreakpointState>) -> Self {
        self.state = state.into();
        self
    }

    /// Only break once the hit count satisfies `condition` against `value`.
    pub fn with_hit(mut self, value: u32, condition: impl Into<String>) -> Self {
        self.hit_value = Some(value);
        self.hit_condition = Some(condition.into());
        self
    }

    /// Remove the breakpoint after its first hit.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    /// Arguments in wire order: `-t -s -f -n -m -x -h -o -r`.
    pub fn to_args(&self) -> Vec<(&'static str, ArgValue)> {
        vec![
            ("t", self.kind.as_str().into()),
            ("s", self.state.as_str().into()),
            ("f", self.file.as_deref().into()),
            ("n", self.line.into()),
            ("m", self.function.as_deref().into()),
            ("x", self.exception.as_deref().into()),
            ("h", self.hit_value.into()),
            ("o", self.hit_condition.as_deref().into()),
            ("r", self.temporary.then_some(1u8).into()),
        ]
    }

    /// Data sent after `--`. Conditional breakpoints default to `true`.
    pub fn payload(&self) -> Option<String> {
        match (&self.expression, self.kind) {
            (Some(e), _) => Some(e.clone()),
            (None, BreakpointKind::Conditional) => Some("true".to_string()),
            (None, _) => None,
        }
    }

    /// The `breakpoint_set` command, without a transaction id.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new("breakpoint_set");
        for (key, value) in self.to_args() {
            command = command.arg(key, value);
        }
        match self.payload() {
            Some(data) => command.payload(data),
            None => command,
        }
    }
}

/// A breakpoint as reported by `breakpoint_get` / `breakpoint_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub id: String,
    pub kind: Option<BreakpointKind>,
    pub state: BreakpointState,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub function: Option<String>,
    pub exception: Option<String>,
    pub hit_count: u32,
    pub hit_value: Option<u32>,
    pub hit_condition: Option<String>,
    pub temporary: bool,
    pub expression: Option<String>,
}

impl BreakpointInfo {
    /// Read a `<breakpoint>` element.
    pub fn from_element(element: &Element) -> Self {
        let attr = |name: &str| {
            element
                .attr(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let expression = element
            .child("expression")
            .map(|e| {
                if e.attr("encoding") == Some("base64") {
                    crate::property::decode_base64(&e.text())
                } else {
                    e.text()
                }
            })
            .filter(|e| !e.is_empty());

        Self {
            id: attr("id").unwrap_or_default(),
            kind: element.attr("type").and_then(|t| t.parse().ok()),
            state: BreakpointState::from(element.attr("state") != Some("disabled")),
            filename: attr("filename"),
            lineno: element.attr("lineno").and_then(|n| n.trim().parse().ok()),
            function: attr("function"),
            exception: attr("exception"),
            hit_count: parse_or_default(element.attr("hit_count")),
            hit_value: element.attr("hit_value").and_then(|n| n.trim().parse().ok()),
            hit_condition: attr("hit_condition"),
            temporary: element.attr("temporary") == Some("1"),
            expression,
        }
    }
}
