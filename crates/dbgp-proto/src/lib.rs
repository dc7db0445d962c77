//! Client side of the DBGP debugger protocol.
//!
//! This crate implements the client side of the DBGP wire protocol used by
//! script-engine debuggers such as Xdebug. The engine connects out to the
//! client; the client frames and decodes the engine's XML replies, writes
//! command lines back, and tracks the engine's run state.

pub mod breakpoint;
pub mod client;
pub mod command;
pub mod connection;
pub mod error;
pub mod flatten;
pub mod frame;
pub mod identity;
pub mod message;
pub mod pending;
pub mod property;
pub mod query;
pub mod session;
pub mod xml;

// Re-export key types for convenience.
pub use breakpoint::{Breakpoint, BreakpointInfo, BreakpointKind, BreakpointState};
pub use client::SessionHandle;
pub use command::{write_command, ArgValue, Command};
pub use connection::{connect, ConnectOptions, Listener};
pub use error::DbgpError;
pub use flatten::flatten;
pub use frame::{encode_frame, FrameReader};
pub use identity::{EngineInfo, SessionIdentity};
pub use message::{CommandResponse, Message};
pub use pending::{PendingTable, Reply};
pub use property::{ContextName, Property, StackFrame};
pub use query::Reader;
pub use session::{Session, SessionEvent, SessionOptions, Status};
pub use xml::{Attribute, Element, XmlDocument, XmlNode};
