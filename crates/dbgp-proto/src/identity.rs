//! Session identity read from the `init` handshake.

use std::collections::BTreeMap;

use crate::xml::Element;

/// The debugger engine announced in the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInfo {
    /// Engine name, the text of `<engine>`.
    pub name: String,
    /// `<engine version>`.
    pub version: String,
    /// Every other child of `<init>` by name, e.g. `author`, `url`.
    pub info: BTreeMap<String, String>,
}

/// Who connected: populated once per session from `<init>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub protocol_version: String,
    pub app_id: String,
    pub ide_key: String,
    pub session_id: String,
    pub thread_id: String,
    pub parent_app_id: String,
    pub language: String,
    pub file_uri: String,
    pub engine: EngineInfo,
}

impl SessionIdentity {
    /// Read the identity from an `<init>` element. Missing attributes are
    /// left empty.
    pub fn from_init(init: &Element) -> Self {
        let attr = |name: &str| init.attr(name).unwrap_or_default().to_string();

        let mut engine = EngineInfo::default();
        for child in init.elements() {
            if child.name == "engine" {
                engine.name = child.text().trim().to_string();
                engine.version = child.attr("version").unwrap_or_default().to_string();
            } else {
                engine
                    .info
                    .insert(child.qualified_name(), child.text().trim().to_string());
            }
        }

        Self {
            protocol_version: attr("protocol_version"),
            app_id: attr("appid"),
            ide_key: attr("idekey"),
            session_id: attr("session"),
            thread_id: attr("thread"),
            parent_app_id: attr("parent"),
            language: attr("language"),
            file_uri: attr("fileuri"),
            engine,
        }
    }
}
