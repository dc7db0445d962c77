//! Typed views of property, stack and context elements.
//!
//! These read the generic DBGP attributes only. Turning a property into a
//! language-specific display value is left to the caller.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::xml::Element;

/// A variable or expression result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Short name, e.g. `$a` or an array key.
    pub name: String,
    /// Expression that addresses this property from the top of its context.
    pub fullname: String,
    /// Engine type name (`int`, `string`, `array`, `object`, ...).
    #[serde(rename = "type")]
    pub type_name: String,
    /// Class of an object value.
    pub classname: Option<String>,
    /// Whether the property has children to expand.
    pub has_children: bool,
    /// Number of children the engine reports.
    pub num_children: u32,
    /// Memory address, for engines that report one.
    pub address: Option<String>,
    /// Length of the value in bytes.
    pub size: Option<u64>,
    /// Space separated facets such as `static public`.
    pub facet: Option<String>,
    /// Value text, base64-decoded when the engine encoded it.
    pub value: String,
    /// Children included in the reply.
    pub children: Vec<Property>,
}

impl Property {
    /// Read a `<property>` element and its nested properties.
    pub fn from_element(element: &Element) -> Self {
        let attr = |name: &str| element.attr(name).map(str::to_string);
        let raw = element.text();
        let value = match element.attr("encoding") {
            Some("base64") => decode_base64(&raw),
            _ => raw,
        };

        Self {
            name: attr("name").unwrap_or_default(),
            fullname: attr("fullname").unwrap_or_default(),
            type_name: attr("type").unwrap_or_default(),
            classname: attr("classname"),
            has_children: element.attr("children") == Some("1"),
            num_children: parse_or_default(element.attr("numchildren")),
            address: attr("address"),
            size: element.attr("size").and_then(|s| s.trim().parse().ok()),
            facet: attr("facet"),
            value,
            children: element
                .elements()
                .filter(|e| e.name == "property")
                .map(Property::from_element)
                .collect(),
        }
    }
}

/// One entry of a `stack_get` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Depth, 0 being the current frame.
    pub level: u32,
    /// `file` or `eval`.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// File URI.
    pub filename: String,
    /// 1-based line.
    pub lineno: u32,
    /// Function or method name.
    #[serde(rename = "where")]
    pub location: String,
    /// `line:column` where the current statement begins.
    pub cmdbegin: Option<String>,
    /// `line:column` where it ends.
    pub cmdend: Option<String>,
}

impl StackFrame {
    /// Read a `<stack>` element.
    pub fn from_element(element: &Element) -> Self {
        let attr = |name: &str| element.attr(name).map(str::to_string);
        Self {
            level: parse_or_default(element.attr("level")),
            frame_type: attr("type").unwrap_or_default(),
            filename: attr("filename").unwrap_or_default(),
            lineno: parse_or_default(element.attr("lineno")),
            location: attr("where").unwrap_or_default(),
            cmdbegin: attr("cmdbegin"),
            cmdend: attr("cmdend"),
        }
    }
}

/// A variable scope offered by the engine (locals, superglobals, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextName {
    pub name: String,
    pub id: u32,
}

impl ContextName {
    /// Read a `<context>` element.
    pub fn from_element(element: &Element) -> Self {
        Self {
            name: element.attr("name").unwrap_or_default().to_string(),
            id: parse_or_default(element.attr("id")),
        }
    }
}

pub(crate) fn parse_or_default<T: std::str::FromStr + Default>(value: Option<&str>) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_default()
}

/// Decode base64 text, ignoring embedded whitespace. Undecodable input is
/// returned unchanged.
pub(crate) fn decode_base64(text: &str) -> String {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::debug!(error = %e, "value is not valid base64");
            text.to_string()
        }
    }
}
