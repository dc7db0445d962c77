//! Inbound message classification.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::DbgpError;
use crate::flatten::{flatten, ATTR_PREFIX, TEXT_KEY};
use crate::xml::{Element, XmlDocument};

/// A decoded engine message.
#[derive(Debug, Clone)]
pub enum Message {
    /// Connection handshake.
    Init(Element),
    /// Reply to a command.
    Response(CommandResponse),
    /// Any other document element, by name.
    Other(String),
}

impl Message {
    /// Parse frame text and classify it.
    pub fn parse(text: &str) -> Result<Self, DbgpError> {
        Ok(Self::from_document(XmlDocument::parse(text)?))
    }

    /// Classify a parsed document by its root element.
    pub fn from_document(doc: XmlDocument) -> Self {
        let root = doc.root();
        match root.name.as_str() {
            "init" => Message::Init(root.clone()),
            "response" => Message::Response(CommandResponse::from_element(root)),
            _ => Message::Other(root.qualified_name()),
        }
    }
}

/// The envelope of a `<response>` element.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    /// `command` attribute.
    pub command: String,
    /// `transaction_id` attribute, when present and numeric.
    pub transaction_id: Option<u32>,
    /// `status` attribute, when present and non-empty.
    pub status: Option<String>,
    /// `reason` attribute, when present and non-empty.
    pub reason: Option<String>,
    /// Result attributes: inner elements' attributes, overlaid by the
    /// response's own.
    pub attributes: BTreeMap<String, String>,
    /// Text of the response, or of its first inner element when the
    /// response itself carries none.
    pub text: String,
    /// Flattened children keyed by tag name.
    pub body: Value,
    /// Error reported by the engine in an `<error>` child.
    pub error: Option<DbgpError>,
    /// The `<response>` element as received.
    pub element: Element,
}

impl CommandResponse {
    /// Read the envelope out of a `<response>` element.
    pub fn from_element(element: &Element) -> Self {
        let non_empty = |name: &str| {
            element
                .attr(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let mut attributes = BTreeMap::new();
        let mut error = None;
        for child in element.elements() {
            if child.name == "error" {
                error = Some(engine_error(child));
                continue;
            }
            for attr in &child.attributes {
                attributes.insert(attr.qualified_name(), attr.value.clone());
            }
        }
        for attr in &element.attributes {
            attributes.insert(attr.qualified_name(), attr.value.clone());
        }

        let mut text = element.text();
        if text.trim().is_empty() {
            text = element
                .elements()
                .find(|e| e.name != "error")
                .map(Element::text)
                .unwrap_or_default();
        }

        let body = match flatten(element) {
            Value::Object(mut map) => {
                map.retain(|k, _| !k.starts_with(ATTR_PREFIX) && k != TEXT_KEY);
                Value::Object(map)
            }
            _ => Value::Object(Default::default()),
        };

        Self {
            command: element.attr("command").unwrap_or_default().to_string(),
            transaction_id: element
                .attr("transaction_id")
                .and_then(|id| id.trim().parse().ok()),
            status: non_empty("status"),
            reason: non_empty("reason"),
            attributes,
            text: text.trim().to_string(),
            body,
            error,
            element: element.clone(),
        }
    }

    /// A result attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Whether a result flag such as `success` or `supported` is set.
    pub fn flag(&self, name: &str) -> bool {
        self.attr(name) == Some("1")
    }

    /// Child elements of the response with the given local name.
    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.element.elements().filter(move |e| e.name == name)
    }
}

fn engine_error(element: &Element) -> DbgpError {
    let code = element.attr("code").and_then(|c| c.trim().parse().ok());
    let message = element
        .child("message")
        .map(|m| m.string_value())
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "command failed".to_string());
    DbgpError::Engine {
        code,
        message: message.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NS: &str = r#"xmlns="urn:debugger_protocol_v1" xmlns:xdebug="https://xdebug.org/dbgp/xdebug""#;

    fn response(xml: &str) -> CommandResponse {
        match Message::parse(xml).unwrap() {
            Message::Response(r) => r,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn message_classifies_init() {
        let xml = format!(r#"<init {NS} appid="1"><engine version="1">Xdebug</engine></init>"#);
        assert!(matches!(Message::parse(&xml).unwrap(), Message::Init(_)));
    }

    #[test]
    fn message_classifies_other() {
        let xml = format!(r#"<stream {NS} type="stdout">aGk=</stream>"#);
        match Message::parse(&xml).unwrap() {
            Message::Other(name) => assert_eq!(name, "stream"),
            other => panic!("expected other, got {other:?}"),
        }
    }

    #[test]
    fn message_parse_error_propagates() {
        assert!(matches!(
            Message::parse("<response"),
            Err(DbgpError::Parse(_))
        ));
    }

    #[test]
    fn response_envelope_fields() {
        let r = response(&format!(
            r#"<response {NS} command="step_into" transaction_id="3" status="break" reason="ok"><xdebug:message filename="file:///a.php" lineno="7"/></response>"#
        ));
        assert_eq!(r.command, "step_into");
        assert_eq!(r.transaction_id, Some(3));
        assert_eq!(r.status.as_deref(), Some("break"));
        assert_eq!(r.reason.as_deref(), Some("ok"));
        assert_eq!(r.attr("xdebug:message"), None);
        assert_eq!(r.attr("lineno"), Some("7"));
        assert_eq!(
            r.body,
            json!({ "xdebug:message": { "@filename": "file:///a.php", "@lineno": 7 } })
        );
        assert!(r.error.is_none());
        assert_eq!(r.children("message").count(), 1);
    }

    #[test]
    fn response_feature_value_is_direct_text() {
        let r = response(&format!(
            r#"<response {NS} command="feature_get" transaction_id="2" feature_name="max_depth" supported="1"><![CDATA[1]]></response>"#
        ));
        assert!(r.flag("supported"));
        assert_eq!(r.text, "1");
        assert_eq!(r.status, None);
    }

    #[test]
    fn response_envelope_wins_on_clash() {
        let r = response(&format!(
            r#"<response {NS} command="eval" transaction_id="5"><property name="x" command="inner"/></response>"#
        ));
        assert_eq!(r.attr("command"), Some("eval"));
        assert_eq!(r.attr("name"), Some("x"));
    }

    #[test]
    fn response_text_falls_back_to_inner_element() {
        let r = response(&format!(
            r#"<response {NS} command="eval" transaction_id="5"><property type="int"><![CDATA[42]]></property></response>"#
        ));
        assert_eq!(r.text, "42");
    }

    #[test]
    fn response_error_element() {
        let r = response(&format!(
            r#"<response {NS} command="property_get" transaction_id="9"><error code="300"><message><![CDATA[can not get property]]></message></error></response>"#
        ));
        match &r.error {
            Some(DbgpError::Engine { code, message }) => {
                assert_eq!(*code, Some(300));
                assert_eq!(message, "can not get property");
            }
            other => panic!("expected engine error, got {other:?}"),
        }
        assert_eq!(r.attr("code"), None);
    }

    #[test]
    fn response_non_numeric_transaction_id() {
        let r = response(&format!(r#"<response {NS} command="status" transaction_id="abc"/>"#));
        assert_eq!(r.transaction_id, None);
    }

    #[test]
    fn response_empty_status_is_none() {
        let r = response(&format!(r#"<response {NS} command="status" transaction_id="1" status=""/>"#));
        assert_eq!(r.status, None);
        assert_eq!(r.body, json!({}));
    }
}
