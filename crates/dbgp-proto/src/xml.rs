//! Owned XML tree for inbound engine messages.
//!
//! Documents are parsed with `roxmltree` and copied into an owned tree so
//! that decoded messages can outlive the frame text they came from.

use std::collections::BTreeMap;

use crate::error::DbgpError;
use crate::query::Reader;

/// A parsed inbound document.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    root: Element,
    namespaces: BTreeMap<String, String>,
}

/// An element with its namespace, attributes and children in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Local name.
    pub name: String,
    /// Prefix used in the source, if any.
    pub prefix: Option<String>,
    /// Namespace URI, if any.
    pub namespace: Option<String>,
    /// Attributes in document order.
    pub attributes: Vec<Attribute>,
    /// Child elements and text.
    pub children: Vec<XmlNode>,
}

/// An attribute of an [`Element`].
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Local name.
    pub name: String,
    /// Prefix used in the source, if any.
    pub prefix: Option<String>,
    /// Namespace URI, if any.
    pub namespace: Option<String>,
    /// Attribute value with entities resolved.
    pub value: String,
}

/// A child of an [`Element`].
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    /// A nested element.
    Element(Element),
    /// Character data, CDATA included.
    Text(String),
}

impl XmlDocument {
    /// Parse a document.
    ///
    /// Empty input and anything that is not well-formed fail with
    /// [`DbgpError::Parse`] carrying the parser's diagnostic.
    pub fn parse(text: &str) -> Result<Self, DbgpError> {
        if text.trim().is_empty() {
            return Err(DbgpError::Parse("document is empty".into()));
        }
        let doc = roxmltree::Document::parse(text).map_err(|e| DbgpError::Parse(e.to_string()))?;

        let mut namespaces = BTreeMap::new();
        for node in doc.descendants().filter(|n| n.is_element()) {
            for ns in node.namespaces() {
                if let Some(prefix) = ns.name() {
                    namespaces
                        .entry(prefix.to_string())
                        .or_insert_with(|| ns.uri().to_string());
                }
            }
        }

        Ok(Self {
            root: Element::from_node(doc.root_element()),
            namespaces,
        })
    }

    /// The document element.
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Namespace URI of the document element, used for the `x` prefix.
    pub fn default_namespace(&self) -> Option<&str> {
        self.root.namespace.as_deref()
    }

    /// Resolve a prefix the way path expressions do: `x` names the
    /// document element's namespace, anything else is looked up among the
    /// declarations in the document.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<Option<&str>, DbgpError> {
        if prefix == "x" {
            return Ok(self.default_namespace());
        }
        self.namespaces
            .get(prefix)
            .map(|uri| Some(uri.as_str()))
            .ok_or_else(|| DbgpError::Parse(format!("undeclared namespace prefix '{prefix}'")))
    }

    /// A query reader positioned at the document node.
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(self)
    }
}

impl Element {
    fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
        let namespace = node.tag_name().namespace().map(str::to_string);
        let prefix = namespace
            .as_deref()
            .and_then(|uri| prefix_for(node, uri, true));

        let attributes = node
            .attributes()
            .map(|attr| {
                let namespace = attr.namespace().map(str::to_string);
                Attribute {
                    name: attr.name().to_string(),
                    prefix: namespace
                        .as_deref()
                        .and_then(|uri| prefix_for(node, uri, false)),
                    namespace,
                    value: attr.value().to_string(),
                }
            })
            .collect();

        let mut children = Vec::new();
        for child in node.children() {
            if child.is_element() {
                children.push(XmlNode::Element(Element::from_node(child)));
            } else if child.is_text() {
                let text = child.text().unwrap_or_default();
                // roxmltree may split text around CDATA; keep it contiguous.
                if let Some(XmlNode::Text(prev)) = children.last_mut() {
                    prev.push_str(text);
                } else {
                    children.push(XmlNode::Text(text.to_string()));
                }
            }
        }

        Self {
            name: node.tag_name().name().to_string(),
            prefix,
            namespace,
            attributes,
            children,
        }
    }

    /// Qualified name as written in the source (`prefix:name` or `name`).
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Value of an un-namespaced attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Child elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Concatenated direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Concatenated text of all descendants (the XPath string value).
    pub fn string_value(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(t) => out.push_str(t),
                XmlNode::Element(e) => e.collect_text(out),
            }
        }
    }
}

impl Attribute {
    /// Qualified name as written in the source.
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Find the prefix bound to `uri` in scope at `node`. Elements may use the
/// default namespace, which has no prefix; attributes never do.
fn prefix_for(node: roxmltree::Node<'_, '_>, uri: &str, element: bool) -> Option<String> {
    let mut prefixed = None;
    for ns in node.namespaces().filter(|ns| ns.uri() == uri) {
        match ns.name() {
            None if element => return None,
            None => {}
            Some(name) => {
                prefixed.get_or_insert_with(|| name.to_string());
            }
        }
    }
    prefixed
}
