//! Path queries over an [`XmlDocument`].
//!
//! Engine replies are read with a small subset of XPath: child and
//! descendant steps, attribute selection, `text()`, `name()`, `string()`
//! and simple predicates. The prefix `x` always names the namespace of the
//! document element, so callers never spell out the protocol URI.

use crate::error::DbgpError;
use crate::xml::{Attribute, Element, XmlDocument, XmlNode};

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// A position in a document that path expressions are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    doc: &'a XmlDocument,
    item: Item<'a>,
}

#[derive(Debug, Clone, Copy)]
enum Item<'a> {
    Document,
    Element(&'a Element),
    Attribute(&'a Attribute),
    Text(&'a str),
}

impl<'a> Reader<'a> {
    pub(crate) fn new(doc: &'a XmlDocument) -> Self {
        Self {
            doc,
            item: Item::Document,
        }
    }

    fn at(&self, item: Item<'a>) -> Self {
        Self {
            doc: self.doc,
            item,
        }
    }

    /// Nodes selected by `path`, in document order, each queryable again.
    pub fn nodes(&self, path: &str) -> Result<Vec<Reader<'a>>, DbgpError> {
        let path = Parser::new(path).parse_path_only()?;
        let items = self.eval_path(&path)?;
        Ok(items.into_iter().map(|item| self.at(item)).collect())
    }

    /// String result of `expr`: the string value of the first selected
    /// node, or the value of a `name()` / `local-name()` / `string()` call.
    /// Selecting nothing yields an empty string.
    pub fn text(&self, expr: &str) -> Result<String, DbgpError> {
        let expr = Parser::new(expr).parse_expr_only()?;
        self.eval_string(&expr)
    }

    /// The element under this reader, if it points at one.
    pub fn element(&self) -> Option<&'a Element> {
        match self.item {
            Item::Element(e) => Some(e),
            Item::Document => Some(self.doc.root()),
            Item::Attribute(_) | Item::Text(_) => None,
        }
    }

    /// Qualified name of the node under this reader.
    pub fn name(&self) -> String {
        match self.item {
            Item::Element(e) => e.qualified_name(),
            Item::Attribute(a) => a.qualified_name(),
            Item::Document | Item::Text(_) => String::new(),
        }
    }

    /// XPath string value of the node under this reader.
    pub fn string_value(&self) -> String {
        string_of(self.doc, self.item)
    }

    fn eval_string(&self, expr: &Expr) -> Result<String, DbgpError> {
        match expr {
            Expr::Path(path) => Ok(self
                .eval_path(path)?
                .first()
                .map(|item| string_of(self.doc, *item))
                .unwrap_or_default()),
            Expr::Call(func, arg) => {
                let target = match arg {
                    Some(path) => match self.eval_path(path)?.first() {
                        Some(item) => *item,
                        None => return Ok(String::new()),
                    },
                    None => self.item,
                };
                let reader = self.at(target);
                Ok(match func {
                    Func::Name => reader.name(),
                    Func::LocalName => match target {
                        Item::Element(e) => e.name.clone(),
                        Item::Attribute(a) => a.name.clone(),
                        Item::Document | Item::Text(_) => String::new(),
                    },
                    Func::String => reader.string_value(),
                })
            }
        }
    }

    fn eval_path(&self, path: &Path) -> Result<Vec<Item<'a>>, DbgpError> {
        let mut current = vec![if path.absolute {
            Item::Document
        } else {
            self.item
        }];

        for step in &path.steps {
            let mut next = Vec::new();
            for item in &current {
                let origins = if step.descendant {
                    descendants_or_self(self.doc, *item)
                } else {
                    vec![*item]
                };
                for origin in origins {
                    let mut candidates = self.apply_test(origin, &step.test)?;
                    for predicate in &step.predicates {
                        candidates = self.filter(candidates, predicate)?;
                    }
                    next.extend(candidates);
                }
            }
            current = next;
        }
        Ok(current)
    }

    fn apply_test(&self, origin: Item<'a>, test: &Test) -> Result<Vec<Item<'a>>, DbgpError> {
        Ok(match test {
            Test::SelfNode => vec![origin],
            Test::Text => match origin {
                Item::Element(e) => e
                    .children
                    .iter()
                    .filter_map(|c| match c {
                        XmlNode::Text(t) => Some(Item::Text(t.as_str())),
                        XmlNode::Element(_) => None,
                    })
                    .collect(),
                _ => Vec::new(),
            },
            Test::Element(name) => {
                let elements: Vec<&Element> = match origin {
                    Item::Document => vec![self.doc.root()],
                    Item::Element(e) => e.elements().collect(),
                    Item::Attribute(_) | Item::Text(_) => Vec::new(),
                };
                let mut out = Vec::new();
                for e in elements {
                    if self.matches(name, e.namespace.as_deref(), &e.name)? {
                        out.push(Item::Element(e));
                    }
                }
                out
            }
            Test::Attribute(name) => {
                let mut out = Vec::new();
                if let Item::Element(e) = origin {
                    for a in &e.attributes {
                        if self.matches(name, a.namespace.as_deref(), &a.name)? {
                            out.push(Item::Attribute(a));
                        }
                    }
                }
                out
            }
        })
    }

    fn matches(
        &self,
        test: &NameTest,
        namespace: Option<&str>,
        local: &str,
    ) -> Result<bool, DbgpError> {
        let namespace_ok = match &test.prefix {
            Some(prefix) => self.doc.resolve_prefix(prefix)? == namespace,
            // Unprefixed `*` matches anything; unprefixed names only match
            // nodes outside any namespace.
            None if test.local.is_none() => true,
            None => namespace.is_none(),
        };
        Ok(namespace_ok && test.local.as_deref().map_or(true, |l| l == local))
    }

    fn filter(
        &self,
        candidates: Vec<Item<'a>>,
        predicate: &Predicate,
    ) -> Result<Vec<Item<'a>>, DbgpError> {
        let mut out = Vec::new();
        for (index, item) in candidates.into_iter().enumerate() {
            let keep = match predicate {
                Predicate::Position(n) => index + 1 == *n,
                Predicate::Exists(path) => !self.at(item).eval_path(path)?.is_empty(),
                Predicate::Compare { left, equal, right } => {
                    let reader = self.at(item);
                    let lhs = reader.operand_values(left)?;
                    let rhs = reader.operand_values(right)?;
                    lhs.iter()
                        .any(|l| rhs.iter().any(|r| (l == r) == *equal))
                }
            };
            if keep {
                out.push(item);
            }
        }
        Ok(out)
    }

    fn operand_values(&self, operand: &Operand) -> Result<Vec<String>, DbgpError> {
        match operand {
            Operand::Literal(s) => Ok(vec![s.clone()]),
            Operand::Expr(Expr::Path(path)) => Ok(self
                .eval_path(path)?
                .into_iter()
                .map(|item| string_of(self.doc, item))
                .collect()),
            Operand::Expr(expr) => Ok(vec![self.eval_string(expr)?]),
        }
    }
}

fn string_of(doc: &XmlDocument, item: Item<'_>) -> String {
    match item {
        Item::Document => doc.root().string_value(),
        Item::Element(e) => e.string_value(),
        Item::Attribute(a) => a.value.clone(),
        Item::Text(t) => t.to_string(),
    }
}

fn descendants_or_self<'a>(doc: &'a XmlDocument, item: Item<'a>) -> Vec<Item<'a>> {
    fn walk<'a>(e: &'a Element, out: &mut Vec<Item<'a>>) {
        out.push(Item::Element(e));
        for child in e.elements() {
            walk(child, out);
        }
    }

    let mut out = Vec::new();
    match item {
        Item::Document => {
            out.push(Item::Document);
            walk(doc.root(), &mut out);
        }
        Item::Element(e) => walk(e, &mut out),
        other => out.push(other),
    }
    out
}

// ---------------------------------------------------------------------------
// Expression syntax
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Path(Path),
    Call(Func, Option<Path>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Name,
    LocalName,
    String,
}

#[derive(Debug, Clone, PartialEq)]
struct Path {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    descendant: bool,
    test: Test,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
enum Test {
    SelfNode,
    Text,
    Element(NameTest),
    Attribute(NameTest),
}

/// `prefix:local`; a `None` local part is the `*` wildcard.
#[derive(Debug, Clone, PartialEq)]
struct NameTest {
    prefix: Option<String>,
    local: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Exists(Path),
    Compare {
        left: Operand,
        equal: bool,
        right: Operand,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(String),
    Expr(Expr),
}

struct Parser<'s> {
    src: &'s str,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, what: &str) -> DbgpError {
        DbgpError::Parse(format!(
            "invalid path expression '{}' at offset {}: {what}",
            self.src, self.pos
        ))
    }

    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), DbgpError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{token}'")))
        }
    }

    fn finish(&mut self) -> Result<(), DbgpError> {
        self.skip_ws();
        if self.pos == self.src.len() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    fn parse_expr_only(&mut self) -> Result<Expr, DbgpError> {
        let expr = self.parse_expr()?;
        self.finish()?;
        Ok(expr)
    }

    fn parse_path_only(&mut self) -> Result<Path, DbgpError> {
        match self.parse_expr_only()? {
            Expr::Path(path) => Ok(path),
            Expr::Call(..) => Err(self.error("expected a node path")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, DbgpError> {
        self.skip_ws();
        for (name, func) in [
            ("local-name", Func::LocalName),
            ("name", Func::Name),
            ("string", Func::String),
        ] {
            let rest = self.rest();
            if let Some(after) = rest.strip_prefix(name) {
                if after.trim_start().starts_with('(') {
                    self.pos += name.len();
                    self.expect("(")?;
                    let arg = if self.eat(")") {
                        None
                    } else {
                        let path = self.parse_path()?;
                        self.expect(")")?;
                        Some(path)
                    };
                    return Ok(Expr::Call(func, arg));
                }
            }
        }
        Ok(Expr::Path(self.parse_path()?))
    }

    fn parse_path(&mut self) -> Result<Path, DbgpError> {
        self.skip_ws();
        let mut absolute = false;
        let mut descendant = false;
        if self.eat("//") {
            absolute = true;
            descendant = true;
        } else if self.eat("/") {
            absolute = true;
            self.skip_ws();
            if self.rest().is_empty() || self.rest().starts_with([')', ']']) {
                return Ok(Path {
                    absolute,
                    steps: Vec::new(),
                });
            }
        }

        let mut steps = Vec::new();
        loop {
            let test = self.parse_test()?;
            let mut predicates = Vec::new();
            while self.eat("[") {
                predicates.push(self.parse_predicate()?);
                self.expect("]")?;
            }
            steps.push(Step {
                descendant,
                test,
                predicates,
            });

            if self.eat("//") {
                descendant = true;
            } else if self.eat("/") {
                descendant = false;
            } else {
                break;
            }
        }
        Ok(Path { absolute, steps })
    }

    fn parse_test(&mut self) -> Result<Test, DbgpError> {
        self.skip_ws();
        if self.eat("@") {
            return Ok(Test::Attribute(self.parse_name_test()?));
        }
        if self.rest().starts_with("text") {
            let after = self.rest()["text".len()..].trim_start();
            if after.starts_with('(') {
                self.pos += "text".len();
                self.expect("(")?;
                self.expect(")")?;
                return Ok(Test::Text);
            }
        }
        if self.rest().starts_with('.') && !self.rest().starts_with("..") {
            self.pos += 1;
            return Ok(Test::SelfNode);
        }
        Ok(Test::Element(self.parse_name_test()?))
    }

    fn parse_name_test(&mut self) -> Result<NameTest, DbgpError> {
        if self.eat("*") {
            return Ok(NameTest {
                prefix: None,
                local: None,
            });
        }
        let first = self.parse_ncname()?;
        if self.rest().starts_with(':') && !self.rest().starts_with("::") {
            self.pos += 1;
            let local = if self.rest().starts_with('*') {
                self.pos += 1;
                None
            } else {
                Some(self.parse_ncname()?)
            };
            return Ok(NameTest {
                prefix: Some(first),
                local,
            });
        }
        Ok(NameTest {
            prefix: None,
            local: Some(first),
        })
    }

    fn parse_ncname(&mut self) -> Result<String, DbgpError> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .take_while(|(i, c)| {
                c.is_alphabetic() || *c == '_' || (*i > 0 && (c.is_alphanumeric() || *c == '-' || *c == '.'))
            })
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);
        if len == 0 {
            return Err(self.error("expected a name"));
        }
        self.pos += len;
        Ok(rest[..len].to_string())
    }

    fn parse_predicate(&mut self) -> Result<Predicate, DbgpError> {
        self.skip_ws();
        let digits: String = self.rest().chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            let after = self.rest()[digits.len()..].trim_start();
            if after.starts_with(']') {
                self.pos += digits.len();
                let n = digits
                    .parse::<usize>()
                    .map_err(|_| self.error("position out of range"))?;
                return Ok(Predicate::Position(n));
            }
        }

        let left = self.parse_operand()?;
        let equal = if self.eat("!=") {
            false
        } else if self.eat("=") {
            true
        } else {
            return match left {
                Operand::Expr(Expr::Path(path)) => Ok(Predicate::Exists(path)),
                _ => Err(self.error("expected '=' or '!='")),
            };
        };
        let right = self.parse_operand()?;
        Ok(Predicate::Compare { left, equal, right })
    }

    fn parse_operand(&mut self) -> Result<Operand, DbgpError> {
        self.skip_ws();
        let rest = self.rest();
        if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
            let body = &rest[1..];
            let end = body
                .find(quote)
                .ok_or_else(|| self.error("unterminated string literal"))?;
            self.pos += end + 2;
            return Ok(Operand::Literal(body[..end].to_string()));
        }
        let number: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        if !number.is_empty() && number.parse::<f64>().is_ok() {
            self.pos += number.len();
            return Ok(Operand::Literal(number));
        }
        Ok(Operand::Expr(self.parse_expr()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT: &str = r#"<?xml version="1.0" encoding="iso-8859-1"?>
<init xmlns="urn:debugger_protocol_v1" xmlns:xdebug="https://xdebug.org/dbgp/xdebug" fileuri="file:///var/www/index.php" language="PHP" protocol_version="1.0" appid="2142" idekey="session_name"><engine version="2.2.3"><![CDATA[Xdebug]]></engine><author><![CDATA[Derick Rethans]]></author><url><![CDATA[http://xdebug.org]]></url><copyright><![CDATA[Copyright (c) 2002-2013 by Derick Rethans]]></copyright></init>"#;

    const RESPONSE: &str = r#"<response xmlns="urn:debugger_protocol_v1" xmlns:xdebug="https://xdebug.org/dbgp/xdebug" command="context_get" transaction_id="4" context="0"><property name="$a" fullname="$a" type="int"><![CDATA[1]]></property><property name="$b" fullname="$b" type="string" encoding="base64"><![CDATA[Zm9v]]></property><xdebug:message filename="file:///a.php" lineno="7"/></response>"#;

    #[test]
    fn query_root_name() {
        let doc = XmlDocument::parse(INIT).unwrap();
        assert_eq!(doc.reader().text("name(x:*)").unwrap(), "init");
        assert_eq!(doc.reader().text("local-name(/x:*)").unwrap(), "init");
    }

    #[test]
    fn query_descendant_text() {
        let doc = XmlDocument::parse(INIT).unwrap();
        assert_eq!(
            doc.reader().text("//x:init/x:engine/text()").unwrap(),
            "Xdebug"
        );
        assert_eq!(doc.reader().text("//x:engine/@version").unwrap(), "2.2.3");
    }

    #[test]
    fn query_attributes_via_sub_reader() {
        let doc = XmlDocument::parse(INIT).unwrap();
        let inits = doc.reader().nodes("x:init").unwrap();
        assert_eq!(inits.len(), 1);
        let init = inits[0];
        assert_eq!(init.text("@language").unwrap(), "PHP");
        assert_eq!(init.text("@protocol_version").unwrap(), "1.0");
        assert_eq!(init.text("@missing").unwrap(), "");
    }

    #[test]
    fn query_name_predicate() {
        let doc = XmlDocument::parse(INIT).unwrap();
        let init = doc.reader().nodes("x:init").unwrap()[0];
        let info: Vec<(String, String)> = init
            .nodes("x:*[name() != \"engine\"]")
            .unwrap()
            .iter()
            .map(|f| (f.text("name()").unwrap(), f.text("text()").unwrap()))
            .collect();
        assert_eq!(
            info,
            vec![
                ("author".to_string(), "Derick Rethans".to_string()),
                ("url".to_string(), "http://xdebug.org".to_string()),
                (
                    "copyright".to_string(),
                    "Copyright (c) 2002-2013 by Derick Rethans".to_string()
                ),
            ]
        );
    }

    #[test]
    fn query_attribute_wildcard() {
        let doc = XmlDocument::parse(RESPONSE).unwrap();
        let attrs = doc.reader().nodes("x:response/x:*/@*").unwrap();
        let names: Vec<String> = attrs.iter().map(|a| a.text("name()").unwrap()).collect();
        assert_eq!(
            names,
            vec!["name", "fullname", "type", "name", "fullname", "type", "encoding"]
        );
        assert_eq!(attrs[0].text("string()").unwrap(), "$a");
    }

    #[test]
    fn query_attribute_predicate_and_position() {
        let doc = XmlDocument::parse(RESPONSE).unwrap();
        let r = doc.reader();
        assert_eq!(
            r.text("x:response/x:property[@encoding = 'base64']/@name").unwrap(),
            "$b"
        );
        assert_eq!(r.text("x:response/x:property[2]/text()").unwrap(), "Zm9v");
        assert_eq!(r.nodes("x:response/x:property[@encoding]").unwrap().len(), 1);
    }

    #[test]
    fn query_other_prefix_resolves_by_declaration() {
        let doc = XmlDocument::parse(RESPONSE).unwrap();
        assert_eq!(
            doc.reader().text("x:response/xdebug:message/@lineno").unwrap(),
            "7"
        );
        assert_eq!(
            doc.reader().text("name(x:response/xdebug:*)").unwrap(),
            "xdebug:message"
        );
        // The protocol namespace does not match the xdebug one.
        assert!(doc.reader().nodes("x:response/x:message").unwrap().is_empty());
    }

    #[test]
    fn query_without_namespace() {
        let doc = XmlDocument::parse("<foo><bar a=\"1\">hi</bar></foo>").unwrap();
        assert_eq!(doc.reader().text("x:foo/x:bar/@a").unwrap(), "1");
        assert_eq!(doc.reader().text("foo/bar").unwrap(), "hi");
        assert_eq!(doc.reader().text("/foo/bar/text()").unwrap(), "hi");
    }

    #[test]
    fn query_unprefixed_name_does_not_match_namespaced() {
        let doc = XmlDocument::parse(INIT).unwrap();
        assert!(doc.reader().nodes("init").unwrap().is_empty());
        assert_eq!(doc.reader().nodes("*").unwrap().len(), 1);
    }

    #[test]
    fn query_missing_nodes_yield_empty() {
        let doc = XmlDocument::parse(INIT).unwrap();
        assert_eq!(doc.reader().text("x:response/@command").unwrap(), "");
        assert_eq!(doc.reader().text("name(x:response)").unwrap(), "");
    }

    #[test]
    fn query_string_of_element_concatenates() {
        let doc = XmlDocument::parse("<a>1<b>2</b>3</a>").unwrap();
        assert_eq!(doc.reader().text("string(a)").unwrap(), "123");
        assert_eq!(doc.reader().text("a").unwrap(), "123");
    }

    #[test]
    fn query_invalid_expression_fails() {
        let doc = XmlDocument::parse("<a/>").unwrap();
        assert!(matches!(doc.reader().text("a[@b = "), Err(DbgpError::Parse(_))));
        assert!(matches!(doc.reader().text("a/"), Err(DbgpError::Parse(_))));
        assert!(matches!(doc.reader().nodes("name(a)"), Err(DbgpError::Parse(_))));
        assert!(matches!(doc.reader().text("a b"), Err(DbgpError::Parse(_))));
    }

    #[test]
    fn query_undeclared_prefix_fails() {
        let doc = XmlDocument::parse("<a/>").unwrap();
        assert!(doc.reader().text("q:a").is_err());
    }

    #[test]
    fn reader_element_and_name() {
        let doc = XmlDocument::parse(RESPONSE).unwrap();
        let props = doc.reader().nodes("x:response/x:property").unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props[1].name(), "property");
        assert_eq!(props[1].element().unwrap().attr("type"), Some("string"));
        assert_eq!(doc.reader().element().unwrap().name, "response");
    }
}
