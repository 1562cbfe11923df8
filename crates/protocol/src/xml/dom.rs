//! A minimal element tree over `quick-xml` events.
//!
//! TAXII messages are small and nest shallowly, so building a tree first keeps
//! the decoder a plain walk over typed accessors. `Content` elements are kept
//! verbatim because they routinely embed foreign XML documents.

use std::borrow::Cow;

use quick_xml::{
    events::Event,
    name::{Namespace, ResolveResult},
    reader::NsReader,
};

use crate::status::StatusError;

/// Element whose body is captured as raw text instead of parsed.
const RAW_CONTENT_ELEMENT: &str = "Content";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Element {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

pub(crate) fn malformed<E>(err: E) -> StatusError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StatusError::bad_message("Request was not well-formed XML").with_source(err)
}

fn invalid(message: String) -> StatusError {
    StatusError::bad_message(format!("Message was not valid: {message}"))
}

fn utf8(bytes: &[u8]) -> Result<String, StatusError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(malformed)
}

fn namespace_of(resolved: &ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Some(String::from_utf8_lossy(ns).into_owned()),
        _ => None,
    }
}

/// Parse `body` into an element tree rooted at the document element.
pub(crate) fn parse_document(body: &[u8]) -> Result<Element, StatusError> {
    let mut reader = NsReader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (resolved, event) = reader.read_resolved_event().map_err(malformed)?;
        let namespace = namespace_of(&resolved);
        match event {
            Event::Start(start) => {
                let mut element = open_element(&start, namespace)?;
                if element.name == RAW_CONTENT_ELEMENT {
                    let end = start.to_end().into_owned();
                    let raw = reader.read_text(end.name()).map_err(malformed)?;
                    element.text = decode_raw_content(&raw)?;
                    attach(&mut stack, &mut root, element)?;
                } else {
                    stack.push(element);
                }
            },
            Event::Empty(start) => {
                let element = open_element(&start, namespace)?;
                attach(&mut stack, &mut root, element)?;
            },
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| invalid("unbalanced closing tag".into()))?;
                attach(&mut stack, &mut root, element)?;
            },
            Event::Text(text) => {
                let value = text.unescape().map_err(malformed)?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&value);
                }
            },
            Event::CData(cdata) => {
                let value = utf8(&cdata.into_inner())?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&value);
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    if !stack.is_empty() {
        return Err(invalid("document ended inside an element".into()));
    }
    root.ok_or_else(|| invalid("document has no root element".into()))
}

fn open_element(
    start: &quick_xml::events::BytesStart<'_>,
    namespace: Option<String>,
) -> Result<Element, StatusError> {
    let mut element = Element {
        name: utf8(start.local_name().as_ref())?,
        namespace,
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(malformed)?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let name = utf8(attr.key.local_name().as_ref())?;
        let value = attr.unescape_value().map_err(malformed)?;
        element.attributes.push((name, value.into_owned()));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), StatusError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(invalid("more than one root element".into())),
    }
    Ok(())
}

/// `Content` may carry escaped text, a single CDATA section, or an embedded
/// XML document. Embedded XML is returned untouched.
fn decode_raw_content(raw: &str) -> Result<String, StatusError> {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        && !inner.contains("]]>")
    {
        return Ok(inner.to_string());
    }
    if trimmed.starts_with('<') {
        return Ok(trimmed.to_string());
    }
    let unescaped: Cow<'_, str> = quick_xml::escape::unescape(trimmed).map_err(malformed)?;
    Ok(unescaped.into_owned())
}

// ── Accessors ────────────────────────────────────────────────────────────────

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn require_attr(&self, name: &str) -> Result<&str, StatusError> {
        self.attr(name)
            .ok_or_else(|| invalid(format!("{} is missing attribute '{name}'", self.name)))
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn require_child(&self, name: &str) -> Result<&Element, StatusError> {
        self.child(name)
            .ok_or_else(|| invalid(format!("{} is missing element '{name}'", self.name)))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(Element::text)
    }

    pub fn require_child_text(&self, name: &str) -> Result<&str, StatusError> {
        self.require_child(name).map(Element::text)
    }

    pub fn invalid(&self, message: impl std::fmt::Display) -> StatusError {
        invalid(format!("{}: {message}", self.name))
    }
}
