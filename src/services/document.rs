//! Owned, mutable workbook XML tree.
//!
//! The tree keeps every quick-xml event it was parsed from. Elements whose
//! attributes are never touched are written back byte-for-byte, so the
//! declaration, comments, whitespace and quoting of a workbook survive a
//! load/save cycle unchanged. Only elements passed through
//! [`Element::set_attributes`] are re-rendered.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

const UTF8_BOM: char = '\u{feff}';

/// Errors raised while parsing, editing or writing a workbook document
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("XML parse error at byte {position}: {message}")]
    Parse { position: u64, message: String },

    #[error("Element <{0}> is never closed")]
    UnclosedElement(String),

    #[error("Closing tag </{0}> has no matching start tag")]
    UnexpectedEnd(String),

    #[error("Invalid attribute on <{element}>: {message}")]
    InvalidAttribute { element: String, message: String },

    #[error("Attribute {attribute}={value:?} is not a usable number")]
    InvalidNumber { attribute: String, value: String },

    #[error("Failed to serialize document: {0}")]
    Write(String),

    #[error("Document is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// A node in the document tree
#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    /// Text, comments, CDATA, processing instructions, declarations
    Other(Event<'static>),
}

/// An XML element with its children
#[derive(Debug, Clone)]
pub struct Element {
    start: BytesStart<'static>,
    children: Vec<Node>,
    self_closing: bool,
}

impl Element {
    /// Tag name as written in the document, including any prefix.
    pub fn tag(&self) -> String {
        String::from_utf8_lossy(self.start.name().as_ref()).into_owned()
    }

    pub fn is(&self, tag: &str) -> bool {
        self.start.name().as_ref() == tag.as_bytes()
    }

    /// Unescaped value of an attribute, or `None` if it is absent.
    pub fn attribute(&self, key: &str) -> Result<Option<String>, DocumentError> {
        let attr = self
            .start
            .try_get_attribute(key)
            .map_err(|e| self.attribute_error(e))?;

        match attr {
            Some(attr) => {
                let value = attr.unescape_value().map_err(|e| self.attribute_error(e))?;
                Ok(Some(value.into_owned()))
            }
            None => Ok(None),
        }
    }

    /// Overwrite (or append) attributes, keeping every other attribute's
    /// order and raw value.
    ///
    /// New values are written unescaped, so they must not contain markup
    /// characters; callers only ever pass numbers.
    pub fn set_attributes(&mut self, updates: &[(&str, String)]) -> Result<(), DocumentError> {
        let name = self.tag();
        let mut content = name.clone();
        let mut applied = vec![false; updates.len()];

        for attr in self.start.attributes() {
            let attr = attr.map_err(|e| self.attribute_error(e))?;
            let key = std::str::from_utf8(attr.key.as_ref()).map_err(|e| self.attribute_error(e))?;

            let value = match updates.iter().position(|(k, _)| *k == key) {
                Some(idx) => {
                    applied[idx] = true;
                    updates[idx].1.clone()
                }
                None => std::str::from_utf8(&attr.value)
                    .map_err(|e| self.attribute_error(e))?
                    .to_string(),
            };
            push_attribute(&mut content, key, &value);
        }

        for ((key, value), done) in updates.iter().zip(applied) {
            if !done {
                push_attribute(&mut content, key, value);
            }
        }

        self.start = BytesStart::from_content(content, name.len());
        Ok(())
    }

    /// First direct child element with the given tag.
    pub fn child_mut(&mut self, tag: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Element(el) if el.is(tag) => Some(el),
            _ => None,
        })
    }

    /// Visit every element below this one in document order.
    pub fn for_each_descendant_mut<F>(&mut self, f: &mut F) -> Result<(), DocumentError>
    where
        F: FnMut(&mut Element) -> Result<(), DocumentError>,
    {
        for node in &mut self.children {
            if let Node::Element(el) = node {
                f(el)?;
                el.for_each_descendant_mut(f)?;
            }
        }
        Ok(())
    }

    fn attribute_error(&self, err: impl std::fmt::Display) -> DocumentError {
        DocumentError::InvalidAttribute {
            element: self.tag(),
            message: err.to_string(),
        }
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), DocumentError> {
        if self.self_closing && self.children.is_empty() {
            return write_event(writer, Event::Empty(self.start.borrow()));
        }

        write_event(writer, Event::Start(self.start.borrow()))?;
        for child in &self.children {
            child.write_to(writer)?;
        }
        write_event(writer, Event::End(self.start.to_end()))
    }
}

impl Node {
    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), DocumentError> {
        match self {
            Node::Element(el) => el.write_to(writer),
            Node::Other(event) => write_event(writer, event.borrow()),
        }
    }
}

/// A parsed workbook document
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    has_bom: bool,
}

impl Document {
    /// Parse a document from XML text.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let (text, has_bom) = match text.strip_prefix(UTF8_BOM) {
            Some(rest) => (rest, true),
            None => (text, false),
        };

        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut top_level: Vec<Node> = Vec::new();
        let mut open: Vec<Element> = Vec::new();

        loop {
            let event = reader.read_event().map_err(|e| DocumentError::Parse {
                position: reader.buffer_position() as u64,
                message: e.to_string(),
            })?;

            match event {
                Event::Start(start) => open.push(Element {
                    start: start.into_owned(),
                    children: Vec::new(),
                    self_closing: false,
                }),
                Event::Empty(start) => {
                    let el = Element {
                        start: start.into_owned(),
                        children: Vec::new(),
                        self_closing: true,
                    };
                    attach(&mut open, &mut top_level, Node::Element(el));
                }
                Event::End(end) => {
                    let el = open.pop().ok_or_else(|| {
                        DocumentError::UnexpectedEnd(
                            String::from_utf8_lossy(end.name().as_ref()).into_owned(),
                        )
                    })?;
                    attach(&mut open, &mut top_level, Node::Element(el));
                }
                Event::Eof => break,
                other => attach(&mut open, &mut top_level, Node::Other(other.into_owned())),
            }
        }

        if let Some(el) = open.last() {
            return Err(DocumentError::UnclosedElement(el.tag()));
        }

        Ok(Self {
            nodes: top_level,
            has_bom,
        })
    }

    /// Parse a document from raw file contents.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DocumentError> {
        let text = String::from_utf8(bytes)?;
        Self::parse(&text)
    }

    /// Serialize the document back to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        let mut writer = Writer::new(Vec::new());
        for node in &self.nodes {
            node.write_to(&mut writer)?;
        }

        let body = writer.into_inner();
        if !self.has_bom {
            return Ok(body);
        }

        let mut bytes = UTF8_BOM.to_string().into_bytes();
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// First element in document order matching `predicate`.
    pub fn find_element_mut<P>(&mut self, predicate: P) -> Option<&mut Element>
    where
        P: Fn(&Element) -> bool,
    {
        find_in(&mut self.nodes, &predicate)
    }

    /// Values of `attribute` on every `tag` element, in document order.
    ///
    /// Elements missing the attribute are skipped.
    pub fn attribute_values(&self, tag: &str, attribute: &str) -> Result<Vec<String>, DocumentError> {
        let mut values = Vec::new();
        collect_attribute_values(&self.nodes, tag, attribute, &mut values)?;
        Ok(values)
    }
}

fn attach(open: &mut [Element], top_level: &mut Vec<Node>, node: Node) {
    match open.last_mut() {
        Some(parent) => parent.children.push(node),
        None => top_level.push(node),
    }
}

fn find_in<'a, P>(nodes: &'a mut [Node], predicate: &P) -> Option<&'a mut Element>
where
    P: Fn(&Element) -> bool,
{
    for node in nodes.iter_mut() {
        if let Node::Element(el) = node {
            if predicate(el) {
                return Some(el);
            }
            if let Some(found) = find_in(&mut el.children, predicate) {
                return Some(found);
            }
        }
    }
    None
}

fn collect_attribute_values(
    nodes: &[Node],
    tag: &str,
    attribute: &str,
    values: &mut Vec<String>,
) -> Result<(), DocumentError> {
    for node in nodes {
        if let Node::Element(el) = node {
            if el.is(tag) {
                if let Some(value) = el.attribute(attribute)? {
                    values.push(value);
                }
            }
            collect_attribute_values(&el.children, tag, attribute, values)?;
        }
    }
    Ok(())
}

fn push_attribute(content: &mut String, key: &str, raw_value: &str) {
    let quote = if raw_value.contains('\'') { '"' } else { '\'' };
    content.push(' ');
    content.push_str(key);
    content.push('=');
    content.push(quote);
    content.push_str(raw_value);
    content.push(quote);
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), DocumentError> {
    writer
        .write_event(event)
        .map_err(|e| DocumentError::Write(e.to_string()))
}
