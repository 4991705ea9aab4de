//! Namespace-preserving XML document model
//!
//! The XML-DSig mediators need two things ordinary DOM crates do not give
//! them together: qualified names and attributes exactly as written (the
//! canonicalizer re-sorts and re-serializes them itself), and the byte span
//! of every element in the original source, so a signature container can be
//! spliced out of (or into) the received bytes without re-serializing the
//! rest of the document.

use crate::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::ops::Range;

/// A parsed element: name and attributes as written, children in document
/// order, byte span in the source text
#[derive(Debug, Clone)]
pub struct XmlElement {
    /// Qualified name exactly as written (e.g. `ds:SignedInfo`)
    pub qname: String,
    /// Attributes in written order, values unescaped; includes `xmlns` decls
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order
    pub children: Vec<XmlNode>,
    /// Byte span of the whole element in the source
    pub span: Range<usize>,
    /// Whether the element was written as `<name/>`
    pub self_closing: bool,
}

/// A child node: nested element or character data (unescaped)
#[derive(Debug, Clone)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

impl XmlElement {
    /// Local part of the qualified name
    pub fn local_name(&self) -> &str {
        self.qname
            .split_once(':')
            .map(|(_, local)| local)
            .unwrap_or(&self.qname)
    }

    /// Namespace prefix, if the name is prefixed
    pub fn prefix(&self) -> Option<&str> {
        self.qname.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Depth-first search (including self) for an element by local name
    pub fn find(&self, local: &str) -> Option<&XmlElement> {
        if self.local_name() == local {
            return Some(self);
        }
        for child in &self.children {
            if let XmlNode::Element(element) = child {
                if let Some(found) = element.find(local) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Concatenated character data of this element and its descendants
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(text) => out.push_str(text),
                XmlNode::Element(element) => element.collect_text(out),
            }
        }
    }

    /// Iterate direct element children
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }
}

/// A parsed document together with its original source text
#[derive(Debug, Clone)]
pub struct XmlDocument {
    source: String,
    root: XmlElement,
}

impl XmlDocument {
    /// Parse a document, keeping the source for span-based surgery
    pub fn parse(source: &str) -> Result<XmlDocument> {
        let root = parse_root(source)?;
        Ok(XmlDocument {
            source: source.to_string(),
            root,
        })
    }

    /// The original source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The document root element
    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// Depth-first search from the root for an element by local name
    pub fn find(&self, local: &str) -> Option<&XmlElement> {
        self.root.find(local)
    }

    /// The source with one element's byte span spliced out
    pub fn without_span(&self, span: &Range<usize>) -> String {
        let mut out = String::with_capacity(self.source.len());
        out.push_str(&self.source[..span.start]);
        out.push_str(&self.source[span.end..]);
        out
    }

    /// The source with a fragment inserted at a byte offset
    pub fn with_fragment_at(&self, offset: usize, fragment: &str) -> String {
        let mut out = String::with_capacity(self.source.len() + fragment.len());
        out.push_str(&self.source[..offset]);
        out.push_str(fragment);
        out.push_str(&self.source[offset..]);
        out
    }

    /// Byte offset just before an element's closing tag, for inserting a
    /// trailing child. Self-closing elements have no insertion point.
    pub fn insertion_point(&self, element: &XmlElement) -> Result<usize> {
        if element.self_closing {
            return Err(Error::Format(format!(
                "element {} is self-closing and cannot receive children",
                element.qname
            )));
        }
        self.source[..element.span.end]
            .rfind("</")
            .filter(|offset| *offset >= element.span.start)
            .ok_or_else(|| {
                Error::Format(format!("element {} has no closing tag", element.qname))
            })
    }
}

fn parse_root(source: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(source);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut last_pos = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::Format(format!("XML parse error: {}", e)))?;
        let pos_after = reader.buffer_position() as usize;
        match event {
            Event::Start(start) => {
                let element = element_from_start(&start, last_pos)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let mut element = element_from_start(&start, last_pos)?;
                element.span = last_pos..pos_after;
                element.self_closing = true;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| Error::Format("unbalanced closing tag".to_string()))?;
                element.span = element.span.start..pos_after;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| Error::Format(format!("bad character data: {}", e)))?;
                    top.children.push(XmlNode::Text(text.into_owned()));
                }
            }
            Event::CData(cdata) => {
                if let Some(top) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                    top.children.push(XmlNode::Text(text));
                }
            }
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
        last_pos = pos_after;
    }

    if !stack.is_empty() {
        return Err(Error::Format("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| Error::Format("document has no root element".to_string()))
}

fn element_from_start(start: &BytesStart<'_>, start_pos: usize) -> Result<XmlElement> {
    let qname = std::str::from_utf8(start.name().as_ref())
        .map_err(|_| Error::Format("element name is not valid UTF-8".to_string()))?
        .to_string();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|e| Error::Format(format!("bad attribute: {}", e)))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|_| Error::Format("attribute name is not valid UTF-8".to_string()))?
            .to_string();
        let value = attribute
            .unescape_value()
            .map_err(|e| Error::Format(format!("bad attribute value: {}", e)))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        qname,
        attributes,
        children: Vec::new(),
        span: start_pos..start_pos,
        self_closing: false,
    })
}

fn attach(
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => {
            if root.is_some() {
                return Err(Error::Format("multiple root elements".to_string()));
            }
            *root = Some(element);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_names_and_attribute_order() {
        let doc = XmlDocument::parse(r#"<ds:Root z="1" a="2"><ds:Child/></ds:Root>"#).unwrap();
        assert_eq!(doc.root().qname, "ds:Root");
        assert_eq!(doc.root().prefix(), Some("ds"));
        assert_eq!(doc.root().local_name(), "Root");
        let keys: Vec<&str> = doc
            .root()
            .attributes
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_spans_slice_the_source() {
        let source = r#"<?xml version="1.0"?><root><a>1</a><b attr="x">2</b></root>"#;
        let doc = XmlDocument::parse(source).unwrap();
        let b = doc.find("b").unwrap();
        assert_eq!(&source[b.span.clone()], r#"<b attr="x">2</b>"#);
        assert_eq!(&source[doc.root().span.clone()], &source[21..]);
    }

    #[test]
    fn test_without_span_splices_exactly() {
        let source = "<root><keep>1</keep><drop>2</drop></root>";
        let doc = XmlDocument::parse(source).unwrap();
        let drop = doc.find("drop").unwrap();
        assert_eq!(doc.without_span(&drop.span), "<root><keep>1</keep></root>");
    }

    #[test]
    fn test_insertion_point_is_before_closing_tag() {
        let source = "<root><a>1</a></root>";
        let doc = XmlDocument::parse(source).unwrap();
        let offset = doc.insertion_point(doc.root()).unwrap();
        assert_eq!(offset, source.len() - "</root>".len());
        assert_eq!(
            doc.with_fragment_at(offset, "<b/>"),
            "<root><a>1</a><b/></root>"
        );
    }

    #[test]
    fn test_self_closing_has_no_insertion_point() {
        let doc = XmlDocument::parse("<root><a/></root>").unwrap();
        let a = doc.find("a").unwrap();
        assert!(a.self_closing);
        assert!(doc.insertion_point(a).is_err());
    }

    #[test]
    fn test_text_content_unescapes() {
        let doc = XmlDocument::parse("<r><v>a &amp; b</v></r>").unwrap();
        assert_eq!(doc.find("v").unwrap().text_content(), "a & b");
    }

    #[test]
    fn test_malformed_is_format_error() {
        assert!(matches!(
            XmlDocument::parse("<root><open></root>").unwrap_err(),
            Error::Format(_)
        ));
        assert!(matches!(
            XmlDocument::parse("no markup").unwrap_err(),
            Error::Format(_)
        ));
    }
}
