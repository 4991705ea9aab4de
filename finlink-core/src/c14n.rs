//! Exclusive XML Canonicalization 1.0 (omitting comments)
//!
//! Signatures are computed over this output, so the serialization must be
//! byte-identical to the W3C exclusive-c14n algorithm: attributes sorted by
//! (namespace URI, local name), namespace declarations emitted only where a
//! prefix is visibly utilized and not already rendered by an output
//! ancestor, empty elements expanded, and character data re-escaped.
//!
//! An optional excluded subtree serializes the document as if that subtree
//! were absent. Digesting a document "with the signature container removed"
//! therefore never mutates the tree first: the exclusion and the digest are
//! one step, in both the fetch and publish paths.

use crate::xml::{XmlDocument, XmlElement, XmlNode};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

const XML_NS_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Canonicalize the whole document, optionally excluding one subtree
pub fn canonicalize_document(
    doc: &XmlDocument,
    exclude: Option<&XmlElement>,
) -> Result<Vec<u8>> {
    let mut out = String::new();
    render_element(
        doc.root(),
        &BTreeMap::new(),
        &BTreeMap::new(),
        &exclude.map(|element| element.span.clone()),
        &mut out,
    )?;
    Ok(out.into_bytes())
}

/// Canonicalize a subtree in its document context
///
/// Namespace prefixes declared on ancestors are emitted at their point of
/// first use inside the subtree, exactly as exclusive C14N requires.
pub fn canonicalize_subtree(doc: &XmlDocument, target: &XmlElement) -> Result<Vec<u8>> {
    let mut path = Vec::new();
    if !find_path(doc.root(), &target.span, &mut path) {
        return Err(Error::Internal(
            "canonicalization target is not part of the document".to_string(),
        ));
    }
    let mut scope = BTreeMap::new();
    for ancestor in path.iter().take(path.len().saturating_sub(1)) {
        collect_declarations(ancestor, &mut scope);
    }
    let mut out = String::new();
    render_element(target, &scope, &BTreeMap::new(), &None, &mut out)?;
    Ok(out.into_bytes())
}

fn find_path<'a>(
    element: &'a XmlElement,
    span: &Range<usize>,
    path: &mut Vec<&'a XmlElement>,
) -> bool {
    if element.span == *span {
        path.push(element);
        return true;
    }
    if element.span.start <= span.start && span.end <= element.span.end {
        path.push(element);
        for child in element.child_elements() {
            if find_path(child, span, path) {
                return true;
            }
        }
        path.pop();
    }
    false
}

fn collect_declarations(element: &XmlElement, scope: &mut BTreeMap<String, String>) {
    for (key, value) in &element.attributes {
        if key == "xmlns" {
            scope.insert(String::new(), value.clone());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value.clone());
        }
    }
}

fn is_declaration(key: &str) -> bool {
    key == "xmlns" || key.starts_with("xmlns:")
}

fn render_element(
    element: &XmlElement,
    parent_scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
    exclude: &Option<Range<usize>>,
    out: &mut String,
) -> Result<()> {
    if let Some(excluded) = exclude {
        if element.span == *excluded {
            return Ok(());
        }
    }

    let mut scope = parent_scope.clone();
    collect_declarations(element, &mut scope);

    // Visibly utilized prefixes: the element's own plus those of its
    // attributes. The implicit "xml" prefix is never declared.
    let mut utilized: BTreeSet<&str> = BTreeSet::new();
    utilized.insert(element.prefix().unwrap_or(""));
    for (key, _) in &element.attributes {
        if is_declaration(key) {
            continue;
        }
        if let Some((prefix, _)) = key.split_once(':') {
            if prefix != "xml" {
                utilized.insert(prefix);
            }
        }
    }

    let mut declarations: Vec<(String, String)> = Vec::new();
    let mut child_rendered = rendered.clone();
    for prefix in utilized {
        match scope.get(prefix) {
            Some(uri) if !uri.is_empty() => {
                if child_rendered.get(prefix).map(String::as_str) != Some(uri.as_str()) {
                    declarations.push((prefix.to_string(), uri.clone()));
                    child_rendered.insert(prefix.to_string(), uri.clone());
                }
            }
            _ if prefix.is_empty() => {
                // Unprefixed element in no namespace: undeclare a default
                // namespace rendered by an output ancestor.
                if child_rendered.get("").is_some_and(|uri| !uri.is_empty()) {
                    declarations.push((String::new(), String::new()));
                    child_rendered.insert(String::new(), String::new());
                }
            }
            _ => {
                return Err(Error::Format(format!(
                    "undeclared namespace prefix: {}",
                    prefix
                )));
            }
        }
    }
    declarations.sort();

    out.push('<');
    out.push_str(&element.qname);
    for (prefix, uri) in &declarations {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attribute(uri));
        out.push('"');
    }

    // Attributes sorted with namespace URI as the primary key; unqualified
    // attributes (empty URI) sort first.
    let mut attributes: Vec<(&str, &str, &str, &str)> = Vec::new();
    for (key, value) in &element.attributes {
        if is_declaration(key) {
            continue;
        }
        let (uri, local) = match key.split_once(':') {
            Some(("xml", local)) => (XML_NS_URI, local),
            Some((prefix, local)) => {
                let uri = scope.get(prefix).ok_or_else(|| {
                    Error::Format(format!("undeclared attribute prefix: {}", prefix))
                })?;
                (uri.as_str(), local)
            }
            None => ("", key.as_str()),
        };
        attributes.push((uri, local, key, value));
    }
    attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    for (_, _, qname, value) in attributes {
        out.push(' ');
        out.push_str(qname);
        out.push_str("=\"");
        out.push_str(&escape_attribute(value));
        out.push('"');
    }
    out.push('>');

    for child in &element.children {
        match child {
            XmlNode::Element(child) => {
                render_element(child, &scope, &child_rendered, exclude, out)?;
            }
            XmlNode::Text(text) => out.push_str(&escape_text(text)),
        }
    }

    out.push_str("</");
    out.push_str(&element.qname);
    out.push('>');
    Ok(())
}

pub(crate) fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(source: &str) -> String {
        let doc = XmlDocument::parse(source).unwrap();
        String::from_utf8(canonicalize_document(&doc, None).unwrap()).unwrap()
    }

    #[test]
    fn test_attributes_sorted_and_empty_elements_expanded() {
        assert_eq!(canon(r#"<doc b="2" a="1"/>"#), r#"<doc a="1" b="2"></doc>"#);
    }

    #[test]
    fn test_unused_namespace_dropped_and_used_not_repeated() {
        assert_eq!(
            canon(r#"<x:r xmlns:x="urn:a" xmlns:y="urn:b"><x:c/></x:r>"#),
            r#"<x:r xmlns:x="urn:a"><x:c></x:c></x:r>"#
        );
    }

    #[test]
    fn test_qualified_attributes_sort_after_unqualified() {
        assert_eq!(
            canon(r#"<r xmlns:a="urn:a" a:z="1" b="2"/>"#),
            r#"<r xmlns:a="urn:a" b="2" a:z="1"></r>"#
        );
    }

    #[test]
    fn test_character_data_escaping() {
        assert_eq!(
            canon("<a>x &amp; y &lt; z &gt; w</a>"),
            "<a>x &amp; y &lt; z &gt; w</a>"
        );
        assert_eq!(canon(r#"<a v="say &quot;hi&quot;"/>"#), r#"<a v="say &quot;hi&quot;"></a>"#);
    }

    #[test]
    fn test_xml_declaration_and_comments_omitted() {
        assert_eq!(
            canon("<?xml version=\"1.0\"?><r><!-- note --><a>1</a></r>"),
            "<r><a>1</a></r>"
        );
    }

    #[test]
    fn test_subtree_emits_inherited_namespace_at_point_of_use() {
        let doc = XmlDocument::parse(
            r#"<root xmlns:d="urn:d"><d:child><d:leaf>v</d:leaf></d:child></root>"#,
        )
        .unwrap();
        let child = doc.find("child").unwrap();
        let canonical = String::from_utf8(canonicalize_subtree(&doc, child).unwrap()).unwrap();
        assert_eq!(
            canonical,
            r#"<d:child xmlns:d="urn:d"><d:leaf>v</d:leaf></d:child>"#
        );
    }

    #[test]
    fn test_exclusion_serializes_as_if_absent() {
        let doc = XmlDocument::parse("<r><keep>1</keep><drop>2</drop></r>").unwrap();
        let drop = doc.find("drop").unwrap();
        let canonical =
            String::from_utf8(canonicalize_document(&doc, Some(drop)).unwrap()).unwrap();
        assert_eq!(canonical, "<r><keep>1</keep></r>");
    }

    #[test]
    fn test_default_namespace_rendered_once() {
        assert_eq!(
            canon(r#"<Document xmlns="urn:iso"><Body>x</Body></Document>"#),
            r#"<Document xmlns="urn:iso"><Body>x</Body></Document>"#
        );
    }

    #[test]
    fn test_canonicalization_is_idempotent() {
        let first = canon(r#"<x:r xmlns:x="urn:a" b="2" a="1"><x:c>t</x:c></x:r>"#);
        assert_eq!(canon(&first), first);
    }
}
