//! XML writing, reading and canonicalisation.
//!
//! Writing is compact and deterministic: attributes and children appear exactly in the order the
//! builder inserted them, empty elements self-close and text is escaped. Reading and
//! canonicalisation go through `roxmltree`.

use std::io::Cursor;

use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::element::{Element, Node};
use crate::{Hl7v3Error, Hl7v3Result};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Serialises `root` as a UTF-8 document with an XML declaration.
pub fn to_xml(root: &Element) -> Hl7v3Result<String> {
    write_document(root, true)
}

/// Serialises `root` without the XML declaration.
pub fn to_xml_fragment(root: &Element) -> Hl7v3Result<String> {
    write_document(root, false)
}

fn write_document(root: &Element, declaration: bool) -> Hl7v3Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    if declaration {
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| Hl7v3Error::Write(format!("declaration: {e}")))?;
    }
    write_element(&mut writer, root)?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| Hl7v3Error::Write(format!("output is not UTF-8: {e}")))
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, element: &Element) -> Hl7v3Result<()> {
    let mut start = BytesStart::new(element.name());
    for (key, value) in element.attributes() {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| Hl7v3Error::Write(format!("<{}/>: {e}", element.name())));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| Hl7v3Error::Write(format!("<{}>: {e}", element.name())))?;
    for node in element.nodes() {
        match node {
            Node::Element(child) => write_element(writer, child)?,
            Node::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| Hl7v3Error::Write(format!("text in <{}>: {e}", element.name())))?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name())))
        .map_err(|e| Hl7v3Error::Write(format!("</{}>: {e}", element.name())))
}

/// Reads an XML document into an [`Element`] tree.
///
/// Comments, processing instructions and whitespace-only text are dropped. Namespace
/// declarations on the root are kept as `xmlns` attributes; prefixed names keep their prefix.
pub fn parse(xml: &str) -> Hl7v3Result<Element> {
    let document = roxmltree::Document::parse(xml)?;
    let root = document.root_element();
    let element = read_node(root);
    Ok(namespace_declarations(root)
        .into_iter()
        .fold(element, |element, (key, uri)| element.attr(key, uri)))
}

fn read_node(node: roxmltree::Node<'_, '_>) -> Element {
    let element = node
        .attributes()
        .fold(Element::new(qualified_name(node)), |element, attribute| {
            element.attr(attribute_name(node, &attribute), attribute.value())
        });

    node.children().fold(element, |element, child| {
        if child.is_element() {
            element.child(read_node(child))
        } else if child.is_text() {
            match child.text() {
                Some(text) if !text.trim().is_empty() => element.text(text),
                _ => element,
            }
        } else {
            element
        }
    })
}

/// Produces the canonical text of an XML document.
///
/// The declaration, comments and processing instructions are stripped, empty elements are
/// expanded to start/end pairs, attributes are sorted by name with namespace declarations first,
/// and whitespace-only text is dropped. This is the input to digest computation, not a full
/// exclusive C14N implementation.
pub fn canonicalize(xml: &str) -> Hl7v3Result<String> {
    let document = roxmltree::Document::parse(xml)?;
    let root = document.root_element();

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_canonical(&mut writer, root, namespace_declarations(root))?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| Hl7v3Error::Write(format!("output is not UTF-8: {e}")))
}

fn write_canonical<W: std::io::Write>(
    writer: &mut Writer<W>,
    node: roxmltree::Node<'_, '_>,
    mut declarations: Vec<(String, String)>,
) -> Hl7v3Result<()> {
    let name = qualified_name(node);

    declarations.sort();
    let mut attributes: Vec<(String, String)> = node
        .attributes()
        .map(|attribute| (attribute_name(node, &attribute), attribute.value().to_owned()))
        .collect();
    attributes.sort();

    let mut start = BytesStart::new(name.as_str());
    for (key, value) in declarations.iter().chain(attributes.iter()) {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| Hl7v3Error::Write(format!("<{name}>: {e}")))?;
    for child in node.children() {
        if child.is_element() {
            write_canonical(writer, child, Vec::new())?;
        } else if child.is_text() {
            if let Some(text) = child.text().filter(|text| !text.trim().is_empty()) {
                writer
                    .write_event(Event::Text(BytesText::from_escaped(partial_escape(text))))
                    .map_err(|e| Hl7v3Error::Write(format!("text in <{name}>: {e}")))?;
            }
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(name.as_str())))
        .map_err(|e| Hl7v3Error::Write(format!("</{name}>: {e}")))
}

fn namespace_declarations(node: roxmltree::Node<'_, '_>) -> Vec<(String, String)> {
    node.namespaces()
        .filter(|namespace| namespace.uri() != XML_NAMESPACE)
        .map(|namespace| {
            let key = match namespace.name() {
                Some(prefix) if !prefix.is_empty() => format!("xmlns:{prefix}"),
                _ => "xmlns".to_owned(),
            };
            (key, namespace.uri().to_owned())
        })
        .collect()
}

fn qualified_name(node: roxmltree::Node<'_, '_>) -> String {
    let local = node.tag_name().name();
    match node
        .tag_name()
        .namespace()
        .and_then(|uri| node.lookup_prefix(uri))
    {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_owned(),
    }
}

fn attribute_name(node: roxmltree::Node<'_, '_>, attribute: &roxmltree::Attribute<'_, '_>) -> String {
    match attribute
        .namespace()
        .and_then(|uri| node.lookup_prefix(uri))
    {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", attribute.name()),
        _ => attribute.name().to_owned(),
    }
}
