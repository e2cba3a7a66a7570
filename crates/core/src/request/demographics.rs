//! Names, telecoms and addresses.

use fhir::{Address, ContactPoint, HumanName};
use hl7v3::Element;

use crate::code_systems::{address_use, to_target};
use crate::error::required;
use crate::{Domain, TranslationResult};

/// `<name use="..">` with prefix, given, family and suffix parts in that order.
///
/// A name carrying only `text` becomes a text-only `<name>`.
pub(crate) fn name(human_name: &HumanName) -> TranslationResult<Element> {
    let name_use = human_name
        .name_use
        .as_deref()
        .map(|code| to_target(Domain::NameUse, code).map(|target| target.code))
        .transpose()?;
    let element = Element::new("name").maybe_attr("use", name_use);

    let has_parts = human_name.family.is_some()
        || !human_name.given.is_empty()
        || !human_name.prefix.is_empty()
        || !human_name.suffix.is_empty();
    if !has_parts {
        if let Some(text) = &human_name.text {
            return Ok(element.text(text.as_str()));
        }
    }

    Ok(element
        .with_children(human_name.prefix.iter().map(|p| Element::new("prefix").text(p.as_str())))
        .with_children(human_name.given.iter().map(|g| Element::new("given").text(g.as_str())))
        .maybe_child(human_name.family.as_deref().map(|f| Element::new("family").text(f)))
        .with_children(human_name.suffix.iter().map(|s| Element::new("suffix").text(s.as_str()))))
}

/// A text-only name, used when a reference carries only a display.
pub(crate) fn display_name(display: &str) -> Element {
    Element::new("name").text(display)
}

pub(crate) fn telecom(contact: &ContactPoint, path: &str) -> TranslationResult<Element> {
    let telecom_use = contact
        .contact_use
        .as_deref()
        .map(|code| to_target(Domain::TelecomUse, code).map(|target| target.code))
        .transpose()?;
    let value = required(contact.value.as_deref(), &format!("{path}.value"))?;
    Ok(Element::new("telecom")
        .maybe_attr("use", telecom_use)
        .attr("value", telecom_value(value)))
}

/// Strips whitespace and adds the `tel:` scheme when it is missing.
fn telecom_value(value: &str) -> String {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with("tel:") {
        compact
    } else {
        format!("tel:{compact}")
    }
}

/// `<addr use="..">`: every line, then city, district and state as street lines, then the
/// postcode.
pub(crate) fn address(address: &Address) -> TranslationResult<Element> {
    let use_code = address_use(address.address_use.as_deref(), address.address_type.as_deref())?;
    let lines = address
        .line
        .iter()
        .map(String::as_str)
        .chain(address.city.as_deref())
        .chain(address.district.as_deref())
        .chain(address.state.as_deref())
        .filter(|line| !line.is_empty());
    Ok(Element::new("addr")
        .maybe_attr("use", use_code)
        .with_children(lines.map(|line| Element::new("streetAddressLine").text(line)))
        .maybe_child(
            address
                .postal_code
                .as_deref()
                .map(|postcode| Element::new("postalCode").text(postcode)),
        ))
}
