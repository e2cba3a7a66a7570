//! Release requests: a dispenser asking for the prescriptions nominated to it, or for one
//! prescription presented by the patient.

use fhir::{Identifier, Parameters, PractitionerRole, Resource};
use hl7v3::codes::{self, Interaction};
use hl7v3::vocab::{act, ClassCode, MoodCode, Relationship, TypeCode};
use hl7v3::Element;
use tracing::debug;
use uuid::Uuid;

use super::agent_person::dispenser_agent_person;
use super::common::prescription_id_annotation;
use super::organisation::AgentOrgRef;
use crate::config::TranslatorConfig;
use crate::dates::now_hl7;
use crate::error::required;
use crate::{TranslationError, TranslationResult};

/// Which release a `Parameters` asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseKind {
    /// Every prescription nominated to the owning organisation.
    Nominated,
    /// A single prescription, named by its short-form id.
    Patient,
}

impl ReleaseKind {
    pub fn of(parameters: &Parameters) -> Self {
        if parameters.get("group-identifier").is_some() {
            ReleaseKind::Patient
        } else {
            ReleaseKind::Nominated
        }
    }

    pub fn interaction(self) -> Interaction {
        match self {
            ReleaseKind::Nominated => Interaction::NominatedPrescriptionRelease,
            ReleaseKind::Patient => Interaction::PatientPrescriptionRelease,
        }
    }

    fn root_name(self) -> &'static str {
        match self {
            ReleaseKind::Nominated => "NominatedPrescriptionReleaseRequest",
            ReleaseKind::Patient => "PatientPrescriptionReleaseRequest",
        }
    }
}

fn identifier_parameter<'a>(parameters: &'a Parameters, name: &str) -> TranslationResult<&'a Identifier> {
    parameters
        .get(name)
        .and_then(|parameter| parameter.value_identifier.as_ref())
        .ok_or_else(|| TranslationError::missing(format!("Parameters.parameter(\"{name}\").valueIdentifier")))
}

/// Builds the release request described by `parameters`.
///
/// The author is the `agent` parameter's `PractitionerRole`. Its organisation is the role's
/// logical organisation reference, else the `owner` parameter.
pub(crate) fn release_request(
    parameters: &Parameters,
    _config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let kind = ReleaseKind::of(parameters);
    let owner = identifier_parameter(parameters, "owner")?;
    let agent = match parameters.get("agent").and_then(|parameter| parameter.resource.as_ref()) {
        Some(Resource::PractitionerRole(role)) => role,
        Some(other) => {
            return Err(TranslationError::invalid(
                "Parameters.parameter(\"agent\").resource",
                format!("expected PractitionerRole, found {}", other.resource_type()),
            ))
        }
        None => return Err(TranslationError::missing("Parameters.parameter(\"agent\").resource")),
    };

    let organisation = agent_organisation(agent, owner);
    let author = dispenser_agent_person(agent, &organisation)?;
    let message_id = Uuid::new_v4().to_string();

    let request = act(kind.root_name(), ClassCode::Info, MoodCode::Rqo)
        .child(codes::global_identifier("id", &message_id))
        .child(codes::value("effectiveTime", now_hl7()))
        .child(Relationship::new(TypeCode::Aut).wrap("author", author));
    let request = match kind {
        ReleaseKind::Nominated => request,
        ReleaseKind::Patient => {
            let group = identifier_parameter(parameters, "group-identifier")?;
            let short_form = required(
                group.value.as_deref(),
                "Parameters.parameter(\"group-identifier\").valueIdentifier.value",
            )?;
            request.child(
                Relationship::pertinent(true)
                    .separatable(false)
                    .wrap("pertinentInformation", prescription_id_annotation(short_form)),
            )
        }
    };

    debug!(message_id, ?kind, "translated release request");
    Ok(request)
}

fn agent_organisation<'a>(agent: &'a PractitionerRole, owner: &'a Identifier) -> AgentOrgRef<'a> {
    agent
        .organization
        .as_ref()
        .and_then(|organisation| {
            organisation.identifier.as_ref().map(|identifier| AgentOrgRef::Identifier {
                identifier,
                name: organisation.display.as_deref(),
            })
        })
        .unwrap_or(AgentOrgRef::Identifier {
            identifier: owner,
            name: None,
        })
}
