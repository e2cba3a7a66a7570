//! Closed RIM vocabularies and the relationship wrapper.
//!
//! The structural attributes of an HL7 V3 node are fixed by the message schema, never computed
//! from clinical data. Each attribute is a closed enum here so a typo cannot reach the wire.

use crate::codes::template_id;
use crate::element::Element;

macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $code,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

vocabulary!(
    /// `classCode` of an act, role or entity.
    ClassCode {
        Agnt => "AGNT",
        Alrt => "ALRT",
        Category => "CATEGORY",
        Info => "INFO",
        Manu => "MANU",
        Mmat => "MMAT",
        Obs => "OBS",
        Org => "ORG",
        Pat => "PAT",
        Pcpr => "PCPR",
        Prov => "PROV",
        Psn => "PSN",
        Sbadm => "SBADM",
        Sply => "SPLY",
    }
);

vocabulary!(
    /// `moodCode` of an act.
    MoodCode {
        Evn => "EVN",
        Prms => "PRMS",
        Rqo => "RQO",
    }
);

vocabulary!(
    /// `typeCode` of an act relationship or participation.
    TypeCode {
        Aut => "AUT",
        Auth => "AUTH",
        Comp => "COMP",
        Covby => "COVBY",
        Csm => "CSM",
        Flfs => "FLFS",
        La => "LA",
        Pert => "PERT",
        Prcp => "PRCP",
        Prd => "PRD",
        Prf => "PRF",
        Rct => "RCT",
        Resp => "RESP",
        Rplc => "RPLC",
        Sbj => "SBJ",
        Seql => "SEQL",
    }
);

vocabulary!(
    ContextControlCode {
        Op => "OP",
        On => "ON",
    }
);

vocabulary!(
    DeterminerCode {
        Instance => "INSTANCE",
        Kind => "KIND",
    }
);

/// An act node: `classCode` then `moodCode`.
pub fn act(name: &str, class: ClassCode, mood: MoodCode) -> Element {
    Element::new(name)
        .attr("classCode", class.as_str())
        .attr("moodCode", mood.as_str())
}

/// A role node carrying only a `classCode`.
pub fn role(name: &str, class: ClassCode) -> Element {
    Element::new(name).attr("classCode", class.as_str())
}

/// An entity node: `classCode` then `determinerCode`.
pub fn entity(name: &str, class: ClassCode, determiner: DeterminerCode) -> Element {
    role(name, class).attr("determinerCode", determiner.as_str())
}

/// The fixed shape of an act relationship or participation slot.
///
/// Attributes are emitted as `typeCode`, `inversionInd`, `contextConductionInd`, `negationInd`,
/// `contextControlCode`; leading children as `seperatableInd` then `templateId`. The spelling
/// `seperatableInd` is the schema's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Relationship {
    type_code: TypeCode,
    inversion: Option<bool>,
    context_conduction: Option<bool>,
    negation: Option<bool>,
    context_control: Option<ContextControlCode>,
    separatable: Option<bool>,
    template: Option<&'static str>,
}

impl Relationship {
    pub const fn new(type_code: TypeCode) -> Self {
        Self {
            type_code,
            inversion: None,
            context_conduction: None,
            negation: None,
            context_control: None,
            separatable: None,
            template: None,
        }
    }

    /// A `PERT` relationship with `contextConductionInd` set.
    pub const fn pertinent(context_conduction: bool) -> Self {
        Self::new(TypeCode::Pert).context_conduction(context_conduction)
    }

    pub const fn inversion(mut self, value: bool) -> Self {
        self.inversion = Some(value);
        self
    }

    pub const fn context_conduction(mut self, value: bool) -> Self {
        self.context_conduction = Some(value);
        self
    }

    pub const fn negation(mut self, value: bool) -> Self {
        self.negation = Some(value);
        self
    }

    pub const fn context_control(mut self, value: ContextControlCode) -> Self {
        self.context_control = Some(value);
        self
    }

    pub const fn separatable(mut self, value: bool) -> Self {
        self.separatable = Some(value);
        self
    }

    pub const fn template(mut self, extension: &'static str) -> Self {
        self.template = Some(extension);
        self
    }

    /// Builds the slot element `name` around `target`.
    pub fn wrap(&self, name: &str, target: Element) -> Element {
        self.open(name).child(target)
    }

    /// Builds the slot element `name` around several targets.
    pub fn wrap_all(&self, name: &str, targets: impl IntoIterator<Item = Element>) -> Element {
        self.open(name).with_children(targets)
    }

    fn open(&self, name: &str) -> Element {
        let element = Element::new(name)
            .attr("typeCode", self.type_code.as_str())
            .maybe_attr("inversionInd", self.inversion.map(bool_text))
            .maybe_attr(
                "contextConductionInd",
                self.context_conduction.map(bool_text),
            )
            .maybe_attr("negationInd", self.negation.map(bool_text))
            .maybe_attr(
                "contextControlCode",
                self.context_control.map(ContextControlCode::as_str),
            );
        let element = match self.separatable {
            Some(value) => {
                element.child(Element::new("seperatableInd").attr("value", bool_text(value)))
            }
            None => element,
        };
        element.maybe_child(self.template.map(template_id))
    }
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
