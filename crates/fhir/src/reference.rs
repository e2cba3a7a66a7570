//! Reference resolution within a bundle.
//!
//! Two namespaces exist and are never mixed:
//! - bundle scope: `urn:uuid:…` literals matched against `Bundle.entry.fullUrl`
//! - contained scope: `#id` fragments matched against the owning resource's `contained`
//!
//! Matching is exact string comparison. An index is built per bundle and borrowed for the
//! lifetime of one translation.

use std::collections::HashMap;

use crate::datatypes::{Identifier, Reference};
use crate::resources::{Bundle, FhirResource, Resource};
use crate::{FhirError, FhirResult};

/// Lookup table from `fullUrl` to the entry's resource.
#[derive(Debug)]
pub struct ReferenceIndex<'a> {
    bundle: &'a Bundle,
    by_full_url: HashMap<&'a str, &'a Resource>,
}

impl<'a> ReferenceIndex<'a> {
    /// Indexes every entry that has both a `fullUrl` and a resource.
    pub fn new(bundle: &'a Bundle) -> Self {
        let by_full_url = bundle
            .entry
            .iter()
            .filter_map(|entry| Some((entry.full_url.as_deref()?, entry.resource.as_ref()?)))
            .collect();
        Self {
            bundle,
            by_full_url,
        }
    }

    /// Resolves a literal `Reference.reference` to a resource of type `T`.
    ///
    /// # Errors
    ///
    /// - [`FhirError::UnresolvedReference`] if the reference is absent or matches nothing.
    /// - [`FhirError::ReferenceTypeMismatch`] if it matches a resource of another type.
    pub fn resolve<T: FhirResource>(&self, reference: &Reference) -> FhirResult<&'a T> {
        let literal = reference
            .reference
            .as_deref()
            .ok_or_else(|| FhirError::UnresolvedReference {
                reference: describe(reference),
            })?;
        self.resolve_str(literal)
    }

    /// Resolves a reference literal.
    pub fn resolve_str<T: FhirResource>(&self, literal: &str) -> FhirResult<&'a T> {
        let resource =
            self.by_full_url
                .get(literal)
                .copied()
                .ok_or_else(|| FhirError::UnresolvedReference {
                    reference: literal.to_owned(),
                })?;
        downcast(resource, literal)
    }

    /// Resolves a reference without fixing the expected resource type.
    pub fn resolve_any(&self, reference: &Reference) -> FhirResult<&'a Resource> {
        let literal = reference
            .reference
            .as_deref()
            .ok_or_else(|| FhirError::UnresolvedReference {
                reference: describe(reference),
            })?;
        self.by_full_url
            .get(literal)
            .copied()
            .ok_or_else(|| FhirError::UnresolvedReference {
                reference: literal.to_owned(),
            })
    }

    /// Resolves a reference that may instead carry only a logical identifier.
    pub fn resolve_identifier_or_reference<T: FhirResource>(
        &self,
        reference: &'a Reference,
    ) -> FhirResult<ReferenceTarget<'a, T>> {
        if reference.reference.is_some() {
            return self.resolve(reference).map(ReferenceTarget::Resource);
        }
        match &reference.identifier {
            Some(identifier) => Ok(ReferenceTarget::Identifier {
                identifier,
                display: reference.display.as_deref(),
            }),
            None => Err(FhirError::UnresolvedReference {
                reference: describe(reference),
            }),
        }
    }

    /// Resolves a `#id` reference within `owner`'s contained resources.
    pub fn resolve_contained<T: FhirResource>(
        owner: &'a Resource,
        reference: &Reference,
    ) -> FhirResult<&'a T> {
        ContainedScope::new(owner.contained()).resolve(reference)
    }

    /// The first entry of type `T`, in bundle order.
    pub fn first_of<T: FhirResource + 'a>(&self) -> Option<&'a T> {
        self.all_of::<T>().next()
    }

    /// Every entry of type `T`, in bundle order.
    pub fn all_of<T: FhirResource + 'a>(&self) -> impl Iterator<Item = &'a T> + 'a {
        let bundle: &'a Bundle = self.bundle;
        bundle
            .entry
            .iter()
            .filter_map(|entry| entry.resource.as_ref())
            .filter_map(T::from_resource)
    }

    pub fn bundle(&self) -> &'a Bundle {
        self.bundle
    }
}

/// The `#id` namespace of a single resource.
#[derive(Debug)]
pub struct ContainedScope<'a> {
    by_id: HashMap<&'a str, &'a Resource>,
}

impl<'a> ContainedScope<'a> {
    pub fn new(contained: &'a [Resource]) -> Self {
        let by_id = contained
            .iter()
            .filter_map(|resource| Some((resource.id()?, resource)))
            .collect();
        Self { by_id }
    }

    pub fn resolve<T: FhirResource>(&self, reference: &Reference) -> FhirResult<&'a T> {
        let literal = reference
            .reference
            .as_deref()
            .ok_or_else(|| FhirError::UnresolvedReference {
                reference: describe(reference),
            })?;
        self.resolve_str(literal)
    }

    pub fn resolve_str<T: FhirResource>(&self, literal: &str) -> FhirResult<&'a T> {
        let unresolved = || FhirError::UnresolvedReference {
            reference: literal.to_owned(),
        };
        let id = literal.strip_prefix('#').ok_or_else(unresolved)?;
        let resource = self.by_id.get(id).copied().ok_or_else(unresolved)?;
        downcast(resource, literal)
    }
}

/// What a `Reference` points at once resolved.
#[derive(Debug)]
pub enum ReferenceTarget<'a, T> {
    Resource(&'a T),
    Identifier {
        identifier: &'a Identifier,
        display: Option<&'a str>,
    },
}

fn downcast<'a, T: FhirResource>(resource: &'a Resource, literal: &str) -> FhirResult<&'a T> {
    T::from_resource(resource).ok_or_else(|| FhirError::ReferenceTypeMismatch {
        reference: literal.to_owned(),
        expected: T::RESOURCE_TYPE.to_owned(),
        actual: resource.resource_type().to_owned(),
    })
}

fn describe(reference: &Reference) -> String {
    reference
        .identifier
        .as_ref()
        .and_then(|identifier| identifier.value.clone())
        .or_else(|| reference.display.clone())
        .unwrap_or_else(|| "<empty reference>".to_owned())
}
