//! Contact equality used for idempotent skips.
//!
//! Whether a target "already has" the desired contact decides between a
//! write and a skip, so the predicate is pluggable.

use contact_sync_core::{ContactPayload, PrimaryContact};
use std::collections::BTreeSet;

/// Decides whether a target's current contact already matches the desired one.
pub trait ContactComparator: Send + Sync {
    fn matches(&self, current: &ContactPayload, desired: &ContactPayload) -> bool;
}

/// Field-for-field equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactComparator;

impl ContactComparator for ExactComparator {
    fn matches(&self, current: &ContactPayload, desired: &ContactPayload) -> bool {
        current == desired
    }
}

/// Fields of a primary contact that may take part in a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimaryField {
    FullName,
    CompanyName,
    AddressLines,
    City,
    StateOrRegion,
    DistrictOrCounty,
    PostalCode,
    CountryCode,
    PhoneNumber,
    WebsiteUrl,
}

impl PrimaryField {
    fn equal(self, a: &PrimaryContact, b: &PrimaryContact) -> bool {
        match self {
            PrimaryField::FullName => a.full_name == b.full_name,
            PrimaryField::CompanyName => a.company_name == b.company_name,
            PrimaryField::AddressLines => a.address_lines == b.address_lines,
            PrimaryField::City => a.city == b.city,
            PrimaryField::StateOrRegion => a.state_or_region == b.state_or_region,
            PrimaryField::DistrictOrCounty => a.district_or_county == b.district_or_county,
            PrimaryField::PostalCode => a.postal_code == b.postal_code,
            PrimaryField::CountryCode => a.country_code == b.country_code,
            PrimaryField::PhoneNumber => a.phone_number == b.phone_number,
            PrimaryField::WebsiteUrl => a.website_url == b.website_url,
        }
    }
}

/// Compares primary contacts on a chosen subset of fields.
///
/// Alternate contacts are still compared exactly.
#[derive(Debug, Clone)]
pub struct PrimaryNameComparator {
    fields: BTreeSet<PrimaryField>,
}

impl Default for PrimaryNameComparator {
    fn default() -> Self {
        Self::new([PrimaryField::FullName])
    }
}

impl PrimaryNameComparator {
    /// Compare on `fields`. An empty set treats every primary contact as equal.
    pub fn new(fields: impl IntoIterator<Item = PrimaryField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn fields(&self) -> &BTreeSet<PrimaryField> {
        &self.fields
    }
}

impl ContactComparator for PrimaryNameComparator {
    fn matches(&self, current: &ContactPayload, desired: &ContactPayload) -> bool {
        match (current, desired) {
            (ContactPayload::Primary(a), ContactPayload::Primary(b)) => {
                self.fields.iter().all(|field| field.equal(a, b))
            }
            _ => current == desired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contact_sync_core::{AlternateContact, ContactKind};

    fn primary(name: &str, city: &str) -> ContactPayload {
        ContactPayload::Primary(PrimaryContact {
            full_name: name.to_string(),
            address_lines: vec!["1 Main St".to_string()],
            city: city.to_string(),
            country_code: "US".to_string(),
            postal_code: "12345".to_string(),
            phone_number: "+1-555-0100".to_string(),
            company_name: None,
            district_or_county: None,
            state_or_region: None,
            website_url: None,
        })
    }

    #[test]
    fn test_exact_comparator() {
        assert!(ExactComparator.matches(&primary("A", "X"), &primary("A", "X")));
        assert!(!ExactComparator.matches(&primary("A", "X"), &primary("A", "Y")));
    }

    #[test]
    fn test_primary_name_comparator_ignores_other_fields() {
        let cmp = PrimaryNameComparator::default();
        assert!(cmp.matches(&primary("A", "X"), &primary("A", "Y")));
        assert!(!cmp.matches(&primary("A", "X"), &primary("B", "X")));

        let with_city = PrimaryNameComparator::new([PrimaryField::FullName, PrimaryField::City]);
        assert!(!with_city.matches(&primary("A", "X"), &primary("A", "Y")));
    }

    #[test]
    fn test_primary_name_comparator_alternate_is_exact() {
        let alt = |email: &str| {
            ContactPayload::Alternate(AlternateContact {
                kind: ContactKind::Security,
                email: email.to_string(),
                name: "Sec".to_string(),
                phone_number: "1".to_string(),
                title: "CISO".to_string(),
            })
        };
        let cmp = PrimaryNameComparator::default();
        assert!(cmp.matches(&alt("a@x.io"), &alt("a@x.io")));
        assert!(!cmp.matches(&alt("a@x.io"), &alt("b@x.io")));
    }
}
