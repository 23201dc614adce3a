//! Contact information model.
//!
//! Payloads are carried unchanged from the source account to every target.
//! The engine only compares and forwards them, it never rewrites a field.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Category of contact information on an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactKind {
    /// The account's primary (mailing) contact.
    Primary,
    /// Alternate contact for billing.
    Billing,
    /// Alternate contact for operations.
    Operations,
    /// Alternate contact for security.
    Security,
}

impl ContactKind {
    /// All contact kinds, in a stable order.
    pub const ALL: [ContactKind; 4] = [
        ContactKind::Primary,
        ContactKind::Billing,
        ContactKind::Operations,
        ContactKind::Security,
    ];

    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactKind::Primary => "PRIMARY",
            ContactKind::Billing => "BILLING",
            ContactKind::Operations => "OPERATIONS",
            ContactKind::Security => "SECURITY",
        }
    }

    /// Whether this kind is one of the alternate contacts.
    #[must_use]
    pub fn is_alternate(&self) -> bool {
        !matches!(self, ContactKind::Primary)
    }
}

impl fmt::Display for ContactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PRIMARY" => Ok(ContactKind::Primary),
            "BILLING" => Ok(ContactKind::Billing),
            "OPERATIONS" => Ok(ContactKind::Operations),
            "SECURITY" => Ok(ContactKind::Security),
            _ => Err(ValidationError::UnknownContactKind {
                value: s.to_string(),
            }),
        }
    }
}

/// Primary (mailing) contact of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryContact {
    pub full_name: String,
    /// One to three address lines.
    pub address_lines: Vec<String>,
    pub city: String,
    pub country_code: String,
    pub postal_code: String,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district_or_county: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_or_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
}

impl PrimaryContact {
    /// Check required fields and the address line count.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("full_name", &self.full_name)?;
        require("city", &self.city)?;
        require("country_code", &self.country_code)?;
        require("postal_code", &self.postal_code)?;
        require("phone_number", &self.phone_number)?;

        if self.address_lines.is_empty() || self.address_lines.len() > 3 {
            return Err(ValidationError::invalid(
                "address_lines",
                format!("expected 1 to 3 lines, got {}", self.address_lines.len()),
            ));
        }
        require("address_lines[0]", &self.address_lines[0])
    }
}

/// Alternate contact (billing, operations or security) of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateContact {
    /// Which alternate contact this is. Never [`ContactKind::Primary`].
    pub kind: ContactKind,
    pub email: String,
    pub name: String,
    pub phone_number: String,
    pub title: String,
}

impl AlternateContact {
    /// Check required fields and that the kind is an alternate kind.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.kind.is_alternate() {
            return Err(ValidationError::invalid(
                "kind",
                "alternate contact cannot have kind PRIMARY",
            ));
        }
        require("email", &self.email)?;
        if !self.email.contains('@') {
            return Err(ValidationError::invalid("email", "must contain @"));
        }
        require("name", &self.name)?;
        require("phone_number", &self.phone_number)?;
        require("title", &self.title)
    }
}

/// Contact data as read from or written to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContactPayload {
    Primary(PrimaryContact),
    Alternate(AlternateContact),
}

impl ContactPayload {
    /// The contact kind this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> ContactKind {
        match self {
            ContactPayload::Primary(_) => ContactKind::Primary,
            ContactPayload::Alternate(alt) => alt.kind,
        }
    }

    /// Validate the wrapped contact.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ContactPayload::Primary(p) => p.validate(),
            ContactPayload::Alternate(a) => a.validate(),
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::empty(field))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn billing() -> AlternateContact {
        AlternateContact {
            kind: ContactKind::Billing,
            email: "billing@example.com".to_string(),
            name: "Pat Doe".to_string(),
            phone_number: "+1-555-0100".to_string(),
            title: "Controller".to_string(),
        }
    }

    #[test]
    fn test_contact_kind_parse_is_case_insensitive() {
        assert_eq!("billing".parse::<ContactKind>().unwrap(), ContactKind::Billing);
        assert_eq!(" Primary ".parse::<ContactKind>().unwrap(), ContactKind::Primary);
        assert!("fax".parse::<ContactKind>().is_err());
    }

    #[test]
    fn test_contact_kind_serializes_upper_case() {
        let json = serde_json::to_string(&ContactKind::Operations).unwrap();
        assert_eq!(json, "\"OPERATIONS\"");
    }

    #[test]
    fn test_alternate_contact_validation() {
        assert!(billing().validate().is_ok());

        let mut bad = billing();
        bad.email = "not-an-email".to_string();
        assert!(bad.validate().is_err());

        let mut primary_kind = billing();
        primary_kind.kind = ContactKind::Primary;
        assert!(primary_kind.validate().is_err());
    }

    #[test]
    fn test_primary_contact_address_line_bounds() {
        let mut contact = PrimaryContact {
            full_name: "Pat Doe".to_string(),
            address_lines: vec!["1 Main St".to_string()],
            city: "Springfield".to_string(),
            country_code: "US".to_string(),
            postal_code: "12345".to_string(),
            phone_number: "+1-555-0100".to_string(),
            company_name: None,
            district_or_county: None,
            state_or_region: None,
            website_url: None,
        };
        assert!(contact.validate().is_ok());

        contact.address_lines = vec![];
        assert!(contact.validate().is_err());

        contact.address_lines = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        assert!(contact.validate().is_err());
    }

    #[test]
    fn test_payload_kind() {
        let payload = ContactPayload::Alternate(billing());
        assert_eq!(payload.kind(), ContactKind::Billing);
    }
}
