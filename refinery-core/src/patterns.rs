//! Closed library of well-known string formats.
//!
//! Used by the schema inferrer to tag string fields and by the quality scorer
//! to validate formats. Matching order follows [`PatternKind::ALL`], which
//! makes tie-breaking deterministic.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// A recognised string format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Email,
    Url,
    PhoneUs,
    Uuid,
    CreditCard,
    Ssn,
    Ipv4,
    IsoDate,
    IsoDatetime,
}

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("valid url regex"));
static PHONE_US: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?1?\s*\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}$").expect("valid phone regex")
});
static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid uuid regex")
});
static CREDIT_CARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}$").expect("valid credit card regex")
});
static SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3}-\d{2}-\d{4}$").expect("valid ssn regex"));
static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(\.(25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3}$")
        .expect("valid ipv4 regex")
});
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid iso date regex"));
static ISO_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?$")
        .expect("valid iso datetime regex")
});

impl PatternKind {
    /// Every pattern, in matching priority order.
    pub const ALL: [PatternKind; 9] = [
        PatternKind::Email,
        PatternKind::Url,
        PatternKind::PhoneUs,
        PatternKind::Uuid,
        PatternKind::CreditCard,
        PatternKind::Ssn,
        PatternKind::Ipv4,
        PatternKind::IsoDate,
        PatternKind::IsoDatetime,
    ];

    pub fn regex(&self) -> &'static Regex {
        match self {
            PatternKind::Email => &EMAIL,
            PatternKind::Url => &URL,
            PatternKind::PhoneUs => &PHONE_US,
            PatternKind::Uuid => &UUID,
            PatternKind::CreditCard => &CREDIT_CARD,
            PatternKind::Ssn => &SSN,
            PatternKind::Ipv4 => &IPV4,
            PatternKind::IsoDate => &ISO_DATE,
            PatternKind::IsoDatetime => &ISO_DATETIME,
        }
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex().is_match(value.trim())
    }

    /// Snake-case identifier, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Email => "email",
            PatternKind::Url => "url",
            PatternKind::PhoneUs => "phone_us",
            PatternKind::Uuid => "uuid",
            PatternKind::CreditCard => "credit_card",
            PatternKind::Ssn => "ssn",
            PatternKind::Ipv4 => "ipv4",
            PatternKind::IsoDate => "iso_date",
            PatternKind::IsoDatetime => "iso_datetime",
        }
    }

    /// Human-readable label used in field descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            PatternKind::Email => "Email address",
            PatternKind::Url => "URL",
            PatternKind::PhoneUs => "US phone number",
            PatternKind::Uuid => "UUID",
            PatternKind::CreditCard => "Credit card number",
            PatternKind::Ssn => "Social Security Number",
            PatternKind::Ipv4 => "IPv4 address",
            PatternKind::IsoDate => "ISO date",
            PatternKind::IsoDatetime => "ISO datetime",
        }
    }

    /// First pattern in priority order that matches `value`.
    pub fn detect(value: &str) -> Option<PatternKind> {
        Self::ALL.into_iter().find(|p| p.is_match(value))
    }

    /// Pattern implied by a field name, e.g. `contact_email` -> email.
    pub fn implied_by_name(field_name: &str) -> Option<PatternKind> {
        let name = field_name.to_lowercase();
        if name.contains("email") {
            Some(PatternKind::Email)
        } else if name.contains("url") || name.contains("website") {
            Some(PatternKind::Url)
        } else if name.contains("phone") {
            Some(PatternKind::PhoneUs)
        } else if name.contains("uuid") {
            Some(PatternKind::Uuid)
        } else if name == "ip" || name.ends_with("_ip") || name.starts_with("ip_") {
            Some(PatternKind::Ipv4)
        } else {
            None
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
