//! Session keys and phone identities.
//!
//! Key forms:
//! - `session_<digits>`          (pairing-code flows and phone-addressed QR flows)
//! - `qr_session_<uuid-simple>`  (anonymous QR flows)
//!
//! Keys are pure derivations; nothing here touches the registry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

const PHONE_PREFIX: &str = "session_";
const ANON_PREFIX: &str = "qr_session_";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phone identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Digit-count bounds for a phone identity, country code included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhoneRules {
    pub min_digits: usize,
    pub max_digits: usize,
}

impl Default for PhoneRules {
    fn default() -> Self {
        Self {
            min_digits: 10,
            max_digits: 15,
        }
    }
}

impl From<&sl_domain::config::LinkingConfig> for PhoneRules {
    fn from(cfg: &sl_domain::config::LinkingConfig) -> Self {
        Self {
            min_digits: cfg.min_phone_digits,
            max_digits: cfg.max_phone_digits,
        }
    }
}

/// A validated phone identity: digits only, no leading `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Strict form: optional leading `+` followed by digits only.
    pub fn parse(raw: &str, rules: PhoneRules) -> Result<Self, LinkError> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
        let len = digits.len();
        if digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || len < rules.min_digits
            || len > rules.max_digits
        {
            return Err(LinkError::InvalidPhone(raw.to_string()));
        }
        Ok(Self(digits.to_string()))
    }

    /// Lenient form used for user input: spaces, dashes, dots and
    /// parentheses are dropped before the strict check.
    pub fn normalize(raw: &str, rules: PhoneRules) -> Result<Self, LinkError> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();
        Self::parse(&cleaned, rules).map_err(|_| LinkError::InvalidPhone(raw.to_string()))
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    /// `+<digits>`, the form shown back to callers.
    pub fn international(&self) -> String {
        format!("+{}", self.0)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session key
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn for_phone(phone: &PhoneNumber) -> Self {
        Self(format!("{PHONE_PREFIX}{}", phone.digits()))
    }

    /// Fresh unpredictable key for a QR flow with no phone attached.
    pub fn anonymous() -> Self {
        Self(format!("{ANON_PREFIX}{}", uuid::Uuid::new_v4().simple()))
    }

    /// Resolve a URL path segment to a key.
    ///
    /// Segments already carrying a key prefix are taken verbatim; anything
    /// else is treated as a phone number and reduced to its digits.
    pub fn resolve(segment: &str) -> Result<Self, LinkError> {
        let segment = segment.trim();
        if segment.starts_with(ANON_PREFIX) || segment.starts_with(PHONE_PREFIX) {
            let rest = segment
                .strip_prefix(ANON_PREFIX)
                .or_else(|| segment.strip_prefix(PHONE_PREFIX))
                .unwrap_or_default();
            if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(LinkError::InvalidSessionKey(segment.to_string()));
            }
            return Ok(Self(segment.to_string()));
        }
        let digits: String = segment.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(LinkError::InvalidSessionKey(segment.to_string()));
        }
        Ok(Self(format!("{PHONE_PREFIX}{digits}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with(ANON_PREFIX)
    }

    /// Digits of the phone identity, for phone-addressed keys.
    pub fn phone_digits(&self) -> Option<&str> {
        if self.is_anonymous() {
            return None;
        }
        self.0.strip_prefix(PHONE_PREFIX)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_accepts_plus_and_digits() {
        let p = PhoneNumber::parse("+15551234567", PhoneRules::default()).unwrap();
        assert_eq!(p.digits(), "15551234567");
        assert_eq!(p.international(), "+15551234567");
    }

    #[test]
    fn strict_parse_rejects_separators_and_bounds() {
        let rules = PhoneRules::default();
        assert!(PhoneNumber::parse("+1 555 123 4567", rules).is_err());
        assert!(PhoneNumber::parse("123456789", rules).is_err());
        assert!(PhoneNumber::parse("1234567890123456", rules).is_err());
        assert!(PhoneNumber::parse("+", rules).is_err());
        assert!(PhoneNumber::parse("++15551234567", rules).is_err());
    }

    #[test]
    fn normalize_strips_formatting() {
        let p = PhoneNumber::normalize("+1 (555) 123-4567", PhoneRules::default()).unwrap();
        assert_eq!(p.digits(), "15551234567");
    }

    #[test]
    fn key_for_phone() {
        let p = PhoneNumber::parse("15551234567", PhoneRules::default()).unwrap();
        let key = SessionKey::for_phone(&p);
        assert_eq!(key.as_str(), "session_15551234567");
        assert_eq!(key.phone_digits(), Some("15551234567"));
    }

    #[test]
    fn anonymous_keys_are_unique() {
        let a = SessionKey::anonymous();
        let b = SessionKey::anonymous();
        assert_ne!(a, b);
        assert!(a.is_anonymous());
        assert_eq!(a.phone_digits(), None);
        assert_eq!(a.as_str().len(), "qr_session_".len() + 32);
    }

    #[test]
    fn resolve_path_segments() {
        assert_eq!(
            SessionKey::resolve("qr_session_abc123").unwrap().as_str(),
            "qr_session_abc123"
        );
        assert_eq!(
            SessionKey::resolve("session_15551234567").unwrap().as_str(),
            "session_15551234567"
        );
        assert_eq!(
            SessionKey::resolve("+1-555-123-4567").unwrap().as_str(),
            "session_15551234567"
        );
        assert!(SessionKey::resolve("nothing-here").is_err());
        assert!(SessionKey::resolve("session_").is_err());
        assert!(SessionKey::resolve("session_../etc").is_err());
    }
}
