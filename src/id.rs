//! Prefixed ID generation for recoup entities.
//!
//! All IDs use an `rc_` brand prefix to guarantee collision avoidance with
//! gateway identifiers (Razorpay's `pay_`/`rfnd_`, PayPal capture and order
//! ids).
//!
//! Format: `rc_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &["rc_ref_", "rc_txn_"];

/// Validate that a string is a valid recoup prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `rc_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];

    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in recoup.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    RefundAttempt,
    Transaction,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::RefundAttempt => "rc_ref",
            Self::Transaction => "rc_txn",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
