//! JID helpers.

/// Server suffix for individual users.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server suffix for groups.
pub const GROUP_SERVER: &str = "g.us";

/// Normalize a recipient into a JID.
///
/// Anything containing `@` is taken as an existing JID and returned
/// untouched; otherwise every non-digit is stripped and the user server
/// suffix appended. Idempotent.
pub fn normalize_jid(recipient: &str) -> String {
    if recipient.contains('@') {
        return recipient.to_string();
    }
    phone_to_jid(recipient)
}

/// Strip everything but ASCII digits.
pub fn digits_only(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Convert phone number to WhatsApp JID.
pub fn phone_to_jid(phone: &str) -> String {
    format!("{}@{}", digits_only(phone), USER_SERVER)
}

/// Check if a JID is a group.
pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with(&format!("@{}", GROUP_SERVER))
}
