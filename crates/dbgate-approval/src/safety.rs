/// Keyword that marks a payload as destructive.
pub const FORBIDDEN_KEYWORD: &str = "DROP";

/// Returns true when the payload mentions `DROP` in any letter case.
pub fn payload_is_unsafe(payload: &str) -> bool {
    payload.to_ascii_uppercase().contains(FORBIDDEN_KEYWORD)
}

/// Warning posted when an unsafe payload is refused.
pub fn unsafe_payload_warning() -> String {
    format!("`{FORBIDDEN_KEYWORD}` in query, very nasty! :alert:")
}
