/// PII redaction utilities for logging
///
/// Masks sensitive information like portal accounts and bearer tokens to
/// prevent leaking credentials in logs while still providing useful
/// debugging info.

/// Redact an email address, keeping domain visible.
/// Example: "user@example.com" -> "u***@example.com"
pub fn email(email: &str) -> String {
    if let Some(at_pos) = email.find('@') {
        if at_pos == 0 {
            return email.to_string();
        }
        let local = &email[..at_pos];
        let domain = &email[at_pos..];

        // Use chars to properly handle unicode
        let mut chars = local.chars();
        if let Some(first_char) = chars.next() {
            if chars.next().is_none() {
                // Single character local part
                format!("*{}", domain)
            } else {
                format!("{}***{}", first_char, domain)
            }
        } else {
            // Empty local part
            email.to_string()
        }
    } else {
        // Not a valid email, return as-is
        email.to_string()
    }
}

/// Redact a bearer token, keeping only the last 4 characters visible.
/// Example: "eyJhbGciOi...A1b2" -> "****A1b2"
pub fn token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();

    if chars.len() <= 4 {
        // Too short to meaningfully redact
        return "*".repeat(chars.len());
    }

    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", visible)
}
