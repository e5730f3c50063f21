//! Input validation for values that arrive from outside the device: WiFi credentials
//! typed into the portal form and payload URLs handed out by the remote source.

/// WiFi credential validation errors with messages suitable for the portal form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("SSID must not be empty")]
    EmptySsid,

    #[error("SSID is too long (maximum 32 bytes)")]
    SsidTooLong,

    #[error("SSID contains control characters")]
    SsidControlChars,

    #[error("Passphrase must be 8 to 63 characters (or empty for an open network)")]
    PassphraseLength,

    #[error("Passphrase must be printable ASCII")]
    PassphraseCharacters,
}

/// Payload validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload URL has no usable file name: {0}")]
    NoFileName(String),

    #[error("payload exceeds limit ({limit} bytes)")]
    SizeExceeded { limit: u64 },

    #[error("payload is empty")]
    Empty,
}

/// Validate an SSID: 1 to 32 bytes, no control characters. Returned as given; SSIDs
/// may legitimately have leading or trailing spaces.
pub fn validate_ssid(ssid: &str) -> Result<&str, CredentialError> {
    if ssid.is_empty() {
        return Err(CredentialError::EmptySsid);
    }
    if ssid.len() > 32 {
        return Err(CredentialError::SsidTooLong);
    }
    if ssid.chars().any(|c| c.is_control()) {
        return Err(CredentialError::SsidControlChars);
    }
    Ok(ssid)
}

/// Validate a WPA passphrase. Empty means an open network.
pub fn validate_passphrase(passphrase: &str) -> Result<&str, CredentialError> {
    if passphrase.is_empty() {
        return Ok(passphrase);
    }
    if !(8..=63).contains(&passphrase.len()) {
        return Err(CredentialError::PassphraseLength);
    }
    if !passphrase.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        return Err(CredentialError::PassphraseCharacters);
    }
    Ok(passphrase)
}

/// Quote a value for a wpa_supplicant config string, escaping `\` and `"`.
pub fn wpa_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Derive a safe local file name from the last path segment of a payload URL. The
/// segment is percent-encoded so it can never contain a separator or `..`.
pub fn payload_filename(url: &str) -> Result<String, PayloadError> {
    use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
    const KEEP: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

    let without_query = url.split(['?', '#']).next().unwrap_or("");
    // Host-only URLs like "http://x" have no path to take a name from
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
        None => without_query,
    };
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if segment.is_empty() {
        return Err(PayloadError::NoFileName(url.to_string()));
    }
    let encoded = utf8_percent_encode(segment, KEEP).to_string();
    if encoded.chars().all(|c| c == '.') {
        return Err(PayloadError::NoFileName(url.to_string()));
    }
    Ok(encoded)
}

/// Percent-encode a message id for use as a single URL path segment.
pub fn encode_path_segment(id: &str) -> String {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    utf8_percent_encode(id, NON_ALPHANUMERIC).to_string()
}

/// Check a downloaded size against the configured cap.
pub fn validate_payload_size(size: u64, max_size: u64) -> Result<(), PayloadError> {
    if size == 0 {
        return Err(PayloadError::Empty);
    }
    if size > max_size {
        return Err(PayloadError::SizeExceeded { limit: max_size });
    }
    Ok(())
}
