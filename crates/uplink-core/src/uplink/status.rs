use super::UplinkError;

const VERSION_PREFIX: &[u8] = b"HTTP/1.1 ";

/// Bytes needed before the status line can be classified: `HTTP/1.1 NNN`
pub const STATUS_LINE_LEN: usize = VERSION_PREFIX.len() + 3;

/// Three-digit status code, if `response` starts with a well-formed
/// `HTTP/1.1 NNN` prefix.
pub fn status_code(response: &[u8]) -> Option<u16> {
    let rest = response.strip_prefix(VERSION_PREFIX)?;
    let digits = rest.get(..3)?;

    digits.iter().try_fold(0u16, |code, &b| {
        b.is_ascii_digit().then(|| code * 10 + (b - b'0') as u16)
    })
}

/// Classify the leading bytes of a response.
///
/// Returns `None` while fewer than [`STATUS_LINE_LEN`] bytes are available.
pub fn classify_status(response: &[u8]) -> Option<Result<(), UplinkError>> {
    if response.len() < STATUS_LINE_LEN {
        return None;
    }

    Some(match status_code(response) {
        Some(200..=299) => Ok(()),
        Some(401) => Err(UplinkError::AuthFailure),
        Some(404) => Err(UplinkError::NotFound),
        _ => Err(UplinkError::UnexpectedStatus),
    })
}
