use base64::Engine;
use base64::engine::general_purpose::STANDARD;

#[derive(Debug, PartialEq, Eq)]
pub enum HeaderError {
    Missing,
    InvalidScheme,
    Malformed,
}

/// Decodes `Basic base64(uid:password)`.
pub fn parse_basic_credentials(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (uid, password) = credentials.split_once(':')?;
    if uid.is_empty() {
        return None;
    }
    Some((uid.to_string(), password.to_string()))
}

/// Extracts the bearer tag from an Authorization header.
pub fn extract_bearer_token(auth_header: Option<&str>) -> Result<String, HeaderError> {
    match auth_header {
        Some(header) => match header.strip_prefix("Bearer ") {
            Some(tag) if !tag.trim().is_empty() => Ok(tag.trim().to_string()),
            Some(_) => Err(HeaderError::Malformed),
            None => Err(HeaderError::InvalidScheme),
        },
        None => Err(HeaderError::Missing),
    }
}

/// Extracts Basic credentials from an Authorization header.
pub fn extract_basic_credentials(
    auth_header: Option<&str>,
) -> Result<(String, String), HeaderError> {
    match auth_header {
        Some(header) if header.starts_with("Basic ") => {
            parse_basic_credentials(header).ok_or(HeaderError::Malformed)
        }
        Some(_) => Err(HeaderError::InvalidScheme),
        None => Err(HeaderError::Missing),
    }
}
