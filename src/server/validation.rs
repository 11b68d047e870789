use crate::server::response::ApiError;

const MAX_NAME_LEN: usize = 128;
const MAX_UID_LEN: usize = 64;

fn is_valid_name_char(c: char, allow_period: bool) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_period && c == '.')
}

fn validate_name(
    name: &str,
    entity: &str,
    max_len: usize,
    allow_period: bool,
    forbid_leading_special: bool,
) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} name cannot exceed {max_len} characters"));
    }
    if !name.chars().all(|c| is_valid_name_char(c, allow_period)) {
        let mut allowed = "alphanumeric characters, hyphens, and underscores".to_string();
        if allow_period {
            allowed.push_str(", and periods");
        }
        return Err(format!("{entity} name can only contain {allowed}"));
    }
    if forbid_leading_special && (name.starts_with('-') || name.starts_with('_')) {
        return Err(format!(
            "{entity} name cannot start with a hyphen or underscore"
        ));
    }
    Ok(())
}

/// Names of repositories and of the objects inside them.
pub fn validate_object_name(name: &str, entity: &str) -> Result<(), ApiError> {
    validate_name(name, entity, MAX_NAME_LEN, true, true).map_err(ApiError::bad_request)
}

pub fn validate_uid(uid: &str) -> Result<(), ApiError> {
    validate_name(uid, "User", MAX_UID_LEN, true, true).map_err(ApiError::bad_request)
}

/// Catalogue entries may carry any printable text except path separators.
pub fn validate_catalog_name(name: &str, entity: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{entity} name cannot be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "{entity} name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    if name.contains('/') || name.chars().any(char::is_control) {
        return Err(ApiError::bad_request(format!(
            "{entity} name cannot contain '/' or control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_names() {
        assert!(validate_object_name("staging-ops", "Repository").is_ok());
        assert!(validate_object_name("staging-ops_prod", "Bucket").is_ok());
        assert!(validate_object_name("web01.example.org", "Node").is_ok());
        assert!(validate_object_name("", "Bucket").is_err());
        assert!(validate_object_name("_hidden", "Group").is_err());
        assert!(validate_object_name("a b", "Group").is_err());
    }

    #[test]
    fn test_catalog_names() {
        assert!(validate_catalog_name("<=", "Predicate").is_ok());
        assert!(validate_catalog_name("cpu.idle", "Metric").is_ok());
        assert!(validate_catalog_name("a/b", "Metric").is_err());
        assert!(validate_catalog_name("  ", "Unit").is_err());
    }
}
