use crate::{CONNECT_CODE_LEN, PASSWORD_LEN, ValidationError};

/// Checks a candidate device password. Rules are applied in order and the
/// first violation is reported.
pub fn validate_password(candidate: &str) -> Result<(), ValidationError> {
    if candidate.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    if candidate.chars().count() != PASSWORD_LEN {
        return Err(ValidationError::PasswordLength);
    }
    if !candidate.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::PasswordNotNumeric);
    }
    Ok(())
}

/// Connect codes are ASCII; the agent compares byte length.
pub fn validate_connect_code(code: &str) -> Result<(), ValidationError> {
    let code = code.trim();
    if !code.is_ascii() || code.len() != CONNECT_CODE_LEN {
        return Err(ValidationError::ConnectCode);
    }
    Ok(())
}

/// The connect prompt only reports one message for any malformed password.
pub fn validate_connect_password(password: &str) -> Result<(), ValidationError> {
    validate_password(password).map_err(|_| ValidationError::ConnectPassword)
}
