use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Input problems reported before any request is made. The messages are
/// shown to the employee as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter your email address")]
    EmptyEmail,
    #[error("Please enter a valid email address")]
    InvalidEmail,
    #[error("Please enter your password")]
    EmptyPassword,
    #[error("Password must be at least {} characters", MIN_PASSWORD_LEN)]
    PasswordTooShort,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Reset link is missing its token")]
    MissingResetToken,
    #[error("Message cannot be empty")]
    EmptyMessage,
}

pub fn validate_email(email: &str) -> Result<&str, ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::EmptyEmail);
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

pub fn validate_login<'a>(email: &'a str, password: &str) -> Result<&'a str, ValidationError> {
    let email = validate_email(email)?;
    if password.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    Ok(email)
}

pub fn validate_new_password(password: &str, confirmation: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    if password != confirmation {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

pub fn validate_reset_token(token: &str) -> Result<&str, ValidationError> {
    match token.trim() {
        "" => Err(ValidationError::MissingResetToken),
        token => Ok(token),
    }
}

pub fn validate_message(text: &str) -> Result<&str, ValidationError> {
    match text.trim() {
        "" => Err(ValidationError::EmptyMessage),
        text => Ok(text),
    }
}
