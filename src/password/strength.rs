use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::PasswordPolicy;

/// Most frequently leaked passwords, lowercase.
const COMMON_PASSWORDS: &[&str] = &[
    "123456",
    "123456789",
    "12345678",
    "1234567890",
    "password",
    "password1",
    "password123",
    "passw0rd",
    "p@ssw0rd",
    "p@ssword1",
    "qwerty",
    "qwerty123",
    "qwertyuiop",
    "abc123",
    "111111",
    "123123",
    "000000",
    "iloveyou",
    "admin",
    "admin123",
    "administrator",
    "welcome",
    "welcome1",
    "welcome123",
    "letmein",
    "monkey",
    "dragon",
    "football",
    "baseball",
    "sunshine",
    "princess",
    "shadow",
    "master",
    "trustno1",
    "superman",
    "batman",
    "starwars",
    "login",
    "changeme",
    "secret",
    "1q2w3e4r",
    "1qaz2wsx",
    "zaq12wsx",
    "asdfghjkl",
    "summer2024",
    "winter2024",
    "spring2024",
    "autumn2024",
    "passwordpassword",
    "correcthorsebatterystaple",
];

/// Personal details the password must not contain.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct PersonalInfo {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct StrengthReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[must_use]
pub fn is_common(password: &str) -> bool {
    let lowered = password.to_lowercase();
    COMMON_PASSWORDS.contains(&lowered.as_str())
}

pub(crate) fn is_special(c: char) -> bool {
    !c.is_alphanumeric() && !c.is_whitespace()
}

/// Name parts and the email local part, split on separators, longer than 2.
fn personal_tokens(info: &PersonalInfo) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut push_parts = |value: &str| {
        let value = value.trim().to_lowercase();
        if value.chars().count() > 2 {
            tokens.push(value.clone());
        }
        for part in value.split(|c: char| !c.is_alphanumeric()) {
            if part.chars().count() > 2 {
                tokens.push(part.to_string());
            }
        }
    };
    if let Some(name) = info.name.as_deref() {
        push_parts(name);
    }
    if let Some(email) = info.email.as_deref() {
        let local = email.split('@').next().unwrap_or_default();
        push_parts(local);
    }
    tokens.sort();
    tokens.dedup();
    tokens
}

#[must_use]
pub fn validate_strength(
    policy: &PasswordPolicy,
    password: &str,
    info: &PersonalInfo,
) -> StrengthReport {
    let mut errors = Vec::new();
    let length = password.chars().count();

    if length < policy.min_length {
        errors.push(format!(
            "Password must be at least {} characters long",
            policy.min_length
        ));
    }
    if length > policy.max_length {
        errors.push(format!(
            "Password must be at most {} characters long",
            policy.max_length
        ));
    }
    if policy.require_uppercase && !password.chars().any(char::is_uppercase) {
        errors.push("Password must contain at least one uppercase letter".to_string());
    }
    if policy.require_lowercase && !password.chars().any(char::is_lowercase) {
        errors.push("Password must contain at least one lowercase letter".to_string());
    }
    if policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain at least one number".to_string());
    }
    if policy.require_special && !password.chars().any(is_special) {
        errors.push("Password must contain at least one special character".to_string());
    }
    if policy.reject_common && is_common(password) {
        errors.push("Password is too common".to_string());
    }
    if policy.reject_personal_info {
        let lowered = password.to_lowercase();
        if personal_tokens(info)
            .iter()
            .any(|token| lowered.contains(token.as_str()))
        {
            errors.push("Password must not contain your name or email".to_string());
        }
    }

    StrengthReport {
        valid: errors.is_empty(),
        errors,
    }
}
