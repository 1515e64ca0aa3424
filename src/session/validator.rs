//! Credential shape checks applied before any provider call.
//!
//! Pure functions: no I/O and no state. Lengths count Unicode scalar values.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const MAX_DISPLAY_NAME_LENGTH: usize = 50;

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,64}$").ok());

/// Input field a violation refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Email,
    Password,
    ConfirmPassword,
    DisplayName,
}

/// One failed credential rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    InvalidEmail,
    PasswordTooShort,
    PasswordTooLong,
    EmptyDisplayName,
    DisplayNameTooLong,
    PasswordMismatch,
}

impl Violation {
    #[must_use]
    pub const fn field(self) -> Field {
        match self {
            Self::InvalidEmail => Field::Email,
            Self::PasswordTooShort | Self::PasswordTooLong => Field::Password,
            Self::EmptyDisplayName | Self::DisplayNameTooLong => Field::DisplayName,
            Self::PasswordMismatch => Field::ConfirmPassword,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEmail => f.write_str("Please enter a valid email address."),
            Self::PasswordTooShort => write!(
                f,
                "Password must be at least {MIN_PASSWORD_LENGTH} characters."
            ),
            Self::PasswordTooLong => f.write_str("Password is too long."),
            Self::EmptyDisplayName => f.write_str("Display name cannot be empty."),
            Self::DisplayNameTooLong => f.write_str("Display name is too long."),
            Self::PasswordMismatch => f.write_str("Passwords do not match."),
        }
    }
}

#[must_use]
pub fn validate_email(email: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|regex| regex.is_match(email))
}

#[must_use]
pub fn validate_password(password: &str) -> bool {
    password_violation(password).is_none()
}

#[must_use]
pub fn validate_display_name(display_name: &str) -> bool {
    display_name_violation(display_name).is_none()
}

pub(crate) fn password_violation(password: &str) -> Option<Violation> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        Some(Violation::PasswordTooShort)
    } else if length > MAX_PASSWORD_LENGTH {
        Some(Violation::PasswordTooLong)
    } else {
        None
    }
}

pub(crate) fn display_name_violation(display_name: &str) -> Option<Violation> {
    let length = display_name.trim().chars().count();
    if length == 0 {
        Some(Violation::EmptyDisplayName)
    } else if length > MAX_DISPLAY_NAME_LENGTH {
        Some(Violation::DisplayNameTooLong)
    } else {
        None
    }
}

/// Check every registration rule and return all violations found.
#[must_use]
pub fn validate_registration(
    email: &str,
    password: &str,
    confirm_password: &str,
    display_name: &str,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    if !validate_email(email) {
        violations.push(Violation::InvalidEmail);
    }
    violations.extend(password_violation(password));
    if password != confirm_password {
        violations.push(Violation::PasswordMismatch);
    }
    violations.extend(display_name_violation(display_name));
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_email_accepts_common_shapes() {
        assert!(validate_email("a@b.com"));
        assert!(validate_email("first.last+tag@mail.example.co"));
        assert!(validate_email("USER_1%x@sub-domain.io"));
    }

    #[test]
    fn validate_email_rejects_missing_at_or_dot() {
        for email in [
            "",
            "plainaddress",
            "a.b.com",
            "a@bcom",
            "a@b",
            "a@b.",
            "@b.com",
            "a@b.c",
            "a b@c.com",
            "ann@example.c0m",
        ] {
            assert!(!validate_email(email), "{email} should be rejected");
        }
    }

    #[test]
    fn validate_email_property_without_dot_after_at() {
        // any string lacking `@`, or lacking `.` after `@`, is rejected
        let samples = ["x", "x.y", "x@y", "x.y@z", "xy@@z", "name@domain"];
        for sample in samples {
            let after_at = sample.split_once('@').map(|(_, domain)| domain);
            if after_at.is_none_or(|domain| !domain.contains('.')) {
                assert!(!validate_email(sample));
            }
        }
    }

    #[test]
    fn email_pattern_compiles() {
        assert!(EMAIL_PATTERN.is_some());
    }

    #[test]
    fn validate_email_tld_length_bounds() {
        let tld_64 = "a".repeat(64);
        let tld_65 = "a".repeat(65);
        assert!(validate_email(&format!("a@b.{tld_64}")));
        assert!(!validate_email(&format!("a@b.{tld_65}")));
    }

    #[test]
    fn validate_password_bounds() {
        assert!(!validate_password(&"x".repeat(7)));
        assert!(validate_password(&"x".repeat(8)));
        assert!(validate_password(&"x".repeat(128)));
        assert!(!validate_password(&"x".repeat(129)));
    }

    #[test]
    fn validate_password_every_length_in_range() {
        for length in MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH {
            assert!(validate_password(&"p".repeat(length)));
        }
    }

    #[test]
    fn validate_password_counts_characters_not_bytes() {
        // 8 characters, 16 bytes
        assert!(validate_password("éééééééé"));
    }

    #[test]
    fn validate_display_name_trims_before_counting() {
        assert!(!validate_display_name(""));
        assert!(!validate_display_name("   "));
        assert!(validate_display_name(" Ann "));
        assert!(validate_display_name(&"n".repeat(50)));
        assert!(!validate_display_name(&"n".repeat(51)));
        assert!(validate_display_name(&format!("  {}  ", "n".repeat(50))));
    }

    #[test]
    fn validate_registration_collects_all_violations() {
        let violations = validate_registration("nope", "short", "other", " ");
        assert_eq!(
            violations,
            vec![
                Violation::InvalidEmail,
                Violation::PasswordTooShort,
                Violation::PasswordMismatch,
                Violation::EmptyDisplayName,
            ]
        );
    }

    #[test]
    fn validate_registration_reports_mismatch_with_valid_fields() {
        let violations = validate_registration("a@b.com", "password1", "password2", "Ann");
        assert_eq!(violations, vec![Violation::PasswordMismatch]);
    }

    #[test]
    fn validate_registration_accepts_valid_input() {
        assert!(validate_registration("a@b.com", "password1", "password1", "Ann").is_empty());
    }

    #[test]
    fn violation_fields() {
        assert_eq!(Violation::InvalidEmail.field(), Field::Email);
        assert_eq!(Violation::PasswordTooLong.field(), Field::Password);
        assert_eq!(Violation::PasswordMismatch.field(), Field::ConfirmPassword);
        assert_eq!(Violation::DisplayNameTooLong.field(), Field::DisplayName);
    }

    #[test]
    fn violation_messages() {
        assert_eq!(
            Violation::PasswordTooShort.to_string(),
            "Password must be at least 8 characters."
        );
        assert_eq!(
            Violation::PasswordMismatch.to_string(),
            "Passwords do not match."
        );
    }
}
