//! Identity gate checks
//!
//! Year-of-birth policy window and CV format check run before the device
//! check in the gated product variant.

use serde::{Deserialize, Serialize};

/// Rejections shown inline next to the identity inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please enter a valid year of birth")]
    InvalidBirthYear,
    #[error("This position requires an age between {min} and {max} (your age: {age})")]
    AgeOutOfRange { age: u32, min: u32, max: u32 },
    #[error("Only PDF files can be uploaded as a CV")]
    UnsupportedCvFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityPolicy {
    /// Inclusive lower bound of the accepted age window.
    pub min_age: u32,
    /// Inclusive upper bound of the accepted age window.
    pub max_age: u32,
    /// Years before this are treated as typos, not as an age.
    pub earliest_year: i32,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            min_age: 20,
            max_age: 30,
            earliest_year: 1900,
        }
    }
}

/// Validate a raw year-of-birth input and return the computed age.
pub fn verify_birth_year(
    input: &str,
    current_year: i32,
    policy: &IdentityPolicy,
) -> Result<u32, ValidationError> {
    let year: i32 = input
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidBirthYear)?;

    if year < policy.earliest_year || year > current_year {
        return Err(ValidationError::InvalidBirthYear);
    }

    let age = current_year
        .checked_sub(year)
        .and_then(|age| u32::try_from(age).ok())
        .ok_or(ValidationError::InvalidBirthYear)?;
    if age < policy.min_age || age > policy.max_age {
        return Err(ValidationError::AgeOutOfRange {
            age,
            min: policy.min_age,
            max: policy.max_age,
        });
    }
    Ok(age)
}

/// Accept only PDF uploads, by declared content type or file extension.
pub fn verify_cv(file_name: &str, content_type: Option<&str>) -> Result<(), ValidationError> {
    let is_pdf = match content_type {
        Some(ct) => ct.eq_ignore_ascii_case("application/pdf"),
        None => std::path::Path::new(file_name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")),
    };
    if is_pdf {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedCvFormat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_age_inside_window() {
        let policy = IdentityPolicy::default();
        assert_eq!(verify_birth_year("2000", 2025, &policy), Ok(25));
        assert_eq!(verify_birth_year(" 2005 ", 2025, &policy), Ok(20));
        assert_eq!(verify_birth_year("1995", 2025, &policy), Ok(30));
    }

    #[test]
    fn rejects_non_numeric_and_out_of_calendar_input() {
        let policy = IdentityPolicy::default();
        assert_eq!(
            verify_birth_year("abc", 2025, &policy),
            Err(ValidationError::InvalidBirthYear)
        );
        assert_eq!(
            verify_birth_year("1850", 2025, &policy),
            Err(ValidationError::InvalidBirthYear)
        );
        assert_eq!(
            verify_birth_year("2030", 2025, &policy),
            Err(ValidationError::InvalidBirthYear)
        );
    }

    #[test]
    fn extreme_earliest_year_is_invalid_not_overflow() {
        let policy = IdentityPolicy {
            earliest_year: i32::MIN,
            ..IdentityPolicy::default()
        };
        assert_eq!(
            verify_birth_year(&i32::MIN.to_string(), 2025, &policy),
            Err(ValidationError::InvalidBirthYear)
        );
        assert_eq!(verify_birth_year("2000", 2025, &policy), Ok(25));
    }

    #[test]
    fn age_policy_rejection_has_distinct_message() {
        let policy = IdentityPolicy::default();
        let err = verify_birth_year("1980", 2025, &policy).unwrap_err();
        assert_eq!(
            err,
            ValidationError::AgeOutOfRange {
                age: 45,
                min: 20,
                max: 30
            }
        );
        assert_ne!(err.to_string(), ValidationError::InvalidBirthYear.to_string());
        assert!(err.to_string().contains("45"));
    }

    #[test]
    fn cv_must_be_pdf() {
        assert!(verify_cv("resume.pdf", Some("application/pdf")).is_ok());
        assert!(verify_cv("resume.PDF", None).is_ok());
        assert_eq!(
            verify_cv("resume.docx", None),
            Err(ValidationError::UnsupportedCvFormat)
        );
        assert_eq!(
            verify_cv("resume.pdf", Some("image/png")),
            Err(ValidationError::UnsupportedCvFormat)
        );
    }
}
