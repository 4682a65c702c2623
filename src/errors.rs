//! Typed error hierarchy for coursehub.
//!
//! `CourseError` covers the domain failures the API and CLI need to tell
//! apart. Store internals stay on `anyhow` and are wrapped at the edge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CourseError {
    #[error("Course {id} not found")]
    CourseNotFound { id: i64 },

    #[error("Section {id} not found")]
    SectionNotFound { id: i64 },

    #[error("Lesson {id} not found")]
    LessonNotFound { id: i64 },

    #[error("Product {id} not found")]
    ProductNotFound { id: i64 },

    #[error("Purchase {id} not found")]
    PurchaseNotFound { id: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CourseError {
    /// True for the `*NotFound` variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CourseNotFound { .. }
                | Self::SectionNotFound { .. }
                | Self::LessonNotFound { .. }
                | Self::ProductNotFound { .. }
                | Self::PurchaseNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_error_not_found_carries_id() {
        let err = CourseError::LessonNotFound { id: 42 };
        assert_eq!(err.to_string(), "Lesson 42 not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn course_error_validation_is_not_not_found() {
        let err = CourseError::Validation("name is required".into());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Validation failed: name is required");
    }

    #[test]
    fn course_error_permission_denied_display() {
        let err = CourseError::PermissionDenied;
        assert_eq!(err.to_string(), "Permission denied");
        assert!(!err.is_not_found());
    }

    #[test]
    fn course_error_from_anyhow() {
        let err: CourseError = anyhow::anyhow!("boom").into();
        match err {
            CourseError::Other(e) => assert_eq!(e.to_string(), "boom"),
            _ => panic!("Expected Other variant"),
        }
    }
}
