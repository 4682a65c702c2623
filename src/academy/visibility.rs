//! Visibility predicates for course content.
//!
//! Two independent questions are answered here and must not be merged:
//!
//! - **Traversal eligibility**: may the item appear in course navigation and
//!   outlines? Public and private items qualify; preview lessons do not.
//! - **Preview playback**: may the lesson be played without a purchase?
//!   Only preview lessons qualify.

use super::models::{LessonStatus, SectionStatus};

pub const TRAVERSABLE_LESSON_STATUSES: [LessonStatus; 2] =
    [LessonStatus::Public, LessonStatus::Private];

pub const TRAVERSABLE_SECTION_STATUSES: [SectionStatus; 2] =
    [SectionStatus::Public, SectionStatus::Private];

impl LessonStatus {
    pub fn is_traversable(&self) -> bool {
        TRAVERSABLE_LESSON_STATUSES.contains(self)
    }

    pub fn is_previewable(&self) -> bool {
        matches!(self, Self::Preview)
    }
}

impl SectionStatus {
    pub fn is_traversable(&self) -> bool {
        TRAVERSABLE_SECTION_STATUSES.contains(self)
    }
}

/// SQL `IN (...)` list of quoted status literals, e.g. `('public', 'private')`.
///
/// Built from the constants above so the store filter and the in-memory
/// predicate cannot drift apart. Values are static enum strings, never
/// user input.
pub(crate) fn sql_status_list<'a>(statuses: impl IntoIterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = statuses.into_iter().map(|s| format!("'{}'", s)).collect();
    format!("({})", quoted.join(", "))
}

pub(crate) fn traversable_lesson_sql() -> String {
    sql_status_list(TRAVERSABLE_LESSON_STATUSES.iter().map(|s| s.as_str()))
}

pub(crate) fn traversable_section_sql() -> String {
    sql_status_list(TRAVERSABLE_SECTION_STATUSES.iter().map(|s| s.as_str()))
}
