//! Previous/next lesson resolution across ordered sections.
//!
//! Lessons are ordered within a section and sections within a course. The
//! neighbor of a lesson is the nearest traversable lesson in the same
//! section; failing that, the first (or last) traversable lesson of the
//! nearest traversable section. The section hop is a single step: an
//! adjacent section without traversable lessons ends navigation even if a
//! section after it has lessons.

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Next => Self::Previous,
            Self::Previous => Self::Next,
        }
    }
}

/// An ordered item and the scope it is ordered in: a lesson within its
/// section, or a section within its course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub scope_id: i64,
    pub order: i32,
}

/// Ordered, visibility-filtered lookups the navigator needs from a store.
///
/// `first_lesson` and `first_section` return the traversable item nearest to
/// `after` in `direction`: the smallest order strictly greater than `after`
/// for [`Direction::Next`], the largest strictly smaller for
/// [`Direction::Previous`]. With `after = None` they return the first (Next)
/// or last (Previous) traversable item of the scope. Ties on order resolve
/// to the lower id.
pub trait OrderedLookup {
    fn first_lesson(
        &self,
        section_id: i64,
        after: Option<i32>,
        direction: Direction,
    ) -> Result<Option<Position>>;

    fn first_section(
        &self,
        course_id: i64,
        after: Option<i32>,
        direction: Direction,
    ) -> Result<Option<Position>>;

    /// Course id and order of a section, regardless of its status.
    fn section_position(&self, section_id: i64) -> Result<Option<Position>>;
}

/// Resolve the traversable lesson adjacent to `lesson` in `direction`.
///
/// `lesson.scope_id` is the lesson's section. Returns `Ok(None)` at a course
/// boundary, when the adjacent section is empty, or when the lesson's
/// section no longer exists. Store errors propagate.
pub fn find_adjacent_lesson<S>(
    store: &S,
    lesson: Position,
    direction: Direction,
) -> Result<Option<Position>>
where
    S: OrderedLookup + ?Sized,
{
    if let Some(found) = store.first_lesson(lesson.scope_id, Some(lesson.order), direction)? {
        return Ok(Some(found));
    }

    let Some(section) = store.section_position(lesson.scope_id)? else {
        return Ok(None);
    };

    let Some(adjacent) = store.first_section(section.scope_id, Some(section.order), direction)?
    else {
        return Ok(None);
    };

    store.first_lesson(adjacent.id, None, direction)
}

pub fn find_next_lesson<S>(store: &S, lesson: Position) -> Result<Option<Position>>
where
    S: OrderedLookup + ?Sized,
{
    find_adjacent_lesson(store, lesson, Direction::Next)
}

pub fn find_previous_lesson<S>(store: &S, lesson: Position) -> Result<Option<Position>>
where
    S: OrderedLookup + ?Sized,
{
    find_adjacent_lesson(store, lesson, Direction::Previous)
}

#[cfg(test)]
pub(crate) mod memory {
    //! Slice-backed [`OrderedLookup`] used to exercise the navigator without
    //! a database.

    use super::*;

    #[derive(Debug, Clone, Copy)]
    pub struct Item {
        pub pos: Position,
        pub traversable: bool,
    }

    #[derive(Debug, Default)]
    pub struct MemoryContent {
        pub sections: Vec<Item>,
        pub lessons: Vec<Item>,
    }

    impl MemoryContent {
        pub fn section(&mut self, id: i64, course_id: i64, order: i32, traversable: bool) {
            self.sections.push(Item {
                pos: Position { id, scope_id: course_id, order },
                traversable,
            });
        }

        pub fn lesson(&mut self, id: i64, section_id: i64, order: i32, traversable: bool) {
            self.lessons.push(Item {
                pos: Position { id, scope_id: section_id, order },
                traversable,
            });
        }

        pub fn lesson_pos(&self, id: i64) -> Position {
            self.lessons
                .iter()
                .find(|i| i.pos.id == id)
                .map(|i| i.pos)
                .unwrap()
        }
    }

    fn nearest(
        items: &[Item],
        scope_id: i64,
        after: Option<i32>,
        direction: Direction,
    ) -> Option<Position> {
        let candidates = items.iter().filter(|i| {
            i.traversable
                && i.pos.scope_id == scope_id
                && match (after, direction) {
                    (None, _) => true,
                    (Some(a), Direction::Next) => i.pos.order > a,
                    (Some(a), Direction::Previous) => i.pos.order < a,
                }
        });
        match direction {
            Direction::Next => candidates.min_by_key(|i| (i.pos.order, i.pos.id)),
            Direction::Previous => {
                candidates.min_by_key(|i| (std::cmp::Reverse(i.pos.order), i.pos.id))
            }
        }
        .map(|i| i.pos)
    }

    impl OrderedLookup for MemoryContent {
        fn first_lesson(
            &self,
            section_id: i64,
            after: Option<i32>,
            direction: Direction,
        ) -> Result<Option<Position>> {
            Ok(nearest(&self.lessons, section_id, after, direction))
        }

        fn first_section(
            &self,
            course_id: i64,
            after: Option<i32>,
            direction: Direction,
        ) -> Result<Option<Position>> {
            Ok(nearest(&self.sections, course_id, after, direction))
        }

        fn section_position(&self, section_id: i64) -> Result<Option<Position>> {
            Ok(self
                .sections
                .iter()
                .find(|i| i.pos.id == section_id)
                .map(|i| i.pos))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryContent;
    use super::*;
    use proptest::prelude::*;

    /// Section A (order 0): L1 public, L2 private. Section B (order 1): L3.
    fn two_sections() -> MemoryContent {
        let mut c = MemoryContent::default();
        c.section(10, 1, 0, true);
        c.section(20, 1, 1, true);
        c.lesson(1, 10, 0, true);
        c.lesson(2, 10, 1, true);
        c.lesson(3, 20, 0, true);
        c
    }

    fn next_id(c: &MemoryContent, id: i64) -> Option<i64> {
        find_next_lesson(c, c.lesson_pos(id)).unwrap().map(|p| p.id)
    }

    fn prev_id(c: &MemoryContent, id: i64) -> Option<i64> {
        find_previous_lesson(c, c.lesson_pos(id)).unwrap().map(|p| p.id)
    }

    #[test]
    fn test_next_within_section() {
        let c = two_sections();
        assert_eq!(next_id(&c, 1), Some(2));
    }

    #[test]
    fn test_next_crosses_section_boundary() {
        let c = two_sections();
        assert_eq!(next_id(&c, 2), Some(3));
    }

    #[test]
    fn test_previous_crosses_section_boundary_to_last_lesson() {
        let c = two_sections();
        assert_eq!(prev_id(&c, 3), Some(2));
    }

    #[test]
    fn test_course_boundaries_return_none() {
        let c = two_sections();
        assert_eq!(prev_id(&c, 1), None);
        assert_eq!(next_id(&c, 3), None);
    }

    #[test]
    fn test_picks_immediate_neighbor_not_any_greater() {
        let mut c = MemoryContent::default();
        c.section(10, 1, 0, true);
        c.lesson(1, 10, 0, true);
        c.lesson(2, 10, 7, true);
        c.lesson(3, 10, 3, true);
        assert_eq!(next_id(&c, 1), Some(3));
        assert_eq!(prev_id(&c, 2), Some(3));
    }

    #[test]
    fn test_skips_non_traversable_lessons_in_section() {
        let mut c = MemoryContent::default();
        c.section(10, 1, 0, true);
        c.lesson(1, 10, 0, true);
        c.lesson(2, 10, 1, false);
        c.lesson(3, 10, 2, true);
        assert_eq!(next_id(&c, 1), Some(3));
        assert_eq!(prev_id(&c, 3), Some(1));
    }

    #[test]
    fn test_empty_adjacent_section_stops_navigation() {
        let mut c = MemoryContent::default();
        c.section(10, 1, 0, true);
        c.section(20, 1, 1, true);
        c.section(30, 1, 2, true);
        c.lesson(1, 10, 0, true);
        c.lesson(3, 30, 0, true);
        assert_eq!(next_id(&c, 1), None);
        assert_eq!(prev_id(&c, 3), None);
    }

    #[test]
    fn test_adjacent_section_with_only_hidden_lessons_stops_navigation() {
        let mut c = MemoryContent::default();
        c.section(10, 1, 0, true);
        c.section(20, 1, 1, true);
        c.section(30, 1, 2, true);
        c.lesson(1, 10, 0, true);
        c.lesson(2, 20, 0, false);
        c.lesson(3, 30, 0, true);
        assert_eq!(next_id(&c, 1), None);
    }

    #[test]
    fn test_non_traversable_section_is_skipped_as_neighbor() {
        let mut c = MemoryContent::default();
        c.section(10, 1, 0, true);
        c.section(20, 1, 1, false);
        c.section(30, 1, 2, true);
        c.lesson(1, 10, 0, true);
        c.lesson(2, 20, 0, true);
        c.lesson(3, 30, 0, true);
        assert_eq!(next_id(&c, 1), Some(3));
    }

    #[test]
    fn test_sections_of_other_courses_are_ignored() {
        let mut c = MemoryContent::default();
        c.section(10, 1, 0, true);
        c.section(20, 2, 1, true);
        c.lesson(1, 10, 0, true);
        c.lesson(2, 20, 0, true);
        assert_eq!(next_id(&c, 1), None);
    }

    #[test]
    fn test_single_section_course() {
        let mut c = MemoryContent::default();
        c.section(10, 1, 0, true);
        c.lesson(1, 10, 0, true);
        assert_eq!(next_id(&c, 1), None);
        assert_eq!(prev_id(&c, 1), None);
    }

    #[test]
    fn test_missing_section_degrades_to_none() {
        let mut c = MemoryContent::default();
        c.lesson(1, 99, 0, true);
        assert_eq!(next_id(&c, 1), None);
        assert_eq!(prev_id(&c, 1), None);
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::Next.reverse(), Direction::Previous);
        assert_eq!(Direction::Previous.reverse(), Direction::Next);
    }

    /// Builds a course from per-section lesson counts with distinct orders.
    /// A section with zero lessons is omitted so every hop lands on a lesson.
    fn course_from_counts(counts: &[usize]) -> (MemoryContent, Vec<i64>) {
        let mut c = MemoryContent::default();
        let mut ids = Vec::new();
        let mut next_lesson = 1;
        let mut order = 0;
        for (s_idx, count) in counts.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            let section_id = 1000 + s_idx as i64;
            c.section(section_id, 1, order, true);
            order += 1;
            for l in 0..*count {
                c.lesson(next_lesson, section_id, (l as i32) * 2, true);
                ids.push(next_lesson);
                next_lesson += 1;
            }
        }
        (c, ids)
    }

    proptest! {
        #[test]
        fn prop_next_then_previous_round_trips(counts in prop::collection::vec(0usize..5, 1..6)) {
            let (c, ids) = course_from_counts(&counts);
            for id in &ids {
                let pos = c.lesson_pos(*id);
                if let Some(next) = find_next_lesson(&c, pos).unwrap() {
                    let back = find_previous_lesson(&c, next).unwrap();
                    prop_assert_eq!(back.map(|p| p.id), Some(*id));
                }
            }
        }

        #[test]
        fn prop_walking_forward_visits_every_lesson_in_order(counts in prop::collection::vec(0usize..5, 1..6)) {
            let (c, ids) = course_from_counts(&counts);
            if let Some(first) = ids.first() {
                let mut visited = vec![*first];
                let mut cur = c.lesson_pos(*first);
                while let Some(next) = find_next_lesson(&c, cur).unwrap() {
                    visited.push(next.id);
                    cur = next;
                }
                prop_assert_eq!(visited, ids);
            }
        }
    }
}
