//! Drag-and-drop reordering of sections within a course and lessons within
//! a section.
//!
//! The caller sends the full id sequence it wants; each listed item's order
//! becomes its 0-based index. The sequence must name known items of exactly
//! one scope without repeats. A strict subset of the scope is applied but
//! logged, since unlisted items keep their old orders and may now collide.

use anyhow::Result;
use std::collections::HashSet;
use tracing::{info, warn};

use super::actions::{ActionResult, Checked, guarded, rejected};
use super::api::AppState;
use super::auth::CurrentUser;
use super::cache::{CacheTag, Entity};
use super::permissions::Capability;
use super::ws::{WsMessage, broadcast_message};
use crate::errors::CourseError;

/// Validated order rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderPlan {
    pub orders: Vec<(i64, i32)>,
    /// True when the sequence covers only part of the scope.
    pub partial: bool,
}

/// Check `ids` against their resolved scopes and build the rewrite.
///
/// `scopes[i]` is the parent of `ids[i]` (`None` when unknown) and
/// `scope_size` the number of items currently in `expected_scope`.
pub fn plan_reorder(
    ids: &[i64],
    scopes: &[Option<i64>],
    expected_scope: i64,
    scope_size: usize,
) -> Checked<ReorderPlan> {
    if ids.is_empty() {
        return Err(CourseError::Validation("order list is empty".into()));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for (&id, scope) in ids.iter().zip(scopes) {
        if !seen.insert(id) {
            return Err(CourseError::Validation(format!("id {} is listed twice", id)));
        }
        match scope {
            None => return Err(CourseError::Validation(format!("unknown id {}", id))),
            Some(s) if *s != expected_scope => {
                return Err(CourseError::Validation(format!(
                    "id {} belongs to scope {}, not {}",
                    id, s, expected_scope
                )));
            }
            Some(_) => {}
        }
    }
    let orders = ids
        .iter()
        .enumerate()
        .map(|(index, &id)| Ok((id, order_at(index)?)))
        .collect::<Checked<Vec<_>>>()?;
    Ok(ReorderPlan {
        orders,
        partial: ids.len() < scope_size,
    })
}

/// Stored order for list position `index`.
fn order_at(index: usize) -> Checked<i32> {
    i32::try_from(index)
        .map_err(|_| CourseError::Validation(format!("order list too long at index {}", index)))
}

fn id_tags(entity: Entity, ids: &[i64]) -> Vec<CacheTag> {
    ids.iter().map(|&id| CacheTag::id(entity, id)).collect()
}

pub async fn reorder_sections(
    state: &AppState,
    user: &CurrentUser,
    course_id: i64,
    section_ids: Vec<i64>,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error reordering your sections";
    let ids = section_ids.clone();
    let outcome = guarded(state, user, Capability::ManageSections, move |db| {
        let scopes = db.section_courses(&ids)?;
        let scope_size = db.list_sections(course_id)?.len();
        let plan = match plan_reorder(&ids, &scopes, course_id, scope_size) {
            Ok(plan) => plan,
            Err(e) => return Ok(Err(e)),
        };
        db.rewrite_section_orders(&plan.orders)?;
        Ok(Ok(plan))
    })
    .await?;
    let plan = match outcome {
        Ok(plan) => plan,
        Err(e) => return Ok(rejected("reorder_sections", &e, FAILED)),
    };

    if plan.partial {
        warn!(course_id, listed = section_ids.len(), "partial section reorder applied");
    }
    let mut tags = vec![
        CacheTag::global(Entity::CourseSections),
        CacheTag::course(Entity::CourseSections, course_id),
    ];
    tags.extend(id_tags(Entity::CourseSections, &section_ids));
    state.cache.revalidate(&tags);

    info!(course_id, sections = section_ids.len(), "sections reordered");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::SectionsReordered {
            course_id,
            section_ids,
        },
    );
    Ok(ActionResult::ok("Successfully reordered your sections"))
}

pub async fn reorder_lessons(
    state: &AppState,
    user: &CurrentUser,
    section_id: i64,
    lesson_ids: Vec<i64>,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error reordering your lessons";
    let ids = lesson_ids.clone();
    let outcome = guarded(state, user, Capability::ManageLessons, move |db| {
        let scopes = db.lesson_sections(&ids)?;
        let scope_size = db.list_lessons(section_id)?.len();
        let plan = match plan_reorder(&ids, &scopes, section_id, scope_size) {
            Ok(plan) => plan,
            Err(e) => return Ok(Err(e)),
        };
        db.rewrite_lesson_orders(&plan.orders)?;
        Ok(Ok(plan))
    })
    .await?;
    let plan = match outcome {
        Ok(plan) => plan,
        Err(e) => return Ok(rejected("reorder_lessons", &e, FAILED)),
    };

    if plan.partial {
        warn!(section_id, listed = lesson_ids.len(), "partial lesson reorder applied");
    }
    let mut tags = vec![
        CacheTag::global(Entity::Lessons),
        CacheTag::section(Entity::Lessons, section_id),
    ];
    tags.extend(id_tags(Entity::Lessons, &lesson_ids));
    state.cache.revalidate(&tags);

    info!(section_id, lessons = lesson_ids.len(), "lessons reordered");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::LessonsReordered {
            section_id,
            lesson_ids,
        },
    );
    Ok(ActionResult::ok("Successfully reordered your lessons"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::academy::api::test_state;
    use crate::academy::db::fixtures::*;
    use crate::academy::models::{LessonStatus, SectionStatus};
    use crate::academy::navigator::{Position, find_next_lesson};

    #[test]
    fn test_plan_assigns_indexes() {
        let plan = plan_reorder(&[7, 3, 5], &[Some(1), Some(1), Some(1)], 1, 3).unwrap();
        assert_eq!(plan.orders, vec![(7, 0), (3, 1), (5, 2)]);
        assert!(!plan.partial);
    }

    #[test]
    fn test_plan_rejects_bad_sequences() {
        assert!(plan_reorder(&[], &[], 1, 0).is_err());
        assert!(plan_reorder(&[1, 1], &[Some(1), Some(1)], 1, 2).is_err());
        assert!(plan_reorder(&[1, 2], &[Some(1), None], 1, 2).is_err());
        assert!(plan_reorder(&[1, 2], &[Some(1), Some(2)], 1, 2).is_err());
        assert!(plan_reorder(&[1], &[Some(2)], 1, 1).is_err());
    }

    #[test]
    fn test_order_at_rejects_index_past_i32() {
        assert_eq!(order_at(0).unwrap(), 0);
        assert_eq!(order_at(i32::MAX as usize).unwrap(), i32::MAX);
        let err = order_at(i32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, CourseError::Validation(_)));
    }

    #[test]
    fn test_plan_flags_partial_subset() {
        let plan = plan_reorder(&[4], &[Some(1)], 1, 3).unwrap();
        assert!(plan.partial);
        assert_eq!(plan.orders, vec![(4, 0)]);
    }

    #[tokio::test]
    async fn test_reorder_sections_changes_navigation() {
        let state = test_state();
        let sc = {
            let db = state.db.lock_sync().unwrap();
            scenario(&db)
        };
        let result = reorder_sections(
            &state,
            &CurrentUser::admin("a"),
            sc.course.id,
            vec![sc.b.id, sc.a.id],
        )
        .await
        .unwrap();
        assert!(!result.error);

        let db = state.db.lock_sync().unwrap();
        let orders: Vec<(i64, i32)> = db
            .list_sections(sc.course.id)
            .unwrap()
            .iter()
            .map(|s| (s.id, s.order))
            .collect();
        assert_eq!(orders, vec![(sc.b.id, 0), (sc.a.id, 1)]);
        let next = find_next_lesson(&*db, Position::from(&sc.l3)).unwrap();
        assert_eq!(next.map(|p| p.id), Some(sc.l1.id));
    }

    #[tokio::test]
    async fn test_reorder_by_non_admin_leaves_orders_unchanged() {
        let state = test_state();
        let sc = {
            let db = state.db.lock_sync().unwrap();
            scenario(&db)
        };
        let result = reorder_sections(
            &state,
            &CurrentUser::user("u"),
            sc.course.id,
            vec![sc.b.id, sc.a.id],
        )
        .await
        .unwrap();
        assert!(result.error);

        let db = state.db.lock_sync().unwrap();
        let a = db.get_section(sc.a.id).unwrap().unwrap();
        let b = db.get_section(sc.b.id).unwrap().unwrap();
        assert_eq!((a.order, b.order), (0, 1));
    }

    #[tokio::test]
    async fn test_reorder_is_idempotent() {
        let state = test_state();
        let (section_id, ids) = {
            let db = state.db.lock_sync().unwrap();
            let c = course(&db, "C");
            let s = section(&db, c.id, "s", SectionStatus::Public);
            let ids: Vec<i64> = (0..4)
                .map(|i| lesson(&db, s.id, &format!("l{}", i), LessonStatus::Public).id)
                .collect();
            (s.id, ids)
        };
        let permuted = vec![ids[2], ids[0], ids[3], ids[1]];
        for _ in 0..2 {
            let result = reorder_lessons(&state, &CurrentUser::admin("a"), section_id, permuted.clone())
                .await
                .unwrap();
            assert!(!result.error);
        }
        let db = state.db.lock_sync().unwrap();
        let listed: Vec<i64> = db.list_lessons(section_id).unwrap().iter().map(|l| l.id).collect();
        assert_eq!(listed, permuted);
    }

    #[tokio::test]
    async fn test_partial_reorder_renumbers_only_listed_items() {
        let state = test_state();
        let (section_id, ids) = {
            let db = state.db.lock_sync().unwrap();
            let c = course(&db, "C");
            let s = section(&db, c.id, "s", SectionStatus::Public);
            let ids: Vec<i64> = (0..3)
                .map(|i| lesson(&db, s.id, &format!("l{}", i), LessonStatus::Public).id)
                .collect();
            (s.id, ids)
        };
        let result = reorder_lessons(&state, &CurrentUser::admin("a"), section_id, vec![ids[2]])
            .await
            .unwrap();
        assert!(!result.error);

        let db = state.db.lock_sync().unwrap();
        let orders: Vec<i32> = ids
            .iter()
            .map(|&id| db.get_lesson(id).unwrap().unwrap().order)
            .collect();
        // l0 keeps 0 and now shares it with l2.
        assert_eq!(orders, vec![0, 1, 0]);
    }

    #[tokio::test]
    async fn test_reorder_rejects_ids_from_another_section() {
        let state = test_state();
        let sc = {
            let db = state.db.lock_sync().unwrap();
            scenario(&db)
        };
        let result = reorder_lessons(
            &state,
            &CurrentUser::admin("a"),
            sc.a.id,
            vec![sc.l2.id, sc.l3.id],
        )
        .await
        .unwrap();
        assert!(result.error);
        let db = state.db.lock_sync().unwrap();
        assert_eq!(db.get_lesson(sc.l2.id).unwrap().unwrap().order, 1);
    }

    #[tokio::test]
    async fn test_reorder_broadcasts_event() {
        let state = test_state();
        let sc = {
            let db = state.db.lock_sync().unwrap();
            scenario(&db)
        };
        let mut rx = state.ws_tx.subscribe();
        reorder_lessons(&state, &CurrentUser::admin("a"), sc.a.id, vec![sc.l2.id, sc.l1.id])
            .await
            .unwrap();
        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "LessonsReordered");
        assert_eq!(msg["data"]["lesson_ids"], serde_json::json!([sc.l2.id, sc.l1.id]));
    }
}
