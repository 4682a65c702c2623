//! Mutating actions.
//!
//! Each action checks permission and input inside one store call, performs
//! its write, then revalidates the cache tags it touched and broadcasts a
//! [`WsMessage`]. Permission and validation failures collapse into the same
//! [`ActionResult`] failure so callers cannot tell which check rejected them;
//! the actual reason is logged.

use anyhow::Result;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::api::AppState;
use super::auth::{CurrentUser, webhook_authorized};
use super::cache::{
    CacheTag, Entity, revalidate_course, revalidate_lesson, revalidate_lesson_complete,
    revalidate_product, revalidate_purchase, revalidate_section, revalidate_user_course_access,
};
use super::db::CourseDb;
use super::models::*;
use super::permissions::{Capability, PermissionOracle};
use super::ws::{WsMessage, broadcast_message};
use crate::errors::CourseError;

/// Caller-facing outcome of a mutating action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub error: bool,
    pub message: String,
    /// Id of the created or affected row, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            error: false,
            message: message.into(),
            id: None,
        }
    }

    pub fn ok_with_id(message: impl Into<String>, id: i64) -> Self {
        Self {
            error: false,
            message: message.into(),
            id: Some(id),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            id: None,
        }
    }
}

impl IntoResponse for ActionResult {
    fn into_response(self) -> Response {
        let status = if self.error {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::OK
        };
        (status, Json(self)).into_response()
    }
}

/// Result of the checks an action runs before writing.
pub(crate) type Checked<T> = std::result::Result<T, CourseError>;

/// Run `f` on the store after checking `capability` for `user`.
pub(crate) async fn guarded<T, F>(
    state: &AppState,
    user: &CurrentUser,
    capability: Capability,
    f: F,
) -> Result<Checked<T>>
where
    F: FnOnce(&CourseDb) -> Result<Checked<T>> + Send + 'static,
    T: Send + 'static,
{
    let user = user.clone();
    state
        .db
        .call(move |db| {
            if !db.can(&user, capability) {
                return Ok(Err(CourseError::PermissionDenied));
            }
            f(db)
        })
        .await
}

pub(crate) fn rejected(action: &str, reason: &CourseError, message: &str) -> ActionResult {
    warn!(action, %reason, "action rejected");
    ActionResult::fail(message)
}

fn require_text(field: &str, value: &str) -> Checked<()> {
    if value.trim().is_empty() {
        return Err(CourseError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn validate_course(input: &CourseInput) -> Checked<()> {
    require_text("name", &input.name)?;
    require_text("description", &input.description)
}

fn validate_section(input: &SectionInput) -> Checked<()> {
    require_text("name", &input.name)
}

fn validate_lesson(input: &LessonInput) -> Checked<()> {
    require_text("name", &input.name)?;
    require_text("youtube_video_id", &input.youtube_video_id)
}

fn validate_product(input: &ProductInput) -> Checked<()> {
    require_text("name", &input.name)?;
    require_text("description", &input.description)?;
    require_text("image_url", &input.image_url)?;
    if input.price_in_dollars < 0 {
        return Err(CourseError::Validation(
            "price_in_dollars must not be negative".into(),
        ));
    }
    if input.course_ids.is_empty() {
        return Err(CourseError::Validation(
            "a product needs at least one course".into(),
        ));
    }
    Ok(())
}

fn validate_purchase(input: &PurchaseInput) -> Checked<()> {
    require_text("user_id", &input.user_id)?;
    require_text("stripe_session_id", &input.stripe_session_id)?;
    if input.price_paid_in_cents < 0 {
        return Err(CourseError::Validation(
            "price_paid_in_cents must not be negative".into(),
        ));
    }
    Ok(())
}

fn ensure_courses_exist(db: &CourseDb, course_ids: &[i64]) -> Result<Checked<()>> {
    for &id in course_ids {
        if db.get_course(id)?.is_none() {
            return Ok(Err(CourseError::CourseNotFound { id }));
        }
    }
    Ok(Ok(()))
}

// ── Courses ───────────────────────────────────────────────────────────

pub async fn create_course(
    state: &AppState,
    user: &CurrentUser,
    input: CourseInput,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error creating your course";
    let outcome = guarded(state, user, Capability::ManageCourses, move |db| {
        if let Err(e) = validate_course(&input) {
            return Ok(Err(e));
        }
        Ok(Ok(db.create_course(&input)?))
    })
    .await?;
    let course = match outcome {
        Ok(course) => course,
        Err(e) => return Ok(rejected("create_course", &e, FAILED)),
    };

    revalidate_course(&state.cache, course.id);
    info!(course_id = course.id, "course created");
    broadcast_message(&state.ws_tx, &WsMessage::CourseCreated { course: course.clone() });
    Ok(ActionResult::ok_with_id("Successfully created your course", course.id))
}

pub async fn update_course(
    state: &AppState,
    user: &CurrentUser,
    id: i64,
    input: CourseInput,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error updating your course";
    let outcome = guarded(state, user, Capability::ManageCourses, move |db| {
        if let Err(e) = validate_course(&input) {
            return Ok(Err(e));
        }
        Ok(db
            .update_course(id, &input)?
            .ok_or(CourseError::CourseNotFound { id }))
    })
    .await?;
    let course = match outcome {
        Ok(course) => course,
        Err(e) => return Ok(rejected("update_course", &e, FAILED)),
    };

    revalidate_course(&state.cache, course.id);
    info!(course_id = course.id, "course updated");
    broadcast_message(&state.ws_tx, &WsMessage::CourseUpdated { course: course.clone() });
    Ok(ActionResult::ok_with_id("Successfully updated your course", course.id))
}

pub async fn delete_course(state: &AppState, user: &CurrentUser, id: i64) -> Result<ActionResult> {
    const FAILED: &str = "There was an error deleting your course";
    let outcome = guarded(state, user, Capability::ManageCourses, move |db| {
        Ok(if db.delete_course(id)? {
            Ok(())
        } else {
            Err(CourseError::CourseNotFound { id })
        })
    })
    .await?;
    if let Err(e) = outcome {
        return Ok(rejected("delete_course", &e, FAILED));
    }

    // Sections, lessons, product links and grants cascade with the course.
    revalidate_course(&state.cache, id);
    state.cache.revalidate(&[
        CacheTag::global(Entity::CourseSections),
        CacheTag::global(Entity::Lessons),
        CacheTag::global(Entity::Products),
        CacheTag::global(Entity::UserCourseAccess),
    ]);
    info!(course_id = id, "course deleted");
    broadcast_message(&state.ws_tx, &WsMessage::CourseDeleted { course_id: id });
    Ok(ActionResult::ok("Successfully deleted your course"))
}

// ── Sections ──────────────────────────────────────────────────────────

pub async fn create_section(
    state: &AppState,
    user: &CurrentUser,
    course_id: i64,
    input: SectionInput,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error creating your section";
    let outcome = guarded(state, user, Capability::ManageSections, move |db| {
        if let Err(e) = validate_section(&input) {
            return Ok(Err(e));
        }
        if db.get_course(course_id)?.is_none() {
            return Ok(Err(CourseError::CourseNotFound { id: course_id }));
        }
        Ok(Ok(db.create_section(course_id, &input)?))
    })
    .await?;
    let section = match outcome {
        Ok(section) => section,
        Err(e) => return Ok(rejected("create_section", &e, FAILED)),
    };

    revalidate_section(&state.cache, section.id, section.course_id);
    info!(section_id = section.id, course_id, order = section.order, "section created");
    broadcast_message(&state.ws_tx, &WsMessage::SectionCreated { section: section.clone() });
    Ok(ActionResult::ok_with_id("Successfully created your section", section.id))
}

pub async fn update_section(
    state: &AppState,
    user: &CurrentUser,
    id: i64,
    input: SectionInput,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error updating your section";
    let outcome = guarded(state, user, Capability::ManageSections, move |db| {
        if let Err(e) = validate_section(&input) {
            return Ok(Err(e));
        }
        Ok(db
            .update_section(id, &input)?
            .ok_or(CourseError::SectionNotFound { id }))
    })
    .await?;
    let section = match outcome {
        Ok(section) => section,
        Err(e) => return Ok(rejected("update_section", &e, FAILED)),
    };

    revalidate_section(&state.cache, section.id, section.course_id);
    info!(section_id = section.id, "section updated");
    broadcast_message(&state.ws_tx, &WsMessage::SectionUpdated { section: section.clone() });
    Ok(ActionResult::ok_with_id("Successfully updated your section", section.id))
}

pub async fn delete_section(state: &AppState, user: &CurrentUser, id: i64) -> Result<ActionResult> {
    const FAILED: &str = "There was an error deleting your section";
    let outcome = guarded(state, user, Capability::ManageSections, move |db| {
        Ok(db.delete_section(id)?.ok_or(CourseError::SectionNotFound { id }))
    })
    .await?;
    let section = match outcome {
        Ok(section) => section,
        Err(e) => return Ok(rejected("delete_section", &e, FAILED)),
    };

    revalidate_section(&state.cache, section.id, section.course_id);
    state.cache.revalidate(&[
        CacheTag::global(Entity::Lessons),
        CacheTag::section(Entity::Lessons, section.id),
    ]);
    info!(section_id = id, course_id = section.course_id, "section deleted");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::SectionDeleted {
            section_id: id,
            course_id: section.course_id,
        },
    );
    Ok(ActionResult::ok("Successfully deleted your section"))
}

// ── Lessons ───────────────────────────────────────────────────────────

pub async fn create_lesson(
    state: &AppState,
    user: &CurrentUser,
    input: LessonInput,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error creating your lesson";
    let outcome = guarded(state, user, Capability::ManageLessons, move |db| {
        if let Err(e) = validate_lesson(&input) {
            return Ok(Err(e));
        }
        if db.get_section(input.section_id)?.is_none() {
            return Ok(Err(CourseError::SectionNotFound {
                id: input.section_id,
            }));
        }
        Ok(Ok(db.create_lesson(&input)?))
    })
    .await?;
    let lesson = match outcome {
        Ok(lesson) => lesson,
        Err(e) => return Ok(rejected("create_lesson", &e, FAILED)),
    };

    revalidate_lesson(&state.cache, lesson.id, lesson.section_id);
    info!(lesson_id = lesson.id, section_id = lesson.section_id, order = lesson.order, "lesson created");
    broadcast_message(&state.ws_tx, &WsMessage::LessonCreated { lesson: lesson.clone() });
    Ok(ActionResult::ok_with_id("Successfully created your lesson", lesson.id))
}

pub async fn update_lesson(
    state: &AppState,
    user: &CurrentUser,
    id: i64,
    input: LessonInput,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error updating your lesson";
    let outcome = guarded(state, user, Capability::ManageLessons, move |db| {
        if let Err(e) = validate_lesson(&input) {
            return Ok(Err(e));
        }
        if db.get_section(input.section_id)?.is_none() {
            return Ok(Err(CourseError::SectionNotFound {
                id: input.section_id,
            }));
        }
        Ok(db
            .update_lesson(id, &input)?
            .ok_or(CourseError::LessonNotFound { id }))
    })
    .await?;
    let (lesson, previous_section_id) = match outcome {
        Ok(updated) => updated,
        Err(e) => return Ok(rejected("update_lesson", &e, FAILED)),
    };

    revalidate_lesson(&state.cache, lesson.id, lesson.section_id);
    if previous_section_id != lesson.section_id {
        revalidate_lesson(&state.cache, lesson.id, previous_section_id);
    }
    info!(lesson_id = lesson.id, section_id = lesson.section_id, "lesson updated");
    broadcast_message(&state.ws_tx, &WsMessage::LessonUpdated { lesson: lesson.clone() });
    Ok(ActionResult::ok_with_id("Successfully updated your lesson", lesson.id))
}

pub async fn delete_lesson(state: &AppState, user: &CurrentUser, id: i64) -> Result<ActionResult> {
    const FAILED: &str = "There was an error deleting your lesson";
    let outcome = guarded(state, user, Capability::ManageLessons, move |db| {
        Ok(db.delete_lesson(id)?.ok_or(CourseError::LessonNotFound { id }))
    })
    .await?;
    let lesson = match outcome {
        Ok(lesson) => lesson,
        Err(e) => return Ok(rejected("delete_lesson", &e, FAILED)),
    };

    revalidate_lesson(&state.cache, lesson.id, lesson.section_id);
    state
        .cache
        .revalidate(&[CacheTag::global(Entity::UserLessonComplete)]);
    info!(lesson_id = id, section_id = lesson.section_id, "lesson deleted");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::LessonDeleted {
            lesson_id: id,
            section_id: lesson.section_id,
        },
    );
    Ok(ActionResult::ok("Successfully deleted your lesson"))
}

// ── Completion ────────────────────────────────────────────────────────

pub async fn set_lesson_complete(
    state: &AppState,
    user: &CurrentUser,
    lesson_id: i64,
    complete: bool,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error updating your lesson completion";
    let caller = user.clone();
    let outcome = state
        .db
        .call(move |db| {
            let Some(user_id) = caller.user_id() else {
                return Ok(Err(CourseError::PermissionDenied));
            };
            if !db.can_update_completion(&caller, lesson_id)? {
                return Ok(Err(CourseError::PermissionDenied));
            }
            db.set_lesson_complete(user_id, lesson_id, complete)?;
            Ok(Ok(user_id.to_string()))
        })
        .await?;
    let user_id = match outcome {
        Ok(user_id) => user_id,
        Err(e) => return Ok(rejected("set_lesson_complete", &e, FAILED)),
    };

    revalidate_lesson_complete(&state.cache, &user_id, lesson_id);
    info!(lesson_id, user_id = %user_id, complete, "lesson completion updated");
    Ok(ActionResult::ok_with_id(
        "Successfully updated your lesson completion",
        lesson_id,
    ))
}

// ── Products ──────────────────────────────────────────────────────────

pub async fn create_product(
    state: &AppState,
    user: &CurrentUser,
    input: ProductInput,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error creating your product";
    let outcome = guarded(state, user, Capability::ManageProducts, move |db| {
        if let Err(e) = validate_product(&input) {
            return Ok(Err(e));
        }
        if let Err(e) = ensure_courses_exist(db, &input.course_ids)? {
            return Ok(Err(e));
        }
        Ok(Ok(db.create_product(&input)?))
    })
    .await?;
    let product = match outcome {
        Ok(product) => product,
        Err(e) => return Ok(rejected("create_product", &e, FAILED)),
    };

    revalidate_product(&state.cache, product.id);
    info!(product_id = product.id, "product created");
    broadcast_message(&state.ws_tx, &WsMessage::ProductCreated { product: product.clone() });
    Ok(ActionResult::ok_with_id("Successfully created your product", product.id))
}

pub async fn update_product(
    state: &AppState,
    user: &CurrentUser,
    id: i64,
    input: ProductInput,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error updating your product";
    let outcome = guarded(state, user, Capability::ManageProducts, move |db| {
        if let Err(e) = validate_product(&input) {
            return Ok(Err(e));
        }
        if let Err(e) = ensure_courses_exist(db, &input.course_ids)? {
            return Ok(Err(e));
        }
        Ok(db
            .update_product(id, &input)?
            .ok_or(CourseError::ProductNotFound { id }))
    })
    .await?;
    let product = match outcome {
        Ok(product) => product,
        Err(e) => return Ok(rejected("update_product", &e, FAILED)),
    };

    revalidate_product(&state.cache, product.id);
    info!(product_id = product.id, "product updated");
    broadcast_message(&state.ws_tx, &WsMessage::ProductUpdated { product: product.clone() });
    Ok(ActionResult::ok_with_id("Successfully updated your product", product.id))
}

pub async fn delete_product(state: &AppState, user: &CurrentUser, id: i64) -> Result<ActionResult> {
    const FAILED: &str = "There was an error deleting your product";
    let outcome = guarded(state, user, Capability::ManageProducts, move |db| {
        Ok(if db.delete_product(id)? {
            Ok(())
        } else {
            Err(CourseError::ProductNotFound { id })
        })
    })
    .await?;
    if let Err(e) = outcome {
        return Ok(rejected("delete_product", &e, FAILED));
    }

    revalidate_product(&state.cache, id);
    info!(product_id = id, "product deleted");
    broadcast_message(&state.ws_tx, &WsMessage::ProductDeleted { product_id: id });
    Ok(ActionResult::ok("Successfully deleted your product"))
}

// ── Purchases ─────────────────────────────────────────────────────────

/// Record a completed checkout. Called by the payment provider integration.
/// Fulfill a completed checkout. `presented_secret` is the callback's
/// `x-webhook-secret` header and must match the configured secret.
pub async fn record_purchase(
    state: &AppState,
    presented_secret: Option<&str>,
    input: PurchaseInput,
) -> Result<ActionResult> {
    const FAILED: &str = "There was an error recording your purchase";
    if !webhook_authorized(state.webhook_secret.as_deref(), presented_secret) {
        return Ok(rejected("record_purchase", &CourseError::PermissionDenied, FAILED));
    }
    let product_id = input.product_id;
    let outcome = state
        .db
        .call(move |db| {
            if let Err(e) = validate_purchase(&input) {
                return Ok(Err(e));
            }
            Ok(db
                .record_purchase(&input)?
                .ok_or(CourseError::ProductNotFound { id: product_id }))
        })
        .await?;
    let (purchase, created) = match outcome {
        Ok(recorded) => recorded,
        Err(e) => return Ok(rejected("record_purchase", &e, FAILED)),
    };

    if !created {
        info!(purchase_id = purchase.id, session = %purchase.stripe_session_id, "purchase replay ignored");
        return Ok(ActionResult::ok_with_id("Purchase already recorded", purchase.id));
    }

    revalidate_purchase(&state.cache, purchase.id, &purchase.user_id);
    revalidate_user_course_access(&state.cache, &purchase.user_id);
    info!(purchase_id = purchase.id, user_id = %purchase.user_id, product_id, "purchase recorded");
    broadcast_message(&state.ws_tx, &WsMessage::PurchaseCreated { purchase: purchase.clone() });
    Ok(ActionResult::ok_with_id("Successfully recorded your purchase", purchase.id))
}

pub async fn refund_purchase(state: &AppState, user: &CurrentUser, id: i64) -> Result<ActionResult> {
    const FAILED: &str = "There was an error refunding this purchase";
    let outcome = guarded(state, user, Capability::ManagePurchases, move |db| {
        Ok(db
            .refund_purchase(id)?
            .ok_or(CourseError::PurchaseNotFound { id }))
    })
    .await?;
    let purchase = match outcome {
        Ok(purchase) => purchase,
        Err(e) => return Ok(rejected("refund_purchase", &e, FAILED)),
    };

    revalidate_purchase(&state.cache, purchase.id, &purchase.user_id);
    revalidate_user_course_access(&state.cache, &purchase.user_id);
    info!(purchase_id = id, user_id = %purchase.user_id, "purchase refunded");
    broadcast_message(&state.ws_tx, &WsMessage::PurchaseRefunded { purchase: purchase.clone() });
    Ok(ActionResult::ok_with_id("Successfully refunded this purchase", id))
}
