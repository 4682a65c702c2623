use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::error;

use super::actions::{self, ActionResult, guarded};
use super::auth::{CurrentUser, WEBHOOK_SECRET_HEADER};
use super::cache::{CacheTag, DataCache, Entity};
use super::db::{CourseDb, DbHandle};
use super::models::*;
use super::navigator::{Position, find_next_lesson, find_previous_lesson};
use super::permissions::{Capability, PermissionOracle};
use super::reorder;
use crate::errors::CourseError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub cache: DataCache,
    pub ws_tx: broadcast::Sender<String>,
    /// Shared secret for the checkout fulfillment callback.
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(db: CourseDb, cache: DataCache) -> Self {
        let (ws_tx, _rx) = broadcast::channel::<String>(256);
        Self {
            db: DbHandle::new(db),
            cache,
            ws_tx,
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret;
        self
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct CompletionRequest {
    pub complete: bool,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<CourseError> for ApiError {
    fn from(err: CourseError) -> Self {
        match err {
            e if e.is_not_found() => ApiError::NotFound(e.to_string()),
            CourseError::PermissionDenied => ApiError::Forbidden("Permission denied".into()),
            CourseError::Validation(msg) => ApiError::BadRequest(msg),
            e => internal(e.into()),
        }
    }
}

fn internal(e: anyhow::Error) -> ApiError {
    error!(error = %e, "store failure");
    ApiError::Internal(e.to_string())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/products", get(list_public_products))
        .route("/api/products/{id}", get(get_public_product))
        .route("/api/courses", get(list_user_courses))
        .route("/api/courses/{id}", get(get_course_outline))
        .route(
            "/api/courses/{id}/lessons/{lesson_id}",
            get(get_lesson_page),
        )
        .route("/api/lessons/{id}/complete", post(set_lesson_complete))
        .route("/api/purchases", get(list_my_purchases).post(record_purchase))
        .route(
            "/api/admin/products",
            get(list_admin_products).post(create_product),
        )
        .route(
            "/api/admin/products/{id}",
            put(update_product).delete(delete_product),
        )
        .route(
            "/api/admin/courses",
            get(list_admin_courses).post(create_course),
        )
        .route(
            "/api/admin/courses/{id}",
            put(update_course).delete(delete_course),
        )
        .route("/api/admin/courses/{id}/sections", post(create_section))
        .route(
            "/api/admin/courses/{id}/sections/order",
            post(reorder_sections),
        )
        .route(
            "/api/admin/sections/{id}",
            put(update_section).delete(delete_section),
        )
        .route(
            "/api/admin/sections/{id}/lessons/order",
            post(reorder_lessons),
        )
        .route("/api/admin/lessons", post(create_lesson))
        .route(
            "/api/admin/lessons/{id}",
            put(update_lesson).delete(delete_lesson),
        )
        .route("/api/admin/sales", get(list_sales))
        .route("/api/admin/purchases/{id}/refund", post(refund_purchase))
        .route("/api/admin/dashboard", get(get_dashboard))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Serve `load` through the tag cache under `key`.
async fn cached<T, F>(
    state: &SharedState,
    key: String,
    tags: Vec<CacheTag>,
    load: F,
) -> Result<T, ApiError>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce(&CourseDb) -> anyhow::Result<T> + Send + 'static,
{
    state
        .cache
        .get_or_load(&key, tags, || state.db.call(load))
        .await
        .map_err(internal)
}

pub(crate) async fn require(state: &SharedState, user: &CurrentUser, capability: Capability) -> Result<(), ApiError> {
    guarded(state, user, capability, |_| Ok(Ok(())))
        .await
        .map_err(internal)?
        .map_err(ApiError::from)
}

fn signed_in(user: &CurrentUser) -> Result<String, ApiError> {
    user.user_id()
        .map(str::to_string)
        .ok_or_else(|| ApiError::Forbidden("Sign in required".into()))
}

/// Assemble the lesson page for `user`. `None` unless the lesson is
/// traversable and belongs to `course_id` through a traversable section.
pub fn build_lesson_page(
    db: &CourseDb,
    user: &CurrentUser,
    course_id: i64,
    lesson_id: i64,
) -> anyhow::Result<Option<LessonPage>> {
    let Some(lesson) = db.get_lesson(lesson_id)? else {
        return Ok(None);
    };
    if !lesson.status.is_traversable() {
        return Ok(None);
    }
    let Some(section) = db.get_section(lesson.section_id)? else {
        return Ok(None);
    };
    if section.course_id != course_id || !section.status.is_traversable() {
        return Ok(None);
    }

    let can_view = db.can_view_lesson(user, &lesson)?;
    let is_complete = match user.user_id() {
        Some(uid) => db.is_lesson_complete(uid, lesson.id)?,
        None => false,
    };
    let can_update_completion = db.can_update_completion(user, lesson.id)?;
    let position = Position::from(&lesson);
    let previous_lesson_id = find_previous_lesson(db, position)?.map(|p| p.id);
    let next_lesson_id = find_next_lesson(db, position)?.map(|p| p.id);

    Ok(Some(LessonPage {
        id: lesson.id,
        course_id,
        section_id: lesson.section_id,
        name: lesson.name,
        status: lesson.status,
        order: lesson.order,
        youtube_video_id: can_view.then_some(lesson.youtube_video_id),
        description: if can_view { lesson.description } else { None },
        can_view,
        is_complete,
        can_update_completion,
        previous_lesson_id,
        next_lesson_id,
    }))
}

fn user_tags(user_id: &str) -> Vec<CacheTag> {
    vec![
        CacheTag::user(Entity::UserCourseAccess, user_id),
        CacheTag::user(Entity::UserLessonComplete, user_id),
    ]
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_public_products(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let products: Vec<Product> = cached(
        &state,
        "products:public".into(),
        vec![CacheTag::global(Entity::Products)],
        |db| db.list_public_products(),
    )
    .await?;
    Ok(Json(products))
}

async fn get_public_product(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let product: Option<Product> = cached(
        &state,
        format!("products:public:{}", id),
        vec![
            CacheTag::global(Entity::Products),
            CacheTag::id(Entity::Products, id),
        ],
        move |db| db.get_public_product(id),
    )
    .await?;
    let Some(product) = product else {
        return Err(CourseError::ProductNotFound { id }.into());
    };
    let owned = match user.id {
        Some(user_id) => {
            let tags = vec![CacheTag::user(Entity::Purchases, &user_id)];
            let key = format!("product_owned:{}:{}", id, user_id);
            cached(&state, key, tags, move |db| db.user_owns_product(&user_id, id)).await?
        }
        None => false,
    };
    Ok(Json(ProductPage { product, owned }))
}

async fn list_user_courses(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = signed_in(&user)?;
    let mut tags = user_tags(&user_id);
    tags.extend([
        CacheTag::global(Entity::Courses),
        CacheTag::global(Entity::CourseSections),
        CacheTag::global(Entity::Lessons),
    ]);
    let key = format!("user_courses:{}", user_id);
    let courses: Vec<UserCourseSummary> =
        cached(&state, key, tags, move |db| db.list_user_courses(&user_id)).await?;
    Ok(Json(courses))
}

async fn get_course_outline(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id.clone();
    let mut tags = vec![
        CacheTag::id(Entity::Courses, id),
        CacheTag::course(Entity::CourseSections, id),
        CacheTag::global(Entity::CourseSections),
        CacheTag::global(Entity::Lessons),
    ];
    if let Some(uid) = &user_id {
        tags.extend(user_tags(uid));
    }
    let key = format!("course_outline:{}:{}", id, user_id.as_deref().unwrap_or("-"));
    let outline: Option<CourseOutline> = cached(&state, key, tags, move |db| {
        db.get_course_outline(id, user_id.as_deref())
    })
    .await?;
    match outline {
        Some(outline) => Ok(Json(outline)),
        None => Err(CourseError::CourseNotFound { id }.into()),
    }
}

async fn get_lesson_page(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path((course_id, lesson_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tags = vec![
        CacheTag::id(Entity::Lessons, lesson_id),
        CacheTag::global(Entity::Lessons),
        CacheTag::global(Entity::CourseSections),
        CacheTag::course(Entity::CourseSections, course_id),
    ];
    if let Some(uid) = user.user_id() {
        tags.extend(user_tags(uid));
    }
    let key = format!(
        "lesson_page:{}:{}:{}:{}",
        course_id,
        lesson_id,
        user.user_id().unwrap_or("-"),
        user.role.as_str()
    );
    let page: Option<LessonPage> = cached(&state, key, tags, move |db| {
        build_lesson_page(db, &user, course_id, lesson_id)
    })
    .await?;
    match page {
        Some(page) => Ok(Json(page)),
        None => Err(CourseError::LessonNotFound { id: lesson_id }.into()),
    }
}

async fn set_lesson_complete(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<CompletionRequest>,
) -> Result<ActionResult, ApiError> {
    actions::set_lesson_complete(&state, &user, id, req.complete)
        .await
        .map_err(internal)
}

async fn list_my_purchases(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = signed_in(&user)?;
    let tags = vec![CacheTag::user(Entity::Purchases, &user_id)];
    let key = format!("purchases:{}", user_id);
    let purchases: Vec<Purchase> =
        cached(&state, key, tags, move |db| db.list_user_purchases(&user_id)).await?;
    Ok(Json(purchases))
}

async fn record_purchase(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<PurchaseInput>,
) -> Result<ActionResult, ApiError> {
    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    actions::record_purchase(&state, presented, req)
        .await
        .map_err(internal)
}

// ── Admin handlers ────────────────────────────────────────────────────

async fn list_admin_products(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, &user, Capability::ManageProducts).await?;
    let products: Vec<AdminProductSummary> = cached(
        &state,
        "admin:products".into(),
        vec![
            CacheTag::global(Entity::Products),
            CacheTag::global(Entity::Purchases),
        ],
        |db| db.list_products_admin(),
    )
    .await?;
    Ok(Json(products))
}

async fn create_product(
    State(state): State<SharedState>,
    user: CurrentUser,
    Json(req): Json<ProductInput>,
) -> Result<ActionResult, ApiError> {
    actions::create_product(&state, &user, req)
        .await
        .map_err(internal)
}

async fn update_product(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ProductInput>,
) -> Result<ActionResult, ApiError> {
    actions::update_product(&state, &user, id, req)
        .await
        .map_err(internal)
}

async fn delete_product(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<ActionResult, ApiError> {
    actions::delete_product(&state, &user, id)
        .await
        .map_err(internal)
}

async fn list_admin_courses(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, &user, Capability::ManageCourses).await?;
    let courses: Vec<AdminCourseSummary> = cached(
        &state,
        "admin:courses".into(),
        vec![
            CacheTag::global(Entity::Courses),
            CacheTag::global(Entity::CourseSections),
            CacheTag::global(Entity::Lessons),
            CacheTag::global(Entity::UserCourseAccess),
        ],
        |db| db.list_courses_admin(),
    )
    .await?;
    Ok(Json(courses))
}

async fn create_course(
    State(state): State<SharedState>,
    user: CurrentUser,
    Json(req): Json<CourseInput>,
) -> Result<ActionResult, ApiError> {
    actions::create_course(&state, &user, req)
        .await
        .map_err(internal)
}

async fn update_course(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<CourseInput>,
) -> Result<ActionResult, ApiError> {
    actions::update_course(&state, &user, id, req)
        .await
        .map_err(internal)
}

async fn delete_course(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<ActionResult, ApiError> {
    actions::delete_course(&state, &user, id)
        .await
        .map_err(internal)
}

async fn create_section(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
    Json(req): Json<SectionInput>,
) -> Result<ActionResult, ApiError> {
    actions::create_section(&state, &user, course_id, req)
        .await
        .map_err(internal)
}

async fn update_section(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<SectionInput>,
) -> Result<ActionResult, ApiError> {
    actions::update_section(&state, &user, id, req)
        .await
        .map_err(internal)
}

async fn delete_section(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<ActionResult, ApiError> {
    actions::delete_section(&state, &user, id)
        .await
        .map_err(internal)
}

async fn reorder_sections(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
    Json(req): Json<ReorderRequest>,
) -> Result<ActionResult, ApiError> {
    reorder::reorder_sections(&state, &user, course_id, req.ids)
        .await
        .map_err(internal)
}

async fn create_lesson(
    State(state): State<SharedState>,
    user: CurrentUser,
    Json(req): Json<LessonInput>,
) -> Result<ActionResult, ApiError> {
    actions::create_lesson(&state, &user, req)
        .await
        .map_err(internal)
}

async fn update_lesson(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<LessonInput>,
) -> Result<ActionResult, ApiError> {
    actions::update_lesson(&state, &user, id, req)
        .await
        .map_err(internal)
}

async fn delete_lesson(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<ActionResult, ApiError> {
    actions::delete_lesson(&state, &user, id)
        .await
        .map_err(internal)
}

async fn reorder_lessons(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(section_id): Path<i64>,
    Json(req): Json<ReorderRequest>,
) -> Result<ActionResult, ApiError> {
    reorder::reorder_lessons(&state, &user, section_id, req.ids)
        .await
        .map_err(internal)
}

async fn list_sales(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, &user, Capability::ViewSales).await?;
    let sales: Vec<SaleRow> = cached(
        &state,
        "admin:sales".into(),
        vec![
            CacheTag::global(Entity::Purchases),
            CacheTag::global(Entity::Users),
        ],
        |db| db.list_sales(),
    )
    .await?;
    Ok(Json(sales))
}

async fn refund_purchase(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<ActionResult, ApiError> {
    actions::refund_purchase(&state, &user, id)
        .await
        .map_err(internal)
}

async fn get_dashboard(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, &user, Capability::ViewSales).await?;
    let stats: DashboardStats = cached(
        &state,
        "admin:dashboard".into(),
        vec![
            CacheTag::global(Entity::Purchases),
            CacheTag::global(Entity::Products),
            CacheTag::global(Entity::Courses),
            CacheTag::global(Entity::CourseSections),
            CacheTag::global(Entity::Lessons),
            CacheTag::global(Entity::UserCourseAccess),
        ],
        |db| db.dashboard_stats(),
    )
    .await?;
    Ok(Json(stats))
}

#[cfg(test)]
pub(crate) const TEST_WEBHOOK_SECRET: &str = "whsec_test";

#[cfg(test)]
pub(crate) fn test_state() -> SharedState {
    let db = CourseDb::new_in_memory().unwrap();
    let state = AppState::new(db, DataCache::new(true))
        .with_webhook_secret(Some(TEST_WEBHOOK_SECRET.to_string()));
    Arc::new(state)
}

#[cfg(test)]
pub(crate) fn test_state_without_webhook() -> SharedState {
    let db = CourseDb::new_in_memory().unwrap();
    Arc::new(AppState::new(db, DataCache::new(true)))
}

// ── Tests ─────────────────────────────────────────────────────────────
