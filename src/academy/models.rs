use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Public,
    Private,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl FromStr for SectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            _ => Err(format!("Invalid section status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Public,
    Private,
    Preview,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Preview => "preview",
        }
    }
}

impl FromStr for LessonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "preview" => Ok(Self::Preview),
            _ => Err(format!("Invalid lesson status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Public,
    Private,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            _ => Err(format!("Invalid product status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
    pub order: i32,
    pub status: SectionStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub section_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub youtube_video_id: String,
    pub order: i32,
    pub status: LessonStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub price_in_dollars: i64,
    pub status: ProductStatus,
    pub course_ids: Vec<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Snapshot of a product taken at purchase time, so sales history survives
/// later edits or deletion of the product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub name: String,
    pub description: String,
    pub image_url: String,
}

/// Public product detail, flagged with whether the caller already owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPage {
    #[serde(flatten)]
    pub product: Product,
    pub owned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: i64,
    pub user_id: String,
    pub product_id: Option<i64>,
    pub price_paid_in_cents: i64,
    pub product_details: ProductDetails,
    pub stripe_session_id: String,
    pub refunded_at: Option<String>,
    pub created_at: String,
}

// Internal row types for DB deserialization

pub(crate) struct SectionRow {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
    pub order: i32,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl SectionRow {
    pub fn into_section(self) -> anyhow::Result<Section> {
        let status = SectionStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Section {
            id: self.id,
            course_id: self.course_id,
            name: self.name,
            order: self.order,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) struct LessonRow {
    pub id: i64,
    pub section_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub youtube_video_id: String,
    pub order: i32,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl LessonRow {
    pub fn into_lesson(self) -> anyhow::Result<Lesson> {
        let status = LessonStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Lesson {
            id: self.id,
            section_id: self.section_id,
            name: self.name,
            description: self.description,
            youtube_video_id: self.youtube_video_id,
            order: self.order,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) struct PurchaseRow {
    pub id: i64,
    pub user_id: String,
    pub product_id: Option<i64>,
    pub price_paid_in_cents: i64,
    pub product_details: String,
    pub stripe_session_id: String,
    pub refunded_at: Option<String>,
    pub created_at: String,
}

impl PurchaseRow {
    pub fn into_purchase(self) -> anyhow::Result<Purchase> {
        let product_details: ProductDetails = serde_json::from_str(&self.product_details)
            .map_err(|e| anyhow::anyhow!("Invalid product_details JSON: {}", e))?;
        Ok(Purchase {
            id: self.id,
            user_id: self.user_id,
            product_id: self.product_id,
            price_paid_in_cents: self.price_paid_in_cents,
            product_details,
            stripe_session_id: self.stripe_session_id,
            refunded_at: self.refunded_at,
            created_at: self.created_at,
        })
    }
}

// Write payloads

#[derive(Debug, Clone, Deserialize)]
pub struct CourseInput {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionInput {
    pub name: String,
    pub status: SectionStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LessonInput {
    pub name: String,
    pub section_id: i64,
    pub status: LessonStatus,
    pub youtube_video_id: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductInput {
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub price_in_dollars: i64,
    pub status: ProductStatus,
    pub course_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseInput {
    pub user_id: String,
    pub product_id: i64,
    pub price_paid_in_cents: i64,
    pub stripe_session_id: String,
}

// API view types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCourseSummary {
    #[serde(flatten)]
    pub course: Course,
    pub sections_count: i64,
    pub lessons_count: i64,
    pub students_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminProductSummary {
    #[serde(flatten)]
    pub product: Product,
    pub courses_count: i64,
    pub customers_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCourseSummary {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub lessons_count: i64,
    pub lessons_complete: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseOutline {
    pub course: Course,
    pub sections: Vec<SectionOutline>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionOutline {
    pub id: i64,
    pub name: String,
    pub order: i32,
    pub lessons: Vec<LessonOutline>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonOutline {
    pub id: i64,
    pub name: String,
    pub order: i32,
    pub status: LessonStatus,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonPage {
    pub id: i64,
    pub course_id: i64,
    pub section_id: i64,
    pub name: String,
    pub status: LessonStatus,
    pub order: i32,
    /// Hidden unless `can_view`.
    pub youtube_video_id: Option<String>,
    pub description: Option<String>,
    pub can_view: bool,
    pub is_complete: bool,
    pub can_update_completion: bool,
    pub previous_lesson_id: Option<i64>,
    pub next_lesson_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRow {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub net_sales: f64,
    pub total_refunds: f64,
    pub net_purchases: i64,
    pub refunded_purchases: i64,
    pub average_net_purchases_per_customer: f64,
    pub total_students: i64,
    pub total_products: i64,
    pub total_courses: i64,
    pub total_sections: i64,
    pub total_lessons: i64,
}
