//! Course academy: the HTTP back end for selling and taking courses.
//!
//! ## Overview
//!
//! Admins build courses out of ordered sections and ordered lessons, bundle
//! courses into products, and see sales. Learners buy products, watch the
//! lessons they have access to, mark them complete, and step through a
//! course with next/previous links that skip hidden content.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ reads: DataCache::get_or_load()        │
//!                       │         │ writes: actions / reorder              │
//!                       │         v                                        │
//!                       │  actions.rs  (guarded writes, ActionResult)      │
//!                       │  reorder.rs  (plan_reorder, order rewrites)      │
//!                       │         │                                        │
//!                       │         │ PermissionOracle::can()                │
//!                       │         v                                        │
//!                       │  db.rs  (CourseDb, OrderedLookup impl)           │
//!                       │         │                                        │
//!                       │         │ find_next_lesson / find_previous_lesson│
//!                       │         v                                        │
//!                       │  navigator.rs  (cross-section traversal)         │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | Entities, status enums, input and view types            |
//! | `visibility`  | Which statuses navigation and playback may see          |
//! | `permissions` | `PermissionOracle` and `Capability`                     |
//! | `auth`        | `CurrentUser` extractor from identity headers           |
//! | `cache`       | Tag-keyed read cache with revalidation helpers          |
//! | `ws`          | `WsMessage` enum + `broadcast_message()` helper         |

pub mod actions;
pub mod api;
pub mod auth;
pub mod cache;
pub mod db;
pub mod models;
pub mod navigator;
pub mod permissions;
pub mod reorder;
pub mod server;
pub mod visibility;
pub mod ws;
