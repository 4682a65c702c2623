//! Database bootstrap command: `coursehub init-db`.

use anyhow::{Context, Result};
use tracing::info;

use coursehub::academy::db::CourseDb;
use coursehub::config::AppConfig;

pub fn cmd_init_db(config: &AppConfig) -> Result<()> {
    let db_path = &config.database.path;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    CourseDb::new(db_path)?;
    info!(db = %db_path.display(), "database initialized");
    println!("Course database initialized at {}", db_path.display());
    Ok(())
}
