//! Integration tests for coursehub
//!
//! These tests drive the compiled binary and the public library API together.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const ENV_KEYS: [&str; 7] = [
    "COURSEHUB_HOST",
    "COURSEHUB_PORT",
    "COURSEHUB_DB_PATH",
    "COURSEHUB_LOG_FORMAT",
    "COURSEHUB_DEV",
    "COURSEHUB_WEBHOOK_SECRET",
    "RUST_LOG",
];

/// Helper to create a coursehub Command with a clean environment
fn coursehub(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("coursehub");
    cmd.current_dir(dir.path());
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd
}

/// Helper to write `.coursehub/coursehub.toml` in a temp directory
fn write_config(dir: &TempDir, content: &str) {
    let config_dir = dir.path().join(".coursehub");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("coursehub.toml"), content).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_coursehub_help() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("init-db"));
    }

    #[test]
    fn test_coursehub_version() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir).arg("deploy").assert().failure();
    }
}

// =============================================================================
// Database Bootstrap Tests
// =============================================================================

mod init_db {
    use super::*;

    #[test]
    fn test_init_db_creates_default_database() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir)
            .arg("init-db")
            .assert()
            .success()
            .stdout(predicate::str::contains("Course database initialized"));
        assert!(dir.path().join(".coursehub/coursehub.db").exists());
    }

    #[test]
    fn test_init_db_respects_db_path_flag() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir)
            .args(["init-db", "--db-path", "data/custom.db"])
            .assert()
            .success();
        assert!(dir.path().join("data/custom.db").exists());
    }

    #[test]
    fn test_init_db_is_repeatable() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir).arg("init-db").assert().success();
        coursehub(&dir).arg("init-db").assert().success();
    }

    #[test]
    fn test_init_db_reads_path_from_env() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir)
            .env("COURSEHUB_DB_PATH", "env.db")
            .arg("init-db")
            .assert()
            .success();
        assert!(dir.path().join("env.db").exists());
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("port = 3141"));
    }

    #[test]
    fn test_config_show_layers_file_then_env() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "[server]\nport = 9000\nhost = \"0.0.0.0\"\n");

        coursehub(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9000"))
            .stdout(predicate::str::contains("host = \"0.0.0.0\""));

        coursehub(&dir)
            .env("COURSEHUB_PORT", "7000")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 7000"));
    }

    #[test]
    fn test_config_show_masks_webhook_secret() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir)
            .env("COURSEHUB_WEBHOOK_SECRET", "whsec_do_not_print")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[checkout]"))
            .stdout(predicate::str::contains("whsec_do_not_print").not());
    }

    #[test]
    fn test_config_validate_defaults() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_problems() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "[server]\nport = 0\n");
        coursehub(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("server.port"));
    }

    #[test]
    fn test_malformed_config_file_fails() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "[server\nport = ");
        coursehub(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse coursehub.toml"));
    }

    #[test]
    fn test_invalid_log_format_env_fails() {
        let dir = TempDir::new().unwrap();
        coursehub(&dir)
            .env("COURSEHUB_LOG_FORMAT", "xml")
            .args(["config", "show"])
            .assert()
            .failure();
    }

    #[test]
    fn test_serve_refuses_invalid_config() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "[server]\nport = 0\n");
        coursehub(&dir)
            .arg("serve")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }
}

// =============================================================================
// Library Navigation Tests
// =============================================================================

mod navigation {
    use coursehub::academy::db::CourseDb;
    use coursehub::academy::models::*;
    use coursehub::academy::navigator::{Position, find_next_lesson, find_previous_lesson};

    fn lesson(db: &CourseDb, section_id: i64, name: &str, status: LessonStatus) -> Lesson {
        db.create_lesson(&LessonInput {
            name: name.to_string(),
            section_id,
            status,
            youtube_video_id: format!("yt-{}", name),
            description: None,
        })
        .unwrap()
    }

    #[test]
    fn test_navigation_stops_at_empty_section_and_follows_reorder() {
        let dir = tempfile::tempdir().unwrap();
        let db = CourseDb::new(&dir.path().join("nav.db")).unwrap();
        let course = db
            .create_course(&CourseInput {
                name: "Rust".into(),
                description: "Systems programming".into(),
            })
            .unwrap();
        let section = |name: &str| {
            db.create_section(
                course.id,
                &SectionInput {
                    name: name.into(),
                    status: SectionStatus::Public,
                },
            )
            .unwrap()
        };
        let a = section("A");
        let empty = section("Teasers");
        let b = section("B");

        let l1 = lesson(&db, a.id, "L1", LessonStatus::Public);
        let teaser = lesson(&db, a.id, "Teaser", LessonStatus::Preview);
        let l2 = lesson(&db, a.id, "L2", LessonStatus::Private);
        lesson(&db, empty.id, "Trailer", LessonStatus::Preview);
        let l3 = lesson(&db, b.id, "L3", LessonStatus::Public);

        let next = |l: &Lesson| find_next_lesson(&db, Position::from(l)).unwrap().map(|p| p.id);
        let prev = |l: &Lesson| find_previous_lesson(&db, Position::from(l)).unwrap().map(|p| p.id);

        assert_eq!(next(&l1), Some(l2.id));
        assert_eq!(next(&teaser), Some(l2.id));
        assert_eq!(prev(&l1), None);
        // The adjacent section has nothing traversable; navigation stops there.
        assert_eq!(next(&l2), None);
        assert_eq!(prev(&l3), None);

        db.rewrite_section_orders(&[(b.id, 0), (a.id, 1), (empty.id, 2)])
            .unwrap();
        assert_eq!(next(&l3), Some(l1.id));
        assert_eq!(prev(&l1), Some(l3.id));
        assert_eq!(next(&l2), None);
    }
}
