pub mod academy;
pub mod config;
pub mod errors;
