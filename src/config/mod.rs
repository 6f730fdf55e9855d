/// Academy, compensation and dispute settings from config.toml
pub mod academy;

/// Database configuration and connection management
pub mod database;
