pub mod admin;
pub mod attendance;
pub mod auth;
pub mod core;
pub mod disciplines;
pub mod reports;
pub mod schedule;
pub mod students;
