//! API routes, one module per resource.

pub mod alarms;
pub mod auth;
pub mod blackstart;
pub mod commands;
pub mod events;
pub mod health;
pub mod systems;
