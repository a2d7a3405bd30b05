pub mod api;
pub mod config;
pub mod console;
pub mod error;
pub mod geo;
pub mod models;
pub mod observability;
pub mod projection;
pub mod source;
pub mod state;
pub mod sync;
