pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
pub mod directory;
pub mod error;
pub mod guard;
pub mod jobs;
pub mod models;
pub mod notifier;
pub mod otp;
pub mod routes;
pub mod rsvp;
pub mod schema;
pub mod session;
pub mod state;
pub mod tokens;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, Worker};
