pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod export;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod profiles;
pub mod realtime;
pub mod routes;
pub mod schema;
pub mod state;
pub mod status;
pub mod storage;
pub mod utils;
pub mod validation;
pub mod workers;

pub use routes::create_router;
pub use workers::{default_handlers, Worker};
