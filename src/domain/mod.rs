pub mod auth;
pub mod concurrency;
pub mod error;
pub mod index;
pub mod model;
