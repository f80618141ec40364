pub mod api;
pub mod headers;
pub mod models;
