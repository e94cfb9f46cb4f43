//! HTTP request / response schemas.

pub mod chat;
