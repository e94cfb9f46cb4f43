//! HTTP middleware stack: CORS policy and per-request trace ids.

pub mod cors;
pub mod trace;
