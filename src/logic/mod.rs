//! Core pipeline: alert model, geolocation, retention and streaming.

pub mod alert;
pub mod geo;
pub mod pipeline;
pub mod store;
pub mod stream;
