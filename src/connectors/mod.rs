// src/connectors/mod.rs
pub mod bithumb;
pub mod bithumb_ws;
pub mod messages;
pub mod traits;
