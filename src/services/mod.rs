// src/services/mod.rs
pub mod journal;
pub mod notifier;
