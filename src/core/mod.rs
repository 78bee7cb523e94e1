// src/core/mod.rs
pub mod engine;
pub mod portfolio;
pub mod risk;
