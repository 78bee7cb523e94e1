// src/runtime/mod.rs
pub mod orchestrator;
