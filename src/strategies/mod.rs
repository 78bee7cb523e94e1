// src/strategies/mod.rs
pub mod momentum_breakout;
pub mod traits;
