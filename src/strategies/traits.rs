// src/strategies/traits.rs
use crate::types::{Candle, Position, StrategySignal};
use anyhow::Result;

/// A trading rule: candle history plus the current position in, one signal out.
///
/// Implementations must not perform I/O. The only state they may carry is
/// whatever they need for cooldown bookkeeping between evaluations.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Decide the next action. `candles` is ordered oldest-first and must not
    /// be empty.
    fn evaluate(
        &mut self,
        candles: &[Candle],
        position: Option<&Position>,
    ) -> Result<StrategySignal>;

    /// Clear internal state (between restarts or independent runs).
    fn reset(&mut self) {}
}
