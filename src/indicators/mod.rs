// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators
// used by the decision pipeline. Every public function returns an empty
// series, `None`, or a NaN sentinel on insufficient data so callers are
// forced to handle the warm-up / insufficient-data case explicitly.

pub mod atr;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod series;
pub mod volume;
