//! Hybrid form filling: deterministic rules first, bounded AI fallback.

pub mod budget;
pub mod controller;
pub mod deterministic;

pub use budget::FillBudget;
pub use controller::{FillState, HybridFillController, ScreenContext, ScreenOutcome};
pub use deterministic::{DeterministicFiller, FillStats};
