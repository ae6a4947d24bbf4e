//! Application layer orchestrating the loyalty workflow.
//!
//! Purchase events are buffered by the [`queue::PurchaseEventQueue`], turned
//! into progress by the [`progression::ProgressionEngine`], priced by the
//! [`calculator::CashbackCalculator`] and paid out by the
//! [`settlement::SettlementService`]. The [`pipeline::LoyaltyPipeline`] wires
//! them together.

pub mod calculator;
pub mod pipeline;
pub mod progression;
pub mod queue;
pub mod settlement;
