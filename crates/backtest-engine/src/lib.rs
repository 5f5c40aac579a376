pub mod analytics;
pub mod cost;
pub mod engine;
pub mod evaluator;
pub mod models;
pub mod risk;
pub mod tier;

#[cfg(test)]
mod tests;

pub use cost::TradingCostModel;
pub use engine::SimulationEngine;
pub use evaluator::RuleEvaluator;
pub use models::*;
pub use tier::TierReport;
