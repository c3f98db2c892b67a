pub mod accountant;
pub mod pricing;

pub use accountant::{
    by_agent, by_day, by_model, cost_summary, totals, AgentUsage, CostSummary, DailyUsage,
    ModelUsage, UsageAccountant, UsageRecord, UsageTotals,
};
pub use pricing::{ModelPrice, PriceMatch, PriceTable, DEFAULT_PRICE};
