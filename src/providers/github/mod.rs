mod budget;
mod client;
pub mod headers;
mod pagination;
pub mod types;


pub use budget::{BudgetLedger, BudgetState, JobBudget, JobType, RateLimitState};
pub use client::{ApiRequest, GitHubClient, Response};
pub use pagination::PaginationCheckpoint;
