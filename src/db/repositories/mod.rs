pub mod reports;
pub mod stats;

pub use reports::{InsertOutcome, RetryOutcome, SentTotals};
