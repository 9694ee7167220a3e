pub mod retry;

pub use retry::{PolicyError, RetryLimit, RetryPolicy};
