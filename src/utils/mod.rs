//! Utility modules

pub mod retry;
pub mod string;

pub use retry::{retry_with_backoff, RetryConfig, RetryResult};
pub use string::{escape_html, mask_email, truncate_str, word_count};
