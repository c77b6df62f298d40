pub mod http;
pub mod retry;

pub use http::{classify_status, HttpRetryClass};
pub use retry::RetryPolicy;
