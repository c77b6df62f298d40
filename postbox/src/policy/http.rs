/// Advisory classification of an HTTP status code for transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRetryClass {
    /// 2xx: delivered
    Success,

    /// 408, 429, 5xx, and 3xx (treated as unknown): worth retrying
    Transient,

    /// Remaining 4xx: do not retry
    Permanent,
}

/// Classify an HTTP status code into a retry class.
///
/// Transports are free to override individual codes (the reference HTTP
/// transport treats 409 as success, for example); this is the baseline
/// table.
pub fn classify_status(status: u16) -> HttpRetryClass {
    match status {
        200..=299 => HttpRetryClass::Success,
        300..=399 => HttpRetryClass::Transient,
        408 | 429 => HttpRetryClass::Transient,
        400..=499 => HttpRetryClass::Permanent,
        _ => HttpRetryClass::Transient,
    }
}
