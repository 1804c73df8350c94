//! Interpretation of kick-off and status responses.
//!
//! Everything here is a pure function of a [`RawResponse`]. Header names are
//! matched case-insensitively by the underlying header map.
//!
//! | Status            | Class          | Terminal |
//! |-------------------|----------------|----------|
//! | 202               | `InProgress`   | no       |
//! | 429               | `RateLimited`  | no       |
//! | other 2xx         | `Success`      | yes      |
//! | other 4xx and 5xx | `Failure`      | yes      |
//! | anything else     | protocol violation        |
//!
//! A cancellation marker in `X-Progress` makes a response terminal whatever
//! its status code.

use std::time::Duration;

use url::Url;

use crate::error::{BulkClientError, Result};
use crate::response::RawResponse;

pub const PROGRESS_HEADER: &str = "x-progress";
pub const RETRY_AFTER_HEADER: &str = "retry-after";
pub const CONTENT_LOCATION_HEADER: &str = "content-location";
pub const LOCATION_HEADER: &str = "location";

/// Upper bound applied to an advertised `Retry-After` delay.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Matched case-insensitively as a substring of the progress header.
pub const CANCELLED_MARKER: &str = "cancelled";

pub const STATUS_ACCEPTED: u16 = 202;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    InProgress,
    RateLimited,
    Success,
    Failure,
}

impl StatusClass {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Classifies a status code.
///
/// # Errors
///
/// Returns `ProtocolViolation` for 1xx and 3xx codes and anything outside 100..=599.
pub fn classify_status(status: u16) -> Result<StatusClass> {
    match status {
        STATUS_ACCEPTED => Ok(StatusClass::InProgress),
        STATUS_TOO_MANY_REQUESTS => Ok(StatusClass::RateLimited),
        200..=299 => Ok(StatusClass::Success),
        400..=599 => Ok(StatusClass::Failure),
        other => Err(BulkClientError::protocol_violation(format!(
            "unexpected HTTP status {other}"
        ))),
    }
}

/// Whether no further polling is needed after this response.
///
/// # Errors
///
/// Returns `ProtocolViolation` for an unclassifiable status that does not carry
/// a cancellation marker.
pub fn is_terminal(response: &RawResponse) -> Result<bool> {
    if is_cancelled(response) {
        return Ok(true);
    }
    classify_status(response.status()).map(StatusClass::is_terminal)
}

/// The advertised backoff. Only the delay-seconds form of `Retry-After` is
/// understood; an HTTP-date, a malformed value or a missing header yield zero.
/// Delays longer than [`MAX_RETRY_AFTER`] are clamped to it.
pub fn retry_after(response: &RawResponse) -> Duration {
    let Some(raw) = response.header(RETRY_AFTER_HEADER) else {
        return Duration::ZERO;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > MAX_RETRY_AFTER.as_secs() => {
            tracing::debug!(retry_after = secs, "clamping oversized Retry-After value");
            MAX_RETRY_AFTER
        }
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => {
            tracing::debug!(retry_after = raw, "ignoring non-numeric Retry-After value");
            Duration::ZERO
        }
    }
}

pub fn progress(response: &RawResponse) -> Option<&str> {
    response.header(PROGRESS_HEADER)
}

/// True if any progress value mentions cancellation, regardless of status code.
pub fn is_cancelled(response: &RawResponse) -> bool {
    response
        .header_values(PROGRESS_HEADER)
        .iter()
        .any(|value| value.to_ascii_lowercase().contains(CANCELLED_MARKER))
}

/// The polling location advertised by the response, resolved against `base`
/// when relative. `Content-Location` is preferred over `Location`.
///
/// # Errors
///
/// Returns `ProtocolViolation` if the header is present but is not a valid URI.
pub fn next_location(response: &RawResponse, base: Option<&Url>) -> Result<Option<Url>> {
    let Some(raw) = response
        .header(CONTENT_LOCATION_HEADER)
        .or_else(|| response.header(LOCATION_HEADER))
    else {
        return Ok(None);
    };
    let raw = raw.trim();

    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(raw).map_err(|e| {
                BulkClientError::protocol_violation(format!(
                    "invalid polling location {raw:?}: {e}"
                ))
            })?,
            None => {
                return Err(BulkClientError::protocol_violation(format!(
                    "relative polling location {raw:?} without a base URI"
                )));
            }
        },
        Err(e) => {
            return Err(BulkClientError::protocol_violation(format!(
                "invalid polling location {raw:?}: {e}"
            )));
        }
    };
    Ok(Some(parsed))
}
