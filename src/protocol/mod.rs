//! Wire types for the appliance platform.
//!
//! # Submodules
//!
//! * [`auth`] - OAuth token endpoint responses
//! * [`api`] - user and device API requests and responses
//! * [`shadow`] - device shadow documents and control commands
//!
//! # Shared Functionality
//!
//! [`json`] parses a response body and logs it consistently:
//!
//! ```ignore
//! use airplus::protocol::{self, api::UserIdResponse};
//!
//! let response: UserIdResponse = protocol::json(&body, "user/self/get-id")?;
//! ```

pub mod api;
pub mod auth;
pub mod shadow;

use crate::error::Result;
use serde::Deserialize;
use std::fmt::Debug;

/// Parses and logs JSON responses from the platform.
///
/// # Errors
///
/// Returns `InvalidArgument` if the body is not valid JSON or does not
/// match `T`.
///
/// # Logging
///
/// * Success: logs the parsed structure at TRACE level
/// * Shape mismatch: logs the raw JSON at TRACE level
/// * Invalid JSON: logs the error at ERROR level and the raw text at TRACE
///   level
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
