//! Device and user API types.
//!
//! # Wire Format
//!
//! `POST /user/self/get-id`:
//! ```json
//! { "idToken": "jwt" }        // request
//! { "userId": "abc123" }      // response
//! ```
//!
//! `GET /user/self/device`:
//! ```json
//! [
//!     { "friendlyName": "Bedroom", "thingName": "da-0123", "type": "AC0950" }
//! ]
//! ```
//!
//! `GET /user/self/signature`:
//! ```json
//! { "signature": "base64..." }
//! ```

use serde::{Deserialize, Serialize};
use veil::Redact;

/// Request body for resolving the account behind an id token.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdRequest<'a> {
    pub id_token: &'a str,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserIdResponse {
    pub user_id: String,
}

/// An appliance registered to the account.
///
/// Only the fields needed to address the device are modeled; the rest of
/// the record is kept verbatim for logging.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub thing_name: String,

    #[serde(default)]
    pub friendly_name: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Deserialize, PartialEq, Eq, Redact)]
pub struct SignatureResponse {
    #[redact]
    pub signature: String,
}
