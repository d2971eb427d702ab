//! Controller for cloud-connected Air+ air purifiers.
//!
//! The crate signs in to the vendor identity provider with OAuth2 PKCE,
//! resolves the account's appliance through the device API, and keeps an
//! MQTT-over-WebSocket session to the device shadow alive, translating
//! power and fan mode commands into shadow and control messages.
//!
//! * [`auth`] - PKCE login, token refresh and validation
//! * [`directory`] - user, device and signature lookups
//! * [`remote`] - the supervised shadow connection
//! * [`appliance`] - local appliance state and commands
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod appliance;
pub mod auth;
pub mod backoff;
pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod mqtt;
pub mod protocol;
pub mod remote;
pub mod secrets;
pub mod tokens;
pub mod util;

#[cfg(test)]
mod test_util;
