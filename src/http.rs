//! HTTP client with rate limiting for the identity provider and device API.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting so that a reconnect storm cannot hammer the
//!   platform
//! * Consistent timeouts and the vendor app `User-Agent`
//! * Helpers for the request shapes the platform uses: form posts, JSON
//!   posts and bearer-authenticated gets
//!
//! # Example
//!
//! ```ignore
//! use airplus::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.get_with_bearer(url, access_token)?;
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Body, Method, Url,
};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Pooled client; only reachable through [`Client::execute`].
    client: reqwest::Client,

    /// Rate limiter for outgoing requests.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window over which calls are counted.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(10);

    /// Maximum allowed API calls per interval.
    ///
    /// One connection attempt costs at most three calls (refresh, user id,
    /// signature), so this leaves ample headroom while still throttling a
    /// runaway loop.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 20;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Form-encoded body type used by the token endpoint.
    const FORM_CONTENT: HeaderValue = HeaderValue::from_static("application/x-www-form-urlencoded");

    /// JSON body type used by the device API.
    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built, for example when no
    /// TLS backend is available.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            client: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with specified method, URL and body.
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    /// Builds a POST request.
    pub fn post<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::POST, url, body)
    }

    /// Builds a GET request without a body.
    pub fn get<U>(&self, url: U) -> reqwest::Request
    where
        U: Into<Url>,
    {
        reqwest::Request::new(Method::GET, url.into())
    }

    /// Builds a form-encoded POST request from key/value pairs.
    pub fn post_form<'a, U, I>(&self, url: U, pairs: I) -> reqwest::Request
    where
        U: Into<Url>,
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();

        let mut request = self.post(url, body);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, Self::FORM_CONTENT);
        request
    }

    /// Builds a JSON POST request from an already serialized body.
    pub fn post_json<U>(&self, url: U, json: String) -> reqwest::Request
    where
        U: Into<Url>,
    {
        let mut request = self.post(url, json);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, Self::JSON_CONTENT);
        request
    }

    /// Builds a GET request authorized with a bearer token.
    ///
    /// # Errors
    ///
    /// Returns error if the token contains characters that are not allowed
    /// in a header value.
    pub fn get_with_bearer<U>(&self, url: U, access_token: &str) -> Result<reqwest::Request>
    where
        U: Into<Url>,
    {
        let mut request = self.get(url);
        request.headers_mut().try_insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))?,
        )?;
        Ok(request)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails on the network level. Non-success
    /// status codes are not errors here; callers decide what they mean.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        trace!("{} {}", request.method(), request.url().path());
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.client.execute(request).map_err(Into::into))
    }
}
