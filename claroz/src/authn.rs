// Copyright (C) 2024-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of claroz.
//
// claroz is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// claroz is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with claroz.  If not,
// see <http://www.gnu.org/licenses/>.

//! # claroz authentication support
//!
//! The protected parts of the API all authenticate the same way: an `Authorization` header with
//! the "Bearer" scheme carrying a JWT minted at registration or login. [authenticate] is an axum
//! middleware that checks it & makes the caller's [UserId] available to handlers through request
//! extensions.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use itertools::Itertools;
use snafu::{prelude::*, Backtrace};
use tracing::{debug, info};

use crate::{
    claroz::Claroz,
    define_metric,
    entities::UserId,
    http::ErrorResponseBody,
    signing_keys::SigningKeys,
    storage::{self, Backend as StorageBackend},
    token::{self, verify_token},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("An Authorization header had a value that couldn't be parsed"))]
    BadAuthHeaderParse {
        value: HeaderValue,
        backtrace: Backtrace,
    },
    #[snafu(display("An Authorization header had a non-textual value: {source}"))]
    InvalidAuthHeaderValue {
        value: HeaderValue,
        source: axum::http::header::ToStrError,
        backtrace: Backtrace,
    },
    #[snafu(display("Multiple Authorization headers were supplied"))]
    MultipleAuthnHeaders { backtrace: Backtrace },
    #[snafu(display("No Authorization header was supplied"))]
    NoAuthToken { backtrace: Backtrace },
    #[snafu(display("Invalid token: {source}"))]
    Token {
        source: token::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{user_id} is not a known user"))]
    UnknownUser {
        user_id: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("Unsupported authorization scheme {scheme}"))]
    UnsupportedAuthScheme { scheme: String, backtrace: Backtrace },
    #[snafu(display("Failed to look up user {user_id}: {source}"))]
    User {
        user_id: UserId,
        source: storage::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::NoAuthToken { .. } => (
                StatusCode::UNAUTHORIZED,
                "authorization header is required".to_owned(),
            ),
            Error::BadAuthHeaderParse { .. }
            | Error::InvalidAuthHeaderValue { .. }
            | Error::MultipleAuthnHeaders { .. }
            | Error::UnsupportedAuthScheme { .. } => (
                StatusCode::UNAUTHORIZED,
                "invalid authorization header format".to_owned(),
            ),
            Error::Token { .. } | Error::UnknownUser { .. } => (
                StatusCode::UNAUTHORIZED,
                "invalid or expired token".to_owned(),
            ),
            Error::User { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_owned(),
            ),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

/// Pull the bearer token out of a request's headers
///
/// There must be exactly one `Authorization` header, of the form "Bearer <token>" (the scheme is
/// matched case-insensitively).
fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get_all("authorization")
        .into_iter()
        .at_most_one()
        .map_err(|_| MultipleAuthnHeadersSnafu.build())?
        .context(NoAuthTokenSnafu)?;
    let (scheme, payload) = value
        .to_str()
        .context(InvalidAuthHeaderValueSnafu {
            value: value.clone(),
        })?
        .split_ascii_whitespace()
        .collect_tuple()
        .context(BadAuthHeaderParseSnafu {
            value: value.clone(),
        })?;
    ensure!(
        scheme.eq_ignore_ascii_case("bearer"),
        UnsupportedAuthSchemeSnafu { scheme }
    );
    Ok(payload)
}

/// Authenticate a request by JWT; on success, return the [UserId] it names
pub async fn check_token(
    storage: &(dyn StorageBackend + Send + Sync),
    headers: &HeaderMap,
    keys: &SigningKeys,
    issuer: &str,
) -> Result<UserId> {
    let user_id = verify_token(bearer_token(headers)?, keys, issuer).context(TokenSnafu)?;
    // A token outlives a deleted account
    storage
        .user_by_id(&user_id)
        .await
        .context(UserSnafu { user_id })?
        .context(UnknownUserSnafu { user_id })?;
    Ok(user_id)
}

define_metric! { "users.auth.successes", users_auth_successes, Sort::IntegralCounter }
define_metric! { "users.auth.failures", users_auth_failures, Sort::IntegralCounter }

/// Authentication middleware for the protected routes
pub async fn authenticate(
    State(state): State<Arc<Claroz>>,
    headers: HeaderMap,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    match check_token(
        state.storage.as_ref(),
        &headers,
        &state.signing_keys,
        &state.issuer,
    )
    .await
    {
        Ok(user_id) => {
            debug!("claroz authenticated user {}", user_id);
            users_auth_successes.add(1, &[]);
            request.extensions_mut().insert(user_id);
            next.run(request).await
        }
        // I want to be careful about what sort of information we reveal to our caller...
        Err(err) => {
            info!("claroz failed to authenticate this request: {}", err);
            users_auth_failures.add(1, &[]);
            err.into_response()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn headers(values: &[&'static str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append("authorization", HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn bearer_tokens() {
        assert_eq!(
            "a.b.c",
            bearer_token(&headers(&["Bearer a.b.c"])).unwrap()
        );
        assert_eq!(
            "a.b.c",
            bearer_token(&headers(&["bearer a.b.c"])).unwrap()
        );
        assert!(matches!(
            bearer_token(&headers(&[])),
            Err(Error::NoAuthToken { .. })
        ));
        assert!(matches!(
            bearer_token(&headers(&["Bearer a.b.c", "Bearer d.e.f"])),
            Err(Error::MultipleAuthnHeaders { .. })
        ));
        assert!(matches!(
            bearer_token(&headers(&["Basic dXNlcjpwYXNz"])),
            Err(Error::UnsupportedAuthScheme { .. })
        ));
        assert!(matches!(
            bearer_token(&headers(&["Bearer"])),
            Err(Error::BadAuthHeaderParse { .. })
        ));
        assert!(matches!(
            bearer_token(&headers(&["Bearer a.b.c extra"])),
            Err(Error::BadAuthHeaderParse { .. })
        ));
    }

    #[test]
    fn failures_are_unauthorized() {
        let err = bearer_token(&headers(&[])).unwrap_err();
        assert_eq!(StatusCode::UNAUTHORIZED, err.as_status_and_msg().0);
    }
}
