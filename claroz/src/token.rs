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

//! # claroz Authentication Tokens
//!
//! Registration & login both hand back a bearer token: an HS256-signed [JWT] whose subject is the
//! user's ID. The token names the signing key in its `kid` header so that keys can be rotated
//! without invalidating outstanding tokens.
//!
//! [JWT]: https://www.rfc-editor.org/rfc/rfc7519.html

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{Header, SignWithKey, Token, VerifyWithKey};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use snafu::{prelude::*, Backtrace};

use crate::{
    entities::UserId,
    signing_keys::{self, KeyId, SigningKey, SigningKeys},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Token expired at {expires}"))]
    Expired {
        expires: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create an HMAC: {source}"))]
    Hmac {
        source: hmac::digest::InvalidLength,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to refine a string to a KeyId: {source}"))]
    KeyId {
        source: signing_keys::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The Key ID was missing from the JWT"))]
    MissingKeyId { backtrace: Backtrace },
    #[snafu(display("No signing key matching {keyid}: {source}"))]
    NoKey {
        keyid: KeyId,
        source: signing_keys::Error,
    },
    #[snafu(display("Invalid token: not before {not_before}"))]
    NotBefore {
        not_before: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse JWT: {source}"))]
    Parse {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to sign JWT claims: {source}"))]
    Signature {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token audience {audience}"))]
    UnknownAudience {
        audience: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token issuer {issuer}"))]
    UnknownIssuer { issuer: String, backtrace: Backtrace },
    #[snafu(display("Verification failure: {source}"))]
    Verification {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// claroz access token [claims]
///
/// Times are written as NumericDate (seconds since the epoch), per RFC 7519.
///
/// [claims]: https://pragmaticwebsecurity.com/articles/apisecurity/hard-parts-of-jwt.html
#[derive(Clone, Debug, Deserialize, Serialize)]
struct AccessClaims {
    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    issued_at: DateTime<Utc>,
    #[serde(rename = "iss")]
    issuer: String,
    #[serde(rename = "aud")]
    audience: String,
    #[serde(rename = "nbf", with = "chrono::serde::ts_seconds")]
    not_before: DateTime<Utc>,
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    expires: DateTime<Utc>,
    #[serde(rename = "sub")]
    subject: UserId,
}

fn audience(issuer: &str) -> String {
    format!("api.{}", issuer)
}

fn hmac_for(signing_key: &SigningKey) -> Result<Hmac<Sha256>> {
    Hmac::new_from_slice(signing_key.as_ref().expose_secret()).context(HmacSnafu)
}

/// Mint a new JWT
///
/// Mint a new token naming `subject`, signed using `signing_key` (identified by `keyid`). The
/// token will be valid for duration `lifetime`. The fully serialized JWT is returned.
pub fn mint_token(
    subject: &UserId,
    keyid: &KeyId,
    signing_key: &SigningKey,
    issuer: &str,
    lifetime: &Duration,
) -> Result<String> {
    let key = hmac_for(signing_key)?;
    let header = Header {
        key_id: Some(keyid.to_string()),
        ..Default::default()
    };
    let now = Utc::now();
    let claims = AccessClaims {
        issued_at: now,
        issuer: issuer.to_owned(),
        audience: audience(issuer),
        not_before: now,
        expires: now + *lifetime,
        subject: *subject,
    };
    Ok(Token::new(header, claims)
        .sign_with_key(&key)
        .context(SignatureSnafu)?
        .as_str()
        .to_owned())
}

/// Verify a JWT, returning the [UserId] it names
pub fn verify_token(token_string: &str, keys: &SigningKeys, issuer: &str) -> Result<UserId> {
    let token: Token<Header, AccessClaims, _> =
        Token::parse_unverified(token_string).context(ParseSnafu)?;
    let keyid = token
        .header()
        .key_id
        .clone()
        .context(MissingKeyIdSnafu)?;
    let keyid = KeyId::new(&keyid).context(KeyIdSnafu)?;
    let signing_key = keys.find_by_version(&keyid).context(NoKeySnafu { keyid })?;
    let key = hmac_for(&signing_key)?;
    let token: Token<Header, AccessClaims, _> = token_string
        .verify_with_key(&key)
        .context(VerificationSnafu)?;
    let claims = token.claims();

    let now = Utc::now();

    ensure!(
        now >= claims.not_before,
        NotBeforeSnafu {
            not_before: claims.not_before
        }
    );
    ensure!(
        now <= claims.expires,
        ExpiredSnafu {
            expires: claims.expires
        }
    );
    ensure!(
        issuer == claims.issuer,
        UnknownIssuerSnafu {
            issuer: claims.issuer.clone()
        }
    );
    ensure!(
        audience(issuer) == claims.audience,
        UnknownAudienceSnafu {
            audience: claims.audience.clone()
        }
    );

    Ok(claims.subject)
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_keys() -> (KeyId, SigningKey) {
        (
            KeyId::new("keyid:20250817").unwrap(/* known good */),
            // With apologies to J.R.R. Tolkein, but I needed 64 bytes exactly.
            SigningKey::new(
                b"All that is gold does not glitter-- Not all who wander are lost.".to_vec(),
            )
            .unwrap(/* known good */),
        )
    }

    #[test]
    fn verify_minted_token() {
        let subject = UserId::default();
        let (key_id, signing_key) = test_keys();

        let token = mint_token(
            &subject,
            &key_id,
            &signing_key,
            "claroz",
            &Duration::seconds(300),
        )
        .unwrap();

        let keys = SigningKeys::from([(key_id, signing_key)]);
        assert_eq!(subject, verify_token(&token, &keys, "claroz").unwrap());
    }

    #[test]
    fn expired_tokens() {
        let (key_id, signing_key) = test_keys();
        let token = mint_token(
            &UserId::default(),
            &key_id,
            &signing_key,
            "claroz",
            &Duration::seconds(-60),
        )
        .unwrap();
        let keys = SigningKeys::from([(key_id, signing_key)]);
        assert!(matches!(
            verify_token(&token, &keys, "claroz"),
            Err(Error::Expired { .. })
        ));
    }

    #[test]
    fn wrong_issuer() {
        let (key_id, signing_key) = test_keys();
        let token = mint_token(
            &UserId::default(),
            &key_id,
            &signing_key,
            "elsewhere",
            &Duration::seconds(300),
        )
        .unwrap();
        let keys = SigningKeys::from([(key_id, signing_key)]);
        assert!(matches!(
            verify_token(&token, &keys, "claroz"),
            Err(Error::UnknownIssuer { .. })
        ));
    }

    #[test]
    fn unknown_key() {
        let (key_id, signing_key) = test_keys();
        let token = mint_token(
            &UserId::default(),
            &key_id,
            &signing_key,
            "claroz",
            &Duration::seconds(300),
        )
        .unwrap();
        let keys = SigningKeys::from([(
            KeyId::new("keyid:20250901").unwrap(),
            SigningKey::default(),
        )]);
        assert!(matches!(
            verify_token(&token, &keys, "claroz"),
            Err(Error::NoKey { .. })
        ));
        assert!(matches!(
            verify_token("not.a.jwt", &keys, "claroz"),
            Err(Error::Parse { .. })
        ));
    }
}
