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

//! # The claroz Integration Tests
//!
//! These tests run against a live `clarozd`, over HTTP. Cargo's default test harness has no notion
//! of fixtures, so the test programs under `tests/` opt out of it (`harness = false` in
//! Cargo.toml) & use [libtest-mimic] to stay compatible with `cargo test`'s command line.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//!
//! Test logic that doesn't depend on how the server under test was deployed lives in this crate;
//! the harness itself lives in `tests/common`.

use libtest_mimic::Failed;
use reqwest::{header, Client, Url};
use serde::Deserialize;

pub mod posts;
pub mod users;

/// Hit the `clarozd` healthcheck endpoint
pub async fn test_healthcheck(url: Url) -> Result<(), Failed> {
    assert!(
        "GOOD"
            == reqwest::get(url.join("/healthcheck")?)
                .await?
                .text()
                .await?
    );
    Ok(())
}

/// A freshly-registered account
#[derive(Clone, Debug)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub email: String,
    pub token: String,
}

#[derive(Deserialize)]
struct AccountRsp {
    token: String,
    user: serde_json::Value,
}

/// Register a new account with a unique username, derived from `stem`
pub async fn register(client: &Client, url: &Url, stem: &str) -> Result<Account, Failed> {
    let username = format!("{}{}", stem, &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let email = format!("{}@example.com", username);
    let rsp = client
        .post(url.join("/api/v1/auth/register")?)
        .json(&serde_json::json!({
            "username": username,
            "email": email,
            "password": "f00 b@r sp1at",
        }))
        .send()
        .await?;
    assert_eq!(reqwest::StatusCode::CREATED, rsp.status());
    let body = rsp.json::<AccountRsp>().await?;
    Ok(Account {
        id: body.user["id"]
            .as_str()
            .ok_or("registration returned no user ID")?
            .to_owned(),
        username,
        email,
        token: body.token,
    })
}

/// The `Authorization` header value for `account`
pub fn bearer(account: &Account) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", account.token))
}
