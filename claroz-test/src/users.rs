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

//! Integration tests for the auth & user APIs.

use claroz::{
    http::{ErrorResponseBody, MessageRsp},
    users::{AuthRsp, UserStats},
};
use libtest_mimic::Failed;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;

use crate::{bearer, register};

/// Register, fail to register again, then log in
pub async fn test_register_and_login(url: Url) -> Result<(), Failed> {
    let client = Client::new();
    let account = register(&client, &url, "jdoe").await?;

    let rsp = client
        .post(url.join("/api/v1/auth/register")?)
        .json(&json!({
            "username": format!("{}x", account.username),
            "email": account.email,
            "password": "f00 b@r sp1at"
        }))
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());
    let body = rsp.json::<ErrorResponseBody>().await?;
    assert_eq!("Email already registered", body.error);

    let rsp = client
        .post(url.join("/api/v1/auth/login")?)
        .json(&json!({"email": account.email, "password": "f00 b@r sp1at"}))
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());
    let body = rsp.json::<AuthRsp>().await?;
    assert_eq!(account.id, body.user.id().to_string());

    let rsp = client
        .post(url.join("/api/v1/auth/login")?)
        .json(&json!({"email": account.email, "password": "not my password"}))
        .send()
        .await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    let (name, value) = bearer(&account);
    let rsp = client
        .get(url.join("/api/v1/users/me")?)
        .header(name, value)
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());

    let rsp = client.get(url.join("/api/v1/users/me")?).send().await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    Ok(())
}

/// Follow & unfollow, checking the stats along the way
pub async fn test_follows(url: Url) -> Result<(), Failed> {
    let client = Client::new();
    let follower = register(&client, &url, "follower").await?;
    let followed = register(&client, &url, "followed").await?;
    let (name, value) = bearer(&follower);
    let follow = url.join(&format!("/api/v1/users/{}/follow", followed.id))?;
    let stats = url.join(&format!("/api/v1/users/{}/stats", followed.id))?;

    let rsp = client
        .post(follow.clone())
        .header(name.clone(), value.clone())
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());
    assert_eq!(
        "user followed successfully",
        rsp.json::<MessageRsp>().await?.message
    );

    let rsp = client
        .get(stats.clone())
        .header(name.clone(), value.clone())
        .send()
        .await?;
    assert_eq!(
        UserStats {
            followers: 1,
            following: 0,
            is_following: true
        },
        rsp.json::<UserStats>().await?
    );

    let rsp = client
        .delete(follow)
        .header(name.clone(), value.clone())
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());

    let rsp = client.get(stats).header(name, value).send().await?;
    assert!(!rsp.json::<UserStats>().await?.is_following);

    Ok(())
}
