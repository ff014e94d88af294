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

//! # atproto
//!
//! A (very) small AT Protocol client: just enough XRPC to resolve a handle to a DID
//! (`com.atproto.identity.resolveHandle`) & fetch a profile (`app.bsky.actor.getProfile`) from a
//! personal data server.

use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use reqwest::StatusCode;
use serde::Deserialize;
use snafu::{prelude::*, Backtrace, IntoError};
use tracing::debug;
use url::Url;

use crate::{
    define_metric,
    entities::{Did, Handle},
    federation::{self, FederatedProfile, ProfileError, ProfileResolver},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build an HTTP client: {source}"))]
    Client {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to decode the response from {url}: {source}"))]
    Decode {
        url: Url,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{url} returned {status}"))]
    NotFound {
        url: Url,
        status: StatusCode,
        backtrace: Backtrace,
    },
    #[snafu(display("Request to {url} failed: {source}"))]
    Request {
        url: Url,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{url} returned {status}"))]
    Status {
        url: Url,
        status: StatusCode,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to form an XRPC URL: {source}"))]
    UrlParse {
        source: url::ParseError,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Our only failure the federation logic cares about is "not found"; everything else is transport
impl From<Error> for ProfileError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { url, .. } => federation::NotFoundSnafu {
                subject: url.to_string(),
            }
            .build(),
            err => federation::TransportSnafu.into_error(Box::new(err)),
        }
    }
}

define_metric! { "atproto.requests", atproto_requests, Sort::IntegralCounter }
define_metric! { "atproto.not_found", atproto_not_found, Sort::IntegralCounter }
define_metric! { "atproto.errors", atproto_errors, Sort::IntegralCounter }

/// `com.atproto.identity.resolveHandle` response
#[derive(Debug, Deserialize)]
struct ResolveHandleRsp {
    did: Did,
}

/// `app.bsky.actor.getProfile` response; only the fields claroz uses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileViewDetailed {
    did: Did,
    handle: Handle,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

impl From<ProfileViewDetailed> for FederatedProfile {
    fn from(value: ProfileViewDetailed) -> Self {
        FederatedProfile {
            did: value.did,
            handle: value.handle,
            display_name: value.display_name.unwrap_or_default(),
            description: value.description.unwrap_or_default(),
            avatar: value.avatar.unwrap_or_default(),
        }
    }
}

/// AT Protocol [ProfileResolver] backed by [reqwest]
#[derive(Clone, Debug)]
pub struct Client {
    client: reqwest::Client,
    pds: Url,
}

impl Client {
    /// Build a client for the PDS at `pds`; every request is bounded by `timeout`
    pub fn new(pds: &Url, user_agent: &str, timeout: Duration) -> Result<Client> {
        Ok(Client {
            client: reqwest::Client::builder()
                .user_agent(user_agent)
                .timeout(timeout)
                .build()
                .context(ClientSnafu)?,
            pds: pds.clone(),
        })
    }
    /// Issue an XRPC query, mapping 400 & 404 to [Error::NotFound]
    async fn query<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        param: (&str, &str),
    ) -> Result<T> {
        let mut url = self
            .pds
            .join(&format!("/xrpc/{}", method))
            .context(UrlParseSnafu)?;
        url.query_pairs_mut().append_pair(param.0, param.1);
        let host = url.host_str().unwrap_or_default().to_owned();

        debug!("GET {}", url);
        atproto_requests.add(1, &[KeyValue::new("method", method.to_owned())]);

        let rsp = self
            .client
            .get(url.clone())
            .send()
            .await
            .context(RequestSnafu { url: url.clone() })
            .inspect_err(|_| atproto_errors.add(1, &[KeyValue::new("host", host.clone())]))?;

        let status = rsp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            atproto_not_found.add(1, &[KeyValue::new("host", host)]);
            return NotFoundSnafu { url, status }.fail();
        }
        if !status.is_success() {
            atproto_errors.add(1, &[KeyValue::new("host", host)]);
            return StatusSnafu { url, status }.fail();
        }

        rsp.json::<T>().await.context(DecodeSnafu { url })
    }
    pub async fn resolve_handle(&self, handle: &Handle) -> Result<Did> {
        Ok(self
            .query::<ResolveHandleRsp>(
                "com.atproto.identity.resolveHandle",
                ("handle", handle.as_ref()),
            )
            .await?
            .did)
    }
    pub async fn get_profile(&self, actor: &str) -> Result<FederatedProfile> {
        Ok(self
            .query::<ProfileViewDetailed>("app.bsky.actor.getProfile", ("actor", actor))
            .await?
            .into())
    }
}

#[async_trait]
impl ProfileResolver for Client {
    async fn resolve_handle(
        &self,
        handle: &Handle,
    ) -> std::result::Result<FederatedProfile, ProfileError> {
        let did = Client::resolve_handle(self, handle).await?;
        Ok(Client::get_profile(self, &did).await?)
    }
    async fn get_profile(&self, did: &Did) -> std::result::Result<FederatedProfile, ProfileError> {
        Ok(Client::get_profile(self, did).await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::json;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    async fn client_for(server: &MockServer) -> Client {
        Client::new(
            &Url::parse(&server.uri()).unwrap(),
            "claroz/test",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn resolve_then_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/com.atproto.identity.resolveHandle"))
            .and(query_param("handle", "new.example"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"did": "did:plc:new"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfile"))
            .and(query_param("actor", "did:plc:new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "did": "did:plc:new",
                "handle": "new.example",
                "displayName": "New",
                "description": "Hello!",
                "avatar": "https://cdn.example/new.jpg",
                "followersCount": 12
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let profile = ProfileResolver::resolve_handle(&client, &Handle::new("new.example").unwrap())
            .await
            .unwrap();
        assert_eq!(
            FederatedProfile {
                did: Did::new("did:plc:new").unwrap(),
                handle: Handle::new("new.example").unwrap(),
                display_name: "New".to_owned(),
                description: "Hello!".to_owned(),
                avatar: "https://cdn.example/new.jpg".to_owned(),
            },
            profile
        );
    }

    #[tokio::test]
    async fn optional_profile_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "did": "did:plc:x",
                "handle": "x.example"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let profile = ProfileResolver::get_profile(&client, &Did::new("did:plc:x").unwrap())
            .await
            .unwrap();
        assert_eq!("", profile.display_name);
        assert_eq!("", profile.avatar);
    }

    #[tokio::test]
    async fn not_found_vs_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/com.atproto.identity.resolveHandle"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "InvalidRequest",
                "message": "Unable to resolve handle"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfile"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(matches!(
            ProfileResolver::resolve_handle(&client, &Handle::new("nobody.example").unwrap())
                .await,
            Err(ProfileError::NotFound { .. })
        ));
        assert!(matches!(
            ProfileResolver::get_profile(&client, &Did::new("did:plc:x").unwrap()).await,
            Err(ProfileError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn timeouts_are_transport_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfile"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = Client::new(
            &Url::parse(&server.uri()).unwrap(),
            "claroz/test",
            Duration::from_millis(100),
        )
        .unwrap();
        assert!(matches!(
            ProfileResolver::get_profile(&client, &Did::new("did:plc:x").unwrap()).await,
            Err(ProfileError::Transport { .. })
        ));
    }
}
