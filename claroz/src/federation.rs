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

//! # federation
//!
//! claroz can project profiles from an AT Protocol personal data server onto local, "remote"-type
//! user records. There are two operations:
//!
//! - [resolve_remote_profile]: given a handle, return the local record for it, creating it from
//!   the remote profile on first encounter
//! - [sync_remote_profile]: given a DID already known locally, re-fetch the remote profile &
//!   overwrite the display fields on the local record
//!
//! Both are written against two traits: the storage [Backend] & a [ProfileResolver] (the
//! production implementation of which lives in [atproto](crate::atproto)).
//!
//! ## Concurrent first resolution
//!
//! Two requests resolving the same unknown handle at the same moment will both miss locally &
//! both try to create a record. There's no lock; instead the store's uniqueness rules on handle &
//! DID make the second create fail with [storage::Error::HandleClaimed] (or `DidClaimed`), at
//! which point we look the record up again & return the one that won.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tracing::{debug, error, info};

use crate::{
    claroz::Claroz,
    define_metric,
    entities::{self, Did, Handle, User},
    http::ErrorResponseBody,
    storage::{self, Backend as StorageBackend},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      the Profile Resolver                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A remote profile, as seen by the remote system
///
/// Transient: it's never stored as such, only projected onto a [User].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FederatedProfile {
    pub did: Did,
    pub handle: Handle,
    pub display_name: String,
    pub description: String,
    pub avatar: String,
}

/// Failure is binary: either the remote system says there's no such profile, or we couldn't get
/// an answer out of it
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProfileError {
    #[snafu(display("No remote profile for {subject}"))]
    NotFound {
        subject: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to reach the remote profile service: {source}"))]
    Transport {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
}

/// Look up remote profiles
///
/// Implementations bound each call by a timeout. Cancellation is by dropping the returned future,
/// which is what happens to a handler's future when its client goes away.
#[async_trait]
pub trait ProfileResolver {
    /// Resolve a handle to the profile it currently names
    async fn resolve_handle(&self, handle: &Handle) -> StdResult<FederatedProfile, ProfileError>;
    /// Fetch the profile for a DID
    async fn get_profile(&self, did: &Did) -> StdResult<FederatedProfile, ProfileError>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a valid DID: {source}"))]
    BadDid {
        text: String,
        #[snafu(source(from(entities::Error, Box::new)))]
        source: Box<entities::Error>,
    },
    #[snafu(display("{text} is not a valid handle: {source}"))]
    BadHandle {
        text: String,
        #[snafu(source(from(entities::Error, Box::new)))]
        source: Box<entities::Error>,
    },
    #[snafu(display("Failed to create a local record for a remote profile: {source}"))]
    CreateFailed { source: storage::Error },
    #[snafu(display("Failed to fetch the remote profile for {did}: {source}"))]
    FetchFailed { did: Did, source: ProfileError },
    #[snafu(display("Failed to look up an existing profile: {source}"))]
    LookupFailed { source: storage::Error },
    #[snafu(display("No local profile for {did}"))]
    NoSuchProfile { did: Did, backtrace: Backtrace },
    #[snafu(display("Failed to resolve {handle}: {source}"))]
    ResolveFailed { handle: Handle, source: ProfileError },
    #[snafu(display("Failed to update the local record for a remote profile: {source}"))]
    UpdateFailed { source: storage::Error },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

/// What the caller did wrong, if anything
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    BadInput,
    NotFound,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadDid { .. } | Error::BadHandle { .. } => ErrorKind::BadInput,
            // A resolver failure of either sort reads as "no such remote profile"
            Error::NoSuchProfile { .. } | Error::ResolveFailed { .. } => ErrorKind::NotFound,
            Error::CreateFailed { .. }
            | Error::FetchFailed { .. }
            | Error::LookupFailed { .. }
            | Error::UpdateFailed { .. } => ErrorKind::Internal,
        }
    }
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        let msg = match self {
            Error::BadDid { .. } => "did is required and must be at least 3 characters",
            Error::BadHandle { .. } => "handle is required and must be at least 3 characters",
            Error::CreateFailed { .. } => "failed to create local user record",
            Error::FetchFailed { .. } => "failed to fetch remote profile",
            Error::LookupFailed { .. } => "failed to check existing profile",
            Error::NoSuchProfile { .. } => "profile not found",
            Error::ResolveFailed { .. } => "failed to resolve remote profile",
            Error::UpdateFailed { .. } => "failed to update local record",
        };
        let code = match self.kind() {
            ErrorKind::BadInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, msg.to_owned())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    Resolve & Sync operations                                   //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return the local record for `handle`, creating it from the remote profile if need be
///
/// A handle already known locally is returned as-is, without contacting the resolver.
pub async fn resolve_remote_profile(
    storage: &(dyn StorageBackend + Send + Sync),
    resolver: &(dyn ProfileResolver + Send + Sync),
    handle: &str,
) -> Result<User> {
    let handle = Handle::new(handle).context(BadHandleSnafu { text: handle })?;

    if let Some(user) = storage
        .user_by_handle(&handle)
        .await
        .context(LookupFailedSnafu)?
    {
        debug!("{} is already known locally as {}", handle, user.id());
        return Ok(user);
    }

    let profile = resolver
        .resolve_handle(&handle)
        .await
        .context(ResolveFailedSnafu {
            handle: handle.clone(),
        })?;

    let user = User::new_remote(
        profile.did,
        profile.handle,
        &profile.display_name,
        &profile.description,
        &profile.avatar,
    );

    let err = match storage.add_user(&user).await {
        Ok(()) => {
            info!("Created local record {} for {}", user.id(), handle);
            federation_remote_users_created.add(1, &[]);
            return Ok(user);
        }
        Err(err) => err,
    };

    // Lost a race with a concurrent resolution of the same profile
    let winner = match &err {
        storage::Error::HandleClaimed { handle, .. } => storage
            .user_by_handle(handle)
            .await
            .context(LookupFailedSnafu)?,
        storage::Error::DidClaimed { did, .. } => {
            storage.user_by_did(did).await.context(LookupFailedSnafu)?
        }
        _ => None,
    };
    winner.ok_or(err).context(CreateFailedSnafu)
}

/// Re-fetch the remote profile for `did` & copy its display fields onto the local record
///
/// This never creates a record. Nothing is written unless both the fetch & the update succeed.
pub async fn sync_remote_profile(
    storage: &(dyn StorageBackend + Send + Sync),
    resolver: &(dyn ProfileResolver + Send + Sync),
    did: &str,
) -> Result<User> {
    let did = Did::new(did).context(BadDidSnafu { text: did })?;

    let mut user = storage
        .user_by_did(&did)
        .await
        .context(LookupFailedSnafu)?
        .context(NoSuchProfileSnafu { did: did.clone() })?;

    let profile = resolver
        .get_profile(&did)
        .await
        .context(FetchFailedSnafu { did: did.clone() })?;

    user.sync_profile(
        profile.handle,
        &profile.display_name,
        &profile.description,
        &profile.avatar,
    );
    storage.update_user(&user).await.context(UpdateFailedSnafu)?;
    Ok(user)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            handlers                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "federation.resolutions", federation_resolutions, Sort::IntegralCounter }
define_metric! { "federation.syncs", federation_syncs, Sort::IntegralCounter }
define_metric! { "federation.errors", federation_errors, Sort::IntegralCounter }
define_metric! {
    "federation.remote_users.created", federation_remote_users_created, Sort::IntegralCounter
}

/// `GET /api/v1/federation/resolve/{handle}`
async fn resolve(
    State(state): State<Arc<Claroz>>,
    Path(handle): Path<String>,
) -> axum::response::Response {
    match resolve_remote_profile(state.storage.as_ref(), state.resolver.as_ref(), &handle).await
    {
        Ok(user) => {
            federation_resolutions.add(1, &[]);
            (StatusCode::OK, Json(user)).into_response()
        }
        Err(err) => {
            federation_errors.add(1, &[]);
            match err.kind() {
                ErrorKind::Internal => error!("{:?}", err),
                _ => info!("{}", err),
            }
            err.into_response()
        }
    }
}

/// `POST /api/v1/federation/sync/{did}`
async fn sync(
    State(state): State<Arc<Claroz>>,
    Path(did): Path<String>,
) -> axum::response::Response {
    match sync_remote_profile(state.storage.as_ref(), state.resolver.as_ref(), &did).await {
        Ok(user) => {
            federation_syncs.add(1, &[]);
            (StatusCode::OK, Json(user)).into_response()
        }
        Err(err) => {
            federation_errors.add(1, &[]);
            match err.kind() {
                ErrorKind::Internal => error!("{:?}", err),
                _ => info!("{}", err),
            }
            err.into_response()
        }
    }
}

/// `GET /api/v1/federation/users`
async fn remote_users(State(state): State<Arc<Claroz>>) -> axum::response::Response {
    match state.storage.remote_users().await {
        Ok(users) => (StatusCode::OK, Json(users)).into_response(),
        Err(err) => {
            error!("Failed to list remote users: {:?}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponseBody {
                    error: "failed to fetch remote users".to_owned(),
                }),
            )
                .into_response()
        }
    }
}

/// Return a router for the federation endpoints; none of them require authentication
pub fn make_router(state: Arc<Claroz>) -> Router<Arc<Claroz>> {
    Router::new()
        .route("/federation/resolve/{handle}", get(resolve))
        .route("/federation/sync/{did}", post(sync))
        .route("/federation/users", get(remote_users))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use snafu::IntoError;

    use crate::{
        entities::{Comment, CommentId, Like, Post, PostId, UserEmail, UserId},
        memory::InMemory,
        metrics::Registration,
    };

    /// An [InMemory] store whose user lookups by handle & DID always fail
    #[derive(Debug, Default)]
    struct BrokenLookups {
        inner: InMemory,
    }

    fn broken() -> storage::Error {
        storage::Error::new(std::io::Error::other("connection reset by peer"))
    }

    #[async_trait]
    impl StorageBackend for BrokenLookups {
        async fn add_user(&self, user: &User) -> storage::Result<()> {
            self.inner.add_user(user).await
        }
        async fn delete_user(&self, id: &UserId) -> storage::Result<()> {
            self.inner.delete_user(id).await
        }
        async fn remote_users(&self) -> storage::Result<Vec<User>> {
            self.inner.remote_users().await
        }
        async fn update_user(&self, user: &User) -> storage::Result<()> {
            self.inner.update_user(user).await
        }
        async fn user_by_did(&self, _did: &Did) -> storage::Result<Option<User>> {
            Err(broken())
        }
        async fn user_by_email(&self, email: &UserEmail) -> storage::Result<Option<User>> {
            self.inner.user_by_email(email).await
        }
        async fn user_by_handle(&self, _handle: &Handle) -> storage::Result<Option<User>> {
            Err(broken())
        }
        async fn user_by_id(&self, id: &UserId) -> storage::Result<Option<User>> {
            self.inner.user_by_id(id).await
        }
        async fn add_post(&self, post: &Post) -> storage::Result<()> {
            self.inner.add_post(post).await
        }
        async fn delete_post(&self, id: &PostId, owner: &UserId) -> storage::Result<()> {
            self.inner.delete_post(id, owner).await
        }
        async fn post_by_id(&self, id: &PostId) -> storage::Result<Option<Post>> {
            self.inner.post_by_id(id).await
        }
        async fn posts(&self, page: usize, page_size: usize) -> storage::Result<Vec<Post>> {
            self.inner.posts(page, page_size).await
        }
        async fn posts_for_user(&self, id: &UserId) -> storage::Result<Vec<Post>> {
            self.inner.posts_for_user(id).await
        }
        async fn add_comment(&self, comment: &Comment) -> storage::Result<()> {
            self.inner.add_comment(comment).await
        }
        async fn comment_by_id(&self, id: &CommentId) -> storage::Result<Option<Comment>> {
            self.inner.comment_by_id(id).await
        }
        async fn comments_for_post(&self, id: &PostId) -> storage::Result<Vec<Comment>> {
            self.inner.comments_for_post(id).await
        }
        async fn delete_comment(&self, id: &CommentId, author: &UserId) -> storage::Result<()> {
            self.inner.delete_comment(id, author).await
        }
        async fn add_like(&self, like: &Like) -> storage::Result<()> {
            self.inner.add_like(like).await
        }
        async fn has_liked(&self, post: &PostId, user: &UserId) -> storage::Result<bool> {
            self.inner.has_liked(post, user).await
        }
        async fn like_count(&self, post: &PostId) -> storage::Result<usize> {
            self.inner.like_count(post).await
        }
        async fn likes_for_post(&self, post: &PostId) -> storage::Result<Vec<Like>> {
            self.inner.likes_for_post(post).await
        }
        async fn remove_like(&self, post: &PostId, user: &UserId) -> storage::Result<bool> {
            self.inner.remove_like(post, user).await
        }
        async fn add_follow(&self, follower: &UserId, following: &UserId) -> storage::Result<()> {
            self.inner.add_follow(follower, following).await
        }
        async fn follower_count(&self, user: &UserId) -> storage::Result<usize> {
            self.inner.follower_count(user).await
        }
        async fn following_count(&self, user: &UserId) -> storage::Result<usize> {
            self.inner.following_count(user).await
        }
        async fn is_following(
            &self,
            follower: &UserId,
            following: &UserId,
        ) -> storage::Result<bool> {
            self.inner.is_following(follower, following).await
        }
        async fn remove_follow(
            &self,
            follower: &UserId,
            following: &UserId,
        ) -> storage::Result<()> {
            self.inner.remove_follow(follower, following).await
        }
    }

    /// A [ProfileResolver] serving a fixed set of profiles & counting calls
    #[derive(Debug, Default)]
    pub(crate) struct StubResolver {
        profiles: Vec<FederatedProfile>,
        // Fail every call as though the PDS were down
        unreachable: bool,
        pub resolve_calls: AtomicUsize,
        pub profile_calls: AtomicUsize,
    }

    impl StubResolver {
        pub(crate) fn new(profiles: Vec<FederatedProfile>) -> StubResolver {
            StubResolver {
                profiles,
                ..Default::default()
            }
        }
        pub(crate) fn unreachable(profiles: Vec<FederatedProfile>) -> StubResolver {
            StubResolver {
                profiles,
                unreachable: true,
                ..Default::default()
            }
        }
        fn check_reachable(&self) -> StdResult<(), ProfileError> {
            if self.unreachable {
                Err(TransportSnafu.into_error(Box::new(std::io::Error::other(
                    "connection refused",
                ))))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ProfileResolver for StubResolver {
        async fn resolve_handle(
            &self,
            handle: &Handle,
        ) -> StdResult<FederatedProfile, ProfileError> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            // Give a concurrent caller the chance to interleave
            tokio::task::yield_now().await;
            self.check_reachable()?;
            self.profiles
                .iter()
                .find(|p| p.handle == *handle)
                .cloned()
                .context(NotFoundSnafu {
                    subject: handle.to_string(),
                })
        }
        async fn get_profile(&self, did: &Did) -> StdResult<FederatedProfile, ProfileError> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            self.check_reachable()?;
            self.profiles
                .iter()
                .find(|p| p.did == *did)
                .cloned()
                .context(NotFoundSnafu {
                    subject: did.to_string(),
                })
        }
    }

    pub(crate) fn profile(did: &str, handle: &str, display_name: &str) -> FederatedProfile {
        FederatedProfile {
            did: Did::new(did).unwrap(),
            handle: Handle::new(handle).unwrap(),
            display_name: display_name.to_owned(),
            description: format!("{}'s bio", display_name),
            avatar: format!("https://cdn.example/{}.jpg", display_name),
        }
    }

    #[tokio::test]
    async fn known_handles_short_circuit() {
        let storage = InMemory::new();
        let existing = User::new_remote(
            Did::new("did:plc:old").unwrap(),
            Handle::new("old.example").unwrap(),
            "Old",
            "",
            "",
        );
        storage.add_user(&existing).await.unwrap();
        let resolver = StubResolver::new(vec![]);

        let user = resolve_remote_profile(&storage, &resolver, "old.example")
            .await
            .unwrap();
        assert_eq!(existing, user);
        assert_eq!(0, resolver.resolve_calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unknown_handles_are_created() {
        let storage = InMemory::new();
        let resolver = StubResolver::new(vec![profile("did:plc:new", "new.example", "New")]);

        let user = resolve_remote_profile(&storage, &resolver, "new.example")
            .await
            .unwrap();
        assert_eq!(entities::FederationType::Remote, user.federation_type());
        assert_eq!("did:plc:new", user.did().unwrap().as_ref());
        assert_eq!("New", user.full_name());
        assert_eq!("New's bio", user.bio());
        assert_eq!("https://cdn.example/New.jpg", user.avatar());
        assert_eq!(
            Some(user.clone()),
            storage
                .user_by_handle(&Handle::new("new.example").unwrap())
                .await
                .unwrap()
        );

        // Second time round takes the "already exists" branch
        let again = resolve_remote_profile(&storage, &resolver, "new.example")
            .await
            .unwrap();
        assert_eq!(user.id(), again.id());
        assert_eq!(1, resolver.resolve_calls.load(Ordering::SeqCst));
        assert_eq!(1, storage.remote_users().await.unwrap().len());
    }

    #[tokio::test]
    async fn concurrent_first_resolution() {
        let storage = InMemory::new();
        let resolver = StubResolver::new(vec![profile("did:plc:new", "new.example", "New")]);

        let (a, b) = tokio::join!(
            resolve_remote_profile(&storage, &resolver, "new.example"),
            resolve_remote_profile(&storage, &resolver, "new.example")
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id(), b.id());
        assert_eq!(1, storage.remote_users().await.unwrap().len());
    }

    #[tokio::test]
    async fn unresolvable_handles() {
        let storage = InMemory::new();
        let resolver = StubResolver::new(vec![]);

        let err = resolve_remote_profile(&storage, &resolver, "nobody.example")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());
        assert!(storage.remote_users().await.unwrap().is_empty());

        let err = resolve_remote_profile(&storage, &resolver, "ab")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::BadInput, err.kind());
        assert_eq!(
            "handle is required and must be at least 3 characters",
            err.as_status_and_msg().1
        );
    }

    #[tokio::test]
    async fn sync_unknown_did() {
        let storage = InMemory::new();
        let resolver = StubResolver::new(vec![profile("did:plc:x", "x.example", "X")]);

        let err = sync_remote_profile(&storage, &resolver, "did:plc:x")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());
        assert_eq!(0, resolver.profile_calls.load(Ordering::SeqCst));

        let err = sync_remote_profile(&storage, &resolver, "")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::BadInput, err.kind());
    }

    #[tokio::test]
    async fn sync_overwrites_display_fields() {
        let storage = InMemory::new();
        let existing = User::new_remote(
            Did::new("did:plc:x").unwrap(),
            Handle::new("x.example").unwrap(),
            "X",
            "",
            "",
        );
        storage.add_user(&existing).await.unwrap();
        let resolver = StubResolver::new(vec![profile("did:plc:x", "x2.example", "Updated")]);

        let user = sync_remote_profile(&storage, &resolver, "did:plc:x")
            .await
            .unwrap();
        assert_eq!(existing.id(), user.id());
        assert_eq!(existing.did(), user.did());
        assert_eq!("Updated", user.full_name());
        assert_eq!("x2.example", user.handle().unwrap().as_ref());

        let stored = storage.user_by_id(&existing.id()).await.unwrap().unwrap();
        assert_eq!("Updated", stored.full_name());
        assert_eq!(entities::FederationType::Remote, stored.federation_type());
    }

    #[tokio::test]
    async fn sync_fetch_failure_writes_nothing() {
        let storage = InMemory::new();
        let existing = User::new_remote(
            Did::new("did:plc:x").unwrap(),
            Handle::new("x.example").unwrap(),
            "X",
            "",
            "",
        );
        storage.add_user(&existing).await.unwrap();
        let resolver = StubResolver::new(vec![]);

        let err = sync_remote_profile(&storage, &resolver, "did:plc:x")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::Internal, err.kind());
        assert_eq!(
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch remote profile".to_owned()
            ),
            err.as_status_and_msg()
        );
        assert_eq!(
            existing,
            storage.user_by_id(&existing.id()).await.unwrap().unwrap()
        );
    }

    #[tokio::test]
    async fn lookup_failures_are_internal() {
        let storage = BrokenLookups::default();
        let resolver = StubResolver::new(vec![profile("did:plc:new", "new.example", "New")]);

        let err = resolve_remote_profile(&storage, &resolver, "new.example")
            .await
            .unwrap_err();
        assert_eq!(
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to check existing profile".to_owned()
            ),
            err.as_status_and_msg()
        );
        assert_eq!(0, resolver.resolve_calls.load(Ordering::SeqCst));
        assert!(storage.remote_users().await.unwrap().is_empty());

        let err = sync_remote_profile(&storage, &resolver, "did:plc:new")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::Internal, err.kind());
        assert_eq!(0, resolver.profile_calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unreachable_resolver() {
        let storage = InMemory::new();
        let resolver =
            StubResolver::unreachable(vec![profile("did:plc:new", "new.example", "New")]);

        let err = resolve_remote_profile(&storage, &resolver, "new.example")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ResolveFailed {
                source: ProfileError::Transport { .. },
                ..
            }
        ));
        assert_eq!(
            (
                StatusCode::NOT_FOUND,
                "failed to resolve remote profile".to_owned()
            ),
            err.as_status_and_msg()
        );
        assert!(storage.remote_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_update_failure_writes_nothing() {
        let storage = InMemory::new();
        let x = User::new_remote(
            Did::new("did:plc:x").unwrap(),
            Handle::new("x.example").unwrap(),
            "X",
            "",
            "",
        );
        let y = User::new_remote(
            Did::new("did:plc:y").unwrap(),
            Handle::new("y.example").unwrap(),
            "Y",
            "",
            "",
        );
        storage.add_user(&x).await.unwrap();
        storage.add_user(&y).await.unwrap();
        // x has moved to a handle y still holds
        let resolver = StubResolver::new(vec![profile("did:plc:x", "y.example", "Updated")]);

        let err = sync_remote_profile(&storage, &resolver, "did:plc:x")
            .await
            .unwrap_err();
        assert_eq!(
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to update local record".to_owned()
            ),
            err.as_status_and_msg()
        );
        assert_eq!(x, storage.user_by_id(&x.id()).await.unwrap().unwrap());
    }

    #[test]
    fn creations_are_counted() {
        assert!(inventory::iter::<Registration>
            .into_iter()
            .any(|reg| reg.name() == "federation.remote_users.created"));
    }
}
