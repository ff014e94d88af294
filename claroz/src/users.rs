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

//! # users
//!
//! Registration, login & the `/users` API: profiles, follows & per-user post listings.
//!
//! Registration & login are public; everything else sits behind [authenticate], which leaves the
//! caller's [UserId] in the request extensions.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace, IntoError};
use tracing::{error, info};

use crate::{
    authn::authenticate,
    claroz::Claroz,
    define_metric,
    entities::{self, Did, Handle, PostDetails, User, UserEmail, UserId, Username},
    http::{ErrorResponseBody, MessageRsp},
    peppers,
    signing_keys,
    storage::{self, posts_details, Backend as StorageBackend},
    token::{self, mint_token},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add user: {source}"))]
    AddUser { source: storage::Error },
    #[snafu(display("Invalid request body: {source}"))]
    BadBody { source: JsonRejection },
    #[snafu(display("{text} is not a valid e-mail address"))]
    BadEmail {
        text: String,
        source: entities::Error,
    },
    #[snafu(display("{text} is not a valid DID: {source}"))]
    BadDid {
        text: String,
        source: entities::Error,
    },
    #[snafu(display("{text} is not a valid handle: {source}"))]
    BadHandle {
        text: String,
        source: entities::Error,
    },
    #[snafu(display("Password rejected: {source}"))]
    BadPassword { source: entities::Error },
    #[snafu(display("{text} is not a valid user ID: {source}"))]
    BadUserId { text: String, source: uuid::Error },
    #[snafu(display("{text} is not a valid username"))]
    BadUsername {
        text: String,
        source: entities::Error,
    },
    #[snafu(display("Failed to check the password for {user_id}: {source}"))]
    CheckPassword {
        user_id: UserId,
        source: entities::Error,
    },
    #[snafu(display("Failed to delete user {user_id}: {source}"))]
    DeleteUser {
        user_id: UserId,
        source: storage::Error,
    },
    #[snafu(display("{user_id} attempted to follow {target}: {source}"))]
    Follow {
        user_id: UserId,
        target: UserId,
        source: storage::Error,
    },
    #[snafu(display("User {caller} may not modify user {user_id}"))]
    Forbidden {
        caller: UserId,
        user_id: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid credentials"))]
    InvalidCredentials { backtrace: Backtrace },
    #[snafu(display("Failed to look up a user: {source}"))]
    Lookup { source: storage::Error },
    #[snafu(display("Failed to create user: {source}"))]
    NewUser { source: entities::Error },
    #[snafu(display("No signing keys available: {source}"))]
    NoKeys { source: signing_keys::Error },
    #[snafu(display("{source}"))]
    NoPepper { source: peppers::Error },
    #[snafu(display("No user {user_id}"))]
    NoSuchUser {
        user_id: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("Users may not follow themselves"))]
    SelfFollow { backtrace: Backtrace },
    #[snafu(display("Failed to compute stats for {user_id}: {source}"))]
    Stats {
        user_id: UserId,
        source: storage::Error,
    },
    #[snafu(display("Failed to mint a token for user {user_id}: {source}"))]
    Token {
        user_id: UserId,
        #[snafu(source(from(token::Error, Box::new)))]
        source: Box<token::Error>,
    },
    #[snafu(display("{user_id} failed to unfollow {target}: {source}"))]
    Unfollow {
        user_id: UserId,
        target: UserId,
        source: storage::Error,
    },
    #[snafu(display("Failed to update user {user_id}: {source}"))]
    UpdateUser {
        user_id: UserId,
        source: storage::Error,
    },
    #[snafu(display("Failed to fetch posts for {user_id}: {source}"))]
    UserPosts {
        user_id: UserId,
        source: storage::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Uniqueness violations are the caller's problem; anything else from storage is ours
fn claim_status(err: &storage::Error) -> Option<(StatusCode, String)> {
    match err {
        storage::Error::EmailClaimed { .. } => Some((
            StatusCode::BAD_REQUEST,
            "Email already registered".to_owned(),
        )),
        storage::Error::UsernameClaimed { .. } => {
            Some((StatusCode::BAD_REQUEST, "Username already taken".to_owned()))
        }
        storage::Error::HandleClaimed { .. } => {
            Some((StatusCode::BAD_REQUEST, "Handle already taken".to_owned()))
        }
        storage::Error::DidClaimed { .. } => {
            Some((StatusCode::BAD_REQUEST, "DID already registered".to_owned()))
        }
        _ => None,
    }
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::AddUser { source } => claim_status(source).unwrap_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create user".to_owned(),
            )),
            Error::BadBody { .. } => (StatusCode::BAD_REQUEST, "invalid input".to_owned()),
            Error::BadDid { .. } => (
                StatusCode::BAD_REQUEST,
                "did must be at least 3 characters".to_owned(),
            ),
            Error::BadEmail { .. } => (StatusCode::BAD_REQUEST, "Invalid email format".to_owned()),
            Error::BadHandle { .. } => (
                StatusCode::BAD_REQUEST,
                "handle must be at least 3 characters".to_owned(),
            ),
            Error::BadPassword { source } => (StatusCode::BAD_REQUEST, format!("{}", source)),
            Error::BadUserId { .. } => (StatusCode::BAD_REQUEST, "Invalid user ID".to_owned()),
            Error::BadUsername { .. } => (
                StatusCode::BAD_REQUEST,
                "Usernames must be 3-64 ASCII characters: a letter followed by letters, digits, \
                 '-', '_' or '.'"
                    .to_owned(),
            ),
            Error::DeleteUser {
                source: storage::Error::NoSuchUser { .. },
                ..
            }
            | Error::Follow {
                source: storage::Error::NoSuchUser { .. },
                ..
            }
            | Error::NoSuchUser { .. } => (StatusCode::NOT_FOUND, "User not found".to_owned()),
            Error::Follow { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to follow user".to_owned(),
            ),
            Error::Forbidden { .. } => (
                StatusCode::FORBIDDEN,
                "You may only modify your own account".to_owned(),
            ),
            Error::InvalidCredentials { .. } => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_owned())
            }
            Error::SelfFollow { .. } => {
                (StatusCode::BAD_REQUEST, "cannot follow yourself".to_owned())
            }
            Error::Stats { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch user stats".to_owned(),
            ),
            Error::Unfollow { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to unfollow user".to_owned(),
            ),
            Error::UpdateUser { source, .. } => match source {
                storage::Error::NoSuchUser { .. } => {
                    (StatusCode::NOT_FOUND, "User not found".to_owned())
                }
                err => claim_status(err).unwrap_or((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to update user".to_owned(),
                )),
            },
            Error::UserPosts { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch user posts".to_owned(),
            ),
            Error::CheckPassword { .. }
            | Error::DeleteUser { .. }
            | Error::Lookup { .. }
            | Error::NewUser { .. }
            | Error::NoKeys { .. }
            | Error::NoPepper { .. }
            | Error::Token { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_owned(),
            ),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        if code.is_server_error() {
            error!("{:?}", self);
        } else {
            info!("{}", self);
        }
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

fn parse_user_id(text: &str) -> Result<UserId> {
    UserId::new(text).context(BadUserIdSnafu { text })
}

async fn lookup(storage: &(dyn StorageBackend + Send + Sync), user_id: &UserId) -> Result<User> {
    storage
        .user_by_id(user_id)
        .await
        .context(LookupSnafu)?
        .context(NoSuchUserSnafu { user_id: *user_id })
}

fn mint_for(state: &Claroz, user: &User) -> Result<String> {
    let (keyid, signing_key) = state.signing_keys.current().context(NoKeysSnafu)?;
    mint_token(
        &user.id(),
        &keyid,
        &signing_key,
        &state.issuer,
        &state.token_lifetime,
    )
    .context(TokenSnafu { user_id: user.id() })
}

/// Returned from both registration & login
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuthRsp {
    pub token: String,
    pub user: User,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     `/api/v1/auth/register`                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "users.signups.successful", users_signups_successful, Sort::IntegralCounter }
define_metric! { "users.signups.failures", users_signups_failures, Sort::IntegralCounter }

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterReq {
    username: String,
    email: String,
    password: SecretString,
    full_name: Option<String>,
}

/// Register as a new local user
///
/// Usernames & e-mail addresses must be unique; passwords must be at least six characters long &
/// may not begin or end in whitespace. The response carries a token good for the rest of the API.
async fn register(
    State(state): State<Arc<Claroz>>,
    body: std::result::Result<Json<RegisterReq>, JsonRejection>,
) -> axum::response::Response {
    async fn register1(
        state: &Claroz,
        body: std::result::Result<Json<RegisterReq>, JsonRejection>,
    ) -> Result<AuthRsp> {
        let Json(req) = body.context(BadBodySnafu)?;
        let username = Username::new(&req.username).context(BadUsernameSnafu {
            text: req.username.clone(),
        })?;
        let email = UserEmail::new(&req.email).context(BadEmailSnafu {
            text: req.email.clone(),
        })?;
        let (pepper_ver, pepper) = state.pepper.current_pepper().context(NoPepperSnafu)?;
        let user = User::new_local(
            &pepper_ver,
            &pepper,
            &username,
            &email,
            &req.password,
            req.full_name.as_deref(),
        )
        .map_err(|err| match err {
            entities::Error::PasswordTooShort { .. } | entities::Error::PasswordWhitespace { .. } => {
                BadPasswordSnafu.into_error(err)
            }
            err => NewUserSnafu.into_error(err),
        })?;
        state.storage.add_user(&user).await.context(AddUserSnafu)?;
        Ok(AuthRsp {
            token: mint_for(state, &user)?,
            user,
        })
    }

    match register1(&state, body).await {
        Ok(rsp) => {
            info!("Registered user {}", rsp.user.id());
            users_signups_successful.add(1, &[]);
            (StatusCode::CREATED, Json(rsp)).into_response()
        }
        Err(err) => {
            users_signups_failures.add(1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `/api/v1/auth/login`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "users.logins.successful", users_logins_successful, Sort::IntegralCounter }
define_metric! { "users.logins.failures", users_logins_failures, Sort::IntegralCounter }

#[derive(Clone, Debug, Deserialize)]
pub struct LoginReq {
    email: String,
    password: SecretString,
}

/// Exchange an e-mail address & password for a token
///
/// An unknown e-mail, a wrong password & an account with no password (i.e. a remote user) are
/// indistinguishable to the caller.
async fn login(
    State(state): State<Arc<Claroz>>,
    body: std::result::Result<Json<LoginReq>, JsonRejection>,
) -> axum::response::Response {
    async fn login1(
        state: &Claroz,
        body: std::result::Result<Json<LoginReq>, JsonRejection>,
    ) -> Result<AuthRsp> {
        let Json(req) = body.context(BadBodySnafu)?;
        let email = match UserEmail::new(&req.email) {
            Ok(email) => email,
            Err(_) => return InvalidCredentialsSnafu.fail(),
        };
        let user = state
            .storage
            .user_by_email(&email)
            .await
            .context(LookupSnafu)?
            .context(InvalidCredentialsSnafu)?;
        match user.check_password(&state.pepper, req.password) {
            Ok(()) => (),
            Err(entities::Error::BadPassword { .. }) | Err(entities::Error::NoCredentials { .. }) => {
                return InvalidCredentialsSnafu.fail()
            }
            Err(err) => return Err(CheckPasswordSnafu { user_id: user.id() }.into_error(err)),
        }
        Ok(AuthRsp {
            token: mint_for(state, &user)?,
            user,
        })
    }

    match login1(&state, body).await {
        Ok(rsp) => {
            info!("User {} logged in", rsp.user.id());
            users_logins_successful.add(1, &[]);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            users_logins_failures.add(1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          `/api/v1/users`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// `GET /users/me`
async fn me(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
) -> axum::response::Response {
    match lookup(state.storage.as_ref(), &caller).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /users/{id}`
async fn get_user(
    State(state): State<Arc<Claroz>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn get_user1(state: &Claroz, id: &str) -> Result<User> {
        lookup(state.storage.as_ref(), &parse_user_id(id)?).await
    }

    match get_user1(&state, &id).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UpdateUserReq {
    pub username: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    /// A local user may name an AT Protocol identity of their own
    pub did: Option<String>,
    pub handle: Option<String>,
}

/// `PUT /users/{id}`: callers may only update themselves
async fn update_user(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path(id): Path<String>,
    body: std::result::Result<Json<UpdateUserReq>, JsonRejection>,
) -> axum::response::Response {
    async fn update_user1(
        state: &Claroz,
        caller: UserId,
        id: &str,
        body: std::result::Result<Json<UpdateUserReq>, JsonRejection>,
    ) -> Result<User> {
        let user_id = parse_user_id(id)?;
        ensure!(caller == user_id, ForbiddenSnafu { caller, user_id });
        let Json(req) = body.context(BadBodySnafu)?;
        let mut user = lookup(state.storage.as_ref(), &user_id).await?;
        if let Some(text) = req.username {
            user.set_username(&Username::new(&text).context(BadUsernameSnafu { text })?);
        }
        if let Some(text) = req.email {
            user.set_email(&UserEmail::new(&text).context(BadEmailSnafu { text })?);
        }
        if let Some(full_name) = req.full_name {
            user.set_full_name(&full_name);
        }
        if let Some(bio) = req.bio {
            user.set_bio(&bio);
        }
        if let Some(avatar) = req.avatar {
            user.set_avatar(&avatar);
        }
        if let Some(text) = req.did {
            user.set_did(&Did::new(&text).context(BadDidSnafu { text })?);
        }
        if let Some(text) = req.handle {
            user.set_handle(&Handle::new(&text).context(BadHandleSnafu { text })?);
        }
        state
            .storage
            .update_user(&user)
            .await
            .context(UpdateUserSnafu { user_id })?;
        Ok(user)
    }

    match update_user1(&state, caller, &id, body).await {
        Ok(user) => {
            info!("Updated user {}", user.id());
            (StatusCode::OK, Json(user)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// `DELETE /users/{id}`: a soft delete, and only of oneself
async fn delete_user(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn delete_user1(state: &Claroz, caller: UserId, id: &str) -> Result<()> {
        let user_id = parse_user_id(id)?;
        ensure!(caller == user_id, ForbiddenSnafu { caller, user_id });
        state
            .storage
            .delete_user(&user_id)
            .await
            .context(DeleteUserSnafu { user_id })
    }

    match delete_user1(&state, caller, &id).await {
        Ok(()) => {
            info!("Deleted user {}", caller);
            MessageRsp::new("User deleted successfully").into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// `GET /users/{id}/posts`
async fn user_posts(
    State(state): State<Arc<Claroz>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn user_posts1(state: &Claroz, id: &str) -> Result<Vec<PostDetails>> {
        let user_id = parse_user_id(id)?;
        let storage = state.storage.as_ref();
        let posts = storage
            .posts_for_user(&user_id)
            .await
            .context(UserPostsSnafu { user_id })?;
        posts_details(storage, posts)
            .await
            .context(UserPostsSnafu { user_id })
    }

    match user_posts1(&state, &id).await {
        Ok(posts) => (StatusCode::OK, Json(posts)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UserStats {
    pub followers: usize,
    pub following: usize,
    /// Whether the caller follows this user
    pub is_following: bool,
}

/// `GET /users/{id}/stats`
async fn user_stats(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn user_stats1(state: &Claroz, caller: UserId, id: &str) -> Result<UserStats> {
        let user_id = parse_user_id(id)?;
        let storage = state.storage.as_ref();
        lookup(storage, &user_id).await?;
        Ok(UserStats {
            followers: storage
                .follower_count(&user_id)
                .await
                .context(StatsSnafu { user_id })?,
            following: storage
                .following_count(&user_id)
                .await
                .context(StatsSnafu { user_id })?,
            is_following: storage
                .is_following(&caller, &user_id)
                .await
                .context(StatsSnafu { user_id })?,
        })
    }

    match user_stats1(&state, caller, &id).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(err) => err.into_response(),
    }
}

define_metric! { "users.follows", users_follows, Sort::IntegralCounter }
define_metric! { "users.unfollows", users_unfollows, Sort::IntegralCounter }

/// `POST /users/{id}/follow`
async fn follow(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn follow1(state: &Claroz, caller: UserId, id: &str) -> Result<()> {
        let target = parse_user_id(id)?;
        ensure!(caller != target, SelfFollowSnafu);
        state
            .storage
            .add_follow(&caller, &target)
            .await
            .context(FollowSnafu {
                user_id: caller,
                target,
            })
    }

    match follow1(&state, caller, &id).await {
        Ok(()) => {
            users_follows.add(1, &[]);
            MessageRsp::new("user followed successfully").into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// `DELETE /users/{id}/follow`
async fn unfollow(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn unfollow1(state: &Claroz, caller: UserId, id: &str) -> Result<()> {
        let target = parse_user_id(id)?;
        state
            .storage
            .remove_follow(&caller, &target)
            .await
            .context(UnfollowSnafu {
                user_id: caller,
                target,
            })
    }

    match unfollow1(&state, caller, &id).await {
        Ok(()) => {
            users_unfollows.add(1, &[]);
            MessageRsp::new("user unfollowed successfully").into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Return a router for the auth & users endpoints
pub fn make_router(state: Arc<Claroz>) -> Router<Arc<Claroz>> {
    Router::new()
        .route("/users/me", get(me))
        .route(
            "/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/users/{id}/posts", get(user_posts))
        .route("/users/{id}/stats", get(user_stats))
        .route("/users/{id}/follow", post(follow).delete(unfollow))
        .route_layer(from_fn_with_state(state.clone(), authenticate))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_statuses() {
        assert_eq!(
            (
                StatusCode::BAD_REQUEST,
                "Email already registered".to_owned()
            ),
            AddUserSnafu
                .into_error(
                    storage::EmailClaimedSnafu {
                        email: UserEmail::new("john@example.com").unwrap()
                    }
                    .build()
                )
                .as_status_and_msg()
        );
        assert_eq!(
            StatusCode::NOT_FOUND,
            FollowSnafu {
                user_id: UserId::default(),
                target: UserId::default()
            }
            .into_error(
                storage::NoSuchUserSnafu {
                    user_id: UserId::default()
                }
                .build()
            )
            .as_status_and_msg()
            .0
        );
        assert_eq!(
            StatusCode::BAD_REQUEST,
            parse_user_id("not-a-uuid").unwrap_err().as_status_and_msg().0
        );
        let user_id = UserId::default();
        assert_eq!(
            (StatusCode::BAD_REQUEST, "Handle already taken".to_owned()),
            UpdateUserSnafu { user_id }
                .into_error(
                    storage::HandleClaimedSnafu {
                        handle: Handle::new("alice.bsky.social").unwrap()
                    }
                    .build()
                )
                .as_status_and_msg()
        );
        assert_eq!(
            (StatusCode::BAD_REQUEST, "DID already registered".to_owned()),
            UpdateUserSnafu { user_id }
                .into_error(
                    storage::DidClaimedSnafu {
                        did: Did::new("did:plc:alice").unwrap()
                    }
                    .build()
                )
                .as_status_and_msg()
        );
    }
}
