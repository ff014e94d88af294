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

//! # claroz models
//!
//! ## Introduction
//!
//! I hate these sort of "catch-all" modules named "models" or "entities", but these types are truly
//! foundational: users (local & remote), posts, comments, likes & follows, along with the refined
//! string types from which they're built.
//!
//! Each refined type can only be constructed through a validating constructor, and implements
//! [Deserialize] (and the sqlx traits) by hand so that neither a request body nor a database row
//! can smuggle in an invalid value.

use std::{fmt::Display, ops::Deref, str::FromStr};

use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use lazy_static::lazy_static;
use password_hash::{rand_core::OsRng, PasswordHashString, SaltString};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace, IntoError};
use uuid::Uuid;

use crate::{
    peppers::{self, Pepper, Peppers, Version as PepperVersion},
    util::mk_serde_de_err,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a valid DID"))]
    BadDid { text: String, backtrace: Backtrace },
    #[snafu(display("{email} is not a valid e-mail address"))]
    BadEmail { email: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid federation type"))]
    BadFederationType { text: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid handle"))]
    BadHandle { text: String, backtrace: Backtrace },
    #[snafu(display("Incorrect password"))]
    BadPassword { backtrace: Backtrace },
    #[snafu(display("{name} is not a valid claroz username"))]
    BadUsername { name: String, backtrace: Backtrace },
    #[snafu(display("Failed to check the password for user {id}: {source}"))]
    CheckPassword {
        id: UserId,
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Comments may not be empty"))]
    EmptyComment { backtrace: Backtrace },
    #[snafu(display("Failed to hash password: {source}"))]
    HashPassword {
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Bad hash string: {source}"))]
    HashString {
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to build an Argon2id password hasher: {source}"))]
    Hasher {
        source: argon2::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("User {id} has no local credentials"))]
    NoCredentials { id: UserId, backtrace: Backtrace },
    #[snafu(display("No pepper found for user {id}: {source}"))]
    NoPepper {
        id: UserId,
        source: peppers::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Passwords must be at least {min} characters in length"))]
    PasswordTooShort { min: usize, backtrace: Backtrace },
    #[snafu(display("Passwords may not begin or end in whitespace"))]
    PasswordWhitespace { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

/// Boilerplate shared by the refined string types in this module
///
/// The type must provide `TryFrom<String, Error = Error>` & be a newtype around [String]; this
/// macro fills in the rest.
macro_rules! refined_string {
    ($type_name:ident) => {
        impl AsRef<str> for $type_name {
            fn as_ref(&self) -> &str {
                self.deref()
            }
        }
        impl Deref for $type_name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
        // Implement `Deserialize` by hand to fail if the serialized value isn't legit
        impl<'de> Deserialize<'de> for $type_name {
            fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                $type_name::try_from(s).map_err(mk_serde_de_err::<'de, D>)
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl FromStr for $type_name {
            type Err = Error;

            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                $type_name::try_from(s.to_owned())
            }
        }
        impl From<$type_name> for String {
            fn from(value: $type_name) -> Self {
                value.0
            }
        }
        crate::pg_text_type!($type_name);
    };
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Declare a type intended to be used as an opaque identifier for some other sort of entity
///
/// I could have just used [Uuid] directly, but I couldn't bring myself to use the same type to
/// identify users, posts, comments & likes all at once. [Display] formats the hyphenated form, which
/// is also what appears on the wire & in URL paths.
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            Deserialize,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            Serialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $type_name(Uuid);
        impl $type_name {
            pub fn new(s: &str) -> StdResult<$type_name, uuid::Error> {
                Ok($type_name(Uuid::parse_str(s)?))
            }
        }
        impl Default for $type_name {
            fn default() -> Self {
                $type_name(Uuid::new_v4())
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }
        impl FromStr for $type_name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                $type_name::new(s)
            }
        }
        impl AsRef<Uuid> for $type_name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
        impl From<Uuid> for $type_name {
            fn from(value: Uuid) -> Self {
                $type_name(value)
            }
        }
        impl From<$type_name> for Uuid {
            fn from(value: $type_name) -> Self {
                value.0
            }
        }
    };
}

define_id!(UserId);
define_id!(PostId);
define_id!(CommentId);
define_id!(LikeId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Username                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

// claroz usernames must be ASCII, may be from three to sixty-four chacacters in length, and must
// match the regex "^[a-zA-Z][-_.a-zA-Z0-9]+$".
const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 64;

lazy_static! {
    static ref USERNAME: Regex = Regex::new("^[a-zA-Z][-_.a-zA-Z0-9]+$").unwrap(/* known good */);
}

fn check_username(s: &str) -> bool {
    s.is_ascii()
        && s.len() >= MIN_USERNAME_LENGTH
        && s.len() <= MAX_USERNAME_LENGTH
        && USERNAME.is_match(s)
}

/// A refined type representing a claroz username
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Construct a [Username] from a `&str`; to *move* a [String] into a [Username] use
    /// [TryFrom::try_from()]
    pub fn new(name: &str) -> Result<Username> {
        Username::try_from(name.to_owned())
    }
}

impl TryFrom<String> for Username {
    type Error = Error;

    fn try_from(name: String) -> StdResult<Self, Self::Error> {
        if check_username(&name) {
            Ok(Username(name))
        } else {
            BadUsernameSnafu { name }.fail()
        }
    }
}

refined_string!(Username);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           UserEmail                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type representing an e-mail address
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn new(email: &str) -> Result<UserEmail> {
        UserEmail::try_from(email.to_owned())
    }
}

impl TryFrom<String> for UserEmail {
    type Error = Error;

    fn try_from(email: String) -> StdResult<Self, Self::Error> {
        if EmailAddress::is_valid(&email) {
            Ok(UserEmail(email))
        } else {
            BadEmailSnafu { email }.fail()
        }
    }
}

refined_string!(UserEmail);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                   Federated identity: Did & Handle                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The shortest DID or handle claroz will look up
pub const MIN_REMOTE_ID_LENGTH: usize = 3;

fn check_remote_id(s: &str) -> bool {
    s.chars().count() >= MIN_REMOTE_ID_LENGTH
}

/// A decentralized identifier (e.g. "did:plc:ewvi7nxzyoun6zhxrhs64oiz")
///
/// claroz treats DIDs as opaque; the only requirement is a minimum length.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    pub fn new(text: &str) -> Result<Did> {
        Did::try_from(text.to_owned())
    }
}

impl TryFrom<String> for Did {
    type Error = Error;

    fn try_from(text: String) -> StdResult<Self, Self::Error> {
        if check_remote_id(&text) {
            Ok(Did(text))
        } else {
            BadDidSnafu { text }.fail()
        }
    }
}

refined_string!(Did);

/// A remote handle (e.g. "alice.bsky.social")
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    pub fn new(text: &str) -> Result<Handle> {
        Handle::try_from(text.to_owned())
    }
}

impl TryFrom<String> for Handle {
    type Error = Error;

    fn try_from(text: String) -> StdResult<Self, Self::Error> {
        if check_remote_id(&text) {
            Ok(Handle(text))
        } else {
            BadHandleSnafu { text }.fail()
        }
    }
}

refined_string!(Handle);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         FederationType                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Where a user record came from
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FederationType {
    /// Registered here; has credentials
    #[default]
    Local,
    /// Projected from a remote profile; has none
    Remote,
}

impl AsRef<str> for FederationType {
    fn as_ref(&self) -> &str {
        match self {
            FederationType::Local => "local",
            FederationType::Remote => "remote",
        }
    }
}

impl Display for FederationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl TryFrom<String> for FederationType {
    type Error = Error;

    fn try_from(text: String) -> StdResult<Self, Self::Error> {
        match text.as_str() {
            "local" => Ok(FederationType::Local),
            "remote" => Ok(FederationType::Remote),
            _ => BadFederationTypeSnafu { text }.fail(),
        }
    }
}

crate::pg_text_type!(FederationType);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         UserHashString                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Newtype idiom to work around Rust's orphaned trait rule
///
/// I've chosen to store the hash string as a [PasswordHashString], rather than a [PasswordHash],
/// since the latter borrows.
#[derive(Clone, Debug, PartialEq)]
pub struct UserHashString(PasswordHashString);

impl UserHashString {
    pub fn password_hash(&self) -> PasswordHash<'_> {
        self.0.password_hash()
    }
}

impl AsRef<str> for UserHashString {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for UserHashString {
    type Error = Error;

    fn try_from(s: String) -> StdResult<Self, Self::Error> {
        Ok(UserHashString(
            PasswordHashString::new(&s).context(HashStringSnafu)?,
        ))
    }
}

crate::pg_text_type!(UserHashString);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              User                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MIN_PASSWORD_LENGTH: usize = 6;

/// Represents a claroz user
///
/// Local users register with a username, e-mail & password. Remote users are projections of an AT
/// Protocol profile: they carry a DID & handle but no credentials, so they can never log in.
///
/// The password hash & pepper version never leave the process; they're skipped on serialization.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, sqlx::FromRow)]
pub struct User {
    id: UserId,
    username: Option<Username>,
    email: Option<UserEmail>,
    #[serde(skip)]
    password_hash: Option<UserHashString>,
    #[serde(skip)]
    pepper_version: Option<PepperVersion>,
    full_name: String,
    bio: String,
    avatar: String,
    did: Option<Did>,
    handle: Option<Handle>,
    federation_type: FederationType,
    last_federation_sync: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    deleted_at: Option<DateTime<Utc>>,
}

/// Apply password validation rules
///
/// Passwords must be at least six characters, and may not begin or end with whitespace since
/// that's likely to be a mistake on the caller's part that will drive them bonkers when they try
/// to login.
fn validate_password(password: &SecretString) -> Result<()> {
    let text = password.expose_secret();
    if text.starts_with(|c: char| c.is_whitespace()) || text.ends_with(|c: char| c.is_whitespace())
    {
        return PasswordWhitespaceSnafu.fail();
    }
    if text.chars().count() < MIN_PASSWORD_LENGTH {
        return PasswordTooShortSnafu {
            min: MIN_PASSWORD_LENGTH,
        }
        .fail();
    }
    Ok(())
}

impl User {
    /// Create a new local [User]
    ///
    /// This constructor validates & hashes the password but does *not* check the uniqueness of
    /// the username or e-mail; that's the storage layer's job.
    pub fn new_local(
        pepper_version: &PepperVersion,
        pepper: &Pepper,
        username: &Username,
        email: &UserEmail,
        password: &SecretString,
        full_name: Option<&str>,
    ) -> Result<User> {
        validate_password(password)?;
        let password_hash = User::hash_password(pepper, password)?;
        let now = Utc::now();
        Ok(User {
            id: UserId::default(),
            username: Some(username.clone()),
            email: Some(email.clone()),
            password_hash: Some(UserHashString(password_hash)),
            pepper_version: Some(pepper_version.clone()),
            full_name: full_name.unwrap_or_default().to_owned(),
            bio: String::new(),
            avatar: String::new(),
            did: None,
            handle: None,
            federation_type: FederationType::Local,
            last_federation_sync: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }
    /// Create a new remote [User] from the fields of a remote profile
    pub fn new_remote(did: Did, handle: Handle, full_name: &str, bio: &str, avatar: &str) -> User {
        let now = Utc::now();
        User {
            id: UserId::default(),
            username: None,
            email: None,
            password_hash: None,
            pepper_version: None,
            full_name: full_name.to_owned(),
            bio: bio.to_owned(),
            avatar: avatar.to_owned(),
            did: Some(did),
            handle: Some(handle),
            federation_type: FederationType::Remote,
            last_federation_sync: Some(now),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
    /// Overwrite the mutable display fields from a freshly-fetched remote profile
    ///
    /// `id`, `did` & `federation_type` are left alone.
    pub fn sync_profile(&mut self, handle: Handle, full_name: &str, bio: &str, avatar: &str) {
        let now = Utc::now();
        self.handle = Some(handle);
        self.full_name = full_name.to_owned();
        self.bio = bio.to_owned();
        self.avatar = avatar.to_owned();
        self.last_federation_sync = Some(now);
        self.updated_at = now;
    }
    /// Validate a password
    ///
    /// Remote users have no credentials & always fail.
    pub fn check_password(&self, peppers: &Peppers, password: SecretString) -> Result<()> {
        let (hash, version) = match (&self.password_hash, &self.pepper_version) {
            (Some(hash), Some(version)) => (hash, version),
            _ => return NoCredentialsSnafu { id: self.id }.fail(),
        };
        let pepper = peppers
            .find_by_version(version)
            .context(NoPepperSnafu { id: self.id })?;
        let hasher = User::create_password_hasher(&pepper)?;
        match hasher.verify_password(password.expose_secret().as_bytes(), &hash.password_hash()) {
            Ok(_) => Ok(()),
            Err(password_hash::errors::Error::Password) => BadPasswordSnafu.fail(),
            Err(err) => Err(CheckPasswordSnafu { id: self.id }.into_error(err)),
        }
    }
    pub fn avatar(&self) -> &str {
        &self.avatar
    }
    pub fn bio(&self) -> &str {
        &self.bio
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
    pub fn did(&self) -> Option<&Did> {
        self.did.as_ref()
    }
    pub fn email(&self) -> Option<&UserEmail> {
        self.email.as_ref()
    }
    pub fn federation_type(&self) -> FederationType {
        self.federation_type
    }
    pub fn full_name(&self) -> &str {
        &self.full_name
    }
    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }
    pub fn hash(&self) -> Option<&UserHashString> {
        self.password_hash.as_ref()
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    pub fn last_federation_sync(&self) -> Option<DateTime<Utc>> {
        self.last_federation_sync
    }
    pub fn pepper_version(&self) -> Option<&PepperVersion> {
        self.pepper_version.as_ref()
    }
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
    pub fn username(&self) -> Option<&Username> {
        self.username.as_ref()
    }
    pub fn set_avatar(&mut self, avatar: &str) {
        self.avatar = avatar.to_owned();
        self.updated_at = Utc::now();
    }
    pub fn set_bio(&mut self, bio: &str) {
        self.bio = bio.to_owned();
        self.updated_at = Utc::now();
    }
    pub fn set_did(&mut self, did: &Did) {
        self.did = Some(did.clone());
        self.updated_at = Utc::now();
    }
    pub fn set_email(&mut self, email: &UserEmail) {
        self.email = Some(email.clone());
        self.updated_at = Utc::now();
    }
    pub fn set_full_name(&mut self, full_name: &str) {
        self.full_name = full_name.to_owned();
        self.updated_at = Utc::now();
    }
    pub fn set_handle(&mut self, handle: &Handle) {
        self.handle = Some(handle.clone());
        self.updated_at = Utc::now();
    }
    pub fn set_username(&mut self, username: &Username) {
        self.username = Some(username.clone());
        self.updated_at = Utc::now();
    }
    /// Soft-delete this user
    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
    /// Create a claroz user password hasher
    ///
    /// Argon2id with the pepper supplied as the `secret` & the crate's default parameters
    /// (m=19456 (19 MiB), t=2, p=1), which comport with the OWASP Password Storage [Cheat Sheet].
    ///
    /// [Cheat Sheet]: https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html#password-hashing-algorithms
    fn create_password_hasher(pepper: &Pepper) -> Result<Argon2<'_>> {
        Argon2::new_with_secret(
            pepper.as_ref().expose_secret(),
            Algorithm::Argon2id,
            Version::default(),
            Params::default(),
        )
        .context(HasherSnafu)
    }
    /// Salt & hash a password
    fn hash_password(pepper: &Pepper, password: &SecretString) -> Result<PasswordHashString> {
        let salt = SaltString::generate(&mut OsRng);
        let hasher = User::create_password_hasher(pepper)?;
        Ok(hasher
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .context(HashPasswordSnafu)?
            .serialize())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Post                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An image post
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, sqlx::FromRow)]
pub struct Post {
    id: PostId,
    user_id: UserId,
    caption: String,
    image_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    deleted_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn new(user_id: &UserId, caption: &str, image_url: &str) -> Post {
        let now = Utc::now();
        Post {
            id: PostId::default(),
            user_id: *user_id,
            caption: caption.to_owned(),
            image_url: image_url.to_owned(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
    pub fn caption(&self) -> &str {
        &self.caption
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
    pub fn id(&self) -> PostId {
        self.id
    }
    pub fn image_url(&self) -> &str {
        &self.image_url
    }
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       Comments & Likes                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, sqlx::FromRow)]
pub struct Comment {
    id: CommentId,
    post_id: PostId,
    user_id: UserId,
    content: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(post_id: &PostId, user_id: &UserId, content: &str) -> Result<Comment> {
        ensure!(!content.trim().is_empty(), EmptyCommentSnafu);
        let now = Utc::now();
        Ok(Comment {
            id: CommentId::default(),
            post_id: *post_id,
            user_id: *user_id,
            content: content.to_owned(),
            created_at: now,
            updated_at: now,
        })
    }
    pub fn content(&self) -> &str {
        &self.content
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn id(&self) -> CommentId {
        self.id
    }
    pub fn post_id(&self) -> PostId {
        self.post_id
    }
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

/// At most one per (post, user)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, sqlx::FromRow)]
pub struct Like {
    id: LikeId,
    post_id: PostId,
    user_id: UserId,
    created_at: DateTime<Utc>,
}

impl Like {
    pub fn new(post_id: &PostId, user_id: &UserId) -> Like {
        Like {
            id: LikeId::default(),
            post_id: *post_id,
            user_id: *user_id,
            created_at: Utc::now(),
        }
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn id(&self) -> LikeId {
        self.id
    }
    pub fn post_id(&self) -> PostId {
        self.post_id
    }
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       Views for the API                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A like or comment served along with its author
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Attributed<T> {
    #[serde(flatten)]
    pub item: T,
    pub user: User,
}

/// A post as served by the API: with its author, its likes & its comments
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PostDetails {
    #[serde(flatten)]
    pub post: Post,
    pub user: User,
    pub like_count: usize,
    pub likes: Vec<Attributed<Like>>,
    pub comments: Vec<Attributed<Comment>>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_pepper() -> (PepperVersion, Pepper, Peppers) {
        let version = PepperVersion::new("pepper-ver:20250212").unwrap();
        let pepper = Pepper::new((0u8..32).collect()).unwrap();
        let peppers = Peppers::from([(version.clone(), pepper.clone())]);
        (version, pepper, peppers)
    }

    #[test]
    fn usernames() {
        assert!(Username::new("johndoe").is_ok());
        assert!(Username::new("jd").is_err());
        assert!(Username::new("1johndoe").is_err());
        assert!(Username::new("john doe").is_err());
        assert!(Username::new(&"j".repeat(65)).is_err());
        assert!(serde_json::from_str::<Username>("\"x\"").is_err());
    }

    #[test]
    fn emails() {
        assert!(UserEmail::new("john@example.com").is_ok());
        assert!(UserEmail::new("not an email").is_err());
    }

    #[test]
    fn remote_ids() {
        assert!(Did::new("did:plc:x").is_ok());
        assert!(Did::new("ab").is_err());
        assert!(Handle::new("").is_err());
        assert!(Handle::new("new.example").is_ok());
    }

    #[test]
    fn passwords() {
        let (version, pepper, peppers) = test_pepper();
        let username = Username::new("johndoe").unwrap();
        let email = UserEmail::new("john@example.com").unwrap();

        assert!(matches!(
            User::new_local(
                &version,
                &pepper,
                &username,
                &email,
                &SecretString::from("short"),
                None
            ),
            Err(Error::PasswordTooShort { .. })
        ));
        assert!(matches!(
            User::new_local(
                &version,
                &pepper,
                &username,
                &email,
                &SecretString::from(" password123"),
                None
            ),
            Err(Error::PasswordWhitespace { .. })
        ));

        let user = User::new_local(
            &version,
            &pepper,
            &username,
            &email,
            &SecretString::from("password123"),
            Some("John Doe"),
        )
        .unwrap();
        assert_eq!(FederationType::Local, user.federation_type());
        assert_eq!("John Doe", user.full_name());
        assert!(user
            .check_password(&peppers, SecretString::from("password123"))
            .is_ok());
        assert!(matches!(
            user.check_password(&peppers, SecretString::from("password124")),
            Err(Error::BadPassword { .. })
        ));
    }

    #[test]
    fn remote_users_cannot_log_in() {
        let (_, _, peppers) = test_pepper();
        let user = User::new_remote(
            Did::new("did:plc:new").unwrap(),
            Handle::new("new.example").unwrap(),
            "New",
            "A bio",
            "https://cdn.example/avatar.jpg",
        );
        assert_eq!(FederationType::Remote, user.federation_type());
        assert!(user.last_federation_sync().is_some());
        assert!(user.username().is_none());
        assert!(matches!(
            user.check_password(&peppers, SecretString::from("anything")),
            Err(Error::NoCredentials { .. })
        ));
    }

    #[test]
    fn sync_leaves_identity_alone() {
        let mut user = User::new_remote(
            Did::new("did:plc:x").unwrap(),
            Handle::new("x.example").unwrap(),
            "X",
            "",
            "",
        );
        let (id, did) = (user.id(), user.did().cloned());
        user.sync_profile(Handle::new("y.example").unwrap(), "Updated", "bio", "avatar");
        assert_eq!(id, user.id());
        assert_eq!(did.as_ref(), user.did());
        assert_eq!("Updated", user.full_name());
        assert_eq!("y.example", user.handle().unwrap().as_ref());
        assert_eq!(FederationType::Remote, user.federation_type());
    }

    #[test]
    fn secrets_are_not_serialized() {
        let (version, pepper, _) = test_pepper();
        let user = User::new_local(
            &version,
            &pepper,
            &Username::new("johndoe").unwrap(),
            &UserEmail::new("john@example.com").unwrap(),
            &SecretString::from("password123"),
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("pepper_version").is_none());
        assert_eq!("local", json["federation_type"]);
        assert_eq!("johndoe", json["username"]);
    }

    #[test]
    fn post_details_shape() {
        let author = User::new_remote(
            Did::new("did:plc:x").unwrap(),
            Handle::new("x.example").unwrap(),
            "X",
            "",
            "",
        );
        let post = Post::new(&author.id(), "sunset", "/uploads/20250101-abc.jpg");
        let like = Like::new(&post.id(), &author.id());
        let comment = Comment::new(&post.id(), &author.id(), "Great post!").unwrap();
        let details = PostDetails {
            post: post.clone(),
            user: author.clone(),
            like_count: 1,
            likes: vec![Attributed {
                item: like,
                user: author.clone(),
            }],
            comments: vec![Attributed {
                item: comment,
                user: author.clone(),
            }],
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(post.id().to_string(), json["id"]);
        assert_eq!("sunset", json["caption"]);
        assert_eq!("/uploads/20250101-abc.jpg", json["image_url"]);
        assert_eq!(author.id().to_string(), json["user"]["id"]);
        assert_eq!("Great post!", json["comments"][0]["content"]);
        assert_eq!(author.id().to_string(), json["likes"][0]["user"]["id"]);

        let round: PostDetails = serde_json::from_value(json).unwrap();
        assert_eq!(post.id(), round.post.id());
    }

    #[test]
    fn empty_comments() {
        assert!(Comment::new(&PostId::default(), &UserId::default(), "  ").is_err());
    }
}
