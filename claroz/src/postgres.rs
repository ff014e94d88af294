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

//! # postgres
//!
//! The production [Backend]: PostgreSQL through a [sqlx] connection pool.
//!
//! The schema lives in `migrations/` & is applied at startup. Uniqueness of usernames, e-mail
//! addresses, handles & DIDs (among live users), and of likes, is expressed as unique indexes;
//! the names of those indexes are how a violation gets mapped back onto the right typed
//! [storage::Error](crate::storage::Error) variant.

use std::str::FromStr;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use tracing::info;

use crate::{
    entities::{Comment, CommentId, Did, Handle, Like, Post, PostId, User, UserEmail, UserId},
    storage::{
        self, AlreadyLikedSnafu, Backend, DidClaimedSnafu, EmailClaimedSnafu, HandleClaimedSnafu,
        NoSuchCommentSnafu, NoSuchPostSnafu, NoSuchUserSnafu, NotCommentAuthorSnafu,
        NotPostOwnerSnafu, UsernameClaimedSnafu,
    },
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to connect to PostgreSQL at {host}:{port}: {source}"))]
    Connect {
        host: String,
        port: u16,
        source: sqlx::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to apply database migrations: {source}"))]
    Migrate {
        source: sqlx::migrate::MigrateError,
        backtrace: Backtrace,
    },
    #[snafu(display("{text} is not a recognized SSL mode: {source}"))]
    SslMode {
        text: String,
        source: sqlx::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Where & how to reach PostgreSQL
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub dbname: String,
    pub sslmode: String,
    pub max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_owned(),
            port: 5432,
            user: "postgres".to_owned(),
            password: SecretString::from("postgres"),
            dbname: "claroz".to_owned(),
            sslmode: "disable".to_owned(),
            max_connections: 5,
        }
    }
}

impl Config {
    fn connect_options(&self) -> Result<PgConnectOptions> {
        let ssl_mode = PgSslMode::from_str(&self.sslmode).context(SslModeSnafu {
            text: self.sslmode.clone(),
        })?;
        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(self.password.expose_secret())
            .database(&self.dbname)
            .ssl_mode(ssl_mode))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Postgres                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

const USER_COLUMNS: &str = "id, username, email, password_hash, pepper_version, full_name, bio, \
                            avatar, did, handle, federation_type, last_federation_sync, \
                            created_at, updated_at, deleted_at";

const POST_COLUMNS: &str = "id, user_id, caption, image_url, created_at, updated_at, deleted_at";

pub struct Postgres {
    pool: PgPool,
}

impl Postgres {
    /// Connect to PostgreSQL & bring the schema up to date
    pub async fn new(config: &Config) -> Result<Postgres> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await
            .context(ConnectSnafu {
                host: config.host.clone(),
                port: config.port,
            })?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(MigrateSnafu)?;
        info!(
            "Connected to PostgreSQL at {}:{}/{}",
            config.host, config.port, config.dbname
        );
        Ok(Postgres { pool })
    }
}

/// Map a failed write of `user` onto the typed claim errors
fn user_write_error(err: sqlx::Error, user: &User) -> storage::Error {
    if let sqlx::Error::Database(db) = &err {
        match db.constraint() {
            Some("users_live_username") => {
                if let Some(username) = user.username() {
                    return UsernameClaimedSnafu {
                        username: username.clone(),
                    }
                    .build();
                }
            }
            Some("users_live_email") => {
                if let Some(email) = user.email() {
                    return EmailClaimedSnafu {
                        email: email.clone(),
                    }
                    .build();
                }
            }
            Some("users_live_handle") => {
                if let Some(handle) = user.handle() {
                    return HandleClaimedSnafu {
                        handle: handle.clone(),
                    }
                    .build();
                }
            }
            Some("users_live_did") => {
                if let Some(did) = user.did() {
                    return DidClaimedSnafu { did: did.clone() }.build();
                }
            }
            _ => (),
        }
    }
    storage::Error::new(err)
}

fn as_count(n: i64) -> usize {
    usize::try_from(n).unwrap_or_default()
}

#[async_trait]
impl Backend for Postgres {
    async fn add_user(&self, user: &User) -> storage::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO users ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
             $13, $14, $15)",
            USER_COLUMNS
        ))
        .bind(user.id())
        .bind(user.username())
        .bind(user.email())
        .bind(user.hash())
        .bind(user.pepper_version())
        .bind(user.full_name())
        .bind(user.bio())
        .bind(user.avatar())
        .bind(user.did())
        .bind(user.handle())
        .bind(user.federation_type())
        .bind(user.last_federation_sync())
        .bind(user.created_at())
        .bind(user.updated_at())
        .bind(user.deleted_at())
        .execute(&self.pool)
        .await
        .map_err(|err| user_write_error(err, user))?;
        Ok(())
    }
    async fn delete_user(&self, id: &UserId) -> storage::Result<()> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = now(), updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage::Error::new)?;
        ensure!(result.rows_affected() > 0, NoSuchUserSnafu { user_id: *id });
        Ok(())
    }
    async fn remote_users(&self) -> storage::Result<Vec<User>> {
        sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE federation_type = 'remote' AND deleted_at IS NULL \
             ORDER BY created_at DESC",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn update_user(&self, user: &User) -> storage::Result<()> {
        let result = sqlx::query(
            "UPDATE users SET username = $2, email = $3, full_name = $4, bio = $5, avatar = $6, \
             did = $7, handle = $8, last_federation_sync = $9, updated_at = $10 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user.id())
        .bind(user.username())
        .bind(user.email())
        .bind(user.full_name())
        .bind(user.bio())
        .bind(user.avatar())
        .bind(user.did())
        .bind(user.handle())
        .bind(user.last_federation_sync())
        .bind(user.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|err| user_write_error(err, user))?;
        ensure!(
            result.rows_affected() > 0,
            NoSuchUserSnafu { user_id: user.id() }
        );
        Ok(())
    }
    async fn user_by_did(&self, did: &Did) -> storage::Result<Option<User>> {
        sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE did = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(did)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn user_by_email(&self, email: &UserEmail) -> storage::Result<Option<User>> {
        sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE email = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn user_by_handle(&self, handle: &Handle) -> storage::Result<Option<User>> {
        sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE handle = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn user_by_id(&self, id: &UserId) -> storage::Result<Option<User>> {
        sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn add_post(&self, post: &Post) -> storage::Result<()> {
        let result = sqlx::query(
            "INSERT INTO posts (id, user_id, caption, image_url, created_at, updated_at) \
             SELECT $1, $2, $3, $4, $5, $6 \
             WHERE EXISTS (SELECT 1 FROM users WHERE id = $2 AND deleted_at IS NULL)",
        )
        .bind(post.id())
        .bind(post.user_id())
        .bind(post.caption())
        .bind(post.image_url())
        .bind(post.created_at())
        .bind(post.created_at())
        .execute(&self.pool)
        .await
        .map_err(storage::Error::new)?;
        ensure!(
            result.rows_affected() > 0,
            NoSuchUserSnafu {
                user_id: post.user_id()
            }
        );
        Ok(())
    }
    async fn delete_post(&self, id: &PostId, owner: &UserId) -> storage::Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage::Error::new)?;
        let row: Option<(UserId,)> = sqlx::query_as(
            "SELECT user_id FROM posts WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage::Error::new)?;
        let (post_owner,) = row.context(NoSuchPostSnafu { post_id: *id })?;
        ensure!(
            post_owner == *owner,
            NotPostOwnerSnafu {
                post_id: *id,
                user_id: *owner
            }
        );
        sqlx::query("DELETE FROM likes WHERE post_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage::Error::new)?;
        sqlx::query("DELETE FROM comments WHERE post_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage::Error::new)?;
        sqlx::query("UPDATE posts SET deleted_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage::Error::new)?;
        tx.commit().await.map_err(storage::Error::new)
    }
    async fn post_by_id(&self, id: &PostId) -> storage::Result<Option<Post>> {
        sqlx::query_as(&format!(
            "SELECT {} FROM posts WHERE id = $1 AND deleted_at IS NULL",
            POST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn posts(&self, page: usize, page_size: usize) -> storage::Result<Vec<Post>> {
        // Nothing lives past what PostgreSQL can address
        let Some(offset) =
            storage::page_offset(page, page_size).and_then(|n| i64::try_from(n).ok())
        else {
            return Ok(Vec::new());
        };
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        sqlx::query_as(&format!(
            "SELECT {} FROM posts WHERE deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            POST_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn posts_for_user(&self, id: &UserId) -> storage::Result<Vec<Post>> {
        sqlx::query_as(&format!(
            "SELECT {} FROM posts WHERE user_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC",
            POST_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn add_comment(&self, comment: &Comment) -> storage::Result<()> {
        let result = sqlx::query(
            "INSERT INTO comments (id, post_id, user_id, content, created_at, updated_at) \
             SELECT $1, $2, $3, $4, $5, $5 \
             WHERE EXISTS (SELECT 1 FROM posts WHERE id = $2 AND deleted_at IS NULL)",
        )
        .bind(comment.id())
        .bind(comment.post_id())
        .bind(comment.user_id())
        .bind(comment.content())
        .bind(comment.created_at())
        .execute(&self.pool)
        .await
        .map_err(storage::Error::new)?;
        ensure!(
            result.rows_affected() > 0,
            NoSuchPostSnafu {
                post_id: comment.post_id()
            }
        );
        Ok(())
    }
    async fn comment_by_id(&self, id: &CommentId) -> storage::Result<Option<Comment>> {
        sqlx::query_as(
            "SELECT id, post_id, user_id, content, created_at, updated_at \
             FROM comments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn comments_for_post(&self, id: &PostId) -> storage::Result<Vec<Comment>> {
        sqlx::query_as(
            "SELECT id, post_id, user_id, content, created_at, updated_at \
             FROM comments WHERE post_id = $1 ORDER BY created_at",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn delete_comment(&self, id: &CommentId, author: &UserId) -> storage::Result<()> {
        let comment = self
            .comment_by_id(id)
            .await?
            .context(NoSuchCommentSnafu { comment_id: *id })?;
        ensure!(
            comment.user_id() == *author,
            NotCommentAuthorSnafu {
                comment_id: *id,
                user_id: *author
            }
        );
        sqlx::query("DELETE FROM comments WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(author)
            .execute(&self.pool)
            .await
            .map_err(storage::Error::new)?;
        Ok(())
    }
    async fn add_like(&self, like: &Like) -> storage::Result<()> {
        let result = sqlx::query(
            "INSERT INTO likes (id, post_id, user_id, created_at) \
             SELECT $1, $2, $3, $4 \
             WHERE EXISTS (SELECT 1 FROM posts WHERE id = $2 AND deleted_at IS NULL)",
        )
        .bind(like.id())
        .bind(like.post_id())
        .bind(like.user_id())
        .bind(like.created_at())
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.constraint() == Some("likes_once_per_user") => {
                AlreadyLikedSnafu {
                    post_id: like.post_id(),
                    user_id: like.user_id(),
                }
                .build()
            }
            _ => storage::Error::new(err),
        })?;
        ensure!(
            result.rows_affected() > 0,
            NoSuchPostSnafu {
                post_id: like.post_id()
            }
        );
        Ok(())
    }
    async fn has_liked(&self, post: &PostId, user: &UserId) -> storage::Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM likes WHERE post_id = $1 AND user_id = $2)",
        )
        .bind(post)
        .bind(user)
        .fetch_one(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn like_count(&self, post: &PostId) -> storage::Result<usize> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM likes WHERE post_id = $1")
            .bind(post)
            .fetch_one(&self.pool)
            .await
            .map(as_count)
            .map_err(storage::Error::new)
    }
    async fn likes_for_post(&self, post: &PostId) -> storage::Result<Vec<Like>> {
        sqlx::query_as(
            "SELECT id, post_id, user_id, created_at FROM likes \
             WHERE post_id = $1 ORDER BY created_at",
        )
        .bind(post)
        .fetch_all(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn remove_like(&self, post: &PostId, user: &UserId) -> storage::Result<bool> {
        Ok(
            sqlx::query("DELETE FROM likes WHERE post_id = $1 AND user_id = $2")
                .bind(post)
                .bind(user)
                .execute(&self.pool)
                .await
                .map_err(storage::Error::new)?
                .rows_affected()
                > 0,
        )
    }
    async fn add_follow(&self, follower: &UserId, following: &UserId) -> storage::Result<()> {
        for id in [follower, following] {
            self.user_by_id(id)
                .await?
                .context(NoSuchUserSnafu { user_id: *id })?;
        }
        sqlx::query(
            "INSERT INTO user_follows (follower_id, following_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(follower)
        .bind(following)
        .execute(&self.pool)
        .await
        .map_err(storage::Error::new)?;
        Ok(())
    }
    async fn follower_count(&self, user: &UserId) -> storage::Result<usize> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_follows WHERE following_id = $1")
            .bind(user)
            .fetch_one(&self.pool)
            .await
            .map(as_count)
            .map_err(storage::Error::new)
    }
    async fn following_count(&self, user: &UserId) -> storage::Result<usize> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_follows WHERE follower_id = $1")
            .bind(user)
            .fetch_one(&self.pool)
            .await
            .map(as_count)
            .map_err(storage::Error::new)
    }
    async fn is_following(&self, follower: &UserId, following: &UserId) -> storage::Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_follows \
             WHERE follower_id = $1 AND following_id = $2)",
        )
        .bind(follower)
        .bind(following)
        .fetch_one(&self.pool)
        .await
        .map_err(storage::Error::new)
    }
    async fn remove_follow(&self, follower: &UserId, following: &UserId) -> storage::Result<()> {
        sqlx::query("DELETE FROM user_follows WHERE follower_id = $1 AND following_id = $2")
            .bind(follower)
            .bind(following)
            .execute(&self.pool)
            .await
            .map_err(storage::Error::new)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: Config = toml::from_str(
            r#"
host = "db.example"
port = 5433
user = "claroz"
password = "s3kr1t"
dbname = "claroz"
sslmode = "require"
max-connections = 10
"#,
        )
        .unwrap();
        assert_eq!("db.example", config.host);
        assert_eq!(10, config.max_connections);
        assert!(config.connect_options().is_ok());

        let config = Config {
            sslmode: "sometimes".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            config.connect_options(),
            Err(Error::SslMode { .. })
        ));
    }
}
