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

//! # storage
//!
//! Abstractions for the claroz storage layer.
//!
//! Every implementation must enforce the same uniqueness rules (username, e-mail, handle & DID
//! among live users; one like per user per post; one follow per ordered pair) and report a
//! violation through the matching typed [Error] variant. Callers, notably the federation
//! reconciliation logic, branch on those variants, so "the backend said no" & "this identity is
//! already claimed" must never be conflated.
//!
//! Soft-deleted users & posts are invisible to every lookup.

use async_trait::async_trait;
use snafu::{prelude::*, Backtrace, IntoError};

use crate::entities::{
    Attributed, Comment, CommentId, Did, Handle, Like, Post, PostDetails, PostId, User, UserEmail,
    UserId, Username,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Post {post_id} has already been liked by {user_id}"))]
    AlreadyLiked {
        post_id: PostId,
        user_id: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("Storage backend error: {source}"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
    #[snafu(display("The DID {did} is already claimed"))]
    DidClaimed { did: Did, backtrace: Backtrace },
    #[snafu(display("The e-mail address {email} is already registered"))]
    EmailClaimed {
        email: UserEmail,
        backtrace: Backtrace,
    },
    #[snafu(display("The handle {handle} is already claimed"))]
    HandleClaimed {
        handle: Handle,
        backtrace: Backtrace,
    },
    #[snafu(display("User {user_id} is not the author of comment {comment_id}"))]
    NotCommentAuthor {
        comment_id: CommentId,
        user_id: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("User {user_id} does not own post {post_id}"))]
    NotPostOwner {
        post_id: PostId,
        user_id: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("No comment {comment_id}"))]
    NoSuchComment {
        comment_id: CommentId,
        backtrace: Backtrace,
    },
    #[snafu(display("No post {post_id}"))]
    NoSuchPost {
        post_id: PostId,
        backtrace: Backtrace,
    },
    #[snafu(display("No user {user_id}"))]
    NoSuchUser {
        user_id: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("The username {username} is already claimed"))]
    UsernameClaimed {
        username: Username,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Wrap an implementation-specific error
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        BackendSnafu.into_error(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The number of posts preceding one-based `page`, or `None` if that's past anything addressable
pub fn page_offset(page: usize, page_size: usize) -> Option<usize> {
    page.saturating_sub(1).checked_mul(page_size)
}

#[async_trait]
pub trait Backend {
    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                           Users                                            //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Persist a brand-new user
    ///
    /// Fails with one of the `*Claimed` variants if the username, e-mail, handle or DID is already
    /// held by a live user.
    async fn add_user(&self, user: &User) -> Result<()>;
    /// Soft-delete a user; [Error::NoSuchUser] if there's no such (live) user
    async fn delete_user(&self, id: &UserId) -> Result<()>;
    /// All live remote users, most recently created first
    async fn remote_users(&self) -> Result<Vec<User>>;
    /// Overwrite an existing user's record; the same uniqueness rules as [Backend::add_user] apply
    async fn update_user(&self, user: &User) -> Result<()>;
    async fn user_by_did(&self, did: &Did) -> Result<Option<User>>;
    async fn user_by_email(&self, email: &UserEmail) -> Result<Option<User>>;
    async fn user_by_handle(&self, handle: &Handle) -> Result<Option<User>>;
    async fn user_by_id(&self, id: &UserId) -> Result<Option<User>>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                           Posts                                            //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn add_post(&self, post: &Post) -> Result<()>;
    /// Remove a post owned by `owner`
    ///
    /// The post's likes & comments are removed & the post itself soft-deleted, all or nothing.
    async fn delete_post(&self, id: &PostId, owner: &UserId) -> Result<()>;
    async fn post_by_id(&self, id: &PostId) -> Result<Option<Post>>;
    /// One page of live posts, newest first; `page` is one-based
    async fn posts(&self, page: usize, page_size: usize) -> Result<Vec<Post>>;
    /// All of a user's live posts, newest first
    async fn posts_for_user(&self, id: &UserId) -> Result<Vec<Post>>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                          Comments                                          //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn add_comment(&self, comment: &Comment) -> Result<()>;
    async fn comment_by_id(&self, id: &CommentId) -> Result<Option<Comment>>;
    /// A post's comments, oldest first
    async fn comments_for_post(&self, id: &PostId) -> Result<Vec<Comment>>;
    /// Remove a comment written by `author`
    async fn delete_comment(&self, id: &CommentId, author: &UserId) -> Result<()>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                           Likes                                            //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// [Error::AlreadyLiked] if this user has already liked this post
    async fn add_like(&self, like: &Like) -> Result<()>;
    async fn has_liked(&self, post: &PostId, user: &UserId) -> Result<bool>;
    async fn like_count(&self, post: &PostId) -> Result<usize>;
    async fn likes_for_post(&self, post: &PostId) -> Result<Vec<Like>>;
    /// Returns true if a like was actually removed
    async fn remove_like(&self, post: &PostId, user: &UserId) -> Result<bool>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    //                                          Follows                                           //
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Record that `follower` follows `following`; following someone twice is not an error
    async fn add_follow(&self, follower: &UserId, following: &UserId) -> Result<()>;
    async fn follower_count(&self, user: &UserId) -> Result<usize>;
    async fn following_count(&self, user: &UserId) -> Result<usize>;
    async fn is_following(&self, follower: &UserId, following: &UserId) -> Result<bool>;
    async fn remove_follow(&self, follower: &UserId, following: &UserId) -> Result<()>;
}

/// Assemble the API view of a post
///
/// Likes & comments whose author has since been deleted are dropped from the view.
pub async fn post_details(
    storage: &(dyn Backend + Send + Sync),
    post: Post,
) -> Result<Option<PostDetails>> {
    let user = match storage.user_by_id(&post.user_id()).await? {
        Some(user) => user,
        None => return Ok(None),
    };
    let mut likes = Vec::new();
    for like in storage.likes_for_post(&post.id()).await? {
        if let Some(user) = storage.user_by_id(&like.user_id()).await? {
            likes.push(Attributed { item: like, user });
        }
    }
    let mut comments = Vec::new();
    for comment in storage.comments_for_post(&post.id()).await? {
        if let Some(user) = storage.user_by_id(&comment.user_id()).await? {
            comments.push(Attributed {
                item: comment,
                user,
            });
        }
    }
    let like_count = storage.like_count(&post.id()).await?;
    Ok(Some(PostDetails {
        post,
        user,
        like_count,
        likes,
        comments,
    }))
}

/// [post_details] over a collection, skipping posts whose author is gone
pub async fn posts_details(
    storage: &(dyn Backend + Send + Sync),
    posts: Vec<Post>,
) -> Result<Vec<PostDetails>> {
    let mut details = Vec::with_capacity(posts.len());
    for post in posts {
        if let Some(detail) = post_details(storage, post).await? {
            details.push(detail);
        }
    }
    Ok(details)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_offsets() {
        assert_eq!(Some(0), page_offset(0, 10));
        assert_eq!(Some(0), page_offset(1, 10));
        assert_eq!(Some(20), page_offset(3, 10));
        assert_eq!(None, page_offset(usize::MAX, 50));
        assert_eq!(None, page_offset(i64::MAX as usize, 50));
    }
}
