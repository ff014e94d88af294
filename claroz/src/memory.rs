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

//! # memory
//!
//! An in-process [Backend] implementation. Every table lives behind a single [RwLock], which makes
//! each method atomic with respect to every other; that's what lets this implementation honor the
//! same uniqueness rules the PostgreSQL schema expresses as constraints.
//!
//! Used by the unit & in-process HTTP tests, and for development runs of `clarozd` with no
//! database to hand.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    entities::{
        Comment, CommentId, Did, FederationType, Handle, Like, Post, PostId, User, UserEmail,
        UserId,
    },
    storage::{
        AlreadyLikedSnafu, Backend, DidClaimedSnafu, EmailClaimedSnafu, HandleClaimedSnafu,
        NoSuchCommentSnafu, NoSuchPostSnafu, NoSuchUserSnafu, NotCommentAuthorSnafu,
        NotPostOwnerSnafu, Result, UsernameClaimedSnafu, page_offset,
    },
};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    posts: HashMap<PostId, Post>,
    comments: HashMap<CommentId, Comment>,
    likes: HashMap<(PostId, UserId), Like>,
    // (follower, following)
    follows: HashSet<(UserId, UserId)>,
}

impl Tables {
    fn live_users(&self) -> impl Iterator<Item = &User> {
        self.users.values().filter(|u| u.deleted_at().is_none())
    }
    fn live_user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id).filter(|u| u.deleted_at().is_none())
    }
    fn live_post(&self, id: &PostId) -> Option<&Post> {
        self.posts.get(id).filter(|p| p.deleted_at().is_none())
    }
    /// Fail if any *other* live user holds one of `user`'s unique attributes
    fn check_claims(&self, user: &User) -> Result<()> {
        for other in self.live_users().filter(|u| u.id() != user.id()) {
            if let (Some(mine), Some(theirs)) = (user.username(), other.username()) {
                if mine == theirs {
                    return UsernameClaimedSnafu {
                        username: mine.clone(),
                    }
                    .fail();
                }
            }
            if let (Some(mine), Some(theirs)) = (user.email(), other.email()) {
                if mine == theirs {
                    return EmailClaimedSnafu {
                        email: mine.clone(),
                    }
                    .fail();
                }
            }
            if let (Some(mine), Some(theirs)) = (user.handle(), other.handle()) {
                if mine == theirs {
                    return HandleClaimedSnafu {
                        handle: mine.clone(),
                    }
                    .fail();
                }
            }
            if let (Some(mine), Some(theirs)) = (user.did(), other.did()) {
                if mine == theirs {
                    return DidClaimedSnafu { did: mine.clone() }.fail();
                }
            }
        }
        Ok(())
    }
}

fn newest_first(mut posts: Vec<Post>) -> Vec<Post> {
    posts.sort_by_key(|p| std::cmp::Reverse(p.created_at()));
    posts
}

#[derive(Debug, Default)]
pub struct InMemory {
    tables: RwLock<Tables>,
}

impl InMemory {
    pub fn new() -> InMemory {
        InMemory::default()
    }
}

#[async_trait]
impl Backend for InMemory {
    async fn add_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.check_claims(user)?;
        tables.users.insert(user.id(), user.clone());
        Ok(())
    }
    async fn delete_user(&self, id: &UserId) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(id).filter(|u| u.deleted_at().is_none()) {
            Some(user) => {
                user.mark_deleted();
                Ok(())
            }
            None => NoSuchUserSnafu { user_id: *id }.fail(),
        }
    }
    async fn remote_users(&self) -> Result<Vec<User>> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables
            .live_users()
            .filter(|u| u.federation_type() == FederationType::Remote)
            .cloned()
            .collect();
        users.sort_by_key(|u| std::cmp::Reverse(u.created_at()));
        Ok(users)
    }
    async fn update_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables.write().await;
        ensure_user(&tables, &user.id())?;
        tables.check_claims(user)?;
        tables.users.insert(user.id(), user.clone());
        Ok(())
    }
    async fn user_by_did(&self, did: &Did) -> Result<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .live_users()
            .find(|u| u.did() == Some(did))
            .cloned())
    }
    async fn user_by_email(&self, email: &UserEmail) -> Result<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .live_users()
            .find(|u| u.email() == Some(email))
            .cloned())
    }
    async fn user_by_handle(&self, handle: &Handle) -> Result<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .live_users()
            .find(|u| u.handle() == Some(handle))
            .cloned())
    }
    async fn user_by_id(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.tables.read().await.live_user(id).cloned())
    }
    async fn add_post(&self, post: &Post) -> Result<()> {
        let mut tables = self.tables.write().await;
        ensure_user(&tables, &post.user_id())?;
        tables.posts.insert(post.id(), post.clone());
        Ok(())
    }
    async fn delete_post(&self, id: &PostId, owner: &UserId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let post = tables
            .live_post(id)
            .ok_or_else(|| NoSuchPostSnafu { post_id: *id }.build())?;
        if post.user_id() != *owner {
            return NotPostOwnerSnafu {
                post_id: *id,
                user_id: *owner,
            }
            .fail();
        }
        tables.likes.retain(|(post_id, _), _| post_id != id);
        tables.comments.retain(|_, c| c.post_id() != *id);
        if let Some(post) = tables.posts.get_mut(id) {
            post.mark_deleted();
        }
        Ok(())
    }
    async fn post_by_id(&self, id: &PostId) -> Result<Option<Post>> {
        Ok(self.tables.read().await.live_post(id).cloned())
    }
    async fn posts(&self, page: usize, page_size: usize) -> Result<Vec<Post>> {
        let Some(offset) = page_offset(page, page_size) else {
            return Ok(Vec::new());
        };
        let tables = self.tables.read().await;
        let posts = newest_first(
            tables
                .posts
                .values()
                .filter(|p| p.deleted_at().is_none())
                .cloned()
                .collect(),
        );
        Ok(posts
            .into_iter()
            .skip(offset)
            .take(page_size)
            .collect())
    }
    async fn posts_for_user(&self, id: &UserId) -> Result<Vec<Post>> {
        let tables = self.tables.read().await;
        Ok(newest_first(
            tables
                .posts
                .values()
                .filter(|p| p.deleted_at().is_none() && p.user_id() == *id)
                .cloned()
                .collect(),
        ))
    }
    async fn add_comment(&self, comment: &Comment) -> Result<()> {
        let mut tables = self.tables.write().await;
        ensure_post(&tables, &comment.post_id())?;
        ensure_user(&tables, &comment.user_id())?;
        tables.comments.insert(comment.id(), comment.clone());
        Ok(())
    }
    async fn comment_by_id(&self, id: &CommentId) -> Result<Option<Comment>> {
        Ok(self.tables.read().await.comments.get(id).cloned())
    }
    async fn comments_for_post(&self, id: &PostId) -> Result<Vec<Comment>> {
        let tables = self.tables.read().await;
        let mut comments: Vec<Comment> = tables
            .comments
            .values()
            .filter(|c| c.post_id() == *id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at());
        Ok(comments)
    }
    async fn delete_comment(&self, id: &CommentId, author: &UserId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let comment = tables
            .comments
            .get(id)
            .ok_or_else(|| NoSuchCommentSnafu { comment_id: *id }.build())?;
        if comment.user_id() != *author {
            return NotCommentAuthorSnafu {
                comment_id: *id,
                user_id: *author,
            }
            .fail();
        }
        tables.comments.remove(id);
        Ok(())
    }
    async fn add_like(&self, like: &Like) -> Result<()> {
        let mut tables = self.tables.write().await;
        ensure_post(&tables, &like.post_id())?;
        ensure_user(&tables, &like.user_id())?;
        let key = (like.post_id(), like.user_id());
        if tables.likes.contains_key(&key) {
            return AlreadyLikedSnafu {
                post_id: like.post_id(),
                user_id: like.user_id(),
            }
            .fail();
        }
        tables.likes.insert(key, like.clone());
        Ok(())
    }
    async fn has_liked(&self, post: &PostId, user: &UserId) -> Result<bool> {
        Ok(self.tables.read().await.likes.contains_key(&(*post, *user)))
    }
    async fn like_count(&self, post: &PostId) -> Result<usize> {
        Ok(self
            .tables
            .read()
            .await
            .likes
            .keys()
            .filter(|(post_id, _)| post_id == post)
            .count())
    }
    async fn likes_for_post(&self, post: &PostId) -> Result<Vec<Like>> {
        let tables = self.tables.read().await;
        let mut likes: Vec<Like> = tables
            .likes
            .values()
            .filter(|l| l.post_id() == *post)
            .cloned()
            .collect();
        likes.sort_by_key(|l| l.created_at());
        Ok(likes)
    }
    async fn remove_like(&self, post: &PostId, user: &UserId) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .await
            .likes
            .remove(&(*post, *user))
            .is_some())
    }
    async fn add_follow(&self, follower: &UserId, following: &UserId) -> Result<()> {
        let mut tables = self.tables.write().await;
        ensure_user(&tables, follower)?;
        ensure_user(&tables, following)?;
        tables.follows.insert((*follower, *following));
        Ok(())
    }
    async fn follower_count(&self, user: &UserId) -> Result<usize> {
        Ok(self
            .tables
            .read()
            .await
            .follows
            .iter()
            .filter(|(_, following)| following == user)
            .count())
    }
    async fn following_count(&self, user: &UserId) -> Result<usize> {
        Ok(self
            .tables
            .read()
            .await
            .follows
            .iter()
            .filter(|(follower, _)| follower == user)
            .count())
    }
    async fn is_following(&self, follower: &UserId, following: &UserId) -> Result<bool> {
        Ok(self
            .tables
            .read()
            .await
            .follows
            .contains(&(*follower, *following)))
    }
    async fn remove_follow(&self, follower: &UserId, following: &UserId) -> Result<()> {
        self.tables
            .write()
            .await
            .follows
            .remove(&(*follower, *following));
        Ok(())
    }
}

fn ensure_user(tables: &Tables, id: &UserId) -> Result<()> {
    match tables.live_user(id) {
        Some(_) => Ok(()),
        None => NoSuchUserSnafu { user_id: *id }.fail(),
    }
}

fn ensure_post(tables: &Tables, id: &PostId) -> Result<()> {
    match tables.live_post(id) {
        Some(_) => Ok(()),
        None => NoSuchPostSnafu { post_id: *id }.fail(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use secrecy::SecretString;

    use crate::{
        entities::Username,
        peppers::{Pepper, Version},
        storage::{post_details, Error},
    };

    fn local_user(name: &str) -> User {
        User::new_local(
            &Version::new("pepper-ver:test").unwrap(),
            &Pepper::default(),
            &Username::new(name).unwrap(),
            &UserEmail::new(&format!("{}@example.com", name)).unwrap(),
            &SecretString::from("password123"),
            None,
        )
        .unwrap()
    }

    fn remote_user(did: &str, handle: &str) -> User {
        User::new_remote(
            Did::new(did).unwrap(),
            Handle::new(handle).unwrap(),
            "Remote",
            "",
            "",
        )
    }

    #[tokio::test]
    async fn user_uniqueness() {
        let storage = InMemory::new();
        let alice = local_user("alice");
        storage.add_user(&alice).await.unwrap();

        // Same username, different e-mail
        let mut imposter = local_user("bob");
        imposter.set_username(&Username::new("alice").unwrap());
        assert!(matches!(
            storage.add_user(&imposter).await,
            Err(Error::UsernameClaimed { .. })
        ));

        let mut imposter = local_user("carol");
        imposter.set_email(&UserEmail::new("alice@example.com").unwrap());
        assert!(matches!(
            storage.add_user(&imposter).await,
            Err(Error::EmailClaimed { .. })
        ));

        storage
            .add_user(&remote_user("did:plc:x", "x.example"))
            .await
            .unwrap();
        assert!(matches!(
            storage
                .add_user(&remote_user("did:plc:y", "x.example"))
                .await,
            Err(Error::HandleClaimed { .. })
        ));
        assert!(matches!(
            storage
                .add_user(&remote_user("did:plc:x", "y.example"))
                .await,
            Err(Error::DidClaimed { .. })
        ));
    }

    #[tokio::test]
    async fn soft_deleted_users_are_invisible() {
        let storage = InMemory::new();
        let alice = local_user("alice");
        storage.add_user(&alice).await.unwrap();
        storage.delete_user(&alice.id()).await.unwrap();
        assert!(storage.user_by_id(&alice.id()).await.unwrap().is_none());
        assert!(storage
            .user_by_email(alice.email().unwrap())
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            storage.delete_user(&alice.id()).await,
            Err(Error::NoSuchUser { .. })
        ));
        // The username is free again
        storage.add_user(&local_user("alice")).await.unwrap();
    }

    #[tokio::test]
    async fn posts_likes_and_comments() {
        let storage = InMemory::new();
        let alice = local_user("alice");
        let bob = local_user("bob");
        storage.add_user(&alice).await.unwrap();
        storage.add_user(&bob).await.unwrap();

        let first = Post::new(&alice.id(), "first", "/uploads/a.jpg");
        storage.add_post(&first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = Post::new(&alice.id(), "second", "/uploads/b.jpg");
        storage.add_post(&second).await.unwrap();

        let page = storage.posts(1, 1).await.unwrap();
        assert_eq!(vec![second.clone()], page);
        let page = storage.posts(2, 1).await.unwrap();
        assert_eq!(vec![first.clone()], page);
        assert!(storage.posts(3, 1).await.unwrap().is_empty());
        // Far past the end is simply empty
        assert!(storage
            .posts(i64::MAX as usize, 50)
            .await
            .unwrap()
            .is_empty());

        storage.add_like(&Like::new(&first.id(), &bob.id())).await.unwrap();
        assert!(matches!(
            storage.add_like(&Like::new(&first.id(), &bob.id())).await,
            Err(Error::AlreadyLiked { .. })
        ));
        assert_eq!(1, storage.like_count(&first.id()).await.unwrap());

        let comment = Comment::new(&first.id(), &bob.id(), "Great post!").unwrap();
        storage.add_comment(&comment).await.unwrap();
        assert!(matches!(
            storage.delete_comment(&comment.id(), &alice.id()).await,
            Err(Error::NotCommentAuthor { .. })
        ));

        let details = post_details(&storage, first.clone()).await.unwrap().unwrap();
        assert_eq!(1, details.like_count);
        assert_eq!(bob.id(), details.likes[0].user.id());
        assert_eq!("Great post!", details.comments[0].item.content());

        assert!(matches!(
            storage.delete_post(&first.id(), &bob.id()).await,
            Err(Error::NotPostOwner { .. })
        ));
        storage.delete_post(&first.id(), &alice.id()).await.unwrap();
        assert!(storage.post_by_id(&first.id()).await.unwrap().is_none());
        assert_eq!(0, storage.like_count(&first.id()).await.unwrap());
        assert!(storage
            .comments_for_post(&first.id())
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            storage.add_like(&Like::new(&first.id(), &bob.id())).await,
            Err(Error::NoSuchPost { .. })
        ));
    }

    #[tokio::test]
    async fn follows() {
        let storage = InMemory::new();
        let alice = local_user("alice");
        let bob = local_user("bob");
        storage.add_user(&alice).await.unwrap();
        storage.add_user(&bob).await.unwrap();

        storage.add_follow(&alice.id(), &bob.id()).await.unwrap();
        storage.add_follow(&alice.id(), &bob.id()).await.unwrap();
        assert_eq!(1, storage.follower_count(&bob.id()).await.unwrap());
        assert_eq!(1, storage.following_count(&alice.id()).await.unwrap());
        assert!(storage.is_following(&alice.id(), &bob.id()).await.unwrap());
        assert!(!storage.is_following(&bob.id(), &alice.id()).await.unwrap());

        assert!(matches!(
            storage.add_follow(&alice.id(), &UserId::default()).await,
            Err(Error::NoSuchUser { .. })
        ));

        storage.remove_follow(&alice.id(), &bob.id()).await.unwrap();
        assert_eq!(0, storage.follower_count(&bob.id()).await.unwrap());
    }
}
