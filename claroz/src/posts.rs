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

//! # posts
//!
//! The `/posts` API: image posts, their comments & their likes. Every route here requires
//! authentication.

use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use snafu::{prelude::*, Backtrace, IntoError};
use tap::Pipe;
use tracing::{error, info, warn};

use crate::{
    authn::authenticate,
    claroz::Claroz,
    define_metric,
    entities::{self, Attributed, Comment, CommentId, Like, Post, PostDetails, PostId, UserId},
    http::{ErrorResponseBody, MessageRsp},
    storage::{self, post_details, posts_details},
    uploads,
};

/// Generous enough for any image the upload storage would accept; the storage enforces the real
/// limit.
const MAX_POST_BODY: usize = 32 * 1024 * 1024;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add a comment to {post_id}: {source}"))]
    AddComment {
        post_id: PostId,
        source: storage::Error,
    },
    #[snafu(display("Failed to persist a post with image {url}: {source}"))]
    AddPost { url: String, source: storage::Error },
    #[snafu(display("Invalid request body: {source}"))]
    BadBody { source: JsonRejection },
    #[snafu(display("{text} is not a valid comment ID: {source}"))]
    BadCommentId { text: String, source: uuid::Error },
    #[snafu(display("Bad multipart body: {source}"))]
    BadMultipart { source: MultipartError },
    #[snafu(display("{text} is not a valid post ID: {source}"))]
    BadPostId { text: String, source: uuid::Error },
    #[snafu(display("Bad comment: {source}"))]
    Comment { source: entities::Error },
    #[snafu(display("Failed to delete comment {comment_id}: {source}"))]
    DeleteComment {
        comment_id: CommentId,
        source: storage::Error,
    },
    #[snafu(display("Failed to delete post {post_id}: {source}"))]
    DeletePost {
        post_id: PostId,
        source: storage::Error,
    },
    #[snafu(display("User {user_id} failed to like post {post_id}: {source}"))]
    Like {
        post_id: PostId,
        user_id: UserId,
        source: storage::Error,
    },
    #[snafu(display("Failed to fetch posts: {source}"))]
    Lookup { source: storage::Error },
    #[snafu(display("The authenticated user {user_id} has disappeared"))]
    NoCaller {
        user_id: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("No image was attached"))]
    NoImage { backtrace: Backtrace },
    #[snafu(display("Expected a multipart body: {source}"))]
    NoMultipart { source: MultipartRejection },
    #[snafu(display("No comment {comment_id} on post {post_id}"))]
    NoSuchComment {
        post_id: PostId,
        comment_id: CommentId,
        backtrace: Backtrace,
    },
    #[snafu(display("No post {post_id}"))]
    NoSuchPost {
        post_id: PostId,
        backtrace: Backtrace,
    },
    #[snafu(display("User {user_id} failed to unlike post {post_id}: {source}"))]
    Unlike {
        post_id: PostId,
        user_id: UserId,
        source: storage::Error,
    },
    #[snafu(display("Failed to store the image: {source}"))]
    Upload { source: uploads::Error },
}

type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        use storage::Error as SE;
        match self {
            Error::AddComment {
                source: SE::NoSuchPost { .. },
                ..
            }
            | Error::DeletePost {
                source: SE::NoSuchPost { .. },
                ..
            }
            | Error::Like {
                source: SE::NoSuchPost { .. },
                ..
            }
            | Error::NoSuchPost { .. } => (StatusCode::NOT_FOUND, "post not found".to_owned()),
            Error::AddComment { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to add comment".to_owned(),
            ),
            Error::AddPost { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to create post".to_owned(),
            ),
            Error::BadBody { .. }
            | Error::BadMultipart { .. }
            | Error::Comment { .. }
            | Error::NoMultipart { .. } => (StatusCode::BAD_REQUEST, "invalid input".to_owned()),
            Error::BadCommentId { .. } => {
                (StatusCode::BAD_REQUEST, "invalid comment ID".to_owned())
            }
            Error::BadPostId { .. } => (StatusCode::BAD_REQUEST, "invalid post ID".to_owned()),
            Error::DeleteComment { source, .. } => match source {
                SE::NoSuchComment { .. } => (StatusCode::NOT_FOUND, "comment not found".to_owned()),
                SE::NotCommentAuthor { .. } => (
                    StatusCode::FORBIDDEN,
                    "you can only delete your own comments".to_owned(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to delete comment".to_owned(),
                ),
            },
            Error::DeletePost { source, .. } => match source {
                SE::NotPostOwner { .. } => (
                    StatusCode::FORBIDDEN,
                    "you can only delete your own posts".to_owned(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to delete post".to_owned(),
                ),
            },
            Error::Like {
                source: SE::AlreadyLiked { .. },
                ..
            } => (StatusCode::BAD_REQUEST, "post already liked".to_owned()),
            Error::Like { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to like post".to_owned(),
            ),
            Error::Lookup { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch posts".to_owned(),
            ),
            Error::NoCaller { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_owned(),
            ),
            Error::NoImage { .. } => (StatusCode::BAD_REQUEST, "image is required".to_owned()),
            Error::NoSuchComment { .. } => {
                (StatusCode::NOT_FOUND, "comment not found".to_owned())
            }
            Error::Unlike { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to unlike post".to_owned(),
            ),
            Error::Upload { source } => {
                if source.is_rejection() {
                    (StatusCode::BAD_REQUEST, format!("{}", source))
                } else {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "failed to save image".to_owned(),
                    )
                }
            }
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

fn parse_post_id(text: &str) -> Result<PostId> {
    PostId::new(text).context(BadPostIdSnafu { text })
}

/// Look up a live post by ID
async fn live_post(state: &Claroz, post_id: PostId) -> Result<Post> {
    state
        .storage
        .post_by_id(&post_id)
        .await
        .context(LookupSnafu)?
        .context(NoSuchPostSnafu { post_id })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         `POST /posts`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "posts.created", posts_created, Sort::IntegralCounter }
define_metric! { "posts.image.orphans", posts_image_orphans, Sort::IntegralCounter }

struct Image {
    filename: String,
    content_type: String,
    content: Bytes,
}

/// Pull the "image" file & optional "caption" out of a multipart body; other parts are ignored
async fn read_post_form(mut multipart: Multipart) -> Result<(Option<Image>, String)> {
    let mut image = None;
    let mut caption = String::new();
    while let Some(field) = multipart.next_field().await.context(BadMultipartSnafu)? {
        match field.name() {
            Some("image") => {
                let filename = field.file_name().unwrap_or_default().to_owned();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_owned();
                let content = field.bytes().await.context(BadMultipartSnafu)?;
                image = Some(Image {
                    filename,
                    content_type,
                    content,
                });
            }
            Some("caption") => {
                caption = field.text().await.context(BadMultipartSnafu)?;
            }
            _ => (),
        }
    }
    Ok((image, caption))
}

/// Create a post from an uploaded image
///
/// The image is stored first; if the post can't then be recorded, the image is removed again.
async fn create_post(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> axum::response::Response {
    async fn create_post1(
        state: &Claroz,
        caller: UserId,
        multipart: std::result::Result<Multipart, MultipartRejection>,
    ) -> Result<PostDetails> {
        let (image, caption) = read_post_form(multipart.context(NoMultipartSnafu)?).await?;
        let image = image.context(NoImageSnafu)?;
        let url = state
            .uploads
            .save(&image.filename, &image.content_type, image.content)
            .await
            .context(UploadSnafu)?;

        let post = Post::new(&caller, &caption, &url);
        if let Err(err) = state.storage.add_post(&post).await {
            if let Err(del_err) = state.uploads.delete(&url).await {
                posts_image_orphans.add(1, &[]);
                warn!("Failed to remove {} after a failed post: {}", url, del_err);
            }
            return Err(AddPostSnafu { url }.into_error(err));
        }

        post_details(state.storage.as_ref(), post)
            .await
            .context(LookupSnafu)?
            .context(NoCallerSnafu { user_id: caller })
    }

    match create_post1(&state, caller, multipart).await {
        Ok(details) => {
            info!("User {} created post {}", caller, details.post.id());
            posts_created.add(1, &[]);
            (StatusCode::CREATED, Json(details)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          `GET /posts`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Paging parameters, as they arrive on the query string
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PageParams {
    page: Option<String>,
    #[serde(rename = "pageSize")]
    page_size: Option<String>,
}

impl PageParams {
    /// Resolve to a (one-based page, page size) pair
    ///
    /// Missing or unparsable values take their defaults; pages before the first are the first &
    /// page sizes outside `1..=MAX_PAGE_SIZE` are the default size.
    pub fn resolve(&self) -> (usize, usize) {
        let page = self
            .page
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .max(1)
            .pipe(|n| usize::try_from(n).unwrap_or(usize::MAX));
        let page_size = self
            .page_size
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|n| (1..=MAX_PAGE_SIZE as i64).contains(n))
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        (page, page_size)
    }
}

async fn list_posts(
    State(state): State<Arc<Claroz>>,
    Query(params): Query<PageParams>,
) -> axum::response::Response {
    async fn list_posts1(state: &Claroz, params: PageParams) -> Result<Vec<PostDetails>> {
        let (page, page_size) = params.resolve();
        let storage = state.storage.as_ref();
        let posts = storage.posts(page, page_size).await.context(LookupSnafu)?;
        posts_details(storage, posts).await.context(LookupSnafu)
    }

    match list_posts1(&state, params).await {
        Ok(posts) => (StatusCode::OK, Json(posts)).into_response(),
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `/posts/{id}`                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn get_post(
    State(state): State<Arc<Claroz>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn get_post1(state: &Claroz, id: &str) -> Result<PostDetails> {
        let post_id = parse_post_id(id)?;
        let post = live_post(state, post_id).await?;
        post_details(state.storage.as_ref(), post)
            .await
            .context(LookupSnafu)?
            .context(NoSuchPostSnafu { post_id })
    }

    match get_post1(&state, &id).await {
        Ok(details) => (StatusCode::OK, Json(details)).into_response(),
        Err(err) => err.into_response(),
    }
}

define_metric! { "posts.deleted", posts_deleted, Sort::IntegralCounter }

/// Delete one of the caller's posts, then its image
async fn delete_post(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn delete_post1(state: &Claroz, caller: UserId, id: &str) -> Result<Post> {
        let post_id = parse_post_id(id)?;
        let post = live_post(state, post_id).await?;
        state
            .storage
            .delete_post(&post_id, &caller)
            .await
            .context(DeletePostSnafu { post_id })?;
        Ok(post)
    }

    match delete_post1(&state, caller, &id).await {
        Ok(post) => {
            // The post is gone either way; a stray file is only worth a log line.
            if let Err(err) = state.uploads.delete(post.image_url()).await {
                posts_image_orphans.add(1, &[]);
                warn!("Failed to remove the image for post {}: {}", post.id(), err);
            }
            info!("User {} deleted post {}", caller, post.id());
            posts_deleted.add(1, &[]);
            MessageRsp::new("post deleted successfully").into_response()
        }
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Comments                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
pub struct CommentReq {
    content: String,
}

define_metric! { "posts.comments", posts_comments, Sort::IntegralCounter }

async fn add_comment(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path(id): Path<String>,
    body: std::result::Result<Json<CommentReq>, JsonRejection>,
) -> axum::response::Response {
    async fn add_comment1(
        state: &Claroz,
        caller: UserId,
        id: &str,
        body: std::result::Result<Json<CommentReq>, JsonRejection>,
    ) -> Result<Attributed<Comment>> {
        let post_id = parse_post_id(id)?;
        let Json(req) = body.context(BadBodySnafu)?;
        let comment = Comment::new(&post_id, &caller, &req.content).context(CommentSnafu)?;
        state
            .storage
            .add_comment(&comment)
            .await
            .context(AddCommentSnafu { post_id })?;
        let user = state
            .storage
            .user_by_id(&caller)
            .await
            .context(LookupSnafu)?
            .context(NoCallerSnafu { user_id: caller })?;
        Ok(Attributed {
            item: comment,
            user,
        })
    }

    match add_comment1(&state, caller, &id, body).await {
        Ok(comment) => {
            posts_comments.add(1, &[]);
            (StatusCode::CREATED, Json(comment)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn delete_comment(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path((id, comment_id)): Path<(String, String)>,
) -> axum::response::Response {
    async fn delete_comment1(
        state: &Claroz,
        caller: UserId,
        id: &str,
        comment_id: &str,
    ) -> Result<()> {
        let post_id = parse_post_id(id)?;
        let comment_id = CommentId::new(comment_id).context(BadCommentIdSnafu { text: comment_id })?;
        // The comment has to belong to the post named in the path
        match state
            .storage
            .comment_by_id(&comment_id)
            .await
            .context(LookupSnafu)?
        {
            Some(comment) if comment.post_id() == post_id => (),
            _ => return NoSuchCommentSnafu { post_id, comment_id }.fail(),
        }
        state
            .storage
            .delete_comment(&comment_id, &caller)
            .await
            .context(DeleteCommentSnafu { comment_id })
    }

    match delete_comment1(&state, caller, &id, &comment_id).await {
        Ok(()) => MessageRsp::new("comment deleted successfully").into_response(),
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Likes                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

define_metric! { "posts.likes", posts_likes, Sort::IntegralCounter }

async fn like_post(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn like_post1(state: &Claroz, caller: UserId, id: &str) -> Result<()> {
        let post_id = parse_post_id(id)?;
        state
            .storage
            .add_like(&Like::new(&post_id, &caller))
            .await
            .context(LikeSnafu {
                post_id,
                user_id: caller,
            })
    }

    match like_post1(&state, caller, &id).await {
        Ok(()) => {
            posts_likes.add(1, &[]);
            MessageRsp::new("post liked successfully").into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Unliking a post one hasn't liked is not an error
async fn unlike_post(
    State(state): State<Arc<Claroz>>,
    Extension(caller): Extension<UserId>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn unlike_post1(state: &Claroz, caller: UserId, id: &str) -> Result<bool> {
        let post_id = parse_post_id(id)?;
        state
            .storage
            .remove_like(&post_id, &caller)
            .await
            .context(UnlikeSnafu {
                post_id,
                user_id: caller,
            })
    }

    match unlike_post1(&state, caller, &id).await {
        Ok(removed) => {
            if !removed {
                info!("User {} unliked post {}, which they hadn't liked", caller, id);
            }
            MessageRsp::new("post unliked successfully").into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Return a router for the posts endpoints
pub fn make_router(state: Arc<Claroz>) -> Router<Arc<Claroz>> {
    Router::new()
        .route(
            "/posts",
            post(create_post)
                .layer(DefaultBodyLimit::max(MAX_POST_BODY))
                .get(list_posts),
        )
        .route("/posts/{id}", get(get_post).delete(delete_post))
        .route("/posts/{id}/comments", post(add_comment))
        .route(
            "/posts/{id}/comments/{comment_id}",
            delete(delete_comment),
        )
        .route("/posts/{id}/like", post(like_post).delete(unlike_post))
        .route_layer(from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;

    fn params(page: Option<&str>, page_size: Option<&str>) -> PageParams {
        PageParams {
            page: page.map(str::to_owned),
            page_size: page_size.map(str::to_owned),
        }
    }

    #[test]
    fn pagination() {
        assert_eq!((1, 10), params(None, None).resolve());
        assert_eq!((3, 20), params(Some("3"), Some("20")).resolve());
        assert_eq!((1, 10), params(Some("0"), Some("0")).resolve());
        assert_eq!((1, 10), params(Some("-4"), Some("51")).resolve());
        assert_eq!((1, 50), params(Some("x"), Some("50")).resolve());
        assert_eq!((2, 10), params(Some("2"), Some("lots")).resolve());
        assert_eq!(
            (i64::MAX as usize, 50),
            params(Some("9223372036854775807"), Some("50")).resolve()
        );
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            (StatusCode::BAD_REQUEST, "image is required".to_owned()),
            NoImageSnafu.build().as_status_and_msg()
        );
        let post_id = PostId::default();
        let user_id = UserId::default();
        assert_eq!(
            (StatusCode::BAD_REQUEST, "post already liked".to_owned()),
            LikeSnafu { post_id, user_id }
                .into_error(storage::AlreadyLikedSnafu { post_id, user_id }.build())
                .as_status_and_msg()
        );
        assert_eq!(
            StatusCode::FORBIDDEN,
            DeletePostSnafu { post_id }
                .into_error(storage::NotPostOwnerSnafu { post_id, user_id }.build())
                .as_status_and_msg()
                .0
        );
        assert_eq!(
            StatusCode::BAD_REQUEST,
            parse_post_id("42").unwrap_err().as_status_and_msg().0
        );
    }
}
