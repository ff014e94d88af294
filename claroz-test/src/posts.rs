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

//! Integration tests for the posts API.

use claroz::{entities::PostDetails, http::ErrorResponseBody};
use libtest_mimic::Failed;
use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode, Url,
};
use serde_json::json;

use crate::{bearer, register};

// The smallest PNG there is: one transparent pixel
const PIXEL: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// Post an image, like it, comment on it, fetch the image back, then delete it all
pub async fn test_post_lifecycle(url: Url) -> Result<(), Failed> {
    let client = Client::new();
    let author = register(&client, &url, "author").await?;
    let reader = register(&client, &url, "reader").await?;
    let (name, author_token) = bearer(&author);
    let (_, reader_token) = bearer(&reader);

    let form = Form::new().text("caption", "A single pixel").part(
        "image",
        Part::bytes(PIXEL.to_vec())
            .file_name("pixel.png")
            .mime_str("image/png")?,
    );
    let rsp = client
        .post(url.join("/api/v1/posts")?)
        .header(name.clone(), author_token.clone())
        .multipart(form)
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());
    let post = rsp.json::<PostDetails>().await?;
    assert_eq!("A single pixel", post.post.caption());

    // The image is served back from wherever it was stored
    let rsp = client.get(url.join(post.post.image_url())?).send().await?;
    assert_eq!(StatusCode::OK, rsp.status());
    assert_eq!(PIXEL, rsp.bytes().await?.as_ref());

    let post_url = url.join(&format!("/api/v1/posts/{}", post.post.id()))?;
    let like_url = url.join(&format!("/api/v1/posts/{}/like", post.post.id()))?;
    let rsp = client
        .post(like_url.clone())
        .header(name.clone(), reader_token.clone())
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());
    let rsp = client
        .post(like_url)
        .header(name.clone(), reader_token.clone())
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());
    assert_eq!(
        "post already liked",
        rsp.json::<ErrorResponseBody>().await?.error
    );

    let rsp = client
        .post(url.join(&format!("/api/v1/posts/{}/comments", post.post.id()))?)
        .header(name.clone(), reader_token.clone())
        .json(&json!({"content": "Tiny!"}))
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());

    let rsp = client
        .get(post_url.clone())
        .header(name.clone(), reader_token.clone())
        .send()
        .await?;
    let details = rsp.json::<PostDetails>().await?;
    assert_eq!(1, details.like_count);
    assert_eq!(1, details.comments.len());

    let rsp = client
        .delete(post_url.clone())
        .header(name.clone(), reader_token)
        .send()
        .await?;
    assert_eq!(StatusCode::FORBIDDEN, rsp.status());
    let rsp = client
        .delete(post_url.clone())
        .header(name.clone(), author_token.clone())
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());

    let rsp = client
        .get(post_url)
        .header(name, author_token)
        .send()
        .await?;
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());

    Ok(())
}

/// A post with no image is refused
pub async fn test_post_requires_image(url: Url) -> Result<(), Failed> {
    let client = Client::new();
    let author = register(&client, &url, "noimage").await?;
    let (name, value) = bearer(&author);
    let rsp = client
        .post(url.join("/api/v1/posts")?)
        .header(name, value)
        .multipart(Form::new().text("caption", "Nothing to see"))
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());
    assert_eq!(
        "image is required",
        rsp.json::<ErrorResponseBody>().await?.error
    );
    Ok(())
}
