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

//! # uploads
//!
//! Storage for the images attached to posts. Files are written under a configured directory as
//! `YYYYMMDD-<uuid><.ext>` & served back (by `clarozd`) under a URL prefix; the URL is what gets
//! stored on the post.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Can't derive a file name from {url}"))]
    BadUrl { url: String, backtrace: Backtrace },
    #[snafu(display("Failed to create the upload directory {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{content_type} is not an allowed file type"))]
    DisallowedType {
        content_type: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to remove {}: {source}", path.display()))]
    Remove {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Uploads are limited to {max} bytes (got {size})"))]
    TooLarge {
        size: usize,
        max: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to write {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True if the upload was refused on account of its size or type (i.e. the caller's fault)
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::DisallowedType { .. } | Error::TooLarge { .. })
    }
}

/// Somewhere to keep uploaded files
#[async_trait]
pub trait FileStorage {
    /// Store `content` (uploaded as `filename`, of type `content_type`); return its URL
    async fn save(&self, filename: &str, content_type: &str, content: Bytes) -> Result<String>;
    /// Remove the file at `url`, as returned from [FileStorage::save]
    async fn delete(&self, url: &str) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Local,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub provider: Provider,
    pub local_path: PathBuf,
    pub max_file_size: usize,
    pub allowed_types: Vec<String>,
    pub url_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: Provider::Local,
            local_path: PathBuf::from("./uploads"),
            max_file_size: 5 * 1024 * 1024,
            allowed_types: vec![
                "image/jpeg".to_owned(),
                "image/png".to_owned(),
                "image/gif".to_owned(),
            ],
            url_prefix: "/uploads".to_owned(),
        }
    }
}

/// [FileStorage] on the local filesystem
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    dir: PathBuf,
    max_file_size: usize,
    allowed_types: Vec<String>,
    url_prefix: String,
}

impl LocalFileStorage {
    /// Create the upload directory if need be
    pub fn new(config: &Config) -> Result<LocalFileStorage> {
        std::fs::create_dir_all(&config.local_path).context(CreateDirSnafu {
            path: config.local_path.clone(),
        })?;
        Ok(LocalFileStorage {
            dir: config.local_path.clone(),
            max_file_size: config.max_file_size,
            allowed_types: config
                .allowed_types
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            url_prefix: config.url_prefix.trim_end_matches('/').to_owned(),
        })
    }
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `filename`'s extension, lower-cased & with its leading '.', or the empty string
fn extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn save(&self, filename: &str, content_type: &str, content: Bytes) -> Result<String> {
        ensure!(
            content.len() <= self.max_file_size,
            TooLargeSnafu {
                size: content.len(),
                max: self.max_file_size
            }
        );
        // Ignore any parameters ("image/png; foo=bar")
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        ensure!(
            self.allowed_types.contains(&essence),
            DisallowedTypeSnafu { content_type }
        );

        let name = format!(
            "{}-{}{}",
            Utc::now().format("%Y%m%d"),
            Uuid::new_v4(),
            extension(filename)
        );
        let path = self.dir.join(&name);
        tokio::fs::write(&path, &content)
            .await
            .context(WriteSnafu { path: path.clone() })?;
        debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(format!("{}/{}", self.url_prefix, name))
    }
    async fn delete(&self, url: &str) -> Result<()> {
        // Only ever trust the final path component
        let name = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .context(BadUrlSnafu { url })?;
        let path = self.dir.join(name);
        tokio::fs::remove_file(&path)
            .await
            .context(RemoveSnafu { path })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn storage_in(dir: &Path) -> LocalFileStorage {
        LocalFileStorage::new(&Config {
            local_path: dir.join("uploads"),
            max_file_size: 16,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn extensions() {
        assert_eq!(".jpg", extension("sunset.JPG"));
        assert_eq!(".png", extension("a.b.png"));
        assert_eq!("", extension("noext"));
    }

    #[tokio::test]
    async fn save_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(tmp.path());
        assert!(storage.dir().is_dir());

        let url = storage
            .save("Sunset.JPG", "image/jpeg", Bytes::from_static(b"not really"))
            .await
            .unwrap();
        let name = url.strip_prefix("/uploads/").unwrap();
        let (date, rest) = name.split_once('-').unwrap();
        assert_eq!(8, date.len());
        assert!(date.chars().all(|c| c.is_ascii_digit()));
        assert!(rest.ends_with(".jpg"));
        assert_eq!(
            b"not really".as_slice(),
            std::fs::read(storage.dir().join(name)).unwrap()
        );

        storage.delete(&url).await.unwrap();
        assert!(!storage.dir().join(name).exists());
        assert!(matches!(
            storage.delete(&url).await,
            Err(Error::Remove { .. })
        ));
    }

    #[tokio::test]
    async fn rejections() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(tmp.path());

        let err = storage
            .save("big.png", "image/png", Bytes::from(vec![0u8; 17]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooLarge { .. }));
        assert!(err.is_rejection());

        let err = storage
            .save("doc.pdf", "application/pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DisallowedType { .. }));

        assert!(storage
            .save("ok.gif", "IMAGE/GIF", Bytes::from_static(b"GIF89a"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn deletion_stays_in_the_upload_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(tmp.path());
        std::fs::write(tmp.path().join("precious"), b"keep me").unwrap();

        // Resolves to "<dir>/precious", which doesn't exist, rather than "<tmp>/precious"
        assert!(storage.delete("/uploads/../precious").await.is_err());
        assert!(tmp.path().join("precious").exists());
        assert!(matches!(
            storage.delete("/uploads/").await,
            Err(Error::BadUrl { .. })
        ));
    }
}
