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

use std::{env, fs, future::Future, pin::Pin};

use libtest_mimic::Failed;
use reqwest::Url;
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to read CLAROZ_TEST_CONFIG: {source}"))]
    Env { source: std::env::VarError },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read { pth: String, source: std::io::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Test configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    /// Where the `clarozd` under test is listening
    pub url: Url,
    #[serde(default)]
    pub logging: bool,
}

impl Configuration {
    /// Obtain a [Configuration], if there is one
    ///
    /// Check the `CLAROZ_TEST_CONFIG` environment variable; if defined, parse a [Configuration]
    /// from the file named therein. If not, there's no server to test against, and we return
    /// `None`.
    pub fn new() -> Result<Option<Configuration>> {
        match env::var("CLAROZ_TEST_CONFIG") {
            Ok(f) => fs::read_to_string(&f)
                .context(ReadSnafu { pth: f.clone() })?
                .pipe(|s| toml::from_str::<Configuration>(&s))
                .context(DeSnafu { pth: f.clone() })
                .map(Some),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(EnvSnafu.into_error(err)),
        }
    }
}

pub type TestFuture = Pin<Box<dyn Future<Output = std::result::Result<(), Failed>> + Send>>;

pub struct ClarozTest {
    pub name: &'static str,
    pub test_fn: fn(Configuration) -> TestFuture,
}

inventory::collect!(ClarozTest);
