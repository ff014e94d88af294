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

//! # smoke
//!
//! Smoke tests against a running `clarozd`, named by the file in `CLAROZ_TEST_CONFIG`. With no
//! such file, every test is reported as ignored.
use std::{fmt::Display, io, sync::Arc};

use itertools::Itertools;
use libtest_mimic::{Arguments, Trial};
use snafu::prelude::*;
use tokio::runtime::Runtime;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use claroz_test::{
    posts::{test_post_lifecycle, test_post_requires_image},
    test_healthcheck,
    users::{test_follows, test_register_and_login},
};

use common::{ClarozTest, Configuration};

mod common;

#[derive(Snafu)]
enum Error {
    #[snafu(display("Error obtaining test configuration: {source}"))]
    Configuration { source: common::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to build a tokio runtime: {source}"))]
    Runtime { source: io::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

inventory::submit!(ClarozTest {
    name: "000test_healthcheck",
    test_fn: |cfg: Configuration| Box::pin(test_healthcheck(cfg.url)),
});

inventory::submit!(ClarozTest {
    name: "010register_and_login",
    test_fn: |cfg: Configuration| Box::pin(test_register_and_login(cfg.url)),
});

inventory::submit!(ClarozTest {
    name: "020follows",
    test_fn: |cfg: Configuration| Box::pin(test_follows(cfg.url)),
});

inventory::submit!(ClarozTest {
    name: "030post_lifecycle",
    test_fn: |cfg: Configuration| Box::pin(test_post_lifecycle(cfg.url)),
});

inventory::submit!(ClarozTest {
    name: "031post_requires_image",
    test_fn: |cfg: Configuration| Box::pin(test_post_requires_image(cfg.url)),
});

fn main() -> Result<()> {
    // libtest-mimic wants synchronous tests, so we drive each one to completion on a runtime of
    // our own.
    let rt = Arc::new(Runtime::new().context(RuntimeSnafu)?);

    // We can't add command-line arguments of our own, so configuration comes via the environment:
    let config = Configuration::new().context(ConfigurationSnafu)?;

    let args = Arguments::from_args();

    if config.as_ref().is_some_and(|cfg| cfg.logging) {
        let filter = EnvFilter::builder()
            .with_default_directive(Level::INFO.into())
            .from_env()
            .context(FilterSnafu)?;
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt::Layer::default().compact().with_writer(io::stdout))
                .with(filter),
        )
        .context(SetGlobalDefaultSnafu)?;
    }

    let trials = inventory::iter::<ClarozTest>
        .into_iter()
        .sorted_by_key(|t| t.name)
        .map(|test| match &config {
            Some(cfg) => {
                let rt = rt.clone();
                let cfg = cfg.clone();
                Trial::test(test.name, move || rt.block_on((test.test_fn)(cfg)))
            }
            // Nothing to run against
            None => Trial::test(test.name, || Ok(())).with_ignored_flag(true),
        })
        .collect();

    libtest_mimic::run(&args, trials).exit();
}
