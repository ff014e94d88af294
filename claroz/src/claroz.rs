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

use std::sync::Arc;

use axum::Router;
use chrono::Duration;

use crate::{
    federation::{self, ProfileResolver},
    peppers::Peppers,
    posts,
    signing_keys::SigningKeys,
    storage::Backend as StorageBackend,
    uploads::FileStorage,
    users,
};

/// Application state available to all handlers
pub struct Claroz {
    pub storage: Arc<dyn StorageBackend + Send + Sync>,
    pub uploads: Arc<dyn FileStorage + Send + Sync>,
    pub resolver: Arc<dyn ProfileResolver + Send + Sync>,
    pub registry: prometheus::Registry,
    pub pepper: Peppers,
    pub signing_keys: SigningKeys,
    pub token_lifetime: Duration,
    /// Names us in the `iss` claim of the tokens we mint
    pub issuer: String,
}

/// The `/api/v1` surface; the federation routes are only mounted if `with_federation` is true
pub fn make_router(state: Arc<Claroz>, with_federation: bool) -> Router<Arc<Claroz>> {
    let router = Router::new()
        .merge(users::make_router(state.clone()))
        .merge(posts::make_router(state.clone()));
    if with_federation {
        router.merge(federation::make_router(state))
    } else {
        router
    }
}
