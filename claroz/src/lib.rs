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

//! # claroz
//!
//! The library half of claroz: entities, storage, the HTTP API & the AT Protocol federation
//! logic. `clarozd` wires these together into a server.
pub mod atproto;
pub mod authn;
pub mod claroz;
pub mod entities;
pub mod federation;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod peppers;
pub mod postgres;
pub mod posts;
#[path = "signing-keys.rs"]
pub mod signing_keys;
pub mod storage;
pub mod token;
pub mod uploads;
pub mod users;
pub mod util;
