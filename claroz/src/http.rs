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

//! Response bodies shared across the API.

use axum::Json;
use serde::{Deserialize, Serialize};

/// A serializable struct for use in HTTP error responses
///
/// This is intended to be used in the [IntoResponse] implementations for whatever error type
/// an axum handler is using.
///
/// [IntoResponse]: https://docs.rs/axum/latest/axum/response/trait.IntoResponse.html
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

impl axum::response::IntoResponse for ErrorResponseBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// `{"message": "..."}`, for operations with nothing else to say
#[derive(Debug, Deserialize, Serialize)]
pub struct MessageRsp {
    pub message: String,
}

impl MessageRsp {
    pub fn new(message: &str) -> MessageRsp {
        MessageRsp {
            message: message.to_owned(),
        }
    }
}

impl axum::response::IntoResponse for MessageRsp {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}
