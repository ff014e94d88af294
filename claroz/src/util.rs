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

//! # util
//!
//! Odds & ends shared by the secrets modules ([peppers](crate::peppers) &
//! [signing_keys](crate::signing_keys)) and the entity types.

use std::ops::Deref;

use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Deserializer};
use serde_bytes::ByteBuf;
use tap::{Conv, Pipe};

/// Map any error into a serde deserialization error
pub fn mk_serde_de_err<'de, D: Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{:?}", err))
}

/// Store a refined string type in a PostgreSQL `TEXT` column
///
/// The type must implement `AsRef<str>` & `TryFrom<String>` (with an error type that's
/// `std::error::Error + Send + Sync + 'static`). Reads run the value back through `try_from`, so a
/// row that fails refinement is a decoding error rather than a silently invalid value.
#[macro_export]
macro_rules! pg_text_type {
    ($type_name:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $type_name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }
        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $type_name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
                let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(<$type_name>::try_from(s)?)
            }
        }
        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $type_name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(
                    <Self as AsRef<str>>::as_ref(self),
                    buf,
                )
            }
        }
    };
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Key                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A general-purpose secret key
///
/// [Key] is a deserializable, secret, slice of bytes. Peppers & JWT signing keys are both built on
/// it; configuration writes them down as arrays of octets.
#[derive(Clone, Debug)]
pub struct Key(SecretSlice<u8>);

impl Key {
    /// Generate `len` octets from the OS' CSPRNG
    pub fn random(len: usize) -> Key {
        let mut bytes: Vec<u8> = vec![0; len];
        argon2::password_hash::rand_core::OsRng.fill_bytes(&mut bytes);
        bytes.into()
    }
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }
}

impl AsRef<SecretSlice<u8>> for Key {
    fn as_ref(&self) -> &SecretSlice<u8> {
        self.deref()
    }
}

impl Deref for Key {
    type Target = SecretSlice<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// `[u8]` isn't `DeserializeOwned`, so go through `ByteBuf`
impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        <ByteBuf as serde::Deserialize>::deserialize(deserializer)
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{:?}", err)))?
            .pipe(|x| x.into_vec())
            .conv::<SecretSlice<u8>>()
            .pipe(Key)
            .pipe(Ok)
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Key(value.into())
    }
}
