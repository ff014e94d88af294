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

//! # claroz Signing Keys
//!
//! claroz signs the JWTs it hands out at registration & login. Like [peppers], the keys are read
//! from configuration, kept in memory as secrets, versioned & rotated:
//!
//! [peppers]: crate::peppers
//!
//! ```toml
//! [signing-keys.signing-keys]
//! "keyid:2025-02-12" = [1, 2, 3, 4, ..., 64] # Keys must be 64 octets in length
//! "keyid:2025-02-15" = [65, 66, 67,..., 128]
//! ```
//!
//! The greatest key ID signs new tokens. Every token names its key in the `kid` header, so any key
//! still present in configuration can verify. Dropping a key invalidates the tokens it signed.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use snafu::{prelude::*, Backtrace};

use crate::util::{mk_serde_de_err, Key};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to recognize {text} as a KeyId"))]
    KeyId { text: String, backtrace: Backtrace },
    #[snafu(display("No signing key available"))]
    NoKey { backtrace: Backtrace },
    #[snafu(display("Signing keys must be 64 octets in length (got {len})"))]
    SigningKey { len: usize, backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             KeyId                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref KEY_ID : Regex = Regex::new("^keyid:[-0-9a-zA-Z]+$").unwrap(/* known good */);
}

#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(s: &str) -> Result<KeyId> {
        if KEY_ID.is_match(s) {
            Ok(KeyId(s.to_owned()))
        } else {
            KeyIdSnafu { text: s.to_owned() }.fail()
        }
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for KeyId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        KeyId::new(s)
    }
}

impl AsRef<str> for KeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        KeyId::new(&s).map_err(mk_serde_de_err::<'de, D>)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           SigningKey                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

const SIGNING_KEY_LEN: usize = 64;

/// A [Key] of exactly 64 octets
#[derive(Clone, Debug)]
pub struct SigningKey(Key);

impl SigningKey {
    pub fn new(b: Vec<u8>) -> Result<SigningKey> {
        if b.len() == SIGNING_KEY_LEN {
            Ok(SigningKey(b.into()))
        } else {
            SigningKeySnafu { len: b.len() }.fail()
        }
    }
}

impl Default for SigningKey {
    fn default() -> Self {
        SigningKey(Key::random(SIGNING_KEY_LEN))
    }
}

impl AsRef<Key> for SigningKey {
    fn as_ref(&self) -> &Key {
        &self.0
    }
}

impl<'de> Deserialize<'de> for SigningKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = <Key as serde::Deserialize>::deserialize(deserializer)?;
        if key.len() == SIGNING_KEY_LEN {
            Ok(SigningKey(key))
        } else {
            Err(mk_serde_de_err::<'de, D>(
                SigningKeySnafu { len: key.len() }.build(),
            ))
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          SigningKeys                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct SigningKeys {
    keys: BTreeMap<KeyId, SigningKey>,
}

impl SigningKeys {
    /// Retrieve the current (i.e. the most recent) SigningKey
    pub fn current(&self) -> Result<(KeyId, SigningKey)> {
        let (key, value) = self.keys.last_key_value().context(NoKeySnafu)?;
        Ok((key.clone(), value.clone()))
    }
    /// Retrieve a signing key by ID
    pub fn find_by_version(&self, keyid: &KeyId) -> Result<SigningKey> {
        Ok(self.keys.get(keyid).context(NoKeySnafu)?.clone())
    }
}

impl Default for SigningKeys {
    fn default() -> Self {
        SigningKeys {
            keys: BTreeMap::from_iter(vec![(
                KeyId(chrono::Local::now().format("keyid:%Y%m%d").to_string()),
                SigningKey::default(),
            )]),
        }
    }
}

impl<const N: usize> From<[(KeyId, SigningKey); N]> for SigningKeys {
    fn from(value: [(KeyId, SigningKey); N]) -> Self {
        Self {
            keys: BTreeMap::from(value),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_ids() {
        assert!(KeyId::new("keyid:20250817").is_ok());
        assert!(KeyId::new("keyid:2025 08 17").is_err());
        assert!(KeyId::new("20250817").is_err());
    }

    #[test]
    fn key_lengths() {
        assert!(SigningKey::new(vec![0; 64]).is_ok());
        assert!(SigningKey::new(vec![0; 32]).is_err());
    }

    #[test]
    fn rotation() {
        let old = KeyId::new("keyid:2025-02-12").unwrap();
        let new = KeyId::new("keyid:2025-02-15").unwrap();
        let keys = SigningKeys::from([
            (old.clone(), SigningKey::default()),
            (new.clone(), SigningKey::default()),
        ]);
        assert_eq!(new, keys.current().unwrap().0);
        assert!(keys.find_by_version(&old).is_ok());
        assert!(keys
            .find_by_version(&KeyId::new("keyid:gone").unwrap())
            .is_err());
    }
}
