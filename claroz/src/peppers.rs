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

//! # claroz peppers
//!
//! claroz salts and [peppers] passwords. Salts are generated at registration time for each user &
//! stored along with that user in the database. Peppers are stored *separately*: they're read from
//! configuration at startup and held in memory as secrets.
//!
//! [peppers]: https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html#peppering
//!
//! ```toml
//! [pepper]
//! "pepper-ver:2025-02-12" = [1, 2, 3, 4, ..., 32] # Peppers must be 32 octets in length
//! "pepper-ver:2025-02-15" = [33, 34, 35, ..., 64]
//! ```
//!
//! Versions are compared lexicographically; the greatest is "current" & will be used for new
//! accounts. Each user has the version that was current at registration written down next to
//! their password hash, so older peppers remain usable for verification until the operator
//! removes them from configuration.

use std::{collections::BTreeMap, fmt::Display, ops::Deref, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace};

use crate::util::{mk_serde_de_err, Key};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a valid pepper version"))]
    BadVersion { text: String, backtrace: Backtrace },
    #[snafu(display("Peppers must be 32 octets in length (got {len})"))]
    BadPepper { len: usize, backtrace: Backtrace },
    #[snafu(display("No pepper available"))]
    NoPepper { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        Pepper Versions                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref VERSION: Regex = Regex::new("^pepper-ver:[-a-zA-Z0-9]+$").unwrap(/* known good */);
}

/// Correct-by-construction version string for peppers
///
/// Pepper versions are strings of the form "pepper-ver:[-a-zA-Z0-9]+".
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(text: &str) -> Result<Version> {
        VERSION
            .is_match(text)
            .then_some(Version(text.to_owned()))
            .context(BadVersionSnafu { text })
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Version {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        Version::new(s)
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(text: String) -> StdResult<Self, Self::Error> {
        if VERSION.is_match(&text) {
            Ok(Version(text))
        } else {
            BadVersionSnafu { text }.fail()
        }
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Version::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

crate::pg_text_type!(Version);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Pepper                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

const PEPPER_LEN: usize = 32;

/// A [Pepper] is a 32-octet key
#[derive(Clone, Debug)]
pub struct Pepper(Key);

impl Pepper {
    pub fn new(b: Vec<u8>) -> Result<Pepper> {
        if b.len() == PEPPER_LEN {
            Ok(Pepper(b.into()))
        } else {
            BadPepperSnafu { len: b.len() }.fail()
        }
    }
}

impl Default for Pepper {
    fn default() -> Self {
        Pepper(Key::random(PEPPER_LEN))
    }
}

impl AsRef<Key> for Pepper {
    fn as_ref(&self) -> &Key {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Pepper {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = <Key as serde::Deserialize>::deserialize(deserializer)?;
        if key.len() == PEPPER_LEN {
            Ok(Pepper(key))
        } else {
            Err(mk_serde_de_err::<'de, D>(
                BadPepperSnafu { len: key.len() }.build(),
            ))
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Peppers                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct Peppers {
    peppers: BTreeMap<Version, Pepper>,
}

impl Default for Peppers {
    fn default() -> Self {
        Peppers {
            peppers: BTreeMap::from_iter(vec![(
                Version(chrono::Local::now().format("pepper-ver:%Y%m%d").to_string()),
                Pepper::default(),
            )]),
        }
    }
}

impl Peppers {
    /// Retrieve the current (i.e. the most recent) Pepper
    pub fn current_pepper(&self) -> Result<(Version, Pepper)> {
        let (key, value) = self.peppers.last_key_value().context(NoPepperSnafu)?;
        Ok((key.clone(), value.clone()))
    }
    /// Retrieve a pepper by version
    pub fn find_by_version(&self, version: &Version) -> Result<Pepper> {
        Ok(self.peppers.get(version).context(NoPepperSnafu)?.clone())
    }
}

impl<const N: usize> From<[(Version, Pepper); N]> for Peppers {
    fn from(value: [(Version, Pepper); N]) -> Self {
        Self {
            peppers: BTreeMap::from(value),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn versions() {
        assert!(Version::new("pepper-ver:20250212").is_ok());
        assert!(Version::new("pepper-ver:").is_err());
        assert!(Version::new("20250212").is_err());
    }

    #[test]
    fn current_is_greatest() {
        let older = Version::new("pepper-ver:2025-02-12").unwrap();
        let newer = Version::new("pepper-ver:2025-02-15").unwrap();
        let peppers = Peppers::from([
            (newer.clone(), Pepper::default()),
            (older.clone(), Pepper::default()),
        ]);
        assert_eq!(newer, peppers.current_pepper().unwrap().0);
        assert!(peppers.find_by_version(&older).is_ok());
        assert!(peppers
            .find_by_version(&Version::new("pepper-ver:nope").unwrap())
            .is_err());
    }

    #[test]
    fn deserialize_peppers() {
        let text = format!(
            "\"pepper-ver:2025-02-12\" = [{}]",
            (0..32).map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
        );
        let peppers: Peppers = toml::from_str(&text).unwrap();
        assert_eq!(
            "pepper-ver:2025-02-12",
            peppers.current_pepper().unwrap().0.as_ref()
        );

        // Wrong length
        assert!(toml::from_str::<Peppers>("\"pepper-ver:2025-02-12\" = [1, 2, 3]").is_err());
    }
}
