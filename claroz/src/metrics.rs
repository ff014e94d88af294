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

//! # claroz metrics
//!
//! claroz uses [OpenTelemetry] to collect metrics, which are then exported in Prometheus text
//! format at `/metrics`. Instruments are meant to be created once & re-used, which raises the
//! question of where to keep them. Rather than hang them all off the application state, each
//! module declares the instruments it needs at file scope:
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! ```ignore
//! define_metric! { "users.logins.successful", users_logins_successful, Sort::IntegralCounter }
//! // ...
//! users_logins_successful.add(1, &[]);
//! ```
//!
//! [define_metric!] both declares a lazily-initialized instrument and registers its name with the
//! [inventory] crate, so that [check_metric_names] can catch two modules accidentally claiming the
//! same metric name at startup rather than in production.
//!
//! The instruments are built on first use from the global meter provider, so the daemon must
//! install its provider before serving any requests.

use std::collections::HashSet;

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Corresponds to `Counter<u64>`
    IntegralCounter,
}

/// The type of thing being inventoried
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

/// Panic if any metric name has been registered twice
pub fn check_metric_names() {
    let mut names: HashSet<&'static str> = HashSet::new();
    IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
        if !names.insert(reg.name()) {
            panic!("The metric name {} was registered twice", reg.name());
        }
    });
}

/// Declare an instrument at file scope & register its name
#[macro_export]
macro_rules! define_metric {
    ($name:literal, $ident:ident, Sort::IntegralCounter) => {
        inventory::submit! {
            $crate::metrics::Registration::new($name, $crate::metrics::Sort::IntegralCounter)
        }
        lazy_static::lazy_static! {
            #[allow(non_upper_case_globals)]
            static ref $ident: opentelemetry::metrics::Counter<u64> =
                opentelemetry::global::meter("claroz").u64_counter($name).build();
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registered_names_are_unique() {
        check_metric_names();
        assert!(inventory::iter::<Registration>
            .into_iter()
            .any(|reg| reg.name() == "users.logins.successful"
                && reg.sort() == Sort::IntegralCounter));
    }
}
