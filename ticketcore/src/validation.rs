//! Shared validation predicates for domain types.
//!
//! This module contains validation functions used by nutype-based domain types
//! across the ticketcore crate.

/// Validation predicate: a single `@` separating a non-empty local part from
/// a domain that contains at least one dot.
///
/// Full address syntax is checked by the routing layer; this only keeps
/// obviously malformed values out of the store.
pub(crate) fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && !s.contains(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}
