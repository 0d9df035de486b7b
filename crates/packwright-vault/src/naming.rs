//! Sibling-unique name derivation.
//!
//! When a copy or import lands in a folder that already has an entry
//! with the candidate name, the name is disambiguated with a numbered
//! counter. The counter goes before the semantic suffix and extension:
//! `Hero.[character].json` becomes `Hero (2).[character].json`, then
//! `Hero (3).[character].json`, and so on.

use std::sync::LazyLock;

use regex::Regex;

/// Splits a trailing semantic suffix off a file stem: `Hero.[character]`
/// captures `Hero` and `.[character]`.
static SEMANTIC_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)(\.\[.*\])$").expect("semantic suffix pattern is valid"));

/// Split a name into (base, semantic suffix, extension).
///
/// The extension is the final dot segment; the semantic suffix is any
/// bracketed tag left at the end of the remaining stem. Parts that are
/// absent come back empty.
fn split_name(name: &str) -> (&str, &str, &str) {
    let (stem, ext) = match name.rfind('.') {
        Some(i) => (&name[..i], &name[i..]),
        None => (name, ""),
    };

    match SEMANTIC_SUFFIX.captures(stem) {
        Some(caps) => {
            let base_len = caps.get(1).map_or(0, |m| m.len());
            (&stem[..base_len], &stem[base_len..], ext)
        }
        None => (stem, "", ext),
    }
}

/// Derive a name unique among siblings.
///
/// Returns the candidate unchanged when `exists` rejects it; otherwise
/// probes `"{base} ({n}){suffix}{extension}"` for n = 2, 3, … until a
/// free name is found.
pub fn unique_name<F>(candidate: &str, exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    if !exists(candidate) {
        return candidate.to_string();
    }

    let (base, suffix, ext) = split_name(candidate);
    let mut counter: u32 = 2;
    loop {
        let probe = format!("{} ({}){}{}", base, counter, suffix, ext);
        if !exists(&probe) {
            return probe;
        }
        counter += 1;
    }
}
