//! Highest-version selection over ad hoc version strings
//!
//! Mod versions in the wild follow no single scheme: `1.2.3`, `v0.5pre`,
//! `2:0.90-rc1` all occur. Two rules make them totally ordered anyway:
//!
//! - An optional `N:` epoch prefix outranks everything without (or with a
//!   lower) epoch. Epochs are compared numerically, so `10:` beats `2:`.
//! - Within the deciding group the remainder is natural-sorted: digit runs
//!   compare by numeric value, everything else lexicographically, so `1:10`
//!   beats `1:9`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

static EPOCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+):").unwrap());

/// Pick the highest version string, returned exactly as it appeared in the
/// input (epoch prefix included). `None` for an empty input.
pub fn highest<'a, I>(versions: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(Option<&'a str>, &'a str, &'a str)> = None;
    for original in versions {
        let (epoch, rest) = split_epoch(original);
        match best {
            None => best = Some((epoch, rest, original)),
            Some((best_epoch, best_rest, _)) => {
                let ordering = match (epoch, best_epoch) {
                    // Any epoch outranks no epoch.
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (Some(a), Some(b)) => {
                        cmp_digit_run(a, b).then_with(|| natural_cmp(rest, best_rest))
                    }
                    (None, None) => natural_cmp(rest, best_rest),
                };
                if ordering == Ordering::Greater {
                    best = Some((epoch, rest, original));
                }
            }
        }
    }
    best.map(|(_, _, original)| original.to_string())
}

/// Split an optional `N:` epoch prefix off a version string.
fn split_epoch(version: &str) -> (Option<&str>, &str) {
    match EPOCH.captures(version) {
        Some(caps) => {
            let whole = caps.get(0).unwrap();
            let digits = caps.get(1).unwrap();
            (Some(digits.as_str()), &version[whole.end()..])
        }
        None => (None, version),
    }
}

/// Compare two digit runs by numeric value without parsing into a fixed-width
/// integer: strip leading zeros, then longer wins, then lexicographic.
fn cmp_digit_run(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Natural-sort comparison: digit runs by numeric value, other runs
/// lexicographically, a digit run sorts before a non-digit run at the same
/// position. Falls back to plain string order to stay total on ties like
/// `1.01` vs `1.1`.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = runs(a);
    let mut right = runs(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((a_digits, a_run)), Some((b_digits, b_run))) => {
                let ordering = match (a_digits, b_digits) {
                    (true, true) => cmp_digit_run(a_run, b_run),
                    (false, false) => a_run.cmp(b_run),
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Iterate maximal runs of digits / non-digits as `(is_digits, run)`.
fn runs(s: &str) -> impl Iterator<Item = (bool, &str)> {
    let bytes = s.as_bytes();
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= bytes.len() {
            return None;
        }
        let is_digits = bytes[start].is_ascii_digit();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() == is_digits {
            end += 1;
        }
        let run = &s[start..end];
        start = end;
        Some((is_digits, run))
    })
}
