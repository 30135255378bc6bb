//! Canonical identifiers for free-form display names.
//!
//! `"Tawnos, Urza's Apprentice (Legendary)"` becomes `"tawnos_urzas_apprentice"`.

/// Turn a display name into a lookup key.
///
/// Lower-cases the input, drops everything from the first `" ("` on, removes
/// apostrophes and folds whitespace, hyphens and commas into single
/// underscores. Applying it twice yields the same string.
#[must_use]
pub fn tokenize(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut current = match lowered.split_once(" (") {
        Some((head, _)) => head.to_string(),
        None => lowered,
    };

    loop {
        let next = cleanse(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn cleanse(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\'' => {}
            '-' | ',' => out.push('_'),
            c if c.is_whitespace() => out.push('_'),
            c => out.push(c),
        }
    }
    out.replace("__", "_")
}

/// Title-case every alphabetic run: `"death_knight"` -> `"Death_Knight"`.
#[must_use]
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut previous_alpha = false;
    for ch in input.chars() {
        if ch.is_alphabetic() {
            if previous_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(ch);
            previous_alpha = false;
        }
    }
    out
}
