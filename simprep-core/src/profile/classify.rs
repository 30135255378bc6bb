//! Line classification for the profile dialect.
//!
//! Each line maps to zero or more [`ProfileEvent`]s; accumulation lives in
//! [`super::fold`].

use once_cell::sync::Lazy;
use regex::Regex;

use super::{CharacterField, ItemField, ItemSlot};

/// What a single profile line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    CharacterSet {
        field: CharacterField,
        value: String,
    },
    /// Slot line with content: the slot restarts from an empty attribute map.
    SlotSet(ItemSlot),
    /// Slot line with an empty right-hand side.
    SlotClear(ItemSlot),
    SubFieldSet {
        slot: ItemSlot,
        field: ItemField,
        value: String,
    },
}

static CHARACTER_LINE: Lazy<Regex> = Lazy::new(|| {
    let keys = CharacterField::SCANNED
        .iter()
        .map(|field| field.key())
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r#"^({keys})="?([a-z0-9_./:]*)"?$"#)).expect("character pattern")
});

static SLOT_LINE: Lazy<Regex> = Lazy::new(|| {
    let keys = ItemSlot::SPELLINGS
        .iter()
        .map(|(spelling, _)| *spelling)
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r#"^({keys})="?([a-z0-9_=,/:.]*)"?$"#)).expect("slot pattern")
});

static SUB_FIELD: Lazy<Regex> = Lazy::new(|| {
    let keys = ItemField::ALL
        .iter()
        .map(|field| field.key())
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"^({keys})=([a-z0-9_/:]*)")).expect("sub-field pattern")
});

/// Classify one line of a profile file.
///
/// Trailing line terminators are ignored. Lines that are neither a
/// character field nor an item slot produce no events.
#[must_use]
pub fn classify_line(line: &str) -> Vec<ProfileEvent> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(caps) = CHARACTER_LINE.captures(line)
        && let Some(field) = CharacterField::from_key(&caps[1])
    {
        return vec![ProfileEvent::CharacterSet {
            field,
            value: caps[2].to_string(),
        }];
    }

    let Some(caps) = SLOT_LINE.captures(line) else {
        return Vec::new();
    };
    let Some(slot) = ItemSlot::from_spelling(&caps[1]) else {
        return Vec::new();
    };

    let assignment = &caps[2];
    if assignment.is_empty() {
        return vec![ProfileEvent::SlotClear(slot)];
    }

    let mut events = vec![ProfileEvent::SlotSet(slot)];
    let mut seen: Vec<ItemField> = Vec::new();
    for fragment in assignment.split(',') {
        let Some(sub) = SUB_FIELD.captures(fragment) else {
            continue;
        };
        let Some(field) = ItemField::from_key(&sub[1]) else {
            continue;
        };
        // first occurrence on a line wins
        if seen.contains(&field) {
            continue;
        }
        seen.push(field);
        events.push(ProfileEvent::SubFieldSet {
            slot,
            field,
            value: sub[2].to_string(),
        });
    }
    events
}
