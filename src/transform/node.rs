//! Built-in node policy.
//!
//! Nodes on routable ways must always materialize (edge shapes need their
//! positions), so this flavor never returns an empty set: every node gets a
//! modes mask, and recognized tags ride along.

use super::{get, Tags};

/// Mode mask bits (auto 1, bike 2, foot 4).
const MODES_ALL: u8 = 7;
const MODES_NO_AUTO: u8 = 6;

fn push(out: &mut Tags, key: &str, value: impl ToString) {
    out.push((key.to_string(), value.to_string()));
}

pub fn transform(tags: &Tags) -> Tags {
    let mut out = Tags::new();

    let mut modes = MODES_ALL;
    match get(tags, "barrier") {
        Some("gate") | Some("lift_gate") => push(&mut out, "gate", "true"),
        Some("bollard") => {
            // Bollards stop cars but not bikes or pedestrians.
            modes = MODES_NO_AUTO;
            push(&mut out, "bollard", "true");
        }
        _ => {}
    }

    if let Some(v) = get(tags, "ref") {
        push(&mut out, "ref", v);
    }
    if let Some(v) = get(tags, "exit_to") {
        push(&mut out, "exit_to", v);
    }

    push(&mut out, "modes_mask", modes);
    out
}
