// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Bidirectional level resolution and visual reordering.
//!
//! Compact resolver over swash bidi classes: strong types set embedding
//! levels, numbers and nonspacing marks inherit from the preceding strong
//! context, neutral runs take the surrounding level when both sides agree
//! and the base level otherwise. Visual order applies the UAX#9 L2 rule
//! over the resolved levels. Isolates and bracket pairing are not handled;
//! markup spans, not control characters, delimit direction here.

use swash::text::{BidiClass, Codepoint as _};

/// Type alias for a bidirectional level.
pub type BidiLevel = u8;

/// Resolves one level per `char` of `text` against `base` (0 = LTR,
/// 1 = RTL).
pub fn resolve_levels(text: &str, base: BidiLevel) -> Vec<BidiLevel> {
    const NEUTRAL: u8 = u8::MAX;
    let even = base + (base & 1);
    let odd = base + 1 - (base & 1);

    let mut levels: Vec<u8> = Vec::with_capacity(text.len());
    let mut prev_strong = base;
    for ch in text.chars() {
        use BidiClass::*;
        let level = match ch.bidi_class() {
            L => {
                prev_strong = even;
                even
            }
            R | AL => {
                prev_strong = odd;
                odd
            }
            EN | AN => {
                // Digits read left-to-right even inside an RTL context,
                // one level above it.
                if prev_strong & 1 != 0 {
                    prev_strong + 1
                } else {
                    prev_strong
                }
            }
            NSM => *levels.last().unwrap_or(&base),
            _ => NEUTRAL,
        };
        levels.push(level);
    }

    // Neutral runs: surrounding level when both sides agree in direction,
    // base level otherwise.
    let mut i = 0;
    while i < levels.len() {
        if levels[i] != NEUTRAL {
            i += 1;
            continue;
        }
        let start = i;
        while i < levels.len() && levels[i] == NEUTRAL {
            i += 1;
        }
        let before = if start > 0 { levels[start - 1] } else { base };
        let after = if i < levels.len() { levels[i] } else { base };
        let resolved = if before & 1 == after & 1 {
            before.max(after)
        } else {
            base
        };
        for level in &mut levels[start..i] {
            *level = resolved;
        }
    }
    levels
}

/// Computes visual order for a sequence of resolved levels (UAX#9 L2).
///
/// Returns a permutation: `order[visual] == logical`.
pub fn reorder_visual(levels: &[BidiLevel]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..levels.len()).collect();
    let max = levels.iter().copied().max().unwrap_or(0);
    let min_odd = match levels.iter().copied().filter(|l| l & 1 != 0).min() {
        Some(level) => level,
        None => return order,
    };
    let mut level = max;
    while level >= min_odd {
        let mut i = 0;
        while i < order.len() {
            if levels[order[i]] >= level {
                let start = i;
                while i < order.len() && levels[order[i]] >= level {
                    i += 1;
                }
                order[start..i].reverse();
            } else {
                i += 1;
            }
        }
        level -= 1;
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_ltr_is_identity() {
        let levels = resolve_levels("abc", 0);
        assert_eq!(levels, vec![0, 0, 0]);
        assert_eq!(reorder_visual(&levels), vec![0, 1, 2]);
    }

    #[test]
    fn pure_rtl_reverses() {
        let levels = resolve_levels("\u{5D0}\u{5D1}\u{5D2}", 1);
        assert_eq!(levels, vec![1, 1, 1]);
        assert_eq!(reorder_visual(&levels), vec![2, 1, 0]);
    }

    #[test]
    fn rtl_segment_in_ltr_base() {
        // a b א ב c — the Hebrew pair flips, the rest stays.
        let levels = resolve_levels("ab\u{5D0}\u{5D1}c", 0);
        assert_eq!(levels, vec![0, 0, 1, 1, 0]);
        assert_eq!(reorder_visual(&levels), vec![0, 1, 3, 2, 4]);
    }

    #[test]
    fn neutrals_join_agreeing_sides() {
        // Space between two Hebrew letters stays RTL.
        let levels = resolve_levels("\u{5D0} \u{5D1}", 1);
        assert_eq!(levels, vec![1, 1, 1]);
    }

    #[test]
    fn neutrals_between_opposing_sides_take_base() {
        // "א a" with LTR base: the space separates R and L, so it takes
        // the base level.
        let levels = resolve_levels("\u{5D0} a", 0);
        assert_eq!(levels, vec![1, 0, 0]);
    }

    #[test]
    fn digits_in_rtl_context_sit_one_level_up() {
        let levels = resolve_levels("\u{5D0}12\u{5D1}", 1);
        assert_eq!(levels, vec![1, 2, 2, 1]);
        // Digits keep their own left-to-right order inside the
        // reversed run.
        assert_eq!(reorder_visual(&levels), vec![3, 1, 2, 0]);
    }
}
