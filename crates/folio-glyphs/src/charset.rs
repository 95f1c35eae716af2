//! Character groups that expand as a whole.
//!
//! When a layout opts into a group, requesting any one member rasterizes the
//! whole group, so typing digits or Cyrillic text does not trigger a new
//! atlas pass for every fresh character.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CharGroups: u8 {
        const NUMBERS = 1 << 0;
        const LATIN = 1 << 1;
        const CYRILLIC = 1 << 2;
        const CURRENCY = 1 << 3;
        const GREEK_BASIC = 1 << 4;
        const MATH = 1 << 5;
        const TEXT_PUNCTUATION = 1 << 6;
    }
}

const CURRENCY_EXTRA: &str = "$¢£¤¥";
const MATH_CHARS: &str = "+-*/=<>%^~±×÷∞≈≠≤≥√∑∏∫∂∆";
const TEXT_PUNCTUATION_CHARS: &str = ".,:;!?\"'()[]{}«»‹›\u{2013}\u{2014}…‘’“”„";

/// Always present in every layout: line breaking needs their advances.
pub const CONTROL_CHARS: [char; 3] = [' ', '\n', '\r'];

/// The single group `c` belongs to, checked in a fixed order.
pub fn group_of(c: char) -> Option<CharGroups> {
    let groups = [
        CharGroups::NUMBERS,
        CharGroups::LATIN,
        CharGroups::CYRILLIC,
        CharGroups::CURRENCY,
        CharGroups::GREEK_BASIC,
        CharGroups::MATH,
        CharGroups::TEXT_PUNCTUATION,
    ];
    groups.into_iter().find(|g| contains(*g, c))
}

fn contains(group: CharGroups, c: char) -> bool {
    if group == CharGroups::NUMBERS {
        c.is_ascii_digit()
    } else if group == CharGroups::LATIN {
        c.is_ascii_alphabetic()
    } else if group == CharGroups::CYRILLIC {
        matches!(c, '\u{0410}'..='\u{044F}' | '\u{0401}' | '\u{0451}')
    } else if group == CharGroups::CURRENCY {
        matches!(c, '\u{20A0}'..='\u{20BF}') || CURRENCY_EXTRA.contains(c)
    } else if group == CharGroups::GREEK_BASIC {
        matches!(c, '\u{0391}'..='\u{03A1}' | '\u{03A3}'..='\u{03A9}' | '\u{03B1}'..='\u{03C9}')
    } else if group == CharGroups::MATH {
        MATH_CHARS.contains(c)
    } else if group == CharGroups::TEXT_PUNCTUATION {
        TEXT_PUNCTUATION_CHARS.contains(c)
    } else {
        false
    }
}

/// Every member of the (single) `group`.
pub fn members(group: CharGroups) -> Vec<char> {
    if group == CharGroups::NUMBERS {
        ('0'..='9').collect()
    } else if group == CharGroups::LATIN {
        ('A'..='Z').chain('a'..='z').collect()
    } else if group == CharGroups::CYRILLIC {
        ('\u{0410}'..='\u{044F}').chain(['\u{0401}', '\u{0451}']).collect()
    } else if group == CharGroups::CURRENCY {
        ('\u{20A0}'..='\u{20BF}').chain(CURRENCY_EXTRA.chars()).collect()
    } else if group == CharGroups::GREEK_BASIC {
        ('\u{0391}'..='\u{03A1}')
            .chain('\u{03A3}'..='\u{03A9}')
            .chain('\u{03B1}'..='\u{03C9}')
            .collect()
    } else if group == CharGroups::MATH {
        MATH_CHARS.chars().collect()
    } else if group == CharGroups::TEXT_PUNCTUATION {
        TEXT_PUNCTUATION_CHARS.chars().collect()
    } else {
        Vec::new()
    }
}
