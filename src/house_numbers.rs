//! Heuristic recognition of house numbers ("5", "12b", "7/2", "3 k 1").

/// Words that introduce a building part ("korpus 2", "bldg 3").
const BUILDING_PARTS: &[&str] = &[
    "bis", "bl", "bld", "bldg", "block", "building", "k", "korp", "korpus",
    "str", "stroenie", "ter",
];

/// Longest accepted house number, in meaningful parts.
const MAX_PARTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Number,
    Letter,
    Word(String),
}

fn parse(s: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                chars.next();
            }
            parts.push(Part::Number);
        } else if c.is_alphabetic() {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if !c.is_alphabetic() {
                    break;
                }
                word.extend(c.to_lowercase());
                chars.next();
            }
            if word.chars().count() == 1 {
                parts.push(Part::Letter);
            } else {
                parts.push(Part::Word(word));
            }
        } else {
            // Separators: spaces, commas, slashes, hyphens.
            chars.next();
        }
    }
    parts
}

/// Returns true when `s` looks like a house number, or like a prefix of one
/// when `is_prefix` is set.
///
/// # Examples
///
/// ```
/// use geocoder::house_numbers::looks_like_house_number;
///
/// assert!(looks_like_house_number("5", false));
/// assert!(looks_like_house_number("12b", false));
/// assert!(looks_like_house_number("7/2", false));
/// assert!(!looks_like_house_number("avenue", false));
/// ```
pub fn looks_like_house_number(s: &str, is_prefix: bool) -> bool {
    let parts = parse(s);
    if parts.is_empty() || parts.len() > MAX_PARTS {
        return false;
    }
    if parts[0] != Part::Number {
        return false;
    }

    let last = parts.len() - 1;
    parts.iter().enumerate().skip(1).all(|(i, part)| match part {
        Part::Number | Part::Letter => true,
        Part::Word(word) => {
            BUILDING_PARTS.contains(&word.as_str())
                || (is_prefix
                    && i == last
                    && BUILDING_PARTS.iter().any(|bp| bp.starts_with(word)))
        }
    })
}
