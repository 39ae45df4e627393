//! Lexical recognition of postcodes ("75008", "SW1A 1AA", "10115-1234").

const MIN_POSTCODE_LEN: usize = 3;
const MAX_POSTCODE_LEN: usize = 10;

/// Maximum number of letter/digit groups in a postcode.
const MAX_GROUPS: usize = 6;

/// Returns true when `s` lexically looks like a postcode, or like a prefix
/// of one when `is_prefix` is set.
///
/// # Examples
///
/// ```
/// use geocoder::postcodes::looks_like_postcode;
///
/// assert!(looks_like_postcode("75008", false));
/// assert!(looks_like_postcode("sw1a 1aa", false));
/// assert!(!looks_like_postcode("paris", false));
/// ```
pub fn looks_like_postcode(s: &str, is_prefix: bool) -> bool {
    let mut len = 0;
    let mut groups = 0;
    let mut has_digit = false;
    let mut prev: Option<bool> = None;

    for c in s.chars() {
        if c == ' ' || c == '-' {
            prev = None;
            continue;
        }
        if !c.is_ascii_alphanumeric() {
            return false;
        }
        let is_digit = c.is_ascii_digit();
        has_digit |= is_digit;
        if prev != Some(is_digit) {
            groups += 1;
        }
        prev = Some(is_digit);
        len += 1;
    }

    let min_len = if is_prefix { 1 } else { MIN_POSTCODE_LEN };
    has_digit
        && (min_len..=MAX_POSTCODE_LEN).contains(&len)
        && groups <= MAX_GROUPS
}
