// Static keyboard knowledge used by the typing simulator

/// Letter pairs that touch typists roll quickly
pub const FAST_BIGRAMS: &[&str] = &[
    "th", "he", "in", "er", "an", "on", "or", "re", "ed", "nd", "ha", "at", "en", "es", "of",
    "nt", "ea", "ti", "to", "it", "st", "io", "le", "is", "ou", "ar", "as", "de", "rt", "ng",
];

/// Fallback substitutes for characters missing from the adjacency table
pub const VOWELS: &str = "aeiou";

/// Characters after which a thinking pause is twice as likely
pub const PAUSE_BOUNDARIES: &[char] = &['.', ';', '{', '}', '(', ')', '\n'];

/// Keys physically next to `c` on a QWERTY layout (lower-case)
pub fn adjacent_keys(c: char) -> Option<&'static str> {
    let keys = match c.to_ascii_lowercase() {
        'a' => "qwsz",
        'b' => "vghn",
        'c' => "xdfv",
        'd' => "erfcxs",
        'e' => "wrsdf",
        'f' => "rtgvcd",
        'g' => "tyhbvf",
        'h' => "yujnbg",
        'i' => "uojkl",
        'j' => "uikmnh",
        'k' => "ioljm",
        'l' => "opk",
        'm' => "njk",
        'n' => "bhjm",
        'o' => "iplk",
        'p' => "ol",
        'q' => "wa",
        'r' => "etdf",
        's' => "wedxza",
        't' => "ryfg",
        'u' => "yihj",
        'v' => "cfgb",
        'w' => "qeas",
        'x' => "zsdc",
        'y' => "tugh",
        'z' => "asx",
        '1' => "2q",
        '2' => "13qw",
        '3' => "24we",
        '4' => "35er",
        '5' => "46rt",
        '6' => "57ty",
        '7' => "68yu",
        '8' => "79ui",
        '9' => "80io",
        '0' => "9p",
        _ => return None,
    };
    Some(keys)
}

/// Candidate wrong keys for an intended character; never empty
pub fn typo_candidates(c: char) -> &'static str {
    adjacent_keys(c).unwrap_or(VOWELS)
}

/// Whether `prev` followed by `cur` is a fast bigram, ignoring case
pub fn is_fast_bigram(prev: char, cur: char) -> bool {
    let pair: String = [prev, cur]
        .iter()
        .flat_map(|c| c.to_lowercase())
        .collect();
    FAST_BIGRAMS.contains(&pair.as_str())
}

pub fn is_pause_boundary(c: char) -> bool {
    PAUSE_BOUNDARIES.contains(&c)
}

/// Named control keys understood by actuators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Key {
    Return,
    BackSpace,
    Tab,
    Home,
    End,
    Delete,
    #[strum(to_string = "shift")]
    Shift,
    #[strum(to_string = "ctrl")]
    Ctrl,
}
