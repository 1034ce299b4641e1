//! Cosmetic cleanup of the accumulated explanation.

/// Substrings removed from the explanation before it is shown.
pub const COSMETIC_MARKERS: [&str; 2] = ["```", "markdown"];

/// Remove every code fence and every occurrence of the word "markdown" from `text`.
///
/// The removal repeats until nothing changes, so text that forms a new marker once another
/// is cut out (two backticks, a fence, one backtick) is cleaned as well.  The result never
/// contains a marker and is unchanged by a second application.
pub fn strip_cosmetics(text: &str) -> String {
    let mut text = text.to_string();
    loop {
        let before = text.len();
        for marker in COSMETIC_MARKERS {
            if text.contains(marker) {
                text = text.replace(marker, "");
            }
        }
        if text.len() == before {
            return text;
        }
    }
}
