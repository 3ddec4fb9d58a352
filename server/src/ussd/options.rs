//! Prompt inspection: menu options and completion markers

/// Markers that mean the device's dialogue has finished
pub const DEFAULT_TERMINAL_MARKERS: &[&str] = &["Thank you", "success", "Invalid", "failed"];

/// Extract selectable menu numbers from a prompt.
///
/// Every digit immediately followed by a period counts as one option, in
/// order of appearance and without duplicates. A prompt without any yields
/// an empty list.
pub fn quick_options(prompt: &str) -> Vec<String> {
    let mut options: Vec<String> = Vec::new();
    for pair in prompt.as_bytes().windows(2) {
        if pair[0].is_ascii_digit() && pair[1] == b'.' {
            let option = char::from(pair[0]).to_string();
            if !options.contains(&option) {
                options.push(option);
            }
        }
    }
    options
}

/// Decides whether a prompt ends its session.
///
/// Matching is a case-sensitive substring test against a configurable set
/// of markers. An empty set never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalMatcher {
    markers: Vec<String>,
}

impl TerminalMatcher {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|m: &String| !m.is_empty())
                .collect(),
        }
    }

    /// The first marker found in `prompt`, if any
    pub fn matches(&self, prompt: &str) -> Option<&str> {
        self.markers
            .iter()
            .find(|marker| prompt.contains(marker.as_str()))
            .map(String::as_str)
    }
}

impl Default for TerminalMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINAL_MARKERS.iter().copied())
    }
}
