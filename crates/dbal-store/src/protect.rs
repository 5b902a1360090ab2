//! Markup stripping applied before quoting.

use std::sync::LazyLock;

use regex::Regex;

static MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<\?.*?\?>|</?[A-Za-z!][^>]*>").expect("markup pattern is valid")
});

/// Remove HTML/XML tags, comments and processing instructions. A `<` that
/// does not open a tag (`a < b`) is kept.
pub fn strip_tags(text: &str) -> String {
    MARKUP.replace_all(text, "").into_owned()
}

/// Options for [`Driver::protect_with`](crate::driver::Driver::protect_with).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtectOptions {
    /// Quote numeric values too.
    pub force_quote: bool,
    /// Strip markup before quoting.
    pub strip_tags: bool,
}

impl Default for ProtectOptions {
    fn default() -> Self {
        Self {
            force_quote: false,
            strip_tags: true,
        }
    }
}
