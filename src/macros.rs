/// Compile a regex once and hand back a `&'static Regex`.
#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).unwrap());
        &*RE
    }};
}

/// Like [`regex!`], but the pattern must cover the whole haystack.
///
/// Locale tables are written as plain alternations (`a|b|c`); this wraps them in
/// `^(?:...)$` so `is_match` behaves as a full match.
#[macro_export]
macro_rules! full_regex {
    ($($part:literal),+ $(,)?) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new(concat!("^(?:", $($part),+, ")$")).unwrap());
        &*RE
    }};
}
