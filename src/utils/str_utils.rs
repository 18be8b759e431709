use itertools::Itertools;

pub trait StringExtensions {
    /// Convert a title string to a slug for identifying an item.
    /// Non-ASCII characters are transliterated first, so
    /// `"Crème Brûlée Set".slugify() == "creme-brulee-set"`.
    fn slugify(&self) -> String;

    fn is_blank(&self) -> bool;
}

impl StringExtensions for str {
    fn slugify(&self) -> String {
        const QUOTE_CHARS: &[char] = &['\'', '"'];

        deunicode::deunicode(self)
            .split(|c: char| !(QUOTE_CHARS.contains(&c) || c.is_ascii_alphanumeric()))
            .filter(|s| !s.is_empty())
            .map(|s| {
                let mut s = s.replace(QUOTE_CHARS, "");
                s.make_ascii_lowercase();
                s
            })
            .filter(|s| !s.is_empty())
            .join("-")
    }

    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

/// True when `s` only holds characters that survive in a URL path segment unescaped.
pub fn is_url_safe(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[test]
fn test_slugify() {
    assert_eq!(
        "Segfaults and You: When Raw Pointers Go Wrong".slugify(),
        "segfaults-and-you-when-raw-pointers-go-wrong"
    );

    assert_eq!(
        "Why are DB Admins Always Shouting?".slugify(),
        "why-are-db-admins-always-shouting"
    );

    assert_eq!(
        "Converting to Rust from C: It's as Easy as 1, 2, 3!".slugify(),
        "converting-to-rust-from-c-its-as-easy-as-1-2-3"
    )
}

#[test]
fn test_slugify_transliterates() {
    assert_eq!("Crème Brûlée Set".slugify(), "creme-brulee-set");
    assert_eq!("Ñandú   Plüsch".slugify(), "nandu-plusch");
    assert_eq!("Vintage Lamp".slugify(), "vintage-lamp");
}

#[test]
fn test_slugify_nothing_left() {
    assert_eq!("?!  --  ''".slugify(), "");
}

#[test]
fn test_is_url_safe() {
    assert!(is_url_safe("vintage-lamp-a1b2c3"));
    assert!(!is_url_safe("Vintage Lamp"));
    assert!(!is_url_safe(""));
}
