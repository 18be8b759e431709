use std::collections::VecDeque;
use std::sync::Mutex;
use rand::Rng;
use crate::entities::ItemId;
use crate::utils::str_utils::StringExtensions;

pub const SUFFIX_LENGTH: usize = 6;
pub const SUFFIX_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', // 0-9
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', // a-m
    'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', // n-z
];
const DELIMITER: char = '-';
const FALLBACK_BASE: &str = "item";

/// Source of the random tail appended to every derived slug.
pub trait SuffixGenerator: Send + Sync {
    fn next_suffix(&self) -> String;
}

#[derive(Debug, Clone, Copy)]
pub struct RandomSuffix {
    length: usize,
}

impl RandomSuffix {
    pub fn new(length: usize) -> Self {
        Self { length: length.max(1) }
    }
}

impl Default for RandomSuffix {
    fn default() -> Self {
        Self::new(SUFFIX_LENGTH)
    }
}

impl SuffixGenerator for RandomSuffix {
    fn next_suffix(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())])
            .collect()
    }
}

/// Hands out a fixed list of suffixes, then falls back to random ones.
#[derive(Debug, Default)]
pub struct SequenceSuffix {
    queue: Mutex<VecDeque<String>>,
    fallback: RandomSuffix,
}

impl SequenceSuffix {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(suffixes.into_iter().map(Into::into).collect()),
            fallback: RandomSuffix::default(),
        }
    }
}

impl SuffixGenerator for SequenceSuffix {
    fn next_suffix(&self) -> String {
        let next = match self.queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| self.fallback.next_suffix())
    }
}

/// `slugify(title)-suffix`, or `item-suffix` when the title has nothing slug-worthy.
pub fn compose_slug(title: &str, suffix: &str) -> ItemId {
    let base = title.slugify();
    let base = if base.is_empty() { FALLBACK_BASE.to_string() } else { base };
    format!("{base}{DELIMITER}{suffix}")
}
