use rand::Rng;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

const PRIVATE_TOKEN_LEN: usize = 8;

/// How a caller addresses a collection.
///
/// Public collections are reachable by numeric id. Private collections are
/// reachable only through their private token (eight uppercase letters).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionRef {
    NumericId(i64),
    PrivateToken(String),
}

impl CollectionRef {
    /// Classify a raw identifier. Returns None when it is neither form.
    pub fn parse(raw: &str) -> Option<Self> {
        if private_token_regex().is_match(raw) {
            return Some(CollectionRef::PrivateToken(raw.to_string()));
        }
        raw.parse::<i64>().ok().map(CollectionRef::NumericId)
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionRef::NumericId(id) => write!(f, "{}", id),
            CollectionRef::PrivateToken(token) => write!(f, "{}", token),
        }
    }
}

fn private_token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"^[A-Z]{8}$").expect("static regex"))
}

/// Generate a fresh private token for a private collection
pub fn generate_private_token() -> String {
    let mut rng = rand::thread_rng();
    (0..PRIVATE_TOKEN_LEN)
        .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
        .collect()
}
