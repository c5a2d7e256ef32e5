//! Instrument symbols.
//!
//! Signals name instruments in many spellings (`ETH/USDT`, `ETHUSDT`,
//! `#ETH-USDT`, `ethusdt.P`). [`Symbol`] stores the normalized base/quote pair
//! and converts between the display form (`ETH/USDT`) and the concatenated
//! exchange form (`ETHUSDT`).

use serde::{Deserialize, Serialize};

/// Quote assets recognized when no explicit list is configured.
pub const DEFAULT_QUOTES: &[&str] = &["USDT", "USDC", "BUSD"];

/// Suffixes some channels append to perpetual contract names.
const CONTRACT_SUFFIXES: &[&str] = &[".PERP", "PERP", ".P"];

/// A normalized base/quote instrument identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Normalize a raw symbol token against a list of recognized quote assets.
    ///
    /// Separators (`/`, `-`, `_`, `:`, spaces) are accepted between base and
    /// quote. Without a separator the longest recognized quote suffix wins.
    /// Returns `None` if the quote is not recognized or the base is empty.
    pub fn normalize<S: AsRef<str>>(raw: &str, quotes: &[S]) -> Option<Self> {
        let mut upper = raw.trim().trim_start_matches(['#', '$']).to_ascii_uppercase();
        for suffix in CONTRACT_SUFFIXES {
            if let Some(stripped) = upper.strip_suffix(suffix) {
                upper = stripped.to_string();
                break;
            }
        }

        let parts: Vec<&str> = upper
            .split(|c: char| matches!(c, '/' | '-' | '_' | ':') || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();

        match parts.as_slice() {
            [base, quote] => {
                let recognized = quotes.iter().any(|q| q.as_ref().eq_ignore_ascii_case(quote));
                if recognized && is_asset(base) {
                    Some(Self::new(*base, *quote))
                } else {
                    None
                }
            }
            [joined] => {
                let quote = quotes
                    .iter()
                    .map(|q| q.as_ref().to_ascii_uppercase())
                    .filter(|q| joined.len() > q.len() && joined.ends_with(q.as_str()))
                    .max_by_key(|q| q.len())?;
                let base = &joined[..joined.len() - quote.len()];
                is_asset(base).then(|| Self::new(base, quote))
            }
            _ => None,
        }
    }

    /// Concatenated exchange form, e.g. `ETHUSDT`.
    pub fn exchange(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

fn is_asset(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_are_equivalent() {
        let a = Symbol::normalize("ETH/USDT", DEFAULT_QUOTES).unwrap();
        let b = Symbol::normalize("ETHUSDT", DEFAULT_QUOTES).unwrap();
        let c = Symbol::normalize("#eth-usdt", DEFAULT_QUOTES).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_string(), "ETH/USDT");
        assert_eq!(a.exchange(), "ETHUSDT");
    }

    #[test]
    fn perpetual_suffix_stripped() {
        let s = Symbol::normalize("1000PEPEUSDT.P", DEFAULT_QUOTES).unwrap();
        assert_eq!(s, Symbol::new("1000PEPE", "USDT"));
    }

    #[test]
    fn unrecognized_quote_rejected() {
        assert!(Symbol::normalize("ETH/EUR", DEFAULT_QUOTES).is_none());
        assert!(Symbol::normalize("ETHEUR", DEFAULT_QUOTES).is_none());
        assert!(Symbol::normalize("USDT", DEFAULT_QUOTES).is_none());
    }
}
