//! Free-text signal parser.
//!
//! Turns a channel message into a [`Signal`] or a [`ParseFailure`]. Parsing is
//! pure: no I/O, no clock, and identical text always yields an identical
//! result.
//!
//! # Recognized format
//!
//! ```text
//! 🟢 Long
//! Name: ETH/USDT
//! Margin mode: Cross (100.0X)
//!
//! ↪️ Entry price(USDT):
//! 3127.20
//!
//! Targets(USDT):
//! 1) 3158.47
//! 2) 3189.74
//! 3) 3220.01
//! ```
//!
//! Extraction rules, applied in order:
//!
//! | Field     | Rule                                                        | Missing          |
//! |-----------|-------------------------------------------------------------|------------------|
//! | direction | `🟢 Long`/`🔴 Short` marker, else first direction keyword   | `no-direction`   |
//! | symbol    | `Name:`/`Pair:`/`Symbol:`/`Coin:` field, normalized         | `no-symbol`      |
//! | margin    | `Margin mode: Cross (100X)` or `Leverage: 20x`              | account default  |
//! | entry     | `Entry:` / `Entry price(USDT):` followed by a number        | market entry     |
//! | targets   | numbered items `1) p`, `2. p`, `3: p` after a targets label | `no-targets`     |
//!
//! Labels are case-insensitive and tolerate emoji or markup around them. The
//! targets section ends at a stop-loss label.
//!
//! # Numbers
//!
//! Both `.` and `,` are accepted as the decimal separator, but one message must
//! use one convention: a message whose numeric fields mix them fails with
//! `ambiguous-number-format`. A single number with more than one separator
//! (thousands grouping) fails with `invalid-number`.

use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;
use sigbot_core::error::ParseFailure;
use sigbot_core::{Direction, MarginMode, Signal, Symbol};

/// Compiled extraction rules plus the recognized quote assets.
#[derive(Debug, Clone)]
pub struct SignalParser {
    quotes: Vec<String>,
    marker: Regex,
    direction: Regex,
    symbol: Regex,
    margin_mode: Regex,
    leverage: Regex,
    entry: Regex,
    targets_label: Regex,
    stop_label: Regex,
    numbered_item: Regex,
}

impl SignalParser {
    /// Compile the extraction rules.
    pub fn new<S: AsRef<str>>(quote_assets: &[S]) -> Result<Self, regex::Error> {
        Ok(Self {
            quotes: quote_assets.iter().map(|q| q.as_ref().to_ascii_uppercase()).collect(),
            marker: Regex::new(r"(?i)(?:🟢|🔴)\s*(long|short|buy|sell)\b")?,
            direction: Regex::new(r"(?i)\b(long|short|buy|sell)\b")?,
            symbol: Regex::new(concat!(
                r"(?i)\b(?:name|pair|symbol|coin)\s*:\s*[#$]?",
                r"([a-z0-9]+(?:[/\-_:][a-z0-9]+)?(?:\.?perp|\.p)?)\b",
            ))?,
            margin_mode: Regex::new(concat!(
                r"(?i)\bmargin\s*mode\s*:\s*(cross|isolated)\b",
                r"(?:\s*\(\s*([0-9][0-9.,]*)\s*x\s*\))?",
            ))?,
            leverage: Regex::new(
                r"(?i)\bleverage\s*:\s*(?:(cross|isolated)\s*)?\(?\s*([0-9][0-9.,]*)\s*x?",
            )?,
            entry: Regex::new(
                r"(?i)\bentry(?:\s*price)?\s*(?:\(\s*[a-z]+\s*\))?\s*:\s*([0-9][0-9.,]*)",
            )?,
            targets_label: Regex::new(r"(?i)\b(?:take[\s-]*profits?|targets?)\b")?,
            stop_label: Regex::new(r"(?i)\bstop(?:[\s-]*loss)?\b")?,
            numbered_item: Regex::new(
                r"(?:^|[^0-9.,])([0-9]{1,2})\s*(?:\)|[.:\-]\s)\s*([0-9][0-9.,]*)",
            )?,
        })
    }

    /// Cheap check for a direction marker. Messages failing it are chatter,
    /// not malformed signals.
    pub fn looks_like_signal(&self, text: &str) -> bool {
        self.direction.is_match(text)
    }

    /// Parse a message into a signal.
    pub fn parse(&self, text: &str, message_id: &str) -> Result<Signal, ParseFailure> {
        let direction = self.parse_direction(text)?;
        let symbol = self.parse_symbol(text)?;
        let (margin_mode, leverage_raw) = self.parse_margin(text);
        let entry_raw = self
            .entry
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| trim_number(m.as_str()));
        let target_raws = self.target_tokens(text);
        if target_raws.is_empty() {
            return Err(ParseFailure::NoTargets);
        }

        let all: Vec<&str> = leverage_raw
            .iter()
            .chain(entry_raw.iter())
            .chain(target_raws.iter())
            .copied()
            .collect();
        check_separator_convention(&all)?;

        let leverage = match leverage_raw {
            Some(raw) => {
                let value = parse_number(raw)
                    .map_err(|_| ParseFailure::InvalidLeverage(raw.to_string()))?;
                if value <= Decimal::ZERO {
                    return Err(ParseFailure::InvalidLeverage(raw.to_string()));
                }
                Some(value)
            }
            None => None,
        };

        let entry_price = match entry_raw {
            Some(raw) => {
                let value =
                    parse_number(raw).map_err(|_| ParseFailure::InvalidEntry(raw.to_string()))?;
                if value <= Decimal::ZERO {
                    return Err(ParseFailure::InvalidEntry(raw.to_string()));
                }
                Some(value)
            }
            None => None,
        };

        let mut targets = Vec::with_capacity(target_raws.len());
        for raw in &target_raws {
            let value = parse_number(raw)?;
            if value <= Decimal::ZERO {
                return Err(ParseFailure::InvalidNumber(raw.to_string()));
            }
            targets.push(value);
        }
        check_target_order(direction, entry_price, &targets)?;

        Ok(Signal {
            direction,
            symbol,
            leverage,
            margin_mode,
            entry_price,
            targets,
            raw_text: text.to_string(),
            source_message_id: message_id.to_string(),
        })
    }

    /// The keyword after a 🟢/🔴 marker wins over one in the prose.
    fn parse_direction(&self, text: &str) -> Result<Direction, ParseFailure> {
        let word = self
            .marker
            .captures(text)
            .or_else(|| self.direction.captures(text))
            .and_then(|c| c.get(1))
            .ok_or(ParseFailure::NoDirection)?;
        match word.as_str().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Direction::Long),
            _ => Ok(Direction::Short),
        }
    }

    fn parse_symbol(&self, text: &str) -> Result<Symbol, ParseFailure> {
        let raw = self
            .symbol
            .captures(text)
            .and_then(|c| c.get(1))
            .ok_or(ParseFailure::NoSymbol)?
            .as_str();
        Symbol::normalize(raw, &self.quotes)
            .ok_or_else(|| ParseFailure::UnrecognizedSymbol(raw.to_string()))
    }

    /// Margin mode and raw leverage token, from the margin field first and a
    /// separate leverage field second.
    fn parse_margin<'t>(&self, text: &'t str) -> (Option<MarginMode>, Option<&'t str>) {
        let mut mode = None;
        let mut leverage = None;

        if let Some(caps) = self.margin_mode.captures(text) {
            mode = caps.get(1).map(|m| margin_mode_of(m.as_str()));
            leverage = caps.get(2).map(|m| trim_number(m.as_str()));
        }
        if let Some(caps) = self.leverage.captures(text) {
            if mode.is_none() {
                mode = caps.get(1).map(|m| margin_mode_of(m.as_str()));
            }
            if leverage.is_none() {
                leverage = caps.get(2).map(|m| trim_number(m.as_str()));
            }
        }
        (mode, leverage)
    }

    /// Raw target tokens in listed order.
    fn target_tokens<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let section = match self.targets_label.find(text) {
            Some(label) => &text[label.end()..],
            None => text,
        };
        let section = match self.stop_label.find(section) {
            Some(stop) => &section[..stop.start()],
            None => section,
        };
        self.numbered_item
            .captures_iter(section)
            .filter_map(|c| c.get(2))
            .map(|m| trim_number(m.as_str()))
            .collect()
    }
}

fn margin_mode_of(word: &str) -> MarginMode {
    if word.eq_ignore_ascii_case("isolated") {
        MarginMode::Isolated
    } else {
        MarginMode::Cross
    }
}

/// Drop sentence punctuation glued to the end of a number.
fn trim_number(token: &str) -> &str {
    token.trim_end_matches(['.', ','])
}

fn check_separator_convention(tokens: &[&str]) -> Result<(), ParseFailure> {
    let dot = tokens.iter().any(|t| t.contains('.'));
    let comma = tokens.iter().any(|t| t.contains(','));
    if dot && comma {
        return Err(ParseFailure::AmbiguousNumberFormat);
    }
    Ok(())
}

fn parse_number(token: &str) -> Result<Decimal, ParseFailure> {
    let separators = token.chars().filter(|c| matches!(c, '.' | ',')).count();
    if separators > 1 {
        return Err(ParseFailure::InvalidNumber(token.to_string()));
    }
    Decimal::from_str(&token.replace(',', "."))
        .map_err(|_| ParseFailure::InvalidNumber(token.to_string()))
}

/// Targets must move strictly away from the entry in the profitable direction.
fn check_target_order(
    direction: Direction,
    entry: Option<Decimal>,
    targets: &[Decimal],
) -> Result<(), ParseFailure> {
    let favorable = |from: Decimal, to: Decimal| match direction {
        Direction::Long => to > from,
        Direction::Short => to < from,
    };

    if let (Some(entry), Some(first)) = (entry, targets.first()) {
        if !favorable(entry, *first) {
            return Err(ParseFailure::InvalidTargetOrder);
        }
    }
    if targets.windows(2).any(|w| !favorable(w[0], w[1])) {
        return Err(ParseFailure::InvalidTargetOrder);
    }
    Ok(())
}
