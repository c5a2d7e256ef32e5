//! Instrument trading rules from Binance `exchangeInfo`.
//!
//! Each futures symbol carries a `filters` array; the ones the sizer needs are:
//!
//! | Filter          | Field        | Rule field     |
//! |-----------------|--------------|----------------|
//! | `LOT_SIZE`      | `stepSize`   | `step_size`    |
//! | `LOT_SIZE`      | `minQty`     | `min_qty`      |
//! | `PRICE_FILTER`  | `tickSize`   | `tick_size`    |
//! | `MIN_NOTIONAL`  | `notional`   | `min_notional` |
//!
//! Maximum leverage is not part of `exchangeInfo`; it comes from the first
//! bracket of `leverageBracket` and is cached separately.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use sigbot_core::InstrumentRules;

/// Filters of one symbol without its leverage limit.
#[derive(Debug, Clone, PartialEq)]
struct SymbolFilters {
    step_size: Decimal,
    min_qty: Decimal,
    min_notional: Decimal,
    tick_size: Decimal,
}

/// Cache of instrument filters and leverage limits keyed by exchange symbol.
#[derive(Debug, Default)]
pub struct InstrumentCache {
    filters: HashMap<String, SymbolFilters>,
    max_leverage: HashMap<String, u32>,
}

impl InstrumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load filters from an `exchangeInfo` JSON response.
    ///
    /// Symbols that are not `TRADING` or lack a lot-size / price filter are
    /// skipped. Returns the number of symbols loaded.
    pub fn load_from_exchange_info(&mut self, info: &serde_json::Value) -> usize {
        let Some(symbols) = info.get("symbols").and_then(|s| s.as_array()) else {
            return 0;
        };

        let mut loaded = 0;
        for sym_info in symbols {
            let Some(symbol) = sym_info.get("symbol").and_then(|s| s.as_str()) else {
                continue;
            };
            if let Some(status) = sym_info.get("status").and_then(|s| s.as_str()) {
                if status != "TRADING" {
                    continue;
                }
            }
            let Some(filters) = parse_filters(sym_info) else {
                continue;
            };
            self.filters.insert(symbol.to_string(), filters);
            loaded += 1;
        }
        loaded
    }

    /// Record the maximum leverage from a `leverageBracket` response.
    ///
    /// The endpoint returns either an array of `{symbol, brackets}` objects or
    /// a single object when queried for one symbol.
    pub fn load_leverage_brackets(&mut self, resp: &serde_json::Value) {
        let entries: Vec<&serde_json::Value> = match resp.as_array() {
            Some(arr) => arr.iter().collect(),
            None => vec![resp],
        };
        for entry in entries {
            let Some(symbol) = entry.get("symbol").and_then(|s| s.as_str()) else {
                continue;
            };
            let max = entry
                .get("brackets")
                .and_then(|b| b.as_array())
                .and_then(|b| b.first())
                .and_then(|b| b.get("initialLeverage"))
                .and_then(|l| l.as_u64());
            if let Some(max) = max {
                self.max_leverage.insert(symbol.to_string(), max as u32);
            }
        }
    }

    pub fn has_filters(&self, symbol: &str) -> bool {
        self.filters.contains_key(symbol)
    }

    pub fn has_leverage(&self, symbol: &str) -> bool {
        self.max_leverage.contains_key(symbol)
    }

    /// Full rules for a symbol once both filters and leverage are known.
    pub fn rules(&self, symbol: &str) -> Option<InstrumentRules> {
        let f = self.filters.get(symbol)?;
        let max_leverage = *self.max_leverage.get(symbol)?;
        Some(InstrumentRules {
            symbol: symbol.to_string(),
            step_size: f.step_size,
            min_qty: f.min_qty,
            min_notional: f.min_notional,
            tick_size: f.tick_size,
            max_leverage,
        })
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

fn parse_filters(sym_info: &serde_json::Value) -> Option<SymbolFilters> {
    let filters = sym_info.get("filters")?.as_array()?;
    let find = |kind: &str| {
        filters
            .iter()
            .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(kind))
    };

    let lot = find("LOT_SIZE")?;
    let price = find("PRICE_FILTER")?;
    let min_notional = find("MIN_NOTIONAL")
        .and_then(|f| decimal_field(f, "notional"))
        .unwrap_or(Decimal::ZERO);

    Some(SymbolFilters {
        step_size: decimal_field(lot, "stepSize")?,
        min_qty: decimal_field(lot, "minQty")?,
        min_notional,
        tick_size: decimal_field(price, "tickSize")?,
    })
}

/// Read a decimal that Binance encodes as a JSON string (or, rarely, a number).
pub(crate) fn decimal_field(value: &serde_json::Value, key: &str) -> Option<Decimal> {
    match value.get(key)? {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn exchange_info() -> serde_json::Value {
        serde_json::json!({
            "symbols": [
                {
                    "symbol": "ETHUSDT",
                    "status": "TRADING",
                    "filters": [
                        {"filterType": "PRICE_FILTER", "tickSize": "0.01", "minPrice": "39.86"},
                        {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"},
                        {"filterType": "MIN_NOTIONAL", "notional": "20"}
                    ]
                },
                {
                    "symbol": "OLDUSDT",
                    "status": "SETTLING",
                    "filters": []
                }
            ]
        })
    }

    #[test]
    fn loads_trading_symbols_only() {
        let mut cache = InstrumentCache::new();
        assert_eq!(cache.load_from_exchange_info(&exchange_info()), 1);
        assert!(cache.has_filters("ETHUSDT"));
        assert!(!cache.has_filters("OLDUSDT"));
    }

    #[test]
    fn rules_need_leverage_bracket() {
        let mut cache = InstrumentCache::new();
        cache.load_from_exchange_info(&exchange_info());
        assert!(cache.rules("ETHUSDT").is_none());

        cache.load_leverage_brackets(&serde_json::json!([
            {"symbol": "ETHUSDT", "brackets": [
                {"bracket": 1, "initialLeverage": 125},
                {"bracket": 2, "initialLeverage": 100}
            ]}
        ]));
        let rules = cache.rules("ETHUSDT").unwrap();
        assert_eq!(rules.step_size, dec!(0.001));
        assert_eq!(rules.tick_size, dec!(0.01));
        assert_eq!(rules.min_notional, dec!(20));
        assert_eq!(rules.max_leverage, 125);
    }

    #[test]
    fn single_object_bracket_response() {
        let mut cache = InstrumentCache::new();
        cache.load_leverage_brackets(&serde_json::json!(
            {"symbol": "BTCUSDT", "brackets": [{"initialLeverage": 75}]}
        ));
        assert!(cache.has_leverage("BTCUSDT"));
    }
}
