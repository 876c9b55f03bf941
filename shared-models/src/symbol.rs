// shared-models/src/symbol.rs
use thiserror::Error;

use crate::monitor::{OptionInfo, OptionKind};

/// Spot symbol used for base-coin price triggers. Only BTC-based options
/// can currently be driven by a spot price.
pub const BTC_SPOT_SYMBOL: &str = "BTCUSDT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    #[error("option symbol must be BASE-EXPIRY-STRIKE-TYPE or BASE-EXPIRY-STRIKE-TYPE-USDT")]
    Format,
    #[error("base coin must be BTC or ETH, got {0}")]
    BaseCoin(String),
    #[error("option type must be C/Call or P/Put, got {0}")]
    OptionType(String),
    #[error("strike price is not a valid positive number: {0}")]
    Strike(String),
    #[error("only USDT settled options are supported, got {0}")]
    Settlement(String),
}

/// Parse a venue option symbol into its components. Accepts both the bare
/// form `BTC-27DEC25-100000-C` and the settled form with a `-USDT` suffix.
pub fn parse_option_symbol(symbol: &str) -> Result<OptionInfo, SymbolError> {
    let upper = symbol.trim().to_uppercase();
    let parts: Vec<&str> = upper.split('-').collect();
    if parts.len() != 4 && parts.len() != 5 {
        return Err(SymbolError::Format);
    }

    let base_coin = parts[0];
    if base_coin != "BTC" && base_coin != "ETH" {
        return Err(SymbolError::BaseCoin(base_coin.to_string()));
    }

    let strike: f64 = parts[2]
        .parse()
        .map_err(|_| SymbolError::Strike(parts[2].to_string()))?;
    if strike <= 0.0 {
        return Err(SymbolError::Strike(parts[2].to_string()));
    }

    let option_type = match parts[3] {
        "C" | "CALL" => OptionKind::Call,
        "P" | "PUT" => OptionKind::Put,
        other => return Err(SymbolError::OptionType(other.to_string())),
    };

    if parts.len() == 5 && parts[4] != "USDT" {
        return Err(SymbolError::Settlement(parts[4].to_string()));
    }

    Ok(OptionInfo {
        symbol: upper.clone(),
        base_coin: base_coin.to_string(),
        strike_price: strike,
        expiry_date: parts[1].to_string(),
        option_type,
    })
}

/// Uppercase and append the settlement suffix unless one is already there.
pub fn canonical_option_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    if upper.ends_with("-USDT") || upper.ends_with("-USD") || upper.ends_with("-USDC") {
        upper
    } else {
        format!("{upper}-USDT")
    }
}

/// Spot symbol backing a base-coin price trigger for the given option.
pub fn spot_symbol_for(option_symbol: &str) -> Option<&'static str> {
    if option_symbol.trim().to_uppercase().starts_with("BTC") {
        Some(BTC_SPOT_SYMBOL)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_symbol() {
        let info = parse_option_symbol("BTC-27DEC25-100000-C").unwrap();
        assert_eq!(info.base_coin, "BTC");
        assert_eq!(info.strike_price, 100000.0);
        assert_eq!(info.expiry_date, "27DEC25");
        assert_eq!(info.option_type, OptionKind::Call);
    }

    #[test]
    fn parses_settled_symbol_and_long_type_names() {
        let info = parse_option_symbol("eth-17jan25-4000-Put-usdt").unwrap();
        assert_eq!(info.symbol, "ETH-17JAN25-4000-PUT-USDT");
        assert_eq!(info.option_type, OptionKind::Put);
    }

    #[test]
    fn rejects_malformed_symbols() {
        assert_eq!(parse_option_symbol("BTC-100000-C"), Err(SymbolError::Format));
        assert_eq!(
            parse_option_symbol("SOL-27DEC25-200-C"),
            Err(SymbolError::BaseCoin("SOL".into()))
        );
        assert_eq!(
            parse_option_symbol("BTC-27DEC25-100000-X"),
            Err(SymbolError::OptionType("X".into()))
        );
        assert_eq!(
            parse_option_symbol("BTC-27DEC25-abc-C"),
            Err(SymbolError::Strike("ABC".into()))
        );
        assert_eq!(
            parse_option_symbol("BTC-27DEC25-100000-C-USDC"),
            Err(SymbolError::Settlement("USDC".into()))
        );
    }

    #[test]
    fn canonicalization_appends_settlement_once() {
        assert_eq!(
            canonical_option_symbol("btc-27dec25-100000-c"),
            "BTC-27DEC25-100000-C-USDT"
        );
        assert_eq!(
            canonical_option_symbol("BTC-27DEC25-100000-C-USDT"),
            "BTC-27DEC25-100000-C-USDT"
        );
    }

    #[test]
    fn spot_symbol_only_for_btc() {
        assert_eq!(spot_symbol_for("BTC-27DEC25-100000-C"), Some("BTCUSDT"));
        assert_eq!(spot_symbol_for("ETH-27DEC25-4000-C"), None);
    }
}
