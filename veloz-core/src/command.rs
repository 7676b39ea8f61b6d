//! Line command protocol parser (C8, §6.1).
//!
//! ASCII, one command per line, whitespace-separated, case-insensitive
//! keywords. Lines beginning with `#` or empty are ignored (callers get
//! `Ok(None)` for those, never an error).

use crate::error::CommandParseError;
use crate::model::{MarketEventType, OrderRequest, OrderType, Side, SymbolId, TimeInForce, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyAction {
    Load,
    Start,
    Stop,
    Unload,
    List,
    Status,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PlaceOrder(OrderRequest),
    Cancel { client_order_id: String },
    Query { kind: String, params: Vec<String> },
    Subscribe { venue: Venue, symbol: SymbolId, event_type: MarketEventType },
    Unsubscribe { venue: Venue, symbol: SymbolId, event_type: MarketEventType },
    Strategy { action: StrategyAction, params: Vec<String> },
}

pub struct CommandParser;

impl CommandParser {
    /// Parse a single line. Blank lines and `#` comments yield `Ok(None)`.
    pub fn parse_line(line: &str) -> Result<Option<Command>, CommandParseError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let keyword = tokens[0].to_ascii_uppercase();

        let command = match keyword.as_str() {
            "ORDER" => Self::parse_order(&tokens[1..])?,
            "BUY" | "SELL" => Self::parse_order(&tokens)?,
            "CANCEL" | "C" => Self::parse_cancel(&tokens[1..])?,
            "QUERY" | "Q" => Self::parse_query(&tokens[1..])?,
            "SUBSCRIBE" | "SUB" => Self::parse_sub(&tokens[1..], true)?,
            "UNSUBSCRIBE" | "UNSUB" => Self::parse_sub(&tokens[1..], false)?,
            "STRATEGY" | "STRAT" => Self::parse_strategy(&tokens[1..])?,
            other => return Err(CommandParseError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }

    fn parse_order(fields: &[&str]) -> Result<Command, CommandParseError> {
        let side = *fields.first().ok_or(CommandParseError::MissingField {
            command: "ORDER".into(),
            field: "side",
        })?;
        let side = match side.to_ascii_uppercase().as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => return Err(CommandParseError::InvalidSide(other.to_string())),
        };

        let symbol = fields.get(1).ok_or(CommandParseError::MissingField {
            command: "ORDER".into(),
            field: "symbol",
        })?;
        let qty: f64 = parse_number(fields.get(2), "qty")?;
        let price: f64 = parse_number(fields.get(3), "price")?;
        let client_order_id = fields
            .get(4)
            .ok_or(CommandParseError::MissingField { command: "ORDER".into(), field: "client_id" })?;

        if qty <= 0.0 {
            return Err(CommandParseError::InvalidQty(qty));
        }
        if price < 0.0 {
            return Err(CommandParseError::InvalidPrice(price));
        }
        if client_order_id.is_empty() {
            return Err(CommandParseError::EmptyClientId);
        }

        let order_type = match fields.get(5).map(|s| s.to_ascii_uppercase()) {
            None => OrderType::Limit,
            Some(ref t) if t == "LIMIT" || t == "L" => OrderType::Limit,
            Some(ref t) if t == "MARKET" || t == "M" => OrderType::Market,
            Some(other) => return Err(CommandParseError::InvalidOrderType(other)),
        };

        let tif = match fields.get(6).map(|s| s.to_ascii_uppercase()) {
            None => TimeInForce::Gtc,
            Some(ref t) if t == "GTC" || t == "G" => TimeInForce::Gtc,
            Some(ref t) if t == "IOC" => TimeInForce::Ioc,
            Some(ref t) if t == "FOK" => TimeInForce::Fok,
            Some(ref t) if t == "GTX" => TimeInForce::Gtx,
            Some(other) => return Err(CommandParseError::InvalidTif(other)),
        };

        Ok(Command::PlaceOrder(OrderRequest {
            symbol: SymbolId::new(symbol),
            side,
            order_type,
            qty,
            price: Some(price),
            tif,
            client_order_id: client_order_id.to_string(),
        }))
    }

    fn parse_cancel(fields: &[&str]) -> Result<Command, CommandParseError> {
        let id = fields
            .first()
            .ok_or(CommandParseError::MissingField { command: "CANCEL".into(), field: "client_id" })?;
        if id.is_empty() {
            return Err(CommandParseError::EmptyClientId);
        }
        Ok(Command::Cancel { client_order_id: id.to_string() })
    }

    fn parse_query(fields: &[&str]) -> Result<Command, CommandParseError> {
        let kind = fields
            .first()
            .ok_or(CommandParseError::MissingField { command: "QUERY".into(), field: "kind" })?;
        Ok(Command::Query {
            kind: kind.to_string(),
            params: fields[1..].iter().map(|s| s.to_string()).collect(),
        })
    }

    fn parse_sub(fields: &[&str], subscribing: bool) -> Result<Command, CommandParseError> {
        let name = if subscribing { "SUBSCRIBE" } else { "UNSUBSCRIBE" };
        let venue_raw = fields
            .first()
            .ok_or(CommandParseError::MissingField { command: name.into(), field: "venue" })?;
        let symbol = fields
            .get(1)
            .ok_or(CommandParseError::MissingField { command: name.into(), field: "symbol" })?;
        let event_raw = fields
            .get(2)
            .ok_or(CommandParseError::MissingField { command: name.into(), field: "event_type" })?;

        let venue: Venue = venue_raw.parse().unwrap_or(Venue::Unknown);
        let event_type = parse_event_type(event_raw)?;
        let symbol = SymbolId::new(symbol);

        Ok(if subscribing {
            Command::Subscribe { venue, symbol, event_type }
        } else {
            Command::Unsubscribe { venue, symbol, event_type }
        })
    }

    fn parse_strategy(fields: &[&str]) -> Result<Command, CommandParseError> {
        let action_raw = fields
            .first()
            .ok_or(CommandParseError::MissingField { command: "STRATEGY".into(), field: "action" })?;
        let action = match action_raw.to_ascii_uppercase().as_str() {
            "LOAD" => StrategyAction::Load,
            "START" => StrategyAction::Start,
            "STOP" => StrategyAction::Stop,
            "UNLOAD" => StrategyAction::Unload,
            "LIST" => StrategyAction::List,
            "STATUS" => StrategyAction::Status,
            other => return Err(CommandParseError::UnknownCommand(other.to_string())),
        };
        Ok(Command::Strategy { action, params: fields[1..].iter().map(|s| s.to_string()).collect() })
    }
}

fn parse_number(field: Option<&&str>, name: &'static str) -> Result<f64, CommandParseError> {
    let raw = field.ok_or(CommandParseError::MissingField { command: "ORDER".into(), field: name })?;
    raw.parse::<f64>()
        .map_err(|_| CommandParseError::InvalidNumber { field: name, value: raw.to_string() })
}

fn parse_event_type(raw: &str) -> Result<MarketEventType, CommandParseError> {
    Ok(match raw.to_ascii_lowercase().as_str() {
        "trade" | "t" => MarketEventType::Trade,
        "book_top" | "booktop" => MarketEventType::BookTop,
        "book_delta" | "bookdelta" | "depth" => MarketEventType::BookDelta,
        "kline" | "k" | "candle" => MarketEventType::Kline,
        "ticker" => MarketEventType::Ticker,
        other => return Err(CommandParseError::InvalidEventType(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_shortcut_parses() {
        let cmd = CommandParser::parse_line("BUY BTCUSDT 0.5 50000.0 order001").unwrap().unwrap();
        match cmd {
            Command::PlaceOrder(req) => {
                assert_eq!(req.symbol, SymbolId::new("BTCUSDT"));
                assert_eq!(req.side, Side::Buy);
                assert_eq!(req.qty, 0.5);
                assert_eq!(req.price, Some(50000.0));
                assert_eq!(req.client_order_id, "order001");
                assert_eq!(req.order_type, OrderType::Limit);
                assert_eq!(req.tif, TimeInForce::Gtc);
            }
            _ => panic!("expected PlaceOrder"),
        }
    }

    #[test]
    fn invalid_side_is_rejected() {
        let err = CommandParser::parse_line("ORDER INVALID BTCUSDT 0.5 50000.0 order008").unwrap_err();
        assert_eq!(err, CommandParseError::InvalidSide("INVALID".to_string()));
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        assert_eq!(CommandParser::parse_line("").unwrap(), None);
        assert_eq!(CommandParser::parse_line("   ").unwrap(), None);
        assert_eq!(CommandParser::parse_line("# a comment").unwrap(), None);
    }

    #[test]
    fn cancel_shortcut() {
        let cmd = CommandParser::parse_line("C order001").unwrap().unwrap();
        assert_eq!(cmd, Command::Cancel { client_order_id: "order001".to_string() });
    }

    #[test]
    fn subscribe_parses_venue_symbol_event() {
        let cmd = CommandParser::parse_line("SUB binance BTCUSDT trade").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Subscribe {
                venue: Venue::Binance,
                symbol: SymbolId::new("BTCUSDT"),
                event_type: MarketEventType::Trade,
            }
        );
    }

    #[test]
    fn zero_qty_is_rejected() {
        let err = CommandParser::parse_line("BUY BTCUSDT 0 50000.0 order001").unwrap_err();
        assert_eq!(err, CommandParseError::InvalidQty(0.0));
    }
}
