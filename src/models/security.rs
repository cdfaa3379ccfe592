use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Instrument class of a listed security
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityType {
    /// Ordinary voting / non-voting shares
    NormalStock,
    UnitTrust,
    RightsIssue,
    /// Anything that cannot be resolved to one of the above
    OffBoard,
}

impl SecurityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityType::NormalStock => "NORMAL_STOCK",
            SecurityType::UnitTrust => "UNIT_TRUST",
            SecurityType::RightsIssue => "RIGHTS_ISSUE",
            SecurityType::OffBoard => "OFF_BOARD",
        }
    }
}

/// One normalized row of market data for a single security at one poll instant
///
/// Every numeric field is zero-filled by the normalizer, so a persisted record
/// never carries a null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub symbol: String,
    pub company_name: String,
    pub security_type: SecurityType,
    pub last_price: f64,
    pub change: f64,
    pub change_percentage: f64,
    pub share_volume: u64,
    pub trade_count: u64,
    pub stock_turnover: f64,
    pub market_cap: f64,
    pub is_gainer: bool,
    pub is_loser: bool,
}

impl SecurityRecord {
    /// Empty record for a symbol, all numerics zero
    pub fn new(timestamp: DateTime<FixedOffset>, symbol: String, security_type: SecurityType) -> Self {
        Self {
            timestamp,
            symbol,
            company_name: String::new(),
            security_type,
            last_price: 0.0,
            change: 0.0,
            change_percentage: 0.0,
            share_volume: 0,
            trade_count: 0,
            stock_turnover: 0.0,
            market_cap: 0.0,
            is_gainer: false,
            is_loser: false,
        }
    }

    /// Fill zero-valued fields from another source's record of the same symbol
    ///
    /// Fields already carrying data are kept; this record's source wins.
    pub fn fill_missing_from(&mut self, other: &SecurityRecord) {
        fn fill_f64(target: &mut f64, source: f64) {
            if *target == 0.0 {
                *target = source;
            }
        }
        fn fill_u64(target: &mut u64, source: u64) {
            if *target == 0 {
                *target = source;
            }
        }

        if self.company_name.is_empty() {
            self.company_name = other.company_name.clone();
        }
        if self.security_type == SecurityType::OffBoard {
            self.security_type = other.security_type;
        }
        fill_f64(&mut self.last_price, other.last_price);
        fill_f64(&mut self.change, other.change);
        fill_f64(&mut self.change_percentage, other.change_percentage);
        fill_u64(&mut self.share_volume, other.share_volume);
        fill_u64(&mut self.trade_count, other.trade_count);
        fill_f64(&mut self.stock_turnover, other.stock_turnover);
        fill_f64(&mut self.market_cap, other.market_cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(19800)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 19, 10, 15, 0)
            .unwrap()
    }

    #[test]
    fn test_security_type_serialize() {
        let json = serde_json::to_string(&SecurityType::RightsIssue).unwrap();
        assert_eq!(json, r#""RIGHTS_ISSUE""#);
        let parsed: SecurityType = serde_json::from_str(r#""UNIT_TRUST""#).unwrap();
        assert_eq!(parsed, SecurityType::UnitTrust);
        assert_eq!(SecurityType::OffBoard.as_str(), "OFF_BOARD");
    }

    #[test]
    fn test_fill_missing_keeps_existing_values() {
        let mut primary = SecurityRecord::new(ts(), "JKH.N0000".into(), SecurityType::NormalStock);
        primary.last_price = 195.5;

        let mut secondary = SecurityRecord::new(ts(), "JKH.N0000".into(), SecurityType::NormalStock);
        secondary.last_price = 190.0;
        secondary.trade_count = 412;
        secondary.company_name = "JOHN KEELLS HOLDINGS PLC".into();

        primary.fill_missing_from(&secondary);
        assert_eq!(primary.last_price, 195.5);
        assert_eq!(primary.trade_count, 412);
        assert_eq!(primary.company_name, "JOHN KEELLS HOLDINGS PLC");
    }

    #[test]
    fn test_record_timestamp_keeps_offset() {
        let record = SecurityRecord::new(ts(), "LOLC.N0000".into(), SecurityType::NormalStock);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timestamp"], "2026-10-19T10:15:00+05:30");
        assert_eq!(json["security_type"], "NORMAL_STOCK");
        assert_eq!(json["share_volume"], 0);
    }
}
