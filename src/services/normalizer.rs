//! Raw portal JSON to typed records
//!
//! Field extraction is driven by [`MAPPINGS`]: for each endpoint, the
//! wrapper keys to unwrap, whether the payload is a row list or a single
//! object, and for each attribute the ordered candidate source keys. Dotted
//! source keys (`aspi.value`) address nested objects.
//!
//! Missing or unparseable numerics become zero. Nothing here performs I/O.

use crate::models::{
    Endpoint, MarketStatus, ReferenceEntry, SectorEntry, SecurityRecord, SecurityType, SnapshotPart,
    SymbolReference, UNKNOWN_SECTOR,
};
use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Symbol,
    CompanyName,
    SecurityCategory,
    Sector,
    SectorId,
    LastPrice,
    Change,
    ChangePercentage,
    ShareVolume,
    TradeCount,
    StockTurnover,
    MarketCap,
    AspiValue,
    SnpValue,
    MarketTurnover,
    MarketStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// List of rows, one per symbol
    Rows,
    /// One object (first element taken if an array arrives)
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Securities,
    Movers,
    SnapshotPart,
    Status,
    Sectors,
}

#[derive(Debug)]
pub struct FieldRule {
    pub attribute: Attribute,
    pub sources: &'static [&'static str],
}

#[derive(Debug)]
pub struct EndpointMapping {
    pub endpoint: Endpoint,
    pub wrappers: &'static [&'static str],
    pub shape: Shape,
    pub output: Output,
    pub fields: &'static [FieldRule],
}

const fn rule(attribute: Attribute, sources: &'static [&'static str]) -> FieldRule {
    FieldRule { attribute, sources }
}

const MOVER_FIELDS: &[FieldRule] = &[rule(Attribute::Symbol, &["symbol", "securityCode"])];

pub static MAPPINGS: &[EndpointMapping] = &[
    EndpointMapping {
        endpoint: Endpoint::MarketStatus,
        wrappers: &["reqMarketStatus"],
        shape: Shape::Object,
        output: Output::Status,
        fields: &[rule(Attribute::MarketStatus, &["status", "marketStatus"])],
    },
    EndpointMapping {
        endpoint: Endpoint::MarketSummary,
        wrappers: &["reqMarketSummery", "reqMarketSummary"],
        shape: Shape::Object,
        output: Output::SnapshotPart,
        fields: &[
            rule(Attribute::MarketTurnover, &["turnover", "tradeTurnover", "marketTurnover"]),
            rule(Attribute::AspiValue, &["aspi.value", "aspi"]),
            rule(Attribute::SnpValue, &["snp.value", "snp"]),
        ],
    },
    EndpointMapping {
        endpoint: Endpoint::TodaySharePrice,
        wrappers: &["reqTodaySharePrice"],
        shape: Shape::Rows,
        output: Output::Securities,
        fields: &[
            rule(Attribute::Symbol, &["symbol"]),
            rule(Attribute::CompanyName, &["name", "securityName", "companyName"]),
            rule(Attribute::SecurityCategory, &["securityType", "category", "type"]),
            rule(Attribute::Sector, &["sector", "sectorName"]),
            rule(Attribute::SectorId, &["sectorId"]),
            rule(Attribute::LastPrice, &["lastTradedPrice", "price", "closingPrice"]),
            rule(Attribute::Change, &["change", "priceChange"]),
            rule(Attribute::ChangePercentage, &["changePercentage", "percentageChange"]),
            rule(Attribute::ShareVolume, &["sharevolume", "shareVolume", "tdyShareVolume"]),
            rule(Attribute::TradeCount, &["tradevolume", "tradeVolume", "tradeCount"]),
            rule(Attribute::StockTurnover, &["turnover", "stockTurnover"]),
            rule(Attribute::MarketCap, &["marketCap"]),
        ],
    },
    EndpointMapping {
        endpoint: Endpoint::TradeSummary,
        wrappers: &["reqTradeSummery", "reqTradeSummary"],
        shape: Shape::Rows,
        output: Output::Securities,
        fields: &[
            rule(Attribute::Symbol, &["symbol"]),
            rule(Attribute::CompanyName, &["name", "securityName"]),
            rule(Attribute::SecurityCategory, &["securityType", "category"]),
            rule(Attribute::LastPrice, &["price", "lastTradedPrice"]),
            rule(Attribute::Change, &["change"]),
            rule(Attribute::ChangePercentage, &["percentageChange", "changePercentage"]),
            rule(Attribute::ShareVolume, &["sharevolume", "shareVolume"]),
            rule(Attribute::TradeCount, &["tradevolume", "tradeVolume"]),
            rule(Attribute::StockTurnover, &["turnover"]),
            rule(Attribute::MarketCap, &["marketCap"]),
        ],
    },
    EndpointMapping {
        endpoint: Endpoint::AspiData,
        wrappers: &["reqAspiData"],
        shape: Shape::Object,
        output: Output::SnapshotPart,
        fields: &[rule(Attribute::AspiValue, &["value", "indexValue"])],
    },
    EndpointMapping {
        endpoint: Endpoint::SnpData,
        wrappers: &["reqSnpData"],
        shape: Shape::Object,
        output: Output::SnapshotPart,
        fields: &[rule(Attribute::SnpValue, &["value", "indexValue"])],
    },
    EndpointMapping {
        endpoint: Endpoint::TopGainers,
        wrappers: &["reqTopGainers"],
        shape: Shape::Rows,
        output: Output::Movers,
        fields: MOVER_FIELDS,
    },
    EndpointMapping {
        endpoint: Endpoint::TopLosers,
        wrappers: &["reqTopLooses", "reqTopLosers"],
        shape: Shape::Rows,
        output: Output::Movers,
        fields: MOVER_FIELDS,
    },
    EndpointMapping {
        endpoint: Endpoint::AllSectors,
        wrappers: &["reqAllSectors"],
        shape: Shape::Rows,
        output: Output::Sectors,
        fields: &[
            rule(Attribute::SectorId, &["id", "sectorId"]),
            rule(Attribute::Sector, &["name", "sectorName", "indexName"]),
        ],
    },
    EndpointMapping {
        endpoint: Endpoint::CompanyInfoSummary,
        wrappers: &["reqSymbolInfo"],
        shape: Shape::Object,
        output: Output::Securities,
        fields: &[
            rule(Attribute::Symbol, &["symbol"]),
            rule(Attribute::CompanyName, &["name"]),
            rule(Attribute::SecurityCategory, &["securityType"]),
            rule(Attribute::LastPrice, &["lastTradedPrice"]),
            rule(Attribute::Change, &["change"]),
            rule(Attribute::ChangePercentage, &["changePercentage"]),
            rule(Attribute::ShareVolume, &["tdyTradeVolume", "tdyShareVolume"]),
            rule(Attribute::TradeCount, &["tdyTradeCount"]),
            rule(Attribute::StockTurnover, &["tdyTurnover"]),
            rule(Attribute::MarketCap, &["marketCap"]),
        ],
    },
];

/// Mapping for `endpoint`; every approved endpoint has one
pub fn mapping_for(endpoint: Endpoint) -> Option<&'static EndpointMapping> {
    MAPPINGS.iter().find(|m| m.endpoint == endpoint)
}

/// Typed result of normalizing one endpoint response
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Securities(Vec<SecurityRecord>),
    Movers(Vec<String>),
    Snapshot(SnapshotPart),
    Status(Option<MarketStatus>),
    Sectors(Vec<SectorEntry>),
}

impl Normalized {
    pub fn into_securities(self) -> Vec<SecurityRecord> {
        match self {
            Normalized::Securities(records) => records,
            _ => Vec::new(),
        }
    }

    pub fn into_movers(self) -> Vec<String> {
        match self {
            Normalized::Movers(symbols) => symbols,
            _ => Vec::new(),
        }
    }

    pub fn into_snapshot_part(self) -> SnapshotPart {
        match self {
            Normalized::Snapshot(part) => part,
            _ => SnapshotPart::default(),
        }
    }

    pub fn into_status(self) -> Option<MarketStatus> {
        match self {
            Normalized::Status(status) => status,
            _ => None,
        }
    }

    pub fn into_sectors(self) -> Vec<SectorEntry> {
        match self {
            Normalized::Sectors(sectors) => sectors,
            _ => Vec::new(),
        }
    }
}

/// Normalize one raw endpoint response taken at `timestamp`
pub fn normalize(endpoint: Endpoint, raw: &Value, timestamp: DateTime<FixedOffset>) -> Normalized {
    let Some(mapping) = mapping_for(endpoint) else {
        return Normalized::Securities(Vec::new());
    };

    match mapping.output {
        Output::Securities => Normalized::Securities(
            rows(mapping, raw)
                .into_iter()
                .filter_map(|row| security_from_row(mapping, row, timestamp))
                .collect(),
        ),
        Output::Movers => {
            let mut seen = BTreeSet::new();
            Normalized::Movers(
                rows(mapping, raw)
                    .into_iter()
                    .filter_map(|row| field(mapping, row, Attribute::Symbol).and_then(symbol_text))
                    .filter(|symbol| seen.insert(symbol.clone()))
                    .collect(),
            )
        }
        Output::SnapshotPart => {
            let row = rows(mapping, raw).into_iter().next();
            let get = |attr| row.and_then(|r| field(mapping, r, attr)).map(parse_f64);
            Normalized::Snapshot(SnapshotPart {
                aspi_value: get(Attribute::AspiValue),
                snp_value: get(Attribute::SnpValue),
                market_turnover: get(Attribute::MarketTurnover),
            })
        }
        Output::Status => {
            let status = match unwrap_envelope(mapping, raw) {
                Value::String(text) => MarketStatus::from_portal_text(text),
                other => field(mapping, other, Attribute::MarketStatus)
                    .and_then(text_value)
                    .and_then(|text| MarketStatus::from_portal_text(&text)),
            };
            Normalized::Status(status)
        }
        Output::Sectors => Normalized::Sectors(
            rows(mapping, raw)
                .into_iter()
                .filter_map(|row| {
                    let id = field(mapping, row, Attribute::SectorId).and_then(text_value)?;
                    let name = field(mapping, row, Attribute::Sector)
                        .and_then(text_value)
                        .unwrap_or_else(|| UNKNOWN_SECTOR.to_string());
                    Some(SectorEntry { id, name })
                })
                .collect(),
        ),
    }
}

fn security_from_row(mapping: &EndpointMapping, row: &Value, timestamp: DateTime<FixedOffset>) -> Option<SecurityRecord> {
    let symbol = field(mapping, row, Attribute::Symbol).and_then(symbol_text)?;
    let explicit = field(mapping, row, Attribute::SecurityCategory).and_then(text_value);
    let security_type = classify(explicit.as_deref(), &symbol);

    let num = |attr| field(mapping, row, attr).map(parse_f64).unwrap_or(0.0);
    let count = |attr| field(mapping, row, attr).map(parse_u64).unwrap_or(0);

    let mut record = SecurityRecord::new(timestamp, symbol, security_type);
    record.company_name = field(mapping, row, Attribute::CompanyName)
        .and_then(text_value)
        .unwrap_or_default();
    record.last_price = num(Attribute::LastPrice);
    record.change = num(Attribute::Change);
    record.change_percentage = num(Attribute::ChangePercentage);
    record.share_volume = count(Attribute::ShareVolume);
    record.trade_count = count(Attribute::TradeCount);
    record.stock_turnover = num(Attribute::StockTurnover);
    record.market_cap = num(Attribute::MarketCap);
    Some(record)
}

/// Resolve the security type: explicit category first, symbol suffix second
pub fn classify(explicit: Option<&str>, symbol: &str) -> SecurityType {
    if let Some(category) = explicit.map(|c| c.to_uppercase()) {
        if category.contains("UNIT") {
            return SecurityType::UnitTrust;
        }
        if category.contains("RIGHT") {
            return SecurityType::RightsIssue;
        }
        if category.contains("OFF") {
            return SecurityType::OffBoard;
        }
        if ["EQUITY", "ORDINARY", "NORMAL", "VOTING", "SHARE"]
            .iter()
            .any(|k| category.contains(k))
        {
            return SecurityType::NormalStock;
        }
    }

    // "LOLC.N0000": the class letter follows the last dot
    let suffix = symbol.rsplit_once('.').map(|(_, s)| s).unwrap_or("");
    match suffix.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('N') | Some('X') | Some('P') => SecurityType::NormalStock,
        Some('U') => SecurityType::UnitTrust,
        Some('R') => SecurityType::RightsIssue,
        _ => SecurityType::OffBoard,
    }
}

/// Merge the primary price list with supplementary sources, keyed by symbol
///
/// Values already present in the primary record win; zero-valued fields are
/// filled from supplements in order, and symbols absent from the primary
/// list are added. Output is sorted by symbol.
pub fn merge_securities(primary: Vec<SecurityRecord>, supplements: &[Vec<SecurityRecord>]) -> Vec<SecurityRecord> {
    let mut merged: BTreeMap<String, SecurityRecord> = BTreeMap::new();

    for record in primary {
        match merged.get_mut(&record.symbol) {
            Some(existing) => existing.fill_missing_from(&record),
            None => {
                merged.insert(record.symbol.clone(), record);
            }
        }
    }

    for supplement in supplements {
        for record in supplement {
            match merged.get_mut(&record.symbol) {
                Some(existing) => existing.fill_missing_from(record),
                None => {
                    merged.insert(record.symbol.clone(), record.clone());
                }
            }
        }
    }

    merged.into_values().collect()
}

/// Fill empty company names from the symbol reference table
pub fn apply_reference(records: &mut [SecurityRecord], reference: &SymbolReference) {
    for record in records.iter_mut().filter(|r| r.company_name.is_empty()) {
        if let Some(name) = reference.company_name(&record.symbol) {
            record.company_name = name.to_string();
        }
    }
}

/// Set gainer/loser flags; returns symbols found on both lists
///
/// A symbol on both lists is a data-quality anomaly: both flags stay false.
pub fn tag_movers(records: &mut [SecurityRecord], gainers: &[String], losers: &[String]) -> Vec<String> {
    let gainers: BTreeSet<&str> = gainers.iter().map(String::as_str).collect();
    let losers: BTreeSet<&str> = losers.iter().map(String::as_str).collect();
    let anomalies: Vec<String> = gainers.intersection(&losers).map(|s| s.to_string()).collect();

    for symbol in &anomalies {
        warn!(symbol = %symbol, "Symbol listed as both top gainer and top loser, clearing both flags");
    }

    for record in records.iter_mut() {
        let symbol = record.symbol.as_str();
        let both = gainers.contains(symbol) && losers.contains(symbol);
        record.is_gainer = !both && gainers.contains(symbol);
        record.is_loser = !both && losers.contains(symbol);
    }

    anomalies
}

/// Build the symbol reference table from a price list and the sector list
pub fn build_reference(
    timestamp: DateTime<FixedOffset>,
    share_price_raw: &Value,
    sectors: &[SectorEntry],
) -> SymbolReference {
    let mut reference = SymbolReference::new(timestamp);
    let Some(mapping) = mapping_for(Endpoint::TodaySharePrice) else {
        return reference;
    };
    let sector_names: BTreeMap<&str, &str> = sectors.iter().map(|s| (s.id.as_str(), s.name.as_str())).collect();

    for row in rows(mapping, share_price_raw) {
        let Some(symbol) = field(mapping, row, Attribute::Symbol).and_then(symbol_text) else {
            continue;
        };
        let company_name = field(mapping, row, Attribute::CompanyName)
            .and_then(text_value)
            .unwrap_or_default();
        let sector = field(mapping, row, Attribute::Sector)
            .and_then(text_value)
            .or_else(|| {
                field(mapping, row, Attribute::SectorId)
                    .and_then(text_value)
                    .and_then(|id| sector_names.get(id.as_str()).map(|n| n.to_string()))
            })
            .unwrap_or_else(|| UNKNOWN_SECTOR.to_string());

        reference.symbols.insert(symbol, ReferenceEntry { company_name, sector });
    }

    reference
}

fn unwrap_envelope<'a>(mapping: &EndpointMapping, raw: &'a Value) -> &'a Value {
    if let Value::Object(map) = raw {
        for wrapper in mapping.wrappers {
            if let Some(inner) = map.get(*wrapper).filter(|v| !v.is_null()) {
                return inner;
            }
        }
    }
    raw
}

fn rows<'a>(mapping: &EndpointMapping, raw: &'a Value) -> Vec<&'a Value> {
    let inner = unwrap_envelope(mapping, raw);
    match (mapping.shape, inner) {
        (Shape::Rows, Value::Array(items)) => items.iter().filter(|v| v.is_object()).collect(),
        (Shape::Object, Value::Array(items)) => items.iter().find(|v| v.is_object()).into_iter().collect(),
        (_, Value::Object(_)) => vec![inner],
        _ => Vec::new(),
    }
}

fn lookup<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(row, |value, key| value.get(key))
        .filter(|v| !v.is_null())
}

fn field<'a>(mapping: &EndpointMapping, row: &'a Value, attribute: Attribute) -> Option<&'a Value> {
    mapping
        .fields
        .iter()
        .find(|f| f.attribute == attribute)
        .and_then(|f| f.sources.iter().find_map(|source| lookup(row, source)))
}

fn text_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn symbol_text(value: &Value) -> Option<String> {
    text_value(value).map(|s| s.to_uppercase())
}

/// Zero-filling float parse; accepts thousands separators in strings
pub fn parse_f64(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Zero-filling count parse; negatives and fractions round into range
pub fn parse_u64(value: &Value) -> u64 {
    if let Some(n) = value.as_u64() {
        return n;
    }
    let f = parse_f64(value);
    if f <= 0.0 {
        0
    } else {
        f.round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(19800)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 19, 10, 15, 0)
            .unwrap()
    }

    #[test]
    fn test_every_endpoint_has_a_mapping() {
        for endpoint in Endpoint::ALL {
            assert!(mapping_for(endpoint).is_some(), "missing mapping for {}", endpoint);
        }
    }

    #[test]
    fn test_today_share_price_wrapped_and_bare() {
        let wrapped = json!({"reqTodaySharePrice": [
            {"symbol": "JKH.N0000", "name": "JOHN KEELLS HOLDINGS PLC", "lastTradedPrice": 195.5,
             "change": 1.25, "changePercentage": 0.64, "sharevolume": 120000, "tradevolume": 431,
             "turnover": 23460000.0, "marketCap": 1.2e11}
        ]});
        let records = normalize(Endpoint::TodaySharePrice, &wrapped, ts()).into_securities();
        assert_eq!(records.len(), 1);
        let jkh = &records[0];
        assert_eq!(jkh.security_type, SecurityType::NormalStock);
        assert_eq!(jkh.last_price, 195.5);
        assert_eq!(jkh.share_volume, 120000);
        assert_eq!(jkh.trade_count, 431);
        assert_eq!(jkh.timestamp, ts());

        let bare = json!([{"symbol": "jkh.n0000", "lastTradedPrice": "195.50"}]);
        let records = normalize(Endpoint::TodaySharePrice, &bare, ts()).into_securities();
        assert_eq!(records[0].symbol, "JKH.N0000");
        assert_eq!(records[0].last_price, 195.5);
    }

    #[test]
    fn test_adversarial_values_zero_fill() {
        let raw = json!([
            {"symbol": "ABC.N0000", "lastTradedPrice": null, "change": "n/a", "changePercentage": "NaN",
             "sharevolume": "1,234,567", "tradevolume": -5, "turnover": "inf", "marketCap": {"x": 1}},
            {"symbol": "DEF.X0000"},
            {"name": "row without symbol", "lastTradedPrice": 10},
            "not an object"
        ]);

        let records = normalize(Endpoint::TodaySharePrice, &raw, ts()).into_securities();
        assert_eq!(records.len(), 2);

        let abc = &records[0];
        assert_eq!(abc.last_price, 0.0);
        assert_eq!(abc.change, 0.0);
        assert_eq!(abc.change_percentage, 0.0);
        assert_eq!(abc.share_volume, 1_234_567);
        assert_eq!(abc.trade_count, 0);
        assert_eq!(abc.stock_turnover, 0.0);
        assert_eq!(abc.market_cap, 0.0);

        let def = &records[1];
        assert_eq!(def.company_name, "");
        assert_eq!(def.share_volume, 0);
        assert_eq!(def.security_type, SecurityType::NormalStock);
    }

    #[test]
    fn test_garbage_payloads_yield_nothing() {
        assert!(normalize(Endpoint::TodaySharePrice, &json!("oops"), ts()).into_securities().is_empty());
        assert!(normalize(Endpoint::TopGainers, &json!(null), ts()).into_movers().is_empty());
        assert_eq!(normalize(Endpoint::MarketStatus, &json!(42), ts()).into_status(), None);
        assert_eq!(normalize(Endpoint::AspiData, &json!([]), ts()).into_snapshot_part(), SnapshotPart::default());
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(None, "LOLC.N0000"), SecurityType::NormalStock);
        assert_eq!(classify(None, "CTC.X0000"), SecurityType::NormalStock);
        assert_eq!(classify(None, "SEYB.P0000"), SecurityType::NormalStock);
        assert_eq!(classify(None, "NAMU.U0000"), SecurityType::UnitTrust);
        assert_eq!(classify(None, "HNB.R0000"), SecurityType::RightsIssue);
        assert_eq!(classify(None, "CRL1.Z0000"), SecurityType::OffBoard);
        assert_eq!(classify(None, "NOSUFFIX"), SecurityType::OffBoard);
        assert_eq!(classify(None, ""), SecurityType::OffBoard);

        // Explicit category wins over the suffix
        assert_eq!(classify(Some("Unit Trust"), "ABC.N0000"), SecurityType::UnitTrust);
        assert_eq!(classify(Some("EQUITY"), "ODD.Z0000"), SecurityType::NormalStock);
        assert_eq!(classify(Some("something else"), "ODD.Z0000"), SecurityType::OffBoard);
    }

    #[test]
    fn test_company_info_missing_volume_and_cap() {
        let raw = json!({"reqSymbolInfo": {
            "symbol": "LOLC.N0000", "name": "L O L C HOLDINGS PLC", "lastTradedPrice": 402.25,
            "change": -2.0, "changePercentage": -0.49
        }});

        let records = normalize(Endpoint::CompanyInfoSummary, &raw, ts()).into_securities();
        assert_eq!(records.len(), 1);
        let lolc = &records[0];
        assert_eq!(lolc.share_volume, 0);
        assert_eq!(lolc.market_cap, 0.0);
        assert_eq!(lolc.security_type, SecurityType::NormalStock);
        assert_eq!(lolc.change, -2.0);
    }

    #[test]
    fn test_trade_summary_fields() {
        let raw = json!({"reqTradeSummery": [
            {"symbol": "SAMP.N0000", "price": "72.10", "percentageChange": 1.5,
             "sharevolume": 95000, "tradevolume": 210}
        ]});
        let records = normalize(Endpoint::TradeSummary, &raw, ts()).into_securities();
        assert_eq!(records[0].last_price, 72.1);
        assert_eq!(records[0].change_percentage, 1.5);
        assert_eq!(records[0].trade_count, 210);
    }

    #[test]
    fn test_status_and_snapshot_parts() {
        let status = normalize(Endpoint::MarketStatus, &json!({"status": "Market Closed"}), ts());
        assert_eq!(status.into_status(), Some(MarketStatus::Closed));
        let bare = normalize(Endpoint::MarketStatus, &json!("Market Open"), ts());
        assert_eq!(bare.into_status(), Some(MarketStatus::Open));

        let summary = json!({"reqMarketSummery": {"turnover": "1,250,000,000.50", "aspi": {"value": 12001.5}}});
        let part = normalize(Endpoint::MarketSummary, &summary, ts()).into_snapshot_part();
        assert_eq!(part.market_turnover, Some(1_250_000_000.5));
        assert_eq!(part.aspi_value, Some(12001.5));
        assert_eq!(part.snp_value, None);

        let snp = normalize(Endpoint::SnpData, &json!({"value": 3850.2}), ts()).into_snapshot_part();
        assert_eq!(snp.snp_value, Some(3850.2));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let raw = json!([{"symbol": "B.N0000", "lastTradedPrice": 1}, {"symbol": "A.U0000"}]);
        let first = normalize(Endpoint::TodaySharePrice, &raw, ts());
        let second = normalize(Endpoint::TodaySharePrice, &raw, ts());
        assert_eq!(first, second);
    }

    #[test]
    fn test_merge_prefers_primary_and_adds_missing() {
        let mut primary = SecurityRecord::new(ts(), "JKH.N0000".into(), SecurityType::NormalStock);
        primary.last_price = 195.5;

        let mut trade = SecurityRecord::new(ts(), "JKH.N0000".into(), SecurityType::NormalStock);
        trade.last_price = 190.0;
        trade.trade_count = 431;
        let extra = SecurityRecord::new(ts(), "AAA.N0000".into(), SecurityType::NormalStock);

        let merged = merge_securities(vec![primary], &[vec![trade, extra]]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].symbol, "AAA.N0000");
        assert_eq!(merged[1].last_price, 195.5);
        assert_eq!(merged[1].trade_count, 431);
    }

    #[test]
    fn test_tag_movers_clears_conflicts() {
        let mut records = vec![
            SecurityRecord::new(ts(), "UP.N0000".into(), SecurityType::NormalStock),
            SecurityRecord::new(ts(), "DOWN.N0000".into(), SecurityType::NormalStock),
            SecurityRecord::new(ts(), "BOTH.N0000".into(), SecurityType::NormalStock),
        ];
        let gainers = vec!["UP.N0000".to_string(), "BOTH.N0000".to_string()];
        let losers = vec!["DOWN.N0000".to_string(), "BOTH.N0000".to_string()];

        let anomalies = tag_movers(&mut records, &gainers, &losers);
        assert_eq!(anomalies, vec!["BOTH.N0000".to_string()]);
        assert!(records[0].is_gainer && !records[0].is_loser);
        assert!(!records[1].is_gainer && records[1].is_loser);
        assert!(!records[2].is_gainer && !records[2].is_loser);
        assert!(records.iter().all(|r| !(r.is_gainer && r.is_loser)));
    }

    #[test]
    fn test_build_and_apply_reference() {
        let sectors = normalize(
            Endpoint::AllSectors,
            &json!({"reqAllSectors": [{"id": 5, "name": "Banks"}, {"id": 9}]}),
            ts(),
        )
        .into_sectors();
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[1].name, UNKNOWN_SECTOR);

        let prices = json!([
            {"symbol": "COMB.N0000", "name": "COMMERCIAL BANK", "sectorId": 5},
            {"symbol": "XYZ.N0000", "name": "XYZ PLC"}
        ]);
        let reference = build_reference(ts(), &prices, &sectors);
        assert_eq!(reference.len(), 2);
        assert_eq!(reference.symbols["COMB.N0000"].sector, "Banks");
        assert_eq!(reference.symbols["XYZ.N0000"].sector, UNKNOWN_SECTOR);

        let mut records = vec![SecurityRecord::new(ts(), "COMB.N0000".into(), SecurityType::NormalStock)];
        apply_reference(&mut records, &reference);
        assert_eq!(records[0].company_name, "COMMERCIAL BANK");
    }
}
