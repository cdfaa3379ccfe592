use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Open,
    Closed,
}

impl MarketStatus {
    /// Interpret the portal's free-text status ("Market Open", "Closed", ...)
    ///
    /// Returns `None` when the text says neither.
    pub fn from_portal_text(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        if lower.contains("close") {
            Some(MarketStatus::Closed)
        } else if lower.contains("open") || lower.contains("trading") {
            Some(MarketStatus::Open)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "OPEN",
            MarketStatus::Closed => "CLOSED",
        }
    }
}

/// Aggregate market fields for one poll instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<FixedOffset>,
    pub aspi_value: f64,
    pub snp_value: f64,
    pub market_turnover: f64,
    pub market_status: MarketStatus,
}

/// Partial snapshot contributed by one endpoint
///
/// `None` means the endpoint did not carry the field; zero-fill happens only
/// when parts are combined into a [`MarketSnapshot`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotPart {
    pub aspi_value: Option<f64>,
    pub snp_value: Option<f64>,
    pub market_turnover: Option<f64>,
}

impl MarketSnapshot {
    /// Combine parts, first part carrying a field wins, absent fields become 0.0
    pub fn from_parts(
        timestamp: DateTime<FixedOffset>,
        market_status: MarketStatus,
        parts: &[SnapshotPart],
    ) -> Self {
        let pick = |f: fn(&SnapshotPart) -> Option<f64>| parts.iter().find_map(f).unwrap_or(0.0);

        Self {
            timestamp,
            aspi_value: pick(|p| p.aspi_value),
            snp_value: pick(|p| p.snp_value),
            market_turnover: pick(|p| p.market_turnover),
            market_status,
        }
    }
}
