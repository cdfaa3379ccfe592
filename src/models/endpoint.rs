/// Approved CSE portal endpoints
///
/// Only endpoints that are stable and callable with plain form parameters are
/// representable here. Blacklisted endpoints (see
/// [`BLACKLISTED_ENDPOINTS`](crate::constants::BLACKLISTED_ENDPOINTS)) have no
/// variant, so nothing in the pipeline can ever address them.
use crate::constants::{API_BASE_URL, BLACKLISTED_ENDPOINTS};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Endpoint {
    /// Market open/close state
    #[serde(rename = "marketStatus")]
    MarketStatus,
    /// Market-level metrics (turnover, volumes)
    #[serde(rename = "marketSummery")]
    MarketSummary,
    /// Core price list for all traded securities
    #[serde(rename = "todaySharePrice")]
    TodaySharePrice,
    /// Volumes and trade counts per security
    #[serde(rename = "tradeSummary")]
    TradeSummary,
    /// All Share Price Index
    #[serde(rename = "aspiData")]
    AspiData,
    /// S&P Sri Lanka 20 index
    #[serde(rename = "snpData")]
    SnpData,
    #[serde(rename = "topGainers")]
    TopGainers,
    /// The portal spells it "Looses"
    #[serde(rename = "topLooses")]
    TopLosers,
    /// Sector list, used for the symbol reference table
    #[serde(rename = "allSectors")]
    AllSectors,
    /// Per-symbol detail; requires a `symbol` form parameter
    #[serde(rename = "companyInfoSummery")]
    CompanyInfoSummary,
}

impl Endpoint {
    pub const ALL: [Endpoint; 10] = [
        Endpoint::MarketStatus,
        Endpoint::MarketSummary,
        Endpoint::TodaySharePrice,
        Endpoint::TradeSummary,
        Endpoint::AspiData,
        Endpoint::SnpData,
        Endpoint::TopGainers,
        Endpoint::TopLosers,
        Endpoint::AllSectors,
        Endpoint::CompanyInfoSummary,
    ];

    /// Wire name as used in the API path and in the storage layout
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::MarketStatus => "marketStatus",
            Endpoint::MarketSummary => "marketSummery",
            Endpoint::TodaySharePrice => "todaySharePrice",
            Endpoint::TradeSummary => "tradeSummary",
            Endpoint::AspiData => "aspiData",
            Endpoint::SnpData => "snpData",
            Endpoint::TopGainers => "topGainers",
            Endpoint::TopLosers => "topLooses",
            Endpoint::AllSectors => "allSectors",
            Endpoint::CompanyInfoSummary => "companyInfoSummery",
        }
    }

    /// Full API URL for this endpoint
    pub fn url(&self) -> String {
        format!("{}{}", API_BASE_URL, self.as_str())
    }

    /// Parse from wire name (case-insensitive)
    ///
    /// Blacklisted names are rejected with a configuration error that says so,
    /// rather than the generic "unknown endpoint" message.
    pub fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        if let Some(blocked) = BLACKLISTED_ENDPOINTS
            .iter()
            .find(|b| b.eq_ignore_ascii_case(name))
        {
            return Err(AppError::Config(format!(
                "Endpoint '{}' is blacklisted and can never be enabled",
                blocked
            )));
        }

        Endpoint::ALL
            .iter()
            .copied()
            .find(|e| e.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Unknown endpoint '{}'. Approved endpoints: {}",
                    name,
                    Endpoint::ALL.iter().map(|e| e.as_str()).collect::<Vec<_>>().join(", ")
                ))
            })
    }

    /// Parse a comma-separated endpoint list, or "all"
    pub fn parse_list(s: &str) -> Result<BTreeSet<Self>> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Endpoint::ALL.iter().copied().collect());
        }

        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Endpoint::from_str)
            .collect()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
