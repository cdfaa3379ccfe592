use crate::constants::{LEGACY_CSV_COLUMNS, LEGACY_CSV_FILE};
use crate::error::Result;
use crate::models::{MarketSnapshot, SecurityRecord};
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Appends one flat row per security and poll to `cse_market_data.csv`
#[derive(Debug, Clone)]
pub struct LegacyCsvExporter {
    path: PathBuf,
}

impl LegacyCsvExporter {
    pub fn new(data_root: &Path) -> Self {
        Self {
            path: data_root.join(LEGACY_CSV_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `records`, each joined with the cycle's snapshot values
    pub fn append(&self, records: &[SecurityRecord], snapshot: &MarketSnapshot) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let needs_header = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

        if needs_header {
            writer.write_record(LEGACY_CSV_COLUMNS)?;
        }

        for record in records {
            writer.write_record(&[
                record.timestamp.to_rfc3339(),
                record.symbol.clone(),
                record.company_name.clone(),
                record.security_type.as_str().to_string(),
                record.last_price.to_string(),
                record.change.to_string(),
                record.change_percentage.to_string(),
                record.share_volume.to_string(),
                record.trade_count.to_string(),
                record.stock_turnover.to_string(),
                record.market_cap.to_string(),
                record.is_gainer.to_string(),
                record.is_loser.to_string(),
                snapshot.aspi_value.to_string(),
                snapshot.snp_value.to_string(),
                snapshot.market_turnover.to_string(),
            ])?;
        }

        writer.flush()?;
        debug!(rows = records.len(), path = %self.path.display(), "Appended legacy CSV rows");
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketStatus, SecurityType};
    use chrono::{FixedOffset, TimeZone};
    use tempfile::tempdir;

    #[test]
    fn test_append_writes_header_once() {
        let dir = tempdir().unwrap();
        let exporter = LegacyCsvExporter::new(dir.path());
        let ts = FixedOffset::east_opt(19800)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 19, 10, 0, 0)
            .unwrap();

        let mut record = SecurityRecord::new(ts, "JKH.N0000".into(), SecurityType::NormalStock);
        record.company_name = "JOHN KEELLS, HOLDINGS".into();
        record.is_gainer = true;
        let snapshot = MarketSnapshot {
            timestamp: ts,
            aspi_value: 12000.5,
            snp_value: 3800.0,
            market_turnover: 1.5e9,
            market_status: MarketStatus::Open,
        };

        assert_eq!(exporter.append(&[record.clone()], &snapshot).unwrap(), 1);
        assert_eq!(exporter.append(&[record], &snapshot).unwrap(), 1);
        assert_eq!(exporter.append(&[], &snapshot).unwrap(), 0);

        let mut reader = csv::Reader::from_path(exporter.path()).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), LEGACY_CSV_COLUMNS.len());
        assert_eq!(&headers[0], "timestamp");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "JOHN KEELLS, HOLDINGS");
        assert_eq!(&rows[0][3], "NORMAL_STOCK");
        assert_eq!(&rows[0][11], "true");
        assert_eq!(&rows[0][13], "12000.5");
    }
}
