//! CSV packet source
//!
//! Loads a flat packet export (one row per packet) into an
//! [`InMemoryProvider`]. Columns are matched by header name:
//!
//! ```text
//! timestamp,length,flags,src_ip,dst_ip,src_port,dst_port
//! 1700000000000000,74,2,3,7,51234,443
//! ```
//!
//! `timestamp` (or `time`) is required; the rest default to zero when
//! absent. Endpoint columns may be named `src_id`/`dst_id` or
//! `src_ip`/`dst_ip`; non-numeric endpoint values are interned to ids in
//! order of first appearance.

use chrono::DateTime;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use super::error::{ProviderError, ProviderResult};
use super::memory::InMemoryProvider;
use super::types::{Record, MICROS_PER_MINUTE, MICROS_PER_SEC};

/// Unit of the timestamp column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampUnit {
    /// Integer microseconds
    Micros,
    /// Integer milliseconds
    Millis,
    /// Decimal seconds (e.g. `1700000000.123456`)
    Seconds,
}

/// Result of a CSV load
pub struct CsvLoadResult {
    pub provider: InMemoryProvider,
    pub rows_loaded: usize,
    pub rows_failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct ColumnMap {
    timestamp: Option<usize>,
    length: Option<usize>,
    flags: Option<usize>,
    src: Option<usize>,
    dst: Option<usize>,
    src_port: Option<usize>,
    dst_port: Option<usize>,
}

impl ColumnMap {
    fn detect(headers: &csv::StringRecord) -> Self {
        let mut map = Self::default();
        for (idx, header) in headers.iter().enumerate() {
            match header.trim().to_lowercase().as_str() {
                "timestamp" | "time" | "ts" => map.timestamp = Some(idx),
                "length" | "len" | "bytes" => map.length = Some(idx),
                "flags" | "tcp_flags" => map.flags = Some(idx),
                "src_id" | "src_ip" | "src" => map.src = Some(idx),
                "dst_id" | "dst_ip" | "dst" => map.dst = Some(idx),
                "src_port" | "sport" => map.src_port = Some(idx),
                "dst_port" | "dport" => map.dst_port = Some(idx),
                _ => {}
            }
        }
        map
    }
}

/// Packet CSV loader with configurable timestamp parsing
pub struct CsvPacketLoader {
    unit: TimestampUnit,
    coarse_width: i64,
    medium_width: i64,
}

impl Default for CsvPacketLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvPacketLoader {
    pub fn new() -> Self {
        Self {
            unit: TimestampUnit::Micros,
            coarse_width: MICROS_PER_MINUTE,
            medium_width: MICROS_PER_SEC,
        }
    }

    /// Set the unit of the timestamp column
    pub fn with_timestamp_unit(mut self, unit: TimestampUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Set coarse and medium bin widths in microseconds
    pub fn with_bin_widths(mut self, coarse: i64, medium: i64) -> Self {
        self.coarse_width = coarse;
        self.medium_width = medium;
        self
    }

    /// Load packets from a CSV file
    pub fn load(&self, path: &Path) -> ProviderResult<CsvLoadResult> {
        let file = std::fs::File::open(path)?;
        let mut result = self.load_reader(file)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "csv".to_string());
        result.provider = result.provider.with_name(name);
        Ok(result)
    }

    /// Load packets from any reader (useful for testing)
    pub fn load_reader<R: Read>(&self, reader: R) -> ProviderResult<CsvLoadResult> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = ColumnMap::detect(reader.headers()?);
        let ts_col = columns
            .timestamp
            .ok_or_else(|| ProviderError::InvalidData("missing timestamp column".to_string()))?;

        let mut endpoints: HashMap<String, u32> = HashMap::new();
        let mut records = Vec::new();
        let mut rows_failed = 0;
        let mut errors = Vec::new();

        for (line_num, row) in reader.records().enumerate() {
            let line = line_num + 2;
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    errors.push(format!("Line {}: {}", line, e));
                    rows_failed += 1;
                    continue;
                }
            };

            let timestamp = match row.get(ts_col).map(|s| self.parse_timestamp(s)) {
                Some(Ok(ts)) => ts,
                Some(Err(e)) => {
                    errors.push(format!("Line {}: {}", line, e));
                    rows_failed += 1;
                    continue;
                }
                None => {
                    errors.push(format!("Line {}: missing timestamp", line));
                    rows_failed += 1;
                    continue;
                }
            };

            records.push(Record {
                timestamp,
                length: parse_field(&row, columns.length),
                flags: parse_field(&row, columns.flags),
                src_id: endpoint_id(&row, columns.src, &mut endpoints),
                dst_id: endpoint_id(&row, columns.dst, &mut endpoints),
                src_port: parse_field(&row, columns.src_port),
                dst_port: parse_field(&row, columns.dst_port),
            });
        }

        if records.is_empty() {
            return Err(ProviderError::InvalidData("no packets in CSV".to_string()));
        }

        if errors.len() > 100 {
            let total = errors.len();
            errors.truncate(100);
            errors.push(format!("... and {} more errors", total - 100));
        }

        let rows_loaded = records.len();
        tracing::info!(rows_loaded, rows_failed, "Loaded packet CSV");

        Ok(CsvLoadResult {
            provider: InMemoryProvider::new(records)
                .with_name("csv")
                .with_bin_widths(self.coarse_width, self.medium_width),
            rows_loaded,
            rows_failed,
            errors,
        })
    }

    fn parse_timestamp(&self, raw: &str) -> Result<i64, String> {
        let raw = raw.trim();
        let parsed = match self.unit {
            TimestampUnit::Micros => raw.parse::<i64>().ok(),
            TimestampUnit::Millis => raw.parse::<i64>().ok().map(|ms| ms * 1_000),
            TimestampUnit::Seconds => raw
                .parse::<f64>()
                .ok()
                .map(|s| (s * MICROS_PER_SEC as f64).round() as i64),
        };

        parsed
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.timestamp_micros())
            })
            .ok_or_else(|| format!("Could not parse timestamp: {}", raw))
    }
}

fn parse_field<T: std::str::FromStr + Default>(row: &csv::StringRecord, col: Option<usize>) -> T {
    col.and_then(|c| row.get(c))
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

fn endpoint_id(
    row: &csv::StringRecord,
    col: Option<usize>,
    endpoints: &mut HashMap<String, u32>,
) -> u32 {
    let Some(raw) = col.and_then(|c| row.get(c)) else {
        return 0;
    };
    if let Ok(id) = raw.parse::<u32>() {
        return id;
    }
    let next = endpoints.len() as u32;
    *endpoints.entry(raw.to_string()).or_insert(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::DataProvider;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_reader_with_ip_strings() {
        let csv_data = "timestamp,length,src_ip,dst_ip,dst_port
30,60,10.0.0.1,10.0.0.2,443
10,1500,10.0.0.2,10.0.0.1,51000
20,74,10.0.0.1,10.0.0.3,53";

        let result = CsvPacketLoader::new().load_reader(csv_data.as_bytes()).unwrap();

        assert_eq!(result.rows_loaded, 3);
        assert_eq!(result.rows_failed, 0);

        let records = result.provider.records();
        assert_eq!(records[0].timestamp, 10);
        assert_eq!(records[0].length, 1500);
        // 10.0.0.1 is interned first, 10.0.0.2 second
        assert_eq!(records[0].src_id, 1);
        assert_eq!(records[0].dst_id, 0);
        assert_eq!(result.provider.time_extent().await.unwrap(), (10, 30));
    }

    #[test]
    fn test_seconds_and_bad_rows() {
        let csv_data = "time,len
1.5,60
oops,60
2.000001,60";

        let result = CsvPacketLoader::new()
            .with_timestamp_unit(TimestampUnit::Seconds)
            .load_reader(csv_data.as_bytes())
            .unwrap();

        assert_eq!(result.rows_loaded, 2);
        assert_eq!(result.rows_failed, 1);
        assert!(result.errors[0].starts_with("Line 3"));
        assert_eq!(result.provider.records()[0].timestamp, 1_500_000);
        assert_eq!(result.provider.records()[1].timestamp, 2_000_001);
    }

    #[test]
    fn test_missing_timestamp_column() {
        let csv_data = "length,flags\n60,2";
        let result = CsvPacketLoader::new().load_reader(csv_data.as_bytes());
        assert!(matches!(result, Err(ProviderError::InvalidData(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,length").unwrap();
        writeln!(file, "100,60").unwrap();
        writeln!(file, "200,60").unwrap();

        let result = CsvPacketLoader::new().load(file.path()).unwrap();
        assert_eq!(result.rows_loaded, 2);
        assert_ne!(result.provider.name(), "csv");
    }
}
