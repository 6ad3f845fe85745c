use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::catalog::{Catalog, Totals};
use crate::query::{HymnInfo, last_opened_text};
use crate::stats::{Aggregate, StatisticsStore};

pub const CSV_HEADER: [&str; 5] = ["#", "Hymn", "Q", "L", "Last Opened"];

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSummary {
    pub archive_path: String,
    pub archive_bytes: u64,
    pub stats_path: String,
    pub capacity: u16,
    pub indexed: usize,
    pub totals: Totals,
    pub missing: usize,
    pub stray_files: usize,
    pub unclassified: usize,
    pub duplicates: usize,
    pub stats_created: String,
    pub checksum: Option<String>,
    pub aggregate: Aggregate,
    pub most_recent: String,
}

pub fn summarize(catalog: &Catalog, stats: &StatisticsStore, archive_path: &Path) -> DatabaseSummary {
    let aggregate = stats.aggregate();
    DatabaseSummary {
        archive_path: archive_path.to_string_lossy().to_string(),
        archive_bytes: std::fs::metadata(archive_path).map(|m| m.len()).unwrap_or(0),
        stats_path: stats.path().to_string_lossy().to_string(),
        capacity: catalog.max_hymns(),
        indexed: catalog.totals().all,
        totals: catalog.totals(),
        missing: catalog.missing().length,
        stray_files: catalog.stray_files().len(),
        unclassified: catalog.unclassified().len(),
        duplicates: catalog.duplicates().len(),
        stats_created: format_timestamp(stats.created_at()),
        checksum: stats.checksum(),
        aggregate,
        most_recent: last_opened_text(aggregate.most_recent_access),
    }
}

/// Writes the statistics table as CSV: `#, Hymn, Q, L, Last Opened`.
pub fn write_csv<W: Write>(rows: &[HymnInfo], mut out: W) -> Result<()> {
    writeln!(out, "{}", CSV_HEADER.join(","))?;
    for row in rows {
        let number = row.number.map(|n| n.to_string()).unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{}",
            number,
            csv_field(&row.title),
            row.queries,
            row.launches,
            csv_field(&format_timestamp(row.last_accessed))
        )?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_csv(rows: &[HymnInfo], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_csv(rows, std::io::BufWriter::new(file))
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn format_timestamp(secs: f64) -> String {
    if secs <= 0.0 {
        return String::new();
    }
    DateTime::from_timestamp(secs as i64, 0)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogOptions, HymnNumber};
    use crate::equivalence::AdjacentNumberRule;
    use crate::query::QueryFacade;

    #[test]
    fn csv_has_header_and_one_row_per_hymn() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let options = CatalogOptions {
            max_hymns: 3,
            ..CatalogOptions::default()
        };
        let catalog = Catalog::from_entry_names(["EN/001 Holy, Holy.pptx", "TL/002 \"Banal\".pptx"], &options);
        let stats = StatisticsStore::open(dir.path().join("data.json"), 3);
        stats.record_access(HymnNumber(1), true, true)?;

        let rows = QueryFacade::new(&catalog, &stats, &AdjacentNumberRule).table();
        let mut buf = Vec::new();
        write_csv(&rows, &mut buf)?;
        let text = String::from_utf8(buf)?;
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "#,Hymn,Q,L,Last Opened");
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("001,\"Holy, Holy\",1,1,"));
        assert_eq!(lines[2], "002,\"\"\"Banal\"\"\",0,0,");
        assert_eq!(lines[3], "003,,0,0,");

        let path = dir.path().join("table.csv");
        export_csv(&rows, &path)?;
        assert_eq!(std::fs::read_to_string(path)?, text);
        Ok(())
    }

    #[test]
    fn summary_reports_catalog_and_usage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let options = CatalogOptions {
            max_hymns: 4,
            ..CatalogOptions::default()
        };
        let catalog = Catalog::from_entry_names(["EN/001 A.pptx", "TL/002 B.pptx", "x.txt"], &options);
        let stats = StatisticsStore::open(dir.path().join("data.json"), 4);
        stats.record_access(HymnNumber(2), true, false)?;

        let summary = summarize(&catalog, &stats, &dir.path().join("absent.sda"));
        assert_eq!(summary.capacity, 4);
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.missing, 2);
        assert_eq!(summary.stray_files, 1);
        assert_eq!(summary.archive_bytes, 0);
        assert_eq!(summary.aggregate.total_queries, 1);
        assert!(summary.most_recent.starts_with("Last opened: "));
        assert!(summary.checksum.is_some());
        Ok(())
    }
}
