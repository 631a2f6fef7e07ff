//! CSV export of ranked rows, spreadsheet-friendly (UTF-8 BOM first).

use crate::models::RankedRow;
use crate::table::{Cell, Column, cell};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Raw field text: numbers without grouping, missing values empty.
fn field(c: Cell) -> String {
    match c {
        Cell::Int(n) => n.to_string(),
        Cell::Num(x) => x.to_string(),
        Cell::Text(s) => s,
        Cell::Empty => String::new(),
    }
}

/// Write header + one line per row for the given columns.
///
/// Fields containing a comma, quote or line break are quoted, with inner
/// quotes doubled. Lines end in `\n`.
pub fn write_csv<W: Write>(mut out: W, rows: &[RankedRow], columns: &[Column]) -> Result<()> {
    out.write_all(BOM)?;

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);

    writer.write_record(columns.iter().map(|c| c.header()))?;
    for row in rows {
        writer.write_record(columns.iter().map(|c| field(cell(row, *c))))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `rows` to `path`. Returns the number of rows written; an empty set
/// leaves the file system untouched.
pub fn export_to_path(path: &Path, rows: &[RankedRow], columns: &[Column]) -> Result<usize> {
    if rows.is_empty() {
        info!("Nothing to export, skipping {:?}", path);
        return Ok(0);
    }

    let file = File::create(path).with_context(|| format!("Cannot create {:?}", path))?;
    write_csv(BufWriter::new(file), rows, columns)
        .with_context(|| format!("Failed writing {:?}", path))?;

    debug!("{} rows × {} columns → {:?}", rows.len(), columns.len(), path);
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::row;

    fn export(rows: &[RankedRow], columns: &[Column]) -> String {
        let mut buf = Vec::new();
        write_csv(&mut buf, rows, columns).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_bom_header_and_rows() {
        let mut a = row("005930", 1);
        a.company_name = "삼성전자, 우".into();
        let mut b = row("000660", 2);
        b.company_name = "SK \"하이닉스\"".into();
        b.current_price = None;

        let text = export(&[a, b], &[Column::Rank, Column::Company, Column::Price]);
        assert!(text.starts_with('\u{FEFF}'));

        let lines: Vec<&str> = text.trim_start_matches('\u{FEFF}').lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "순위,기업,현재가");
        assert_eq!(lines[1], "1,\"삼성전자, 우\",10001");
        assert_eq!(lines[2], "2,\"SK \"\"하이닉스\"\"\",");
    }

    #[test]
    fn test_lines_end_with_newline_only() {
        let text = export(&[row("005930", 1)], &[Column::Rank]);
        assert!(!text.contains('\r'));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_empty_rows_skip_file() {
        let path = std::env::temp_dir().join("live_chart_export_empty_test.csv");
        let _ = std::fs::remove_file(&path);
        assert_eq!(export_to_path(&path, &[], &Column::ALL).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_export_to_path_writes_file() {
        let path = std::env::temp_dir().join("live_chart_export_test.csv");
        let n = export_to_path(&path, &[row("005930", 1), row("000660", 2)], &Column::ALL).unwrap();
        assert_eq!(n, 2);

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(BOM));
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 3);
        let _ = std::fs::remove_file(&path);
    }
}
