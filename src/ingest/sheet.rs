//! CSV and Excel loader.
//!
//! Tabular uploads become [`SheetGrid`]s for SQL registration, then
//! [`sheet_documents`] derives the schema, statistics, and per-row documents
//! that make the same data reachable through semantic search.

use std::io::Cursor;

use calamine::{Data, Reader};

use super::sanitize::file_stem_for_table;
use super::{Document, IngestError, Locator, NamedSheet};
use crate::store::tabular::{RegisteredTable, SheetGrid};

/// Parse a CSV upload into a single named sheet.
///
/// The first record is the header row. Ragged records are tolerated; fully
/// empty trailing records are dropped. A file with no records at all is
/// malformed, while a header-only file yields an empty grid that still
/// registers as a queryable table.
pub(crate) fn parse_csv(source: &str, bytes: &[u8]) -> Result<Vec<NamedSheet>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|error| IngestError::Malformed(format!("could not parse CSV: {error}")))?;
        records.push(record.iter().map(|cell| cell.to_string()).collect());
    }

    while records
        .last()
        .is_some_and(|row| row.iter().all(|cell| cell.trim().is_empty()))
    {
        records.pop();
    }

    if records.is_empty() {
        return Err(IngestError::Malformed("no rows found in CSV".to_string()));
    }

    let headers = records.remove(0);
    Ok(vec![NamedSheet {
        table_seed: file_stem_for_table(source),
        grid: SheetGrid {
            headers,
            rows: records,
        },
    }])
}

/// Parse an XLS/XLSX upload into one named sheet per non-empty worksheet.
///
/// A single-sheet workbook takes the file stem as its table seed; additional
/// sheets append the sheet name.
pub(crate) fn parse_workbook(source: &str, bytes: &[u8]) -> Result<Vec<NamedSheet>, IngestError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|error| IngestError::Malformed(format!("could not open workbook: {error}")))?;

    let stem = file_stem_for_table(source);
    let sheet_names = workbook.sheet_names().to_owned();
    let multi_sheet = sheet_names.len() > 1;

    let mut sheets = Vec::new();
    for sheet_name in sheet_names {
        let range = workbook.worksheet_range(&sheet_name).map_err(|error| {
            IngestError::Malformed(format!("could not read sheet '{sheet_name}': {error}"))
        })?;

        let mut rows = range.rows();
        let Some(header_row) = rows.next() else {
            continue;
        };
        let headers: Vec<String> = header_row.iter().map(cell_text).collect();
        let data_rows: Vec<Vec<String>> = rows
            .map(|row| row.iter().map(cell_text).collect::<Vec<String>>())
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .collect();

        if data_rows.is_empty() && headers.iter().all(|h| h.trim().is_empty()) {
            continue;
        }

        let table_seed = if multi_sheet {
            format!("{stem}_{sheet_name}")
        } else {
            stem.clone()
        };
        sheets.push(NamedSheet {
            table_seed,
            grid: SheetGrid {
                headers,
                rows: data_rows,
            },
        });
    }

    Ok(sheets)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        other => other.to_string(),
    }
}

/// Build the semantic-search documents for a registered sheet: one schema
/// document, one statistics document when numeric columns exist, and one
/// document per row up to `row_limit`.
pub(crate) fn sheet_documents(
    source: &str,
    table: &RegisteredTable,
    grid: &SheetGrid,
    row_limit: usize,
) -> Vec<Document> {
    let mut documents = Vec::new();

    let column_list = table
        .columns
        .iter()
        .map(|column| format!("{} ({})", column.name, column.data_type))
        .collect::<Vec<_>>()
        .join(", ");
    documents.push(Document::for_table(
        source,
        Locator::Whole,
        format!(
            "Table: {}\nColumns: {}\nRows: {}",
            table.name, column_list, table.row_count
        ),
        &table.name,
    ));

    if let Some(stats) = statistics_text(table, grid) {
        documents.push(Document::for_table(
            source,
            Locator::Whole,
            stats,
            &table.name,
        ));
    }

    for (index, row) in grid.rows.iter().take(row_limit).enumerate() {
        let cells = table
            .columns
            .iter()
            .enumerate()
            .map(|(column_index, column)| {
                let value = row
                    .get(column_index)
                    .map(|cell| cell.trim())
                    .filter(|cell| !cell.is_empty())
                    .unwrap_or("None");
                format!("{}: {}", column.name, value)
            })
            .collect::<Vec<_>>()
            .join(", ");

        documents.push(Document::for_table(
            source,
            Locator::Row(index as u64 + 1),
            format!("Row {} of {}: {}", index + 1, source, cells),
            &table.name,
        ));
    }

    if grid.rows.len() > row_limit {
        tracing::warn!(
            source,
            row_limit,
            skipped = grid.rows.len() - row_limit,
            "Row document limit reached; remaining rows stay queryable via SQL only"
        );
    }

    documents
}

/// Per-column count/min/max/mean over the numeric columns, or `None` when the
/// sheet has no numeric columns.
fn statistics_text(table: &RegisteredTable, grid: &SheetGrid) -> Option<String> {
    let mut lines = Vec::new();

    for (column_index, column) in table.columns.iter().enumerate() {
        if column.data_type != "REAL" {
            continue;
        }

        let values: Vec<f64> = grid
            .rows
            .iter()
            .filter_map(|row| row.get(column_index))
            .filter_map(|cell| cell.trim().parse::<f64>().ok())
            .collect();
        if values.is_empty() {
            continue;
        }

        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        lines.push(format!(
            "{}: count={}, min={}, max={}, mean={:.2}",
            column.name,
            values.len(),
            min,
            max,
            mean
        ));
    }

    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "Statistical summary for {}:\n{}",
        table.name,
        lines.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use rust_xlsxwriter::Workbook;

    use super::*;
    use crate::service::types::ColumnInfo;

    #[test]
    fn csv_parses_headers_and_rows() {
        let body = b"region,amount\nnorth,120\nsouth,80\n";
        let sheets = parse_csv("Sales Q3.csv", body).unwrap();

        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].table_seed, "sales_q3");
        assert_eq!(sheets[0].grid.headers, vec!["region", "amount"]);
        assert_eq!(sheets[0].grid.rows.len(), 2);
        assert_eq!(sheets[0].grid.rows[1], vec!["south", "80"]);
    }

    #[test]
    fn csv_drops_trailing_blank_records() {
        let body = b"a,b\n1,2\n,\n,\n";
        let sheets = parse_csv("pad.csv", body).unwrap();
        assert_eq!(sheets[0].grid.rows, vec![vec!["1", "2"]]);
    }

    #[test]
    fn csv_header_only_yields_empty_grid() {
        let sheets = parse_csv("schema.csv", b"name,score\n").unwrap();
        assert!(sheets[0].grid.rows.is_empty());
        assert_eq!(sheets[0].grid.headers, vec!["name", "score"]);
    }

    #[test]
    fn csv_without_records_is_malformed() {
        let error = parse_csv("empty.csv", b"").unwrap_err();
        assert!(error.to_string().contains("no rows found"));
    }

    #[test]
    fn workbook_round_trips_through_calamine() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write(0, 0, "item").unwrap();
        sheet.write(0, 1, "qty").unwrap();
        sheet.write(1, 0, "bolts").unwrap();
        sheet.write(1, 1, 40).unwrap();
        sheet.write(2, 0, "nuts").unwrap();
        sheet.write(2, 1, 8.5).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let sheets = parse_workbook("inventory.xlsx", &bytes).unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].table_seed, "inventory");
        assert_eq!(sheets[0].grid.headers, vec!["item", "qty"]);
        assert_eq!(
            sheets[0].grid.rows,
            vec![vec!["bolts", "40"], vec!["nuts", "8.5"]]
        );
    }

    #[test]
    fn multi_sheet_workbooks_suffix_the_sheet_name() {
        let mut workbook = Workbook::new();
        let first = workbook.add_worksheet();
        first.set_name("Orders").unwrap();
        first.write(0, 0, "id").unwrap();
        first.write(1, 0, 1).unwrap();
        let second = workbook.add_worksheet();
        second.set_name("Returns").unwrap();
        second.write(0, 0, "id").unwrap();
        second.write(1, 0, 2).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let sheets = parse_workbook("ledger 2024.xlsx", &bytes).unwrap();
        let seeds: Vec<_> = sheets.iter().map(|s| s.table_seed.as_str()).collect();
        assert_eq!(seeds, vec!["ledger_2024_Orders", "ledger_2024_Returns"]);
    }

    fn sample_table() -> RegisteredTable {
        RegisteredTable {
            name: "sales".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "region".to_string(),
                    data_type: "TEXT".to_string(),
                },
                ColumnInfo {
                    name: "amount".to_string(),
                    data_type: "REAL".to_string(),
                },
            ],
            row_count: 3,
        }
    }

    fn sample_grid() -> SheetGrid {
        SheetGrid {
            headers: vec!["region".to_string(), "amount".to_string()],
            rows: vec![
                vec!["north".to_string(), "120".to_string()],
                vec!["south".to_string(), "80.5".to_string()],
                vec!["east".to_string(), String::new()],
            ],
        }
    }

    #[test]
    fn emits_schema_statistics_and_rows() {
        let documents = sheet_documents("sales.csv", &sample_table(), &sample_grid(), 500);

        assert_eq!(documents.len(), 5);
        assert_eq!(
            documents[0].content,
            "Table: sales\nColumns: region (TEXT), amount (REAL)\nRows: 3"
        );
        assert_eq!(
            documents[1].content,
            "Statistical summary for sales:\namount: count=2, min=80.5, max=120, mean=100.25"
        );
        assert_eq!(
            documents[2].content,
            "Row 1 of sales.csv: region: north, amount: 120"
        );
        assert_eq!(documents[2].locator, Locator::Row(1));
        assert_eq!(documents[2].table.as_deref(), Some("sales"));
        assert_eq!(
            documents[4].content,
            "Row 3 of sales.csv: region: east, amount: None"
        );
    }

    #[test]
    fn row_documents_respect_the_cap() {
        let documents = sheet_documents("sales.csv", &sample_table(), &sample_grid(), 2);
        let row_count = documents
            .iter()
            .filter(|d| matches!(d.locator, Locator::Row(_)))
            .count();
        assert_eq!(row_count, 2);
    }

    #[test]
    fn text_only_sheets_have_no_statistics_document() {
        let table = RegisteredTable {
            name: "notes".to_string(),
            columns: vec![ColumnInfo {
                name: "note".to_string(),
                data_type: "TEXT".to_string(),
            }],
            row_count: 1,
        };
        let grid = SheetGrid {
            headers: vec!["note".to_string()],
            rows: vec![vec!["hello".to_string()]],
        };

        let documents = sheet_documents("notes.csv", &table, &grid, 500);
        assert_eq!(documents.len(), 2);
        assert!(documents[1].content.starts_with("Row 1 of notes.csv"));
    }
}
