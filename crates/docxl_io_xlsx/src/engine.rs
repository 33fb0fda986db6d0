//! Sheet write engines and the committed-data ledger.
//!
//! Both engines drive a regular encoder worksheet. The streaming engine adds a
//! run-time state machine that enforces forward-only, row-ordered writes; the
//! random-access engine also implements [`RandomAccessWriter`], which carries
//! the operations the streaming engine must never offer (outline grouping and
//! coordinate-addressed writes).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rust_xlsxwriter::{Table, Worksheet};

use crate::cell::{SpecResolvedCell, resolve_row, write_resolved_cell};
use crate::error::{Result, XlsxBuildError};
use crate::mapper::{derive_field_path, derive_index_path};
use crate::spec::{EnumCellValue, SpecCellRange, SpecSheet, SpecXlsxBuildReport};
use crate::style::StyleRegistry;
use crate::util::cast_col_num;

////////////////////////////////////////////////////////////////////////////////
// #region Ledger

#[derive(Debug, Clone, Default)]
struct SpecLedgerSheet {
    dict_rows: BTreeMap<u32, Vec<Option<SpecResolvedCell>>>,
    if_committed: bool,
}

/// Record of written cells that later passes read back.
///
/// Only pivot source sheets are kept in full. Other sheets keep the rows
/// registered through [`WorkbookLedger::watch_row`] (table header rows).
#[derive(Debug, Clone, Default)]
pub struct WorkbookLedger {
    set_sources: BTreeSet<String>,
    dict_watched_rows: BTreeMap<String, BTreeSet<u32>>,
    dict_sheets: BTreeMap<String, SpecLedgerSheet>,
}

impl WorkbookLedger {
    pub fn new(sources: impl IntoIterator<Item = String>) -> Self {
        Self {
            set_sources: sources.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Keep `row` of `sheet` even when the sheet is not a pivot source.
    pub fn watch_row(&mut self, sheet: &str, row: u32) {
        self.dict_watched_rows
            .entry(sheet.to_string())
            .or_default()
            .insert(row);
    }

    fn is_tracked(&self, sheet: &str, row: u32) -> bool {
        self.set_sources.contains(sheet)
            || self
                .dict_watched_rows
                .get(sheet)
                .is_some_and(|set_rows| set_rows.contains(&row))
    }

    /// Store a written row if the sheet or row is tracked.
    pub fn record_row(&mut self, sheet: &str, row: u32, cells: &[Option<SpecResolvedCell>]) {
        if !self.is_tracked(sheet, row) {
            return;
        }
        self.dict_sheets
            .entry(sheet.to_string())
            .or_default()
            .dict_rows
            .insert(row, cells.to_vec());
    }

    /// Mark every row of `sheet` as final.
    pub fn commit(&mut self, sheet: &str) {
        self.dict_sheets.entry(sheet.to_string()).or_default().if_committed = true;
    }

    pub fn is_committed(&self, sheet: &str) -> bool {
        self.dict_sheets
            .get(sheet)
            .is_some_and(|ledger_sheet| ledger_sheet.if_committed)
    }

    /// Read one recorded cell, committed or not.
    pub fn read_cell(&self, sheet: &str, row: u32, col: u16) -> Option<&SpecResolvedCell> {
        self.dict_sheets
            .get(sheet)?
            .dict_rows
            .get(&row)?
            .get(col as usize)?
            .as_ref()
    }

    /// Read a committed range of a pivot source sheet as a value grid.
    pub fn read_range(&self, sheet: &str, range: &SpecCellRange) -> Result<Vec<Vec<EnumCellValue>>> {
        let ledger_sheet = self
            .dict_sheets
            .get(sheet)
            .filter(|ledger_sheet| ledger_sheet.if_committed && self.set_sources.contains(sheet))
            .ok_or_else(|| {
                XlsxBuildError::invalid(sheet, "sheet has no committed data to read from")
            })?;

        let l_grid = (range.row_first..=range.row_last)
            .map(|row| {
                let l_cells = ledger_sheet.dict_rows.get(&row);
                (range.col_first..=range.col_last)
                    .map(|col| {
                        l_cells
                            .and_then(|l_cells| l_cells.get(col as usize))
                            .and_then(Option::as_ref)
                            .map(|cell| cell.value.clone())
                            .unwrap_or(EnumCellValue::None)
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let if_empty = l_grid
            .iter()
            .flatten()
            .all(|value| matches!(value, EnumCellValue::None));
        if if_empty {
            return Ok(Vec::new());
        }
        Ok(l_grid)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WriterTraits

/// Operations shared by both engines.
pub trait SheetWriter {
    fn sheet_name(&self) -> &str;
    /// Ledger the writer records into.
    fn ledger(&self) -> &WorkbookLedger;
    fn set_column_width(&mut self, col: u16, width: f64) -> Result<()>;
    fn set_row_height(&mut self, row: u32, height: f64) -> Result<()>;
    fn merge_range(&mut self, range: &SpecCellRange) -> Result<()>;
    fn write_row(&mut self, row: u32, cells: &[Option<SpecResolvedCell>]) -> Result<()>;
    fn attach_table(&mut self, range: &SpecCellRange, table: &Table) -> Result<()>;
    /// Close the row phase and return the number of rows written.
    fn finish(&mut self) -> Result<usize>;
}

/// Coordinate-addressed writes and outline grouping.
pub trait RandomAccessWriter: SheetWriter {
    fn write_cell(&mut self, row: u32, col: u16, cell: &SpecResolvedCell) -> Result<()>;
    /// Raise the outline level of rows `first..=last` by one.
    fn group_rows(&mut self, first: u32, last: u32) -> Result<()>;
    /// Raise the outline level of columns `first..=last` by one.
    fn group_columns(&mut self, first: u16, last: u16) -> Result<()>;
    fn hide_row(&mut self, row: u32) -> Result<()>;
    fn hide_column(&mut self, col: u16) -> Result<()>;
}

fn write_cells(
    worksheet: &mut Worksheet,
    registry: &StyleRegistry,
    row: u32,
    cells: &[Option<SpecResolvedCell>],
) -> Result<()> {
    for (idx, cell) in cells.iter().enumerate() {
        if let Some(cell) = cell {
            write_resolved_cell(worksheet, row, cast_col_num(idx)?, cell, registry)?;
        }
    }
    Ok(())
}

fn merge_with_default(
    worksheet: &mut Worksheet,
    registry: &StyleRegistry,
    range: &SpecCellRange,
) -> Result<()> {
    let format = registry.format(registry.handle_default()?)?;
    worksheet.merge_range(
        range.row_first,
        range.col_first,
        range.row_last,
        range.col_last,
        "",
        format,
    )?;
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StreamingEngine

/// Phase of a streaming sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumStreamState {
    Created,
    WidthsSet,
    MergesApplied,
    /// Rows appended so far; carries the last written row index.
    RowsAppended(u32),
    Flushed,
    TableAttached,
}

impl fmt::Display for EnumStreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumStreamState::Created => write!(f, "creation"),
            EnumStreamState::WidthsSet => write!(f, "column widths"),
            EnumStreamState::MergesApplied => write!(f, "merges"),
            EnumStreamState::RowsAppended(row) => write!(f, "row {}", row + 1),
            EnumStreamState::Flushed => write!(f, "flush"),
            EnumStreamState::TableAttached => write!(f, "table attachment"),
        }
    }
}

/// Forward-only writer: widths, then merges, then rows in order, then tables.
pub struct StreamingSheetWriter<'a> {
    worksheet: &'a mut Worksheet,
    registry: &'a StyleRegistry,
    ledger: &'a mut WorkbookLedger,
    sheet_name: String,
    state: EnumStreamState,
    n_rows_written: usize,
}

impl<'a> StreamingSheetWriter<'a> {
    pub fn new(
        worksheet: &'a mut Worksheet,
        sheet_name: &str,
        registry: &'a StyleRegistry,
        ledger: &'a mut WorkbookLedger,
    ) -> Self {
        Self {
            worksheet,
            registry,
            ledger,
            sheet_name: sheet_name.to_string(),
            state: EnumStreamState::Created,
            n_rows_written: 0,
        }
    }

    pub fn state(&self) -> EnumStreamState {
        self.state
    }

    fn reject(&self, op: &'static str) -> XlsxBuildError {
        XlsxBuildError::EngineOrder {
            sheet: self.sheet_name.clone(),
            op,
            state: self.state.to_string(),
        }
    }

    /// Next row index a height override or row may still target.
    fn derive_next_row(&self) -> Option<u32> {
        match self.state {
            EnumStreamState::Created
            | EnumStreamState::WidthsSet
            | EnumStreamState::MergesApplied => Some(0),
            EnumStreamState::RowsAppended(row) => row.checked_add(1),
            EnumStreamState::Flushed | EnumStreamState::TableAttached => None,
        }
    }
}

impl SheetWriter for StreamingSheetWriter<'_> {
    fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    fn ledger(&self) -> &WorkbookLedger {
        &*self.ledger
    }

    fn set_column_width(&mut self, col: u16, width: f64) -> Result<()> {
        if !matches!(self.state, EnumStreamState::Created | EnumStreamState::WidthsSet) {
            return Err(self.reject("set_column_width"));
        }
        self.worksheet.set_column_width(col, width)?;
        self.state = EnumStreamState::WidthsSet;
        Ok(())
    }

    fn set_row_height(&mut self, row: u32, height: f64) -> Result<()> {
        match self.derive_next_row() {
            Some(n_next) if row >= n_next => {
                self.worksheet.set_row_height(row, height)?;
                Ok(())
            }
            _ => Err(self.reject("set_row_height")),
        }
    }

    fn merge_range(&mut self, range: &SpecCellRange) -> Result<()> {
        if !matches!(
            self.state,
            EnumStreamState::Created | EnumStreamState::WidthsSet | EnumStreamState::MergesApplied
        ) {
            return Err(self.reject("merge_range"));
        }
        self.state = EnumStreamState::MergesApplied;
        merge_with_default(self.worksheet, self.registry, range)
    }

    fn write_row(&mut self, row: u32, cells: &[Option<SpecResolvedCell>]) -> Result<()> {
        let if_in_order = match self.state {
            EnumStreamState::Created
            | EnumStreamState::WidthsSet
            | EnumStreamState::MergesApplied => true,
            EnumStreamState::RowsAppended(row_last) => row > row_last,
            EnumStreamState::Flushed | EnumStreamState::TableAttached => false,
        };
        if !if_in_order {
            return Err(self.reject("write_row"));
        }
        write_cells(self.worksheet, self.registry, row, cells)?;
        self.ledger.record_row(&self.sheet_name, row, cells);
        self.state = EnumStreamState::RowsAppended(row);
        self.n_rows_written += 1;
        Ok(())
    }

    fn attach_table(&mut self, range: &SpecCellRange, table: &Table) -> Result<()> {
        if !matches!(self.state, EnumStreamState::Flushed | EnumStreamState::TableAttached) {
            return Err(self.reject("attach_table"));
        }
        self.worksheet.add_table(
            range.row_first,
            range.col_first,
            range.row_last,
            range.col_last,
            table,
        )?;
        self.state = EnumStreamState::TableAttached;
        Ok(())
    }

    fn finish(&mut self) -> Result<usize> {
        if matches!(self.state, EnumStreamState::Flushed | EnumStreamState::TableAttached) {
            return Err(self.reject("flush"));
        }
        self.state = EnumStreamState::Flushed;
        log::debug!(
            "sheet `{}`: streamed {} rows",
            self.sheet_name,
            self.n_rows_written
        );
        Ok(self.n_rows_written)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RandomAccessEngine

/// Coordinate-addressed writer with outline grouping.
pub struct RandomAccessSheetWriter<'a> {
    worksheet: &'a mut Worksheet,
    registry: &'a StyleRegistry,
    ledger: &'a mut WorkbookLedger,
    sheet_name: String,
    set_rows_written: BTreeSet<u32>,
}

impl<'a> RandomAccessSheetWriter<'a> {
    pub fn new(
        worksheet: &'a mut Worksheet,
        sheet_name: &str,
        registry: &'a StyleRegistry,
        ledger: &'a mut WorkbookLedger,
    ) -> Self {
        Self {
            worksheet,
            registry,
            ledger,
            sheet_name: sheet_name.to_string(),
            set_rows_written: BTreeSet::new(),
        }
    }
}

impl SheetWriter for RandomAccessSheetWriter<'_> {
    fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    fn ledger(&self) -> &WorkbookLedger {
        &*self.ledger
    }

    fn set_column_width(&mut self, col: u16, width: f64) -> Result<()> {
        self.worksheet.set_column_width(col, width)?;
        Ok(())
    }

    fn set_row_height(&mut self, row: u32, height: f64) -> Result<()> {
        self.worksheet.set_row_height(row, height)?;
        Ok(())
    }

    fn merge_range(&mut self, range: &SpecCellRange) -> Result<()> {
        merge_with_default(self.worksheet, self.registry, range)
    }

    fn write_row(&mut self, row: u32, cells: &[Option<SpecResolvedCell>]) -> Result<()> {
        for (idx, cell) in cells.iter().enumerate() {
            if let Some(cell) = cell {
                self.write_cell(row, cast_col_num(idx)?, cell)?;
            }
        }
        self.ledger.record_row(&self.sheet_name, row, cells);
        self.set_rows_written.insert(row);
        Ok(())
    }

    fn attach_table(&mut self, range: &SpecCellRange, table: &Table) -> Result<()> {
        self.worksheet.add_table(
            range.row_first,
            range.col_first,
            range.row_last,
            range.col_last,
            table,
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<usize> {
        log::debug!(
            "sheet `{}`: wrote {} rows",
            self.sheet_name,
            self.set_rows_written.len()
        );
        Ok(self.set_rows_written.len())
    }
}

impl RandomAccessWriter for RandomAccessSheetWriter<'_> {
    fn write_cell(&mut self, row: u32, col: u16, cell: &SpecResolvedCell) -> Result<()> {
        write_resolved_cell(self.worksheet, row, col, cell, self.registry)?;
        self.set_rows_written.insert(row);
        Ok(())
    }

    fn group_rows(&mut self, first: u32, last: u32) -> Result<()> {
        self.worksheet.group_rows(first, last)?;
        Ok(())
    }

    fn group_columns(&mut self, first: u16, last: u16) -> Result<()> {
        self.worksheet.group_columns(first, last)?;
        Ok(())
    }

    fn hide_row(&mut self, row: u32) -> Result<()> {
        self.worksheet.set_row_hidden(row)?;
        Ok(())
    }

    fn hide_column(&mut self, col: u16) -> Result<()> {
        self.worksheet.set_column_hidden(col)?;
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Populate

/// Drive widths, merges, rows and heights through either engine.
///
/// Cell data failures are fatal; width, height and merge failures become
/// report warnings.
pub fn populate_sheet<W: SheetWriter>(
    writer: &mut W,
    sheet: &SpecSheet,
    registry: &StyleRegistry,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) -> Result<()> {
    for (&col, &width) in &sheet.width {
        if let Err(err) = writer.set_column_width(col, width) {
            report.warn(format!("{path}.Width: column {} skipped: {err}", col + 1));
        }
    }
    for (idx, range) in sheet.merge_cells.iter().enumerate() {
        if let Err(err) = writer.merge_range(range) {
            report.warn(format!(
                "{}: merge skipped: {err}",
                derive_index_path(&derive_field_path(path, "MergeCells"), idx)
            ));
        }
    }

    let n_header = sheet.header.len();
    for (idx, row_raw) in sheet.rows().enumerate() {
        let path_row = if idx < n_header {
            derive_index_path(&derive_field_path(path, "Header"), idx)
        } else {
            derive_index_path(&derive_field_path(path, "Data"), idx - n_header)
        };
        let row = crate::util::cast_row_num(idx)?;
        let l_cells = resolve_row(row_raw, registry, sheet.no_style, &path_row)?;
        if let Some(&height) = sheet.height.get(&row) {
            apply_row_height(writer, row, height, path, report);
        }
        writer.write_row(row, &l_cells)?;
    }

    // Heights below the last written row.
    let n_rows = sheet.n_rows() as u64;
    for (&row, &height) in &sheet.height {
        if u64::from(row) >= n_rows {
            apply_row_height(writer, row, height, path, report);
        }
    }
    Ok(())
}

fn apply_row_height<W: SheetWriter>(
    writer: &mut W,
    row: u32,
    height: f64,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) {
    if let Err(err) = writer.set_row_height(row, height) {
        report.warn(format!("{path}.Height: row {} skipped: {err}", row + 1));
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::C_DEFAULT_STYLE;
    use crate::spec::EnumRawCell;
    use rust_xlsxwriter::{Format, Workbook};
    use serde_json::json;

    fn derive_registry() -> StyleRegistry {
        let mut registry = StyleRegistry::new();
        registry.register(C_DEFAULT_STYLE, Format::new()).unwrap();
        registry
    }

    fn derive_row(value: &str) -> Vec<Option<SpecResolvedCell>> {
        vec![Some(SpecResolvedCell {
            value: EnumCellValue::String(value.to_string()),
            style: None,
        })]
    }

    #[test]
    fn test_streaming_rejects_width_after_rows() {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        let registry = derive_registry();
        let mut ledger = WorkbookLedger::default();
        let mut writer = StreamingSheetWriter::new(worksheet, "S", &registry, &mut ledger);

        writer.set_column_width(0, 12.0).unwrap();
        writer.write_row(0, &derive_row("a")).unwrap();
        let err = writer.set_column_width(1, 8.0).unwrap_err();
        assert!(matches!(err, XlsxBuildError::EngineOrder { op: "set_column_width", .. }));
        let err = writer
            .merge_range(&SpecCellRange {
                row_first: 3,
                col_first: 0,
                row_last: 3,
                col_last: 1,
            })
            .unwrap_err();
        assert!(matches!(err, XlsxBuildError::EngineOrder { op: "merge_range", .. }));
    }

    #[test]
    fn test_streaming_rows_must_increase() {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        let registry = derive_registry();
        let mut ledger = WorkbookLedger::default();
        let mut writer = StreamingSheetWriter::new(worksheet, "S", &registry, &mut ledger);

        writer.write_row(0, &derive_row("a")).unwrap();
        writer.write_row(1, &derive_row("b")).unwrap();
        assert!(writer.write_row(1, &derive_row("c")).is_err());
        assert!(writer.set_row_height(0, 20.0).is_err());
        writer.set_row_height(5, 20.0).unwrap();
        assert_eq!(writer.state(), EnumStreamState::RowsAppended(1));
    }

    #[test]
    fn test_streaming_table_only_after_flush() {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        let registry = derive_registry();
        let mut ledger = WorkbookLedger::default();
        let mut writer = StreamingSheetWriter::new(worksheet, "S", &registry, &mut ledger);
        let range = SpecCellRange {
            row_first: 0,
            col_first: 0,
            row_last: 2,
            col_last: 0,
        };

        writer.write_row(0, &derive_row("h")).unwrap();
        writer.write_row(1, &derive_row("x")).unwrap();
        assert!(writer.attach_table(&range, &Table::new()).is_err());
        assert_eq!(writer.finish().unwrap(), 2);
        writer.attach_table(&range, &Table::new()).unwrap();
        assert_eq!(writer.state(), EnumStreamState::TableAttached);
        assert!(writer.write_row(2, &derive_row("late")).is_err());
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_random_access_writes_in_any_order() {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        let registry = derive_registry();
        let mut ledger = WorkbookLedger::default();
        let mut writer = RandomAccessSheetWriter::new(worksheet, "S", &registry, &mut ledger);

        writer.write_row(4, &derive_row("late")).unwrap();
        writer.write_row(0, &derive_row("early")).unwrap();
        writer.set_column_width(0, 10.0).unwrap();
        writer.group_rows(1, 3).unwrap();
        writer.hide_row(2).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);
    }

    #[test]
    fn test_ledger_tracks_sources_and_watched_rows() {
        let mut ledger = WorkbookLedger::new(["Src".to_string()]);
        ledger.watch_row("Other", 0);
        ledger.record_row("Src", 0, &derive_row("a"));
        ledger.record_row("Other", 0, &derive_row("h"));
        ledger.record_row("Other", 1, &derive_row("skip"));

        let range = SpecCellRange {
            row_first: 0,
            col_first: 0,
            row_last: 0,
            col_last: 0,
        };
        assert!(ledger.read_range("Src", &range).is_err());
        ledger.commit("Src");
        assert_eq!(
            ledger.read_range("Src", &range).unwrap(),
            vec![vec![EnumCellValue::String("a".to_string())]]
        );
        assert!(ledger.read_cell("Other", 0, 0).is_some());
        assert!(ledger.read_cell("Other", 1, 0).is_none());

        ledger.commit("Other");
        assert!(ledger.read_range("Other", &range).is_err());
    }

    #[test]
    fn test_populate_writes_header_then_data() {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        let registry = derive_registry();
        let mut ledger = WorkbookLedger::new(["S".to_string()]);
        let mut report = SpecXlsxBuildReport::default();

        let mut sheet = SpecSheet::new("S");
        sheet.header = vec![vec![EnumRawCell::Bare(json!("A"))]];
        sheet.data = vec![vec![EnumRawCell::Bare(json!(1))], vec![EnumRawCell::Empty]];
        sheet.height.insert(1, 30.0);
        sheet.height.insert(9, 15.0);

        let mut writer = StreamingSheetWriter::new(worksheet, "S", &registry, &mut ledger);
        populate_sheet(&mut writer, &sheet, &registry, "content.S", &mut report).unwrap();
        assert_eq!(writer.finish().unwrap(), 3);
        assert!(report.warnings.is_empty());

        ledger.commit("S");
        let grid = ledger
            .read_range(
                "S",
                &SpecCellRange {
                    row_first: 0,
                    col_first: 0,
                    row_last: 2,
                    col_last: 0,
                },
            )
            .unwrap();
        assert_eq!(grid[0][0], EnumCellValue::String("A".to_string()));
        assert_eq!(grid[1][0], EnumCellValue::Number(1.0));
        assert_eq!(grid[2][0], EnumCellValue::String(String::new()));
    }
}
