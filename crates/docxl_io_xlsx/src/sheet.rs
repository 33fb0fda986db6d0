//! Sheet specs and the sheet-level features applied around the write engines:
//! panes, validation, notes, auto-filters, tables and outline groups.

use std::collections::{BTreeMap, BTreeSet};

use rust_xlsxwriter::{
    DataValidation, DataValidationErrorStyle, DataValidationRule, Format, Formula, Note, Table,
    TableColumn, TableStyle, Worksheet,
};
use serde_json::{Map, Value};

use crate::cell::{derive_cell_text, parse_raw_row};
use crate::conf::N_OUTLINE_LEVEL_MAX;
use crate::engine::{RandomAccessWriter, WorkbookLedger};
use crate::error::{Result, XlsxBuildError};
use crate::mapper::{
    EnumFieldSetter, SpecField, cast_f64, cast_map, cast_str, derive_field_path,
    derive_index_path, get_bool_value, get_list_value, get_map_value, get_str_value, map_fields,
};
use crate::package::SpecSplitPane;
use crate::spec::{
    EnumWriteEngine, SpecCellRange, SpecComment, SpecDataValidation, SpecOutlineCols,
    SpecOutlineRows, SpecPaneSelection, SpecPanes, SpecRichTextRun, SpecSheet,
    SpecXlsxBuildReport, SpecTable,
};
use crate::style::build_font;
use crate::util::{
    cast_col_num, cast_row_num, parse_cell_range, parse_cell_ref, parse_column_letters,
    validate_sheet_name,
};

////////////////////////////////////////////////////////////////////////////////
// #region Builders

pub fn build_pane_selections(l_values: &[Value], path: &str) -> Result<Vec<SpecPaneSelection>> {
    let l_fields = vec![
        SpecField::new(
            "sq_ref",
            EnumFieldSetter::Str(|s: &mut SpecPaneSelection, v: String| s.sq_ref = v),
        ),
        SpecField::new(
            "active_cell",
            EnumFieldSetter::Str(|s: &mut SpecPaneSelection, v: String| s.active_cell = v),
        ),
        SpecField::new(
            "pane",
            EnumFieldSetter::Str(|s: &mut SpecPaneSelection, v: String| s.pane = v),
        ),
    ];
    let mut l_selections = Vec::with_capacity(l_values.len());
    for (idx, value) in l_values.iter().enumerate() {
        let path_item = derive_index_path(path, idx);
        let mut selection = SpecPaneSelection::default();
        map_fields(&mut selection, cast_map(value, &path_item)?, &l_fields, &path_item)?;
        l_selections.push(selection);
    }
    Ok(l_selections)
}

/// Comment paragraphs `[{text, Bold, Family, ...}]`: the font keys sit next to the text.
pub fn build_comment_paragraphs(l_values: &[Value], path: &str) -> Result<Vec<SpecRichTextRun>> {
    let mut l_runs = Vec::with_capacity(l_values.len());
    for (idx, value) in l_values.iter().enumerate() {
        let path_item = derive_index_path(path, idx);
        let map = cast_map(value, &path_item)?;
        let text = get_str_value(map, "text", &path_item)?;
        let if_font = map.keys().any(|key| key != "text");
        l_runs.push(SpecRichTextRun {
            text,
            font: if if_font {
                Some(build_font(map, &path_item)?)
            } else {
                None
            },
        });
    }
    Ok(l_runs)
}

/// `Panes`; an empty map means no pane configuration.
pub fn build_panes(map: &Map<String, Value>, path: &str) -> Result<Option<SpecPanes>> {
    if map.is_empty() {
        return Ok(None);
    }
    let l_fields = vec![
        SpecField::new("freeze", EnumFieldSetter::Bool(|p: &mut SpecPanes, v: bool| p.freeze = v)),
        SpecField::new("split", EnumFieldSetter::Bool(|p: &mut SpecPanes, v: bool| p.split = v)),
        SpecField::new("x_split", EnumFieldSetter::Int(|p: &mut SpecPanes, v: i64| p.x_split = v)),
        SpecField::new("y_split", EnumFieldSetter::Int(|p: &mut SpecPanes, v: i64| p.y_split = v)),
        SpecField::new(
            "top_left_cell",
            EnumFieldSetter::Str(|p: &mut SpecPanes, v: String| p.top_left_cell = v),
        ),
        SpecField::new(
            "active_pane",
            EnumFieldSetter::Str(|p: &mut SpecPanes, v: String| p.active_pane = v),
        ),
        SpecField::new(
            "selection",
            EnumFieldSetter::Selection(|p: &mut SpecPanes, v: Vec<SpecPaneSelection>| {
                p.selection = v
            }),
        ),
    ];
    let mut panes = SpecPanes::default();
    map_fields(&mut panes, map, &l_fields, path)?;
    if panes.x_split < 0 || panes.y_split < 0 {
        return Err(XlsxBuildError::invalid(path, "pane splits must not be negative"));
    }
    Ok(Some(panes))
}

/// One `DataValidation` rule. `set_range: [a, b]` is accepted as a shorthand.
pub fn build_data_validation(map: &Map<String, Value>, path: &str) -> Result<SpecDataValidation> {
    let l_fields = vec![
        SpecField::new(
            "sq_ref",
            EnumFieldSetter::Str(|d: &mut SpecDataValidation, v: String| d.sq_ref = v),
        ),
        SpecField::new(
            "set_range_start",
            EnumFieldSetter::OptFloat(|d: &mut SpecDataValidation, v: Option<f64>| {
                d.set_range_start = v
            }),
        ),
        SpecField::new(
            "set_range_stop",
            EnumFieldSetter::OptFloat(|d: &mut SpecDataValidation, v: Option<f64>| {
                d.set_range_stop = v
            }),
        ),
        SpecField::new(
            "input_title",
            EnumFieldSetter::Str(|d: &mut SpecDataValidation, v: String| d.input_title = v),
        ),
        SpecField::new(
            "input_body",
            EnumFieldSetter::Str(|d: &mut SpecDataValidation, v: String| d.input_body = v),
        ),
        SpecField::new(
            "error_title",
            EnumFieldSetter::Str(|d: &mut SpecDataValidation, v: String| d.error_title = v),
        ),
        SpecField::new(
            "error_body",
            EnumFieldSetter::Str(|d: &mut SpecDataValidation, v: String| d.error_body = v),
        ),
        SpecField::new(
            "drop_list",
            EnumFieldSetter::StrList(|d: &mut SpecDataValidation, v: Vec<String>| d.drop_list = v),
        ),
        SpecField::new(
            "sqref_drop_list",
            EnumFieldSetter::Str(|d: &mut SpecDataValidation, v: String| d.sqref_drop_list = v),
        ),
    ];
    let mut rule = SpecDataValidation::default();
    map_fields(&mut rule, map, &l_fields, path)?;

    let l_bounds = get_list_value(map, "set_range", path)?;
    if !l_bounds.is_empty() {
        let path_bounds = derive_field_path(path, "set_range");
        let [start, stop] = l_bounds else {
            return Err(XlsxBuildError::invalid(
                path_bounds,
                format!("expected [start, stop], found {} items", l_bounds.len()),
            ));
        };
        rule.set_range_start = Some(cast_f64(start, &derive_index_path(&path_bounds, 0))?);
        rule.set_range_stop = Some(cast_f64(stop, &derive_index_path(&path_bounds, 1))?);
    }
    if rule.sq_ref.is_empty() {
        return Err(XlsxBuildError::MissingKey(derive_field_path(path, "sq_ref")));
    }
    Ok(rule)
}

pub fn build_comment(map: &Map<String, Value>, path: &str) -> Result<SpecComment> {
    let l_fields = vec![
        SpecField::new("cell", EnumFieldSetter::Str(|c: &mut SpecComment, v: String| c.cell = v)),
        SpecField::new(
            "author",
            EnumFieldSetter::Str(|c: &mut SpecComment, v: String| c.author = v),
        ),
        SpecField::new(
            "paragraph",
            EnumFieldSetter::Paragraphs(|c: &mut SpecComment, v: Vec<SpecRichTextRun>| {
                c.paragraph = v
            }),
        ),
    ];
    let mut comment = SpecComment::default();
    map_fields(&mut comment, map, &l_fields, path)?;
    if comment.cell.is_empty() {
        return Err(XlsxBuildError::MissingKey(derive_field_path(path, "cell")));
    }
    Ok(comment)
}

pub fn build_table(map: &Map<String, Value>, path: &str) -> Result<SpecTable> {
    let l_fields = vec![
        SpecField::new("range", EnumFieldSetter::Str(|t: &mut SpecTable, v: String| t.range = v)),
        SpecField::new("name", EnumFieldSetter::Str(|t: &mut SpecTable, v: String| t.name = v)),
        SpecField::new(
            "style_name",
            EnumFieldSetter::Str(|t: &mut SpecTable, v: String| t.style_name = v),
        ),
        SpecField::new(
            "show_first_column",
            EnumFieldSetter::Bool(|t: &mut SpecTable, v: bool| t.show_first_column = v),
        ),
        SpecField::new(
            "show_last_column",
            EnumFieldSetter::Bool(|t: &mut SpecTable, v: bool| t.show_last_column = v),
        ),
        SpecField::new(
            "show_row_stripes",
            EnumFieldSetter::Bool(|t: &mut SpecTable, v: bool| t.show_row_stripes = v),
        ),
        SpecField::new(
            "show_column_stripes",
            EnumFieldSetter::Bool(|t: &mut SpecTable, v: bool| t.show_column_stripes = v),
        ),
    ];
    let mut table = SpecTable {
        show_row_stripes: true,
        ..SpecTable::default()
    };
    map_fields(&mut table, map, &l_fields, path)?;
    if table.range.is_empty() {
        return Err(XlsxBuildError::MissingKey(derive_field_path(path, "range")));
    }
    Ok(table)
}

fn validate_outline_level(level: u64, path: &str) -> Result<()> {
    if level > u64::from(N_OUTLINE_LEVEL_MAX) {
        return Err(XlsxBuildError::invalid(
            derive_field_path(path, "outline_level"),
            format!("outline level {level} exceeds {N_OUTLINE_LEVEL_MAX}"),
        ));
    }
    Ok(())
}

pub fn build_outline_rows(map: &Map<String, Value>, path: &str) -> Result<SpecOutlineRows> {
    let l_fields = vec![
        SpecField::new(
            "start_row",
            EnumFieldSetter::UInt(|g: &mut SpecOutlineRows, v: u64| g.start_row = v),
        ),
        SpecField::new(
            "end_row",
            EnumFieldSetter::OptUInt(|g: &mut SpecOutlineRows, v: Option<u64>| g.end_row = v),
        ),
        SpecField::new(
            "outline_level",
            EnumFieldSetter::UInt(|g: &mut SpecOutlineRows, v: u64| g.outline_level = v),
        ),
        SpecField::new("hidden", EnumFieldSetter::Bool(|g: &mut SpecOutlineRows, v: bool| g.hidden = v)),
    ];
    let mut group = SpecOutlineRows::default();
    map_fields(&mut group, map, &l_fields, path)?;
    if group.start_row == 0 {
        return Err(XlsxBuildError::invalid(
            derive_field_path(path, "start_row"),
            "rows are 1-based",
        ));
    }
    if group.end_row.is_some_and(|end_row| end_row < group.start_row) {
        return Err(XlsxBuildError::invalid(
            derive_field_path(path, "end_row"),
            "end_row precedes start_row",
        ));
    }
    validate_outline_level(group.outline_level, path)?;
    Ok(group)
}

pub fn build_outline_cols(map: &Map<String, Value>, path: &str) -> Result<SpecOutlineCols> {
    let l_fields = vec![
        SpecField::new(
            "start_col",
            EnumFieldSetter::Str(|g: &mut SpecOutlineCols, v: String| g.start_col = v),
        ),
        SpecField::new(
            "end_col",
            EnumFieldSetter::Str(|g: &mut SpecOutlineCols, v: String| g.end_col = v),
        ),
        SpecField::new(
            "outline_level",
            EnumFieldSetter::UInt(|g: &mut SpecOutlineCols, v: u64| g.outline_level = v),
        ),
        SpecField::new("hidden", EnumFieldSetter::Bool(|g: &mut SpecOutlineCols, v: bool| g.hidden = v)),
    ];
    let mut group = SpecOutlineCols::default();
    map_fields(&mut group, map, &l_fields, path)?;
    if group.end_col.is_empty() {
        group.end_col = group.start_col.clone();
    }
    for (key, letters) in [("start_col", &group.start_col), ("end_col", &group.end_col)] {
        if parse_column_letters(letters).is_none() {
            return Err(XlsxBuildError::invalid(
                derive_field_path(path, key),
                format!("invalid column `{letters}`"),
            ));
        }
    }
    validate_outline_level(group.outline_level, path)?;
    Ok(group)
}

/// Parse `{"1": 12.5}` style maps keyed by 1-based indices.
fn parse_index_map(map: &Map<String, Value>, path: &str) -> Result<Vec<(usize, f64)>> {
    let mut l_entries = Vec::with_capacity(map.len());
    for (key, value) in map {
        let path_key = derive_field_path(path, key);
        let n_index = key
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|val| *val > 0)
            .ok_or_else(|| XlsxBuildError::invalid(&path_key, format!("invalid index `{key}`")))?;
        l_entries.push((n_index - 1, cast_f64(value, &path_key)?));
    }
    Ok(l_entries)
}

fn parse_range_text(value: &Value, path: &str) -> Result<SpecCellRange> {
    let text = match value {
        Value::Array(l_cells) => {
            let [first, last] = l_cells.as_slice() else {
                return Err(XlsxBuildError::invalid(
                    path,
                    format!("expected [top_left, bottom_right], found {} items", l_cells.len()),
                ));
            };
            format!(
                "{}:{}",
                cast_str(first, &derive_index_path(path, 0))?,
                cast_str(last, &derive_index_path(path, 1))?
            )
        }
        Value::String(val) => val.clone(),
        _ => return Err(XlsxBuildError::schema(path, "range", value)),
    };
    parse_cell_range(&text)
        .ok_or_else(|| XlsxBuildError::invalid(path, format!("invalid range `{text}`")))
}

/// Ranges under `key`. Malformed range text skips the entry; a wrong shape
/// is still a schema error.
fn parse_range_list(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
    l_skipped: &mut Vec<String>,
) -> Result<Vec<SpecCellRange>> {
    let path_key = derive_field_path(path, key);
    let mut l_ranges = vec![];
    for (idx, value) in get_list_value(map, key, path)?.iter().enumerate() {
        match parse_range_text(value, &derive_index_path(&path_key, idx)) {
            Ok(range) => l_ranges.push(range),
            Err(err @ XlsxBuildError::InvalidValue { .. }) => {
                l_skipped.push(format!("{err}; entry skipped"));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(l_ranges)
}

fn parse_map_list<T>(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
    build: impl Fn(&Map<String, Value>, &str) -> Result<T>,
) -> Result<Vec<T>> {
    let path_key = derive_field_path(path, key);
    get_list_value(map, key, path)?
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            let path_item = derive_index_path(&path_key, idx);
            build(cast_map(value, &path_item)?, &path_item)
        })
        .collect()
}

fn parse_rows(map: &Map<String, Value>, key: &str, path: &str) -> Result<Vec<Vec<crate::spec::EnumRawCell>>> {
    let path_key = derive_field_path(path, key);
    get_list_value(map, key, path)?
        .iter()
        .enumerate()
        .map(|(idx, value)| parse_raw_row(value, &derive_index_path(&path_key, idx)))
        .collect()
}

/// Parse one `content` entry into a sheet spec.
pub fn parse_sheet(name: &str, value: &Value, path: &str) -> Result<SpecSheet> {
    validate_sheet_name(name)?;
    let map = cast_map(value, path)?;
    let mut sheet = SpecSheet::new(name);

    sheet.header = parse_rows(map, "Header", path)?;
    sheet.data = parse_rows(map, "Data", path)?;

    if let Some(map_width) = get_map_value(map, "Width", path)? {
        for (idx, width) in parse_index_map(map_width, &derive_field_path(path, "Width"))? {
            sheet.width.insert(cast_col_num(idx)?, width);
        }
    }
    if let Some(map_height) = get_map_value(map, "Height", path)? {
        for (idx, height) in parse_index_map(map_height, &derive_field_path(path, "Height"))? {
            sheet.height.insert(cast_row_num(idx)?, height);
        }
    }

    sheet.merge_cells = parse_range_list(map, "MergeCells", path, &mut sheet.skipped)?;
    sheet.auto_filter = parse_range_list(map, "AutoFilter", path, &mut sheet.skipped)?;

    if let Some(map_panes) = get_map_value(map, "Panes", path)? {
        sheet.panes = build_panes(map_panes, &derive_field_path(path, "Panes"))?;
    }
    sheet.data_validation = parse_map_list(map, "DataValidation", path, build_data_validation)?;
    sheet.comment = parse_map_list(map, "Comment", path, build_comment)?;
    sheet.table = parse_map_list(map, "Table", path, build_table)?;
    sheet.chart = parse_map_list(map, "Chart", path, crate::chart::build_chart_placement)?;
    sheet.pivot_table = parse_map_list(map, "PivotTable", path, crate::pivot::build_pivot_table)?;
    sheet.grouped_row = parse_map_list(map, "GroupedRow", path, build_outline_rows)?;
    sheet.grouped_col = parse_map_list(map, "GroupedCol", path, build_outline_cols)?;

    sheet.no_style = get_bool_value(map, "NoStyle", false, path)?;
    sheet.visible = get_bool_value(map, "SheetVisible", true, path)?;

    let engine = get_str_value(map, "WriterEngine", path)?;
    if !engine.is_empty() {
        sheet.engine = Some(EnumWriteEngine::parse(&engine).ok_or_else(|| {
            XlsxBuildError::invalid(
                derive_field_path(path, "WriterEngine"),
                format!("unknown writer engine `{engine}`"),
            )
        })?);
    }
    Ok(sheet)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WorksheetFeatures

fn derive_whole_bound(value: f64) -> Option<i32> {
    (value.fract() == 0.0 && value >= f64::from(i32::MIN) && value <= f64::from(i32::MAX))
        .then_some(value as i32)
}

/// Translate one validation rule into an encoder validation.
pub fn derive_data_validation(rule: &SpecDataValidation) -> Result<DataValidation> {
    let mut validation = DataValidation::new();
    if let (Some(start), Some(stop)) = (rule.set_range_start, rule.set_range_stop) {
        validation = match (derive_whole_bound(start), derive_whole_bound(stop)) {
            (Some(n_start), Some(n_stop)) => {
                validation.allow_whole_number(DataValidationRule::Between(n_start, n_stop))
            }
            _ => validation.allow_decimal_number(DataValidationRule::Between(start, stop)),
        };
    }
    if !rule.drop_list.is_empty() {
        validation = validation.allow_list_strings(&rule.drop_list)?;
    }
    if !rule.sqref_drop_list.is_empty() {
        validation = validation.allow_list_formula(Formula::new(rule.sqref_drop_list.as_str()));
    }
    if !rule.input_title.is_empty() {
        validation = validation.set_input_title(rule.input_title.as_str())?;
    }
    if !rule.input_body.is_empty() {
        validation = validation.set_input_message(rule.input_body.as_str())?;
    }
    if !rule.error_title.is_empty() || !rule.error_body.is_empty() {
        validation = validation.set_error_style(DataValidationErrorStyle::Stop);
    }
    if !rule.error_title.is_empty() {
        validation = validation.set_error_title(rule.error_title.as_str())?;
    }
    if !rule.error_body.is_empty() {
        validation = validation.set_error_message(rule.error_body.as_str())?;
    }
    Ok(validation)
}

fn apply_data_validation(worksheet: &mut Worksheet, rule: &SpecDataValidation, path: &str) -> Result<()> {
    let validation = derive_data_validation(rule)?;
    for range_text in rule.sq_ref.split_whitespace() {
        let range = parse_cell_range(range_text).ok_or_else(|| {
            XlsxBuildError::invalid(
                derive_field_path(path, "sq_ref"),
                format!("invalid range `{range_text}`"),
            )
        })?;
        worksheet.add_data_validation(
            range.row_first,
            range.col_first,
            range.row_last,
            range.col_last,
            &validation,
        )?;
    }
    Ok(())
}

pub fn apply_data_validations(
    worksheet: &mut Worksheet,
    l_rules: &[SpecDataValidation],
    path: &str,
    report: &mut SpecXlsxBuildReport,
) {
    for (idx, rule) in l_rules.iter().enumerate() {
        let path_item = derive_index_path(path, idx);
        if let Err(err) = apply_data_validation(worksheet, rule, &path_item) {
            report.warn(format!("{path_item}: data validation skipped: {err}"));
        }
    }
}

/// Concatenate paragraph runs into one note text.
pub fn derive_note_text(comment: &SpecComment) -> String {
    comment
        .paragraph
        .iter()
        .map(|run| run.text.as_str())
        .collect()
}

fn apply_comment(worksheet: &mut Worksheet, comment: &SpecComment, path: &str) -> Result<()> {
    let (row, col) = parse_cell_ref(&comment.cell).ok_or_else(|| {
        XlsxBuildError::invalid(
            derive_field_path(path, "cell"),
            format!("invalid cell `{}`", comment.cell),
        )
    })?;
    let mut note = Note::new(derive_note_text(comment));
    if !comment.author.is_empty() {
        note = note.set_author(comment.author.as_str());
    }
    worksheet.insert_note(row, col, &note)?;
    Ok(())
}

pub fn apply_comments(
    worksheet: &mut Worksheet,
    l_comments: &[SpecComment],
    path: &str,
    report: &mut SpecXlsxBuildReport,
) {
    for (idx, comment) in l_comments.iter().enumerate() {
        let path_item = derive_index_path(path, idx);
        if let Err(err) = apply_comment(worksheet, comment, &path_item) {
            report.warn(format!("{path_item}: comment skipped: {err}"));
        }
    }
}

/// Apply freeze panes and the first selection. Split panes have no encoder
/// counterpart and are returned for the package pass.
pub fn apply_panes(
    worksheet: &mut Worksheet,
    sheet_name: &str,
    panes: &SpecPanes,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) -> Option<SpecSplitPane> {
    let mut split_pane = None;
    if panes.freeze {
        let result = (|| -> Result<()> {
            let row = cast_row_num(usize::try_from(panes.y_split).unwrap_or(0))?;
            let col = cast_col_num(usize::try_from(panes.x_split).unwrap_or(0))?;
            worksheet.set_freeze_panes(row, col)?;
            if let Some((row_top, col_left)) = parse_cell_ref(&panes.top_left_cell) {
                worksheet.set_freeze_panes_top_cell(row_top, col_left)?;
            }
            Ok(())
        })();
        if let Err(err) = result {
            report.warn(format!("{path}: freeze panes skipped: {err}"));
        }
    } else if panes.split {
        split_pane = Some(SpecSplitPane {
            sheet_name: sheet_name.to_string(),
            x_split: panes.x_split,
            y_split: panes.y_split,
            top_left_cell: panes.top_left_cell.clone(),
            active_pane: panes.active_pane.clone(),
        });
    }

    if let Some(selection) = panes.selection.first() {
        let range_text = if selection.sq_ref.is_empty() {
            selection.active_cell.as_str()
        } else {
            selection.sq_ref.split_whitespace().next().unwrap_or_default()
        };
        match parse_cell_range(range_text) {
            Some(range) => {
                if let Err(err) = worksheet.set_selection(
                    range.row_first,
                    range.col_first,
                    range.row_last,
                    range.col_last,
                ) {
                    report.warn(format!("{path}.selection: skipped: {err}"));
                }
            }
            None if !range_text.is_empty() => {
                report.warn(format!("{path}.selection: invalid range `{range_text}`"));
            }
            None => {}
        }
        if panes.selection.len() > 1 {
            report.warn(format!(
                "{path}.selection: only the first selection is applied; {} dropped",
                panes.selection.len() - 1
            ));
        }
    }
    split_pane
}

/// Apply the first auto-filter; a worksheet holds at most one.
pub fn apply_auto_filters(
    worksheet: &mut Worksheet,
    l_ranges: &[SpecCellRange],
    path: &str,
    report: &mut SpecXlsxBuildReport,
) {
    let Some(range) = l_ranges.first() else {
        return;
    };
    if let Err(err) =
        worksheet.autofilter(range.row_first, range.col_first, range.row_last, range.col_last)
    {
        report.warn(format!("{path}[0]: auto-filter skipped: {err}"));
    }
    if l_ranges.len() > 1 {
        report.warn(format!(
            "{path}: a worksheet holds one auto-filter; {} dropped",
            l_ranges.len() - 1
        ));
    }
}

const TUP_TABLE_STYLE_LIGHT: [TableStyle; 21] = [
    TableStyle::Light1,
    TableStyle::Light2,
    TableStyle::Light3,
    TableStyle::Light4,
    TableStyle::Light5,
    TableStyle::Light6,
    TableStyle::Light7,
    TableStyle::Light8,
    TableStyle::Light9,
    TableStyle::Light10,
    TableStyle::Light11,
    TableStyle::Light12,
    TableStyle::Light13,
    TableStyle::Light14,
    TableStyle::Light15,
    TableStyle::Light16,
    TableStyle::Light17,
    TableStyle::Light18,
    TableStyle::Light19,
    TableStyle::Light20,
    TableStyle::Light21,
];

const TUP_TABLE_STYLE_MEDIUM: [TableStyle; 28] = [
    TableStyle::Medium1,
    TableStyle::Medium2,
    TableStyle::Medium3,
    TableStyle::Medium4,
    TableStyle::Medium5,
    TableStyle::Medium6,
    TableStyle::Medium7,
    TableStyle::Medium8,
    TableStyle::Medium9,
    TableStyle::Medium10,
    TableStyle::Medium11,
    TableStyle::Medium12,
    TableStyle::Medium13,
    TableStyle::Medium14,
    TableStyle::Medium15,
    TableStyle::Medium16,
    TableStyle::Medium17,
    TableStyle::Medium18,
    TableStyle::Medium19,
    TableStyle::Medium20,
    TableStyle::Medium21,
    TableStyle::Medium22,
    TableStyle::Medium23,
    TableStyle::Medium24,
    TableStyle::Medium25,
    TableStyle::Medium26,
    TableStyle::Medium27,
    TableStyle::Medium28,
];

const TUP_TABLE_STYLE_DARK: [TableStyle; 11] = [
    TableStyle::Dark1,
    TableStyle::Dark2,
    TableStyle::Dark3,
    TableStyle::Dark4,
    TableStyle::Dark5,
    TableStyle::Dark6,
    TableStyle::Dark7,
    TableStyle::Dark8,
    TableStyle::Dark9,
    TableStyle::Dark10,
    TableStyle::Dark11,
];

/// Parse `"TableStyleMedium9"` (or `"Medium9"`) into an encoder table style.
pub fn derive_table_style(name: &str) -> Option<TableStyle> {
    let name = name.trim();
    let name = name.strip_prefix("TableStyle").unwrap_or(name);
    if name.is_empty() || name.eq_ignore_ascii_case("none") {
        return Some(TableStyle::None);
    }
    let n_split = name.find(|chr: char| chr.is_ascii_digit())?;
    let (family, digits) = name.split_at(n_split);
    let n_index = digits.parse::<usize>().ok()?.checked_sub(1)?;
    let l_styles: &[TableStyle] = match family.to_ascii_lowercase().as_str() {
        "light" => &TUP_TABLE_STYLE_LIGHT,
        "medium" => &TUP_TABLE_STYLE_MEDIUM,
        "dark" => &TUP_TABLE_STYLE_DARK,
        _ => return None,
    };
    l_styles.get(n_index).cloned()
}

/// Build an encoder table whose column headers repeat the committed header
/// cells, keeping their text and style.
pub fn derive_table(
    spec: &SpecTable,
    range: &SpecCellRange,
    sheet_name: &str,
    ledger: &WorkbookLedger,
    registry: &crate::style::StyleRegistry,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) -> Result<Table> {
    let mut table = Table::new()
        .set_first_column(spec.show_first_column)
        .set_last_column(spec.show_last_column)
        .set_banded_rows(spec.show_row_stripes)
        .set_banded_columns(spec.show_column_stripes);
    if !spec.name.is_empty() {
        table = table.set_name(spec.name.as_str());
    }
    match derive_table_style(&spec.style_name) {
        Some(style) => table = table.set_style(style),
        None => report.warn(format!(
            "{path}.style_name: unknown table style `{}`, default kept",
            spec.style_name
        )),
    }

    let mut set_seen = BTreeSet::new();
    let mut l_columns = Vec::with_capacity(range.n_cols() as usize);
    for (idx, col) in (range.col_first..=range.col_last).enumerate() {
        let cell = ledger.read_cell(sheet_name, range.row_first, col);
        let mut header = cell.map(|cell| derive_cell_text(&cell.value)).unwrap_or_default();
        if header.is_empty() || !set_seen.insert(header.to_lowercase()) {
            header = format!("Column{}", idx + 1);
            set_seen.insert(header.to_lowercase());
        }
        let mut column = TableColumn::new().set_header(header.as_str());
        if let Some(handle) = cell.and_then(|cell| cell.style) {
            let format: Format = registry.format(handle)?.clone();
            column = column.set_header_format(format);
        }
        l_columns.push(column);
    }
    Ok(table.set_columns(&l_columns))
}

/// Parse a table's range for the sheet's engine.
pub fn parse_table_range(spec: &SpecTable, path: &str) -> Result<SpecCellRange> {
    parse_cell_range(&spec.range).ok_or_else(|| {
        XlsxBuildError::invalid(
            derive_field_path(path, "range"),
            format!("invalid range `{}`", spec.range),
        )
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region OutlineGroups

/// Split per-index outline levels into the runs to group, shallowest first.
///
/// Grouping a run raises its level by one, so level `k` needs one group call
/// for each maximal run of indices whose level is at least `k`.
pub fn derive_outline_runs(dict_levels: &BTreeMap<u32, u8>) -> Vec<(u32, u32)> {
    let n_level_max = dict_levels.values().copied().max().unwrap_or(0);
    let mut l_runs = Vec::new();
    for n_level in 1..=n_level_max {
        let mut run: Option<(u32, u32)> = None;
        for (&idx, _) in dict_levels.iter().filter(|(_, level)| **level >= n_level) {
            run = match run {
                Some((first, last)) if last.checked_add(1) == Some(idx) => Some((first, idx)),
                Some(run_done) => {
                    l_runs.push(run_done);
                    Some((idx, idx))
                }
                None => Some((idx, idx)),
            };
        }
        l_runs.extend(run);
    }
    l_runs
}

/// Apply row and column outline groups through a random-access writer.
///
/// A later group overrides the level an earlier group gave the same index.
pub fn apply_outline_groups<W: RandomAccessWriter>(
    writer: &mut W,
    sheet: &SpecSheet,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) {
    let mut dict_row_levels = BTreeMap::new();
    let mut set_rows_hidden = BTreeSet::new();
    for group in &sheet.grouped_row {
        let n_first = group.start_row.saturating_sub(1);
        let n_last = group.end_row.unwrap_or(group.start_row).saturating_sub(1);
        for row in n_first..=n_last {
            let Ok(row) = cast_row_num(row as usize) else {
                report.warn(format!("{path}.GroupedRow: row {} out of range", row + 1));
                break;
            };
            dict_row_levels.insert(row, group.outline_level as u8);
            if group.hidden {
                set_rows_hidden.insert(row);
            }
        }
    }

    let mut dict_col_levels = BTreeMap::new();
    let mut set_cols_hidden = BTreeSet::new();
    for group in &sheet.grouped_col {
        let (Some(col_a), Some(col_b)) = (
            parse_column_letters(&group.start_col),
            parse_column_letters(&group.end_col),
        ) else {
            continue;
        };
        for col in col_a.min(col_b)..=col_a.max(col_b) {
            dict_col_levels.insert(u32::from(col), group.outline_level as u8);
            if group.hidden {
                set_cols_hidden.insert(col);
            }
        }
    }

    for (first, last) in derive_outline_runs(&dict_row_levels) {
        if let Err(err) = writer.group_rows(first, last) {
            report.warn(format!(
                "{path}.GroupedRow: rows {}..={} not grouped: {err}",
                first + 1,
                last + 1
            ));
        }
    }
    for (first, last) in derive_outline_runs(&dict_col_levels) {
        let result = match (u16::try_from(first), u16::try_from(last)) {
            (Ok(first), Ok(last)) => writer.group_columns(first, last),
            _ => Err(XlsxBuildError::invalid("GroupedCol", "column out of range")),
        };
        if let Err(err) = result {
            report.warn(format!("{path}.GroupedCol: columns not grouped: {err}"));
        }
    }
    for row in set_rows_hidden {
        if let Err(err) = writer.hide_row(row) {
            report.warn(format!("{path}.GroupedRow: row {} not hidden: {err}", row + 1));
        }
    }
    for col in set_cols_hidden {
        if let Err(err) = writer.hide_column(col) {
            report.warn(format!("{path}.GroupedCol: column {} not hidden: {err}", col + 1));
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::EnumRawCell;
    use serde_json::json;

    #[test]
    fn test_parse_sheet_keys() {
        let value = json!({
            "Header": [["A", "B"]],
            "Data": [[["x", "style1"], []], [null, 3]],
            "Width": {"1": 12.5, "3": 8},
            "Height": {"2": 30},
            "MergeCells": [["A5", "B6"]],
            "AutoFilter": ["A1:B3"],
            "Panes": {},
            "NoStyle": false,
            "SheetVisible": false,
            "WriterEngine": "NormalWriter"
        });
        let sheet = parse_sheet("S", &value, "content.S").unwrap();
        assert_eq!(sheet.n_rows(), 3);
        assert_eq!(sheet.data[0][1], EnumRawCell::Empty);
        assert_eq!(sheet.data[1][0], EnumRawCell::Skip);
        assert_eq!(sheet.width.get(&0), Some(&12.5));
        assert_eq!(sheet.width.get(&2), Some(&8.0));
        assert_eq!(sheet.height.get(&1), Some(&30.0));
        assert_eq!(
            sheet.merge_cells[0],
            SpecCellRange {
                row_first: 4,
                col_first: 0,
                row_last: 5,
                col_last: 1,
            }
        );
        assert_eq!(sheet.auto_filter.len(), 1);
        assert_eq!(sheet.panes, None);
        assert!(!sheet.visible);
        assert_eq!(sheet.engine, Some(EnumWriteEngine::RandomAccess));
    }

    #[test]
    fn test_parse_sheet_rejects_bad_index() {
        let err = parse_sheet("S", &json!({"Width": {"0": 3}}), "content.S").unwrap_err();
        assert!(matches!(err, XlsxBuildError::InvalidValue { .. }));
        let err = parse_sheet("S", &json!({"Data": "rows"}), "content.S").unwrap_err();
        assert!(matches!(err, XlsxBuildError::Schema { .. }));
        let err = parse_sheet("S", &json!({"WriterEngine": "Turbo"}), "content.S").unwrap_err();
        assert!(matches!(err, XlsxBuildError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_sheet_skips_malformed_ranges() {
        let value = json!({
            "MergeCells": [["A0", "B1"], ["A2", "B3"]],
            "AutoFilter": ["ZZ"],
        });
        let sheet = parse_sheet("S", &value, "content.S").unwrap();
        assert_eq!(sheet.merge_cells.len(), 1);
        assert!(sheet.auto_filter.is_empty());
        assert_eq!(sheet.skipped.len(), 2);
        assert!(sheet.skipped[0].contains("content.S.MergeCells[0]"));
        assert!(sheet.skipped[1].contains("content.S.AutoFilter[0]"));

        let err = parse_sheet("S", &json!({"MergeCells": [3]}), "content.S").unwrap_err();
        assert!(matches!(err, XlsxBuildError::Schema { .. }));
    }

    #[test]
    fn test_build_panes_and_selection() {
        let panes = build_panes(
            json!({
                "freeze": true,
                "split": false,
                "x_split": 1,
                "y_split": 2,
                "top_left_cell": "B3",
                "active_pane": "bottomRight",
                "selection": [{"sq_ref": "C4", "active_cell": "C4", "pane": "bottomRight"}]
            })
            .as_object()
            .unwrap(),
            "Panes",
        )
        .unwrap()
        .unwrap();
        assert!(panes.freeze);
        assert_eq!((panes.x_split, panes.y_split), (1, 2));
        assert_eq!(panes.selection[0].pane, "bottomRight");
    }

    #[test]
    fn test_build_data_validation_shorthand_range() {
        let rule = build_data_validation(
            json!({"sq_ref": "A1:A9", "set_range": [1, 10], "drop_list": ["a", "b"]})
                .as_object()
                .unwrap(),
            "dv",
        )
        .unwrap();
        assert_eq!(rule.set_range_start, Some(1.0));
        assert_eq!(rule.set_range_stop, Some(10.0));
        assert_eq!(rule.drop_list, vec!["a".to_string(), "b".to_string()]);
        assert!(derive_data_validation(&rule).is_ok());

        let err = build_data_validation(json!({"input_title": "t"}).as_object().unwrap(), "dv")
            .unwrap_err();
        assert!(matches!(err, XlsxBuildError::MissingKey(_)));
    }

    #[test]
    fn test_comment_paragraphs_concatenate() {
        let comment = build_comment(
            json!({
                "cell": "A1",
                "author": "ops",
                "paragraph": [{"text": "Hello ", "Bold": true}, {"text": "world"}]
            })
            .as_object()
            .unwrap(),
            "c",
        )
        .unwrap();
        assert_eq!(derive_note_text(&comment), "Hello world");
        assert!(comment.paragraph[0].font.as_ref().is_some_and(|font| font.bold));
        assert_eq!(comment.paragraph[1].font, None);
    }

    #[test]
    fn test_outline_groups_validate_levels() {
        let err = build_outline_rows(
            json!({"start_row": 1, "outline_level": 8}).as_object().unwrap(),
            "g",
        )
        .unwrap_err();
        assert!(matches!(err, XlsxBuildError::InvalidValue { .. }));

        let group = build_outline_cols(
            json!({"start_col": "B", "outline_level": 2, "hidden": true}).as_object().unwrap(),
            "g",
        )
        .unwrap();
        assert_eq!(group.end_col, "B");
    }

    #[test]
    fn test_derive_outline_runs() {
        let dict_levels = BTreeMap::from([(0, 1), (1, 2), (2, 2), (3, 1), (5, 1)]);
        assert_eq!(
            derive_outline_runs(&dict_levels),
            vec![(0, 3), (5, 5), (1, 2)]
        );
        assert!(derive_outline_runs(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_derive_table_style() {
        assert!(derive_table_style("TableStyleMedium9") == Some(TableStyle::Medium9));
        assert!(derive_table_style("Light21") == Some(TableStyle::Light21));
        assert!(derive_table_style("") == Some(TableStyle::None));
        assert!(derive_table_style("TableStyleDark12").is_none());
        assert!(derive_table_style("Shiny1").is_none());
    }
}
