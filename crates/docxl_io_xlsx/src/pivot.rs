//! Pivot tables: spec builders and pivot part generation from committed data.
//!
//! The encoder has no pivot support, so each pivot is rendered into three
//! SpreadsheetML parts (cache definition, cache records, table definition)
//! that the package post-processor splices into the saved workbook.

use std::collections::HashMap;
use std::fmt::Write as FmtWrite;

use quick_xml::escape::escape;
use serde_json::{Map, Value};

use crate::conf::C_PIVOT_STYLE_DEFAULT;
use crate::engine::WorkbookLedger;
use crate::error::{Result, XlsxBuildError};
use crate::mapper::{
    EnumFieldSetter, SpecField, cast_map, derive_field_path, derive_index_path, get_str_value,
    map_fields,
};
use crate::spec::{EnumCellValue, SpecCellRange, SpecPivotField, SpecPivotTable};
use crate::util::{derive_range_ref, parse_cell_range, split_sheet_range};

const C_XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const C_NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const C_NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

////////////////////////////////////////////////////////////////////////////////
// #region Builders

pub fn build_pivot_fields(l_values: &[Value], path: &str) -> Result<Vec<SpecPivotField>> {
    let l_fields = vec![
        SpecField::new(
            "Compact",
            EnumFieldSetter::Bool(|f: &mut SpecPivotField, v: bool| f.compact = v),
        ),
        SpecField::new("Data", EnumFieldSetter::Str(|f: &mut SpecPivotField, v: String| f.data = v)),
        SpecField::new("Name", EnumFieldSetter::Str(|f: &mut SpecPivotField, v: String| f.name = v)),
        SpecField::new(
            "Outline",
            EnumFieldSetter::Bool(|f: &mut SpecPivotField, v: bool| f.outline = v),
        ),
        SpecField::new(
            "Subtotal",
            EnumFieldSetter::Str(|f: &mut SpecPivotField, v: String| f.subtotal = v),
        ),
        SpecField::new(
            "DefaultSubtotal",
            EnumFieldSetter::Bool(|f: &mut SpecPivotField, v: bool| f.default_subtotal = v),
        ),
    ];
    let mut l_pivot_fields = Vec::with_capacity(l_values.len());
    for (idx, value) in l_values.iter().enumerate() {
        let path_item = derive_index_path(path, idx);
        let mut field = SpecPivotField::default();
        map_fields(&mut field, cast_map(value, &path_item)?, &l_fields, &path_item)?;
        l_pivot_fields.push(field);
    }
    Ok(l_pivot_fields)
}

/// Build one pivot table spec. `DataRange` and `PivotTableRange` are required.
pub fn build_pivot_table(map: &Map<String, Value>, path: &str) -> Result<SpecPivotTable> {
    let l_fields = vec![
        SpecField::new(
            "Rows",
            EnumFieldSetter::PivotFields(|p: &mut SpecPivotTable, v: Vec<SpecPivotField>| p.rows = v),
        ),
        SpecField::new(
            "Columns",
            EnumFieldSetter::PivotFields(|p: &mut SpecPivotTable, v: Vec<SpecPivotField>| {
                p.columns = v
            }),
        ),
        SpecField::new(
            "Filter",
            EnumFieldSetter::PivotFields(|p: &mut SpecPivotTable, v: Vec<SpecPivotField>| {
                p.filter = v
            }),
        ),
        SpecField::new(
            "Data",
            EnumFieldSetter::PivotFields(|p: &mut SpecPivotTable, v: Vec<SpecPivotField>| p.data = v),
        ),
        SpecField::new(
            "RowGrandTotals",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.row_grand_totals = v),
        ),
        SpecField::new(
            "ColGrandTotals",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.col_grand_totals = v),
        ),
        SpecField::new(
            "ShowDrill",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.show_drill = v),
        ),
        SpecField::new(
            "ShowRowHeaders",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.show_row_headers = v),
        ),
        SpecField::new(
            "ShowColHeaders",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.show_col_headers = v),
        ),
        SpecField::new(
            "ShowLastColumn",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.show_last_column = v),
        ),
        SpecField::new(
            "ClassicLayout",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.classic_layout = v),
        ),
        SpecField::new(
            "ShowRowStripes",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.show_row_stripes = v),
        ),
        SpecField::new(
            "ShowColStripes",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.show_col_stripes = v),
        ),
        SpecField::new(
            "ShowError",
            EnumFieldSetter::Bool(|p: &mut SpecPivotTable, v: bool| p.show_error = v),
        ),
        SpecField::new(
            "PivotTableStyleName",
            EnumFieldSetter::Str(|p: &mut SpecPivotTable, v: String| p.style_name = v),
        ),
    ];

    let data_range = get_str_value(map, "DataRange", path)?;
    if data_range.is_empty() {
        return Err(XlsxBuildError::MissingKey(derive_field_path(path, "DataRange")));
    }
    let pivot_table_range = get_str_value(map, "PivotTableRange", path)?;
    if pivot_table_range.is_empty() {
        return Err(XlsxBuildError::MissingKey(derive_field_path(path, "PivotTableRange")));
    }

    let mut pivot = SpecPivotTable {
        data_range,
        pivot_table_range,
        ..SpecPivotTable::default()
    };
    map_fields(&mut pivot, map, &l_fields, path)?;
    if pivot.style_name.is_empty() {
        pivot.style_name = C_PIVOT_STYLE_DEFAULT.to_string();
    }
    Ok(pivot)
}

/// Split a sheet-qualified range into its sheet name and normalized range.
pub fn parse_sheet_range(reference: &str, path: &str) -> Result<(String, SpecCellRange)> {
    let invalid = || XlsxBuildError::invalid(path, format!("invalid sheet range `{reference}`"));
    let (sheet, range_text) = split_sheet_range(reference).ok_or_else(invalid)?;
    let range = parse_cell_range(range_text).ok_or_else(invalid)?;
    Ok((sheet, range))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CacheModel

#[derive(Debug, Clone, PartialEq)]
enum EnumSharedItem {
    Missing,
    Number(f64),
    Boolean(bool),
    String(String),
}

impl EnumSharedItem {
    fn from_cell(value: &EnumCellValue) -> Self {
        match value {
            // Formula results are unknown until Excel refreshes the cache.
            EnumCellValue::None | EnumCellValue::Formula(_) => EnumSharedItem::Missing,
            EnumCellValue::Number(val) => EnumSharedItem::Number(*val),
            EnumCellValue::Boolean(val) => EnumSharedItem::Boolean(*val),
            EnumCellValue::String(val) if val.is_empty() => EnumSharedItem::Missing,
            EnumCellValue::String(val) => EnumSharedItem::String(val.clone()),
        }
    }

    fn derive_key(&self) -> String {
        match self {
            EnumSharedItem::Missing => "m".to_string(),
            EnumSharedItem::Number(val) => format!("n:{val}"),
            EnumSharedItem::Boolean(val) => format!("b:{val}"),
            EnumSharedItem::String(val) => format!("s:{val}"),
        }
    }

    fn write_xml(&self, xml: &mut String) -> Result<()> {
        match self {
            EnumSharedItem::Missing => xml.push_str("<m/>"),
            EnumSharedItem::Number(val) => write!(xml, r#"<n v="{val}"/>"#).map_err(derive_fmt_error)?,
            EnumSharedItem::Boolean(val) => {
                write!(xml, r#"<b v="{}"/>"#, if *val { 1 } else { 0 }).map_err(derive_fmt_error)?
            }
            EnumSharedItem::String(val) => {
                write!(xml, r#"<s v="{}"/>"#, escape(val.as_str())).map_err(derive_fmt_error)?
            }
        }
        Ok(())
    }
}

/// Axis placement of a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumPivotAxis {
    Row,
    Col,
    Page,
}

impl EnumPivotAxis {
    fn as_str(&self) -> &'static str {
        match self {
            EnumPivotAxis::Row => "axisRow",
            EnumPivotAxis::Col => "axisCol",
            EnumPivotAxis::Page => "axisPage",
        }
    }
}

#[derive(Debug, Clone)]
struct SpecCacheField {
    name: String,
    axis: Option<EnumPivotAxis>,
    if_data: bool,
    /// Distinct values, only kept for axis fields.
    l_items: Vec<EnumSharedItem>,
    dict_item_index: HashMap<String, usize>,
    /// Raw column values, one per record.
    l_values: Vec<EnumSharedItem>,
}

impl SpecCacheField {
    fn index_of(&self, item: &EnumSharedItem) -> Option<usize> {
        self.dict_item_index.get(&item.derive_key()).copied()
    }
}

/// Rendered pivot parts plus where they belong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecPivotParts {
    /// 1-based part number, also used as the cache id.
    pub n_index: usize,
    /// Sheet that hosts the pivot table.
    pub sheet_name: String,
    pub cache_definition_xml: String,
    pub cache_records_xml: String,
    pub pivot_table_xml: String,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PartGeneration

/// Render one pivot from committed ledger data.
///
/// Fails when the source sheet is not committed yet, when the source range has
/// no header row, or when a field names a column absent from that header.
pub fn derive_pivot_parts(
    spec: &SpecPivotTable,
    n_index: usize,
    ledger: &WorkbookLedger,
    path: &str,
) -> Result<SpecPivotParts> {
    let (sheet_source, range_source) =
        parse_sheet_range(&spec.data_range, &derive_field_path(path, "DataRange"))?;
    let (sheet_target, range_target) =
        parse_sheet_range(&spec.pivot_table_range, &derive_field_path(path, "PivotTableRange"))?;

    let l_grid = ledger.read_range(&sheet_source, &range_source)?;
    let Some((l_header, l_records)) = l_grid.split_first() else {
        return Err(XlsxBuildError::invalid(
            derive_field_path(path, "DataRange"),
            format!("range `{}` is empty", spec.data_range),
        ));
    };
    if l_records.is_empty() {
        return Err(XlsxBuildError::invalid(
            derive_field_path(path, "DataRange"),
            format!("range `{}` has no data rows below its header", spec.data_range),
        ));
    }

    let mut l_cache_fields: Vec<SpecCacheField> = l_header
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let name = crate::cell::derive_cell_text(cell);
            SpecCacheField {
                name: if name.is_empty() {
                    format!("Column{}", idx + 1)
                } else {
                    name
                },
                axis: None,
                if_data: false,
                l_items: Vec::new(),
                dict_item_index: HashMap::new(),
                l_values: l_records
                    .iter()
                    .map(|row| {
                        row.get(idx)
                            .map(EnumSharedItem::from_cell)
                            .unwrap_or(EnumSharedItem::Missing)
                    })
                    .collect(),
            }
        })
        .collect();

    let l_row_idx = derive_field_indices(&spec.rows, &l_cache_fields, &derive_field_path(path, "Rows"))?;
    let l_col_idx =
        derive_field_indices(&spec.columns, &l_cache_fields, &derive_field_path(path, "Columns"))?;
    let l_page_idx =
        derive_field_indices(&spec.filter, &l_cache_fields, &derive_field_path(path, "Filter"))?;
    let l_data_idx = derive_field_indices(&spec.data, &l_cache_fields, &derive_field_path(path, "Data"))?;

    for (l_idx, axis) in [
        (&l_row_idx, EnumPivotAxis::Row),
        (&l_col_idx, EnumPivotAxis::Col),
        (&l_page_idx, EnumPivotAxis::Page),
    ] {
        for &idx in l_idx {
            l_cache_fields[idx].axis = Some(axis);
        }
    }
    for &idx in &l_data_idx {
        l_cache_fields[idx].if_data = true;
    }
    for field in l_cache_fields.iter_mut().filter(|f| f.axis.is_some()) {
        for item in &field.l_values {
            let key = item.derive_key();
            if !field.dict_item_index.contains_key(&key) {
                field.dict_item_index.insert(key, field.l_items.len());
                field.l_items.push(item.clone());
            }
        }
    }

    let source_ref = derive_range_ref(&range_source);
    let cache_definition_xml =
        write_cache_definition(&l_cache_fields, &sheet_source, &source_ref, l_records.len())?;
    let cache_records_xml = write_cache_records(&l_cache_fields, l_records.len())?;

    let ctx_table = SpecPivotTableContext {
        spec,
        n_index,
        location_ref: derive_range_ref(&range_target),
        l_cache_fields: &l_cache_fields,
        l_row_idx: &l_row_idx,
        l_col_idx: &l_col_idx,
        l_page_idx: &l_page_idx,
        l_data_idx: &l_data_idx,
    };
    let pivot_table_xml = write_pivot_table(&ctx_table)?;

    Ok(SpecPivotParts {
        n_index,
        sheet_name: sheet_target,
        cache_definition_xml,
        cache_records_xml,
        pivot_table_xml,
    })
}

fn derive_field_indices(
    l_fields: &[SpecPivotField],
    l_cache_fields: &[SpecCacheField],
    path: &str,
) -> Result<Vec<usize>> {
    l_fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            l_cache_fields
                .iter()
                .position(|cache_field| cache_field.name == field.data)
                .ok_or_else(|| {
                    XlsxBuildError::invalid(
                        derive_index_path(path, idx),
                        format!("column `{}` is not in the source header", field.data),
                    )
                })
        })
        .collect()
}

fn write_cache_definition(
    l_cache_fields: &[SpecCacheField],
    sheet_source: &str,
    source_ref: &str,
    n_records: usize,
) -> Result<String> {
    let mut xml = String::with_capacity(4096);
    xml.push_str(C_XML_HEADER);
    xml.push('\n');
    write!(
        xml,
        r#"<pivotCacheDefinition xmlns="{C_NS_MAIN}" xmlns:r="{C_NS_REL}" r:id="rId1" refreshOnLoad="1" createdVersion="3" refreshedVersion="3" minRefreshableVersion="3" recordCount="{n_records}">"#
    )
    .map_err(derive_fmt_error)?;
    write!(
        xml,
        r#"<cacheSource type="worksheet"><worksheetSource ref="{}" sheet="{}"/></cacheSource>"#,
        escape(source_ref),
        escape(sheet_source)
    )
    .map_err(derive_fmt_error)?;

    write!(xml, r#"<cacheFields count="{}">"#, l_cache_fields.len()).map_err(derive_fmt_error)?;
    for field in l_cache_fields {
        write!(xml, r#"<cacheField name="{}" numFmtId="0">"#, escape(field.name.as_str()))
            .map_err(derive_fmt_error)?;
        if field.axis.is_some() {
            write_axis_shared_items(&mut xml, field)?;
        } else {
            write_summary_shared_items(&mut xml, field)?;
        }
        xml.push_str("</cacheField>");
    }
    xml.push_str("</cacheFields></pivotCacheDefinition>");
    Ok(xml)
}

fn write_axis_shared_items(xml: &mut String, field: &SpecCacheField) -> Result<()> {
    let if_blank = field.l_items.contains(&EnumSharedItem::Missing);
    let if_number = field
        .l_items
        .iter()
        .any(|item| matches!(item, EnumSharedItem::Number(_)));
    let if_string = field
        .l_items
        .iter()
        .any(|item| matches!(item, EnumSharedItem::String(_) | EnumSharedItem::Boolean(_)));

    xml.push_str("<sharedItems");
    if if_number && if_string {
        xml.push_str(r#" containsMixedTypes="1" containsNumber="1""#);
    } else if if_number {
        xml.push_str(r#" containsSemiMixedTypes="0" containsString="0" containsNumber="1""#);
    }
    if if_blank {
        xml.push_str(r#" containsBlank="1""#);
    }
    write!(xml, r#" count="{}">"#, field.l_items.len()).map_err(derive_fmt_error)?;
    for item in &field.l_items {
        item.write_xml(xml)?;
    }
    xml.push_str("</sharedItems>");
    Ok(())
}

fn write_summary_shared_items(xml: &mut String, field: &SpecCacheField) -> Result<()> {
    let l_numbers: Vec<f64> = field
        .l_values
        .iter()
        .filter_map(|item| match item {
            EnumSharedItem::Number(val) => Some(*val),
            _ => None,
        })
        .collect();
    let if_blank = field.l_values.contains(&EnumSharedItem::Missing);
    let if_other = field
        .l_values
        .iter()
        .any(|item| matches!(item, EnumSharedItem::String(_) | EnumSharedItem::Boolean(_)));

    if l_numbers.is_empty() || if_other {
        xml.push_str("<sharedItems/>");
        return Ok(());
    }

    let n_min = l_numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let n_max = l_numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let if_integer = l_numbers.iter().all(|val| val.fract() == 0.0);
    xml.push_str(r#"<sharedItems containsSemiMixedTypes="0" containsString="0" containsNumber="1""#);
    if if_integer {
        xml.push_str(r#" containsInteger="1""#);
    }
    if if_blank {
        xml.push_str(r#" containsBlank="1""#);
    }
    write!(xml, r#" minValue="{n_min}" maxValue="{n_max}"/>"#).map_err(derive_fmt_error)?;
    Ok(())
}

fn write_cache_records(l_cache_fields: &[SpecCacheField], n_records: usize) -> Result<String> {
    let mut xml = String::with_capacity(64 * n_records + 256);
    xml.push_str(C_XML_HEADER);
    xml.push('\n');
    write!(
        xml,
        r#"<pivotCacheRecords xmlns="{C_NS_MAIN}" xmlns:r="{C_NS_REL}" count="{n_records}">"#
    )
    .map_err(derive_fmt_error)?;
    for idx_record in 0..n_records {
        xml.push_str("<r>");
        for field in l_cache_fields {
            let item = field
                .l_values
                .get(idx_record)
                .cloned()
                .unwrap_or(EnumSharedItem::Missing);
            match field.axis.and_then(|_| field.index_of(&item)) {
                Some(idx_item) => {
                    write!(xml, r#"<x v="{idx_item}"/>"#).map_err(derive_fmt_error)?
                }
                None => item.write_xml(&mut xml)?,
            }
        }
        xml.push_str("</r>");
    }
    xml.push_str("</pivotCacheRecords>");
    Ok(xml)
}

struct SpecPivotTableContext<'a> {
    spec: &'a SpecPivotTable,
    n_index: usize,
    location_ref: String,
    l_cache_fields: &'a [SpecCacheField],
    l_row_idx: &'a [usize],
    l_col_idx: &'a [usize],
    l_page_idx: &'a [usize],
    l_data_idx: &'a [usize],
}

fn derive_flag(value: bool) -> u8 {
    if value { 1 } else { 0 }
}

/// Find the field spec that placed column `idx` on an axis, if any.
fn find_axis_field<'a>(ctx: &SpecPivotTableContext<'a>, idx: usize) -> Option<&'a SpecPivotField> {
    let spec = ctx.spec;
    ctx.l_row_idx
        .iter()
        .position(|&val| val == idx)
        .map(|pos| &spec.rows[pos])
        .or_else(|| {
            ctx.l_col_idx
                .iter()
                .position(|&val| val == idx)
                .map(|pos| &spec.columns[pos])
        })
        .or_else(|| {
            ctx.l_page_idx
                .iter()
                .position(|&val| val == idx)
                .map(|pos| &spec.filter[pos])
        })
}

fn write_pivot_table(ctx: &SpecPivotTableContext<'_>) -> Result<String> {
    let spec = ctx.spec;
    let mut xml = String::with_capacity(4096);
    xml.push_str(C_XML_HEADER);
    xml.push('\n');
    write!(
        xml,
        r#"<pivotTableDefinition xmlns="{C_NS_MAIN}" name="PivotTable{}" cacheId="{}" applyNumberFormats="0" applyBorderFormats="0" applyFontFormats="0" applyPatternFormats="0" applyAlignmentFormats="0" applyWidthHeightFormats="1" dataCaption="Values" updatedVersion="3" minRefreshableVersion="3" createdVersion="3" useAutoFormatting="1" itemPrintTitles="1" indent="0""#,
        ctx.n_index, ctx.n_index
    )
    .map_err(derive_fmt_error)?;
    if spec.classic_layout {
        xml.push_str(r#" compact="0" compactData="0" gridDropZones="1""#);
    } else {
        xml.push_str(r#" outline="1" outlineData="1""#);
    }
    write!(
        xml,
        r#" rowGrandTotals="{}" colGrandTotals="{}" showDrill="{}" showError="{}" multipleFieldFilters="0">"#,
        derive_flag(spec.row_grand_totals),
        derive_flag(spec.col_grand_totals),
        derive_flag(spec.show_drill),
        derive_flag(spec.show_error),
    )
    .map_err(derive_fmt_error)?;

    let n_page_fields = ctx.l_page_idx.len();
    write!(
        xml,
        r#"<location ref="{}" firstHeaderRow="1" firstDataRow="1" firstDataCol="1""#,
        escape(ctx.location_ref.as_str())
    )
    .map_err(derive_fmt_error)?;
    if n_page_fields > 0 {
        write!(xml, r#" rowPageCount="{n_page_fields}" colPageCount="1""#).map_err(derive_fmt_error)?;
    }
    xml.push_str("/>");

    write!(xml, r#"<pivotFields count="{}">"#, ctx.l_cache_fields.len()).map_err(derive_fmt_error)?;
    for (idx, field) in ctx.l_cache_fields.iter().enumerate() {
        xml.push_str("<pivotField");
        if let Some(axis) = field.axis {
            write!(xml, r#" axis="{}""#, axis.as_str()).map_err(derive_fmt_error)?;
        }
        if field.if_data {
            xml.push_str(r#" dataField="1""#);
        }
        xml.push_str(r#" showAll="0""#);

        let Some(axis_field) = field.axis.and_then(|_| find_axis_field(ctx, idx)) else {
            xml.push_str("/>");
            continue;
        };
        if !axis_field.compact {
            xml.push_str(r#" compact="0""#);
        }
        if !axis_field.outline {
            xml.push_str(r#" outline="0""#);
        }
        if !axis_field.default_subtotal {
            xml.push_str(r#" defaultSubtotal="0""#);
        }
        if !axis_field.name.is_empty() {
            write!(xml, r#" name="{}""#, escape(axis_field.name.as_str())).map_err(derive_fmt_error)?;
        }
        let n_items = field.l_items.len() + usize::from(axis_field.default_subtotal);
        write!(xml, r#"><items count="{n_items}">"#).map_err(derive_fmt_error)?;
        for idx_item in 0..field.l_items.len() {
            write!(xml, r#"<item x="{idx_item}"/>"#).map_err(derive_fmt_error)?;
        }
        if axis_field.default_subtotal {
            xml.push_str(r#"<item t="default"/>"#);
        }
        xml.push_str("</items></pivotField>");
    }
    xml.push_str("</pivotFields>");

    if !ctx.l_row_idx.is_empty() {
        write!(xml, r#"<rowFields count="{}">"#, ctx.l_row_idx.len()).map_err(derive_fmt_error)?;
        for idx in ctx.l_row_idx {
            write!(xml, r#"<field x="{idx}"/>"#).map_err(derive_fmt_error)?;
        }
        xml.push_str("</rowFields>");
    }

    // Several data fields need the virtual values field on the column axis.
    let if_values_field = ctx.l_data_idx.len() > 1;
    let n_col_fields = ctx.l_col_idx.len() + usize::from(if_values_field);
    if n_col_fields > 0 {
        write!(xml, r#"<colFields count="{n_col_fields}">"#).map_err(derive_fmt_error)?;
        for idx in ctx.l_col_idx {
            write!(xml, r#"<field x="{idx}"/>"#).map_err(derive_fmt_error)?;
        }
        if if_values_field {
            xml.push_str(r#"<field x="-2"/>"#);
        }
        xml.push_str("</colFields>");
    }

    if n_page_fields > 0 {
        write!(xml, r#"<pageFields count="{n_page_fields}">"#).map_err(derive_fmt_error)?;
        for idx in ctx.l_page_idx {
            write!(xml, r#"<pageField fld="{idx}" hier="-1"/>"#).map_err(derive_fmt_error)?;
        }
        xml.push_str("</pageFields>");
    }

    if !ctx.l_data_idx.is_empty() {
        write!(xml, r#"<dataFields count="{}">"#, ctx.l_data_idx.len()).map_err(derive_fmt_error)?;
        for (pos, &idx) in ctx.l_data_idx.iter().enumerate() {
            let field_spec = &spec.data[pos];
            let subtotal = derive_subtotal(&field_spec.subtotal);
            let name = if field_spec.name.is_empty() {
                format!("{} of {}", derive_subtotal_caption(subtotal), ctx.l_cache_fields[idx].name)
            } else {
                field_spec.name.clone()
            };
            write!(
                xml,
                r#"<dataField name="{}" fld="{idx}" subtotal="{subtotal}" baseField="0" baseItem="0"/>"#,
                escape(name.as_str())
            )
            .map_err(derive_fmt_error)?;
        }
        xml.push_str("</dataFields>");
    }

    write!(
        xml,
        r#"<pivotTableStyleInfo name="{}" showRowHeaders="{}" showColHeaders="{}" showRowStripes="{}" showColStripes="{}" showLastColumn="{}"/>"#,
        escape(spec.style_name.as_str()),
        derive_flag(spec.show_row_headers),
        derive_flag(spec.show_col_headers),
        derive_flag(spec.show_row_stripes),
        derive_flag(spec.show_col_stripes),
        derive_flag(spec.show_last_column),
    )
    .map_err(derive_fmt_error)?;
    xml.push_str("</pivotTableDefinition>");
    Ok(xml)
}

/// Map a subtotal name onto its SpreadsheetML token; unknown names sum.
fn derive_subtotal(value: &str) -> &'static str {
    match value.trim().to_ascii_lowercase().as_str() {
        "average" => "average",
        "count" => "count",
        "countnums" => "countNums",
        "max" => "max",
        "min" => "min",
        "product" => "product",
        "stddev" => "stdDev",
        "stddevp" => "stdDevp",
        "var" => "var",
        "varp" => "varp",
        _ => "sum",
    }
}

fn derive_subtotal_caption(subtotal: &str) -> &'static str {
    match subtotal {
        "average" => "Average",
        "count" | "countNums" => "Count",
        "max" => "Max",
        "min" => "Min",
        "product" => "Product",
        "stdDev" | "stdDevp" => "StdDev",
        "var" | "varp" => "Var",
        _ => "Sum",
    }
}

fn derive_fmt_error(err: std::fmt::Error) -> XlsxBuildError {
    XlsxBuildError::Package(format!("failed to render pivot part: {err}"))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::SpecResolvedCell;
    use serde_json::json;

    fn derive_cell(value: EnumCellValue) -> Option<SpecResolvedCell> {
        Some(SpecResolvedCell { value, style: None })
    }

    fn derive_ledger() -> WorkbookLedger {
        let mut ledger = WorkbookLedger::new(["Data".to_string()]);
        let l_rows = vec![
            vec![
                derive_cell(EnumCellValue::String("Region".to_string())),
                derive_cell(EnumCellValue::String("Sales".to_string())),
            ],
            vec![
                derive_cell(EnumCellValue::String("East".to_string())),
                derive_cell(EnumCellValue::Number(10.0)),
            ],
            vec![
                derive_cell(EnumCellValue::String("West".to_string())),
                derive_cell(EnumCellValue::Number(5.5)),
            ],
            vec![
                derive_cell(EnumCellValue::String("East".to_string())),
                derive_cell(EnumCellValue::Number(2.0)),
            ],
        ];
        for (idx, row) in l_rows.iter().enumerate() {
            ledger.record_row("Data", idx as u32, row);
        }
        ledger
    }

    fn derive_spec() -> SpecPivotTable {
        build_pivot_table(
            json!({
                "DataRange": "Data!$A$1:$B$4",
                "PivotTableRange": "Data!D2:F10",
                "Rows": [{"Data": "Region", "DefaultSubtotal": true}],
                "Data": [{"Data": "Sales", "Subtotal": "Sum"}],
                "RowGrandTotals": true
            })
            .as_object()
            .unwrap(),
            "pivot",
        )
        .unwrap()
    }

    #[test]
    fn test_build_pivot_table_defaults_style() {
        let spec = derive_spec();
        assert_eq!(spec.style_name, C_PIVOT_STYLE_DEFAULT);
        assert_eq!(spec.rows.len(), 1);
        assert!(spec.rows[0].default_subtotal);
        assert!(spec.row_grand_totals);
    }

    #[test]
    fn test_build_pivot_table_requires_ranges() {
        let err = build_pivot_table(json!({"DataRange": "A1:B2"}).as_object().unwrap(), "pivot")
            .unwrap_err();
        assert!(matches!(err, XlsxBuildError::MissingKey(_)));
    }

    #[test]
    fn test_pivot_refuses_uncommitted_sheet() {
        let ledger = derive_ledger();
        let err = derive_pivot_parts(&derive_spec(), 1, &ledger, "pivot").unwrap_err();
        assert!(matches!(err, XlsxBuildError::InvalidValue { .. }));
    }

    #[test]
    fn test_pivot_parts_from_committed_range() {
        let mut ledger = derive_ledger();
        ledger.commit("Data");
        let parts = derive_pivot_parts(&derive_spec(), 1, &ledger, "pivot").unwrap();

        assert_eq!(parts.sheet_name, "Data");
        assert!(parts.cache_definition_xml.contains(r#"refreshOnLoad="1""#));
        assert!(parts
            .cache_definition_xml
            .contains(r#"<worksheetSource ref="A1:B4" sheet="Data"/>"#));
        assert!(parts
            .cache_definition_xml
            .contains(r#"<sharedItems count="2"><s v="East"/><s v="West"/></sharedItems>"#));
        assert!(parts.cache_definition_xml.contains(r#"minValue="2" maxValue="10""#));
        assert!(parts.cache_records_xml.contains(r#"<r><x v="0"/><n v="10"/></r>"#));
        assert!(parts.cache_records_xml.contains(r#"<r><x v="1"/><n v="5.5"/></r>"#));
        assert!(parts.pivot_table_xml.contains(r#"<location ref="D2:F10" firstHeaderRow="1" firstDataRow="1" firstDataCol="1"/>"#));
        assert!(parts.pivot_table_xml.contains(r#"<item t="default"/>"#));
        assert!(parts.pivot_table_xml.contains(r#"name="Sum of Sales""#));
        assert!(parts.pivot_table_xml.contains(r#"name="PivotStyleLight16""#));
        assert!(!parts.pivot_table_xml.contains(r#"<field x="-2"/>"#));
    }

    #[test]
    fn test_pivot_multiple_data_fields_add_values_field() {
        let mut ledger = derive_ledger();
        ledger.commit("Data");
        let mut spec = derive_spec();
        spec.data.push(SpecPivotField {
            data: "Sales".to_string(),
            subtotal: "Max".to_string(),
            ..SpecPivotField::default()
        });
        let parts = derive_pivot_parts(&spec, 2, &ledger, "pivot").unwrap();
        assert!(parts.pivot_table_xml.contains(r#"<colFields count="1"><field x="-2"/></colFields>"#));
        assert!(parts.pivot_table_xml.contains(r#"subtotal="max""#));
        assert!(parts.pivot_table_xml.contains(r#"cacheId="2""#));
    }

    #[test]
    fn test_pivot_rejects_unknown_column() {
        let mut ledger = derive_ledger();
        ledger.commit("Data");
        let mut spec = derive_spec();
        spec.rows[0].data = "Missing".to_string();
        assert!(derive_pivot_parts(&spec, 1, &ledger, "pivot").is_err());
    }
}
