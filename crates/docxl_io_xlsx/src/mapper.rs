//! Declarative field mapper from untyped JSON maps into typed specs.
//!
//! Each destination type declares its wire keys once as a slice of
//! [`SpecField`]. The semantic kind of a key is an [`EnumFieldSetter`]
//! variant carrying the typed setter, so conversion dispatch is an
//! exhaustive `match` and a missing kind fails to compile.

use serde_json::{Map, Value};

use crate::error::{Result, XlsxBuildError};
use crate::spec::{
    EnumChartLineType, EnumDataLabelPosition, SpecChartAxis, SpecChartDimension, SpecChartLegend,
    SpecChartLine, SpecChartMarker, SpecChartNumFmt, SpecChartPlotArea, SpecChartSeries, SpecFill,
    SpecFont, SpecGraphicOptions, SpecPaneSelection, SpecPivotField, SpecRichTextRun,
};

/// Semantic kind of one declared key, carrying its typed setter.
pub enum EnumFieldSetter<T> {
    Str(fn(&mut T, String)),
    /// Number truncated toward zero.
    Int(fn(&mut T, i64)),
    /// Number truncated toward zero; negative values are rejected.
    UInt(fn(&mut T, u64)),
    Bool(fn(&mut T, bool)),
    Float(fn(&mut T, f64)),
    OptBool(fn(&mut T, Option<bool>)),
    OptFloat(fn(&mut T, Option<f64>)),
    OptUInt(fn(&mut T, Option<u64>)),
    /// A lone string or a list of strings.
    StrList(fn(&mut T, Vec<String>)),
    Font(fn(&mut T, SpecFont)),
    Fill(fn(&mut T, SpecFill)),
    Line(fn(&mut T, SpecChartLine)),
    LineType(fn(&mut T, EnumChartLineType)),
    Marker(fn(&mut T, SpecChartMarker)),
    LabelPosition(fn(&mut T, EnumDataLabelPosition)),
    NumFmt(fn(&mut T, SpecChartNumFmt)),
    RichText(fn(&mut T, Vec<SpecRichTextRun>)),
    Series(fn(&mut T, Vec<SpecChartSeries>)),
    Axis(fn(&mut T, SpecChartAxis)),
    Legend(fn(&mut T, SpecChartLegend)),
    PlotArea(fn(&mut T, SpecChartPlotArea)),
    Dimension(fn(&mut T, SpecChartDimension)),
    GraphicOptions(fn(&mut T, SpecGraphicOptions)),
    PivotFields(fn(&mut T, Vec<SpecPivotField>)),
    Selection(fn(&mut T, Vec<SpecPaneSelection>)),
    /// Comment paragraphs: runs with inline font keys.
    Paragraphs(fn(&mut T, Vec<SpecRichTextRun>)),
}

/// One declared wire key.
pub struct SpecField<T> {
    pub name: &'static str,
    pub setter: EnumFieldSetter<T>,
}

impl<T> SpecField<T> {
    pub fn new(name: &'static str, setter: EnumFieldSetter<T>) -> Self {
        Self { name, setter }
    }
}

/// Hydrate `dest` from `source` using the declared `fields`.
///
/// Absent and `null` keys are skipped and keep the destination's current value.
/// Keys not declared in `fields` are ignored.
pub fn map_fields<T>(
    dest: &mut T,
    source: &Map<String, Value>,
    fields: &[SpecField<T>],
    path: &str,
) -> Result<()> {
    for field in fields {
        let Some(value) = source.get(field.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let path_field = derive_field_path(path, field.name);
        let path_field = path_field.as_str();

        match &field.setter {
            EnumFieldSetter::Str(set) => set(dest, cast_str(value, path_field)?),
            EnumFieldSetter::Int(set) => set(dest, cast_i64(value, path_field)?),
            EnumFieldSetter::UInt(set) => set(dest, cast_u64(value, path_field)?),
            EnumFieldSetter::Bool(set) => set(dest, cast_bool(value, path_field)?),
            EnumFieldSetter::Float(set) => set(dest, cast_f64(value, path_field)?),
            EnumFieldSetter::OptBool(set) => set(dest, Some(cast_bool(value, path_field)?)),
            EnumFieldSetter::OptFloat(set) => set(dest, Some(cast_f64(value, path_field)?)),
            EnumFieldSetter::OptUInt(set) => set(dest, Some(cast_u64(value, path_field)?)),
            EnumFieldSetter::StrList(set) => set(dest, cast_str_list(value, path_field)?),
            EnumFieldSetter::Font(set) => {
                set(dest, crate::style::build_font(cast_map(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::Fill(set) => {
                set(dest, crate::style::build_fill(cast_map(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::Line(set) => {
                set(dest, crate::chart::build_line(cast_map(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::LineType(set) => {
                let n_index = cast_i64(value, path_field)?;
                let line_type = EnumChartLineType::from_index(n_index).ok_or_else(|| {
                    XlsxBuildError::invalid(path_field, format!("unknown line type {n_index}"))
                })?;
                set(dest, line_type)
            }
            EnumFieldSetter::Marker(set) => {
                set(dest, crate::chart::build_marker(cast_map(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::LabelPosition(set) => {
                let n_index = cast_i64(value, path_field)?;
                let position = EnumDataLabelPosition::from_index(n_index).ok_or_else(|| {
                    XlsxBuildError::invalid(
                        path_field,
                        format!("unknown data label position {n_index}"),
                    )
                })?;
                set(dest, position)
            }
            EnumFieldSetter::NumFmt(set) => {
                set(dest, crate::chart::build_num_fmt(cast_map(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::RichText(set) => {
                set(dest, crate::chart::build_rich_text(cast_list(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::Series(set) => {
                set(dest, crate::chart::build_series_list(cast_list(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::Axis(set) => {
                set(dest, crate::chart::build_axis(cast_map(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::Legend(set) => {
                set(dest, crate::chart::build_legend(cast_map(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::PlotArea(set) => {
                set(dest, crate::chart::build_plot_area(cast_map(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::Dimension(set) => {
                set(dest, crate::chart::build_dimension(cast_map(value, path_field)?, path_field)?)
            }
            EnumFieldSetter::GraphicOptions(set) => set(
                dest,
                crate::chart::build_graphic_options(cast_map(value, path_field)?, path_field)?,
            ),
            EnumFieldSetter::PivotFields(set) => set(
                dest,
                crate::pivot::build_pivot_fields(cast_list(value, path_field)?, path_field)?,
            ),
            EnumFieldSetter::Selection(set) => set(
                dest,
                crate::sheet::build_pane_selections(cast_list(value, path_field)?, path_field)?,
            ),
            EnumFieldSetter::Paragraphs(set) => set(
                dest,
                crate::sheet::build_comment_paragraphs(cast_list(value, path_field)?, path_field)?,
            ),
        }
    }
    Ok(())
}

/// Join a parent path and a key for error messages.
pub fn derive_field_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Join a parent path and a list index for error messages.
pub fn derive_index_path(path: &str, idx: usize) -> String {
    format!("{path}[{idx}]")
}

////////////////////////////////////////////////////////////////////////////////
// #region ValueCasts

pub fn cast_str(value: &Value, path: &str) -> Result<String> {
    value
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| XlsxBuildError::schema(path, "string", value))
}

pub fn cast_bool(value: &Value, path: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| XlsxBuildError::schema(path, "bool", value))
}

pub fn cast_f64(value: &Value, path: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| XlsxBuildError::schema(path, "number", value))
}

pub fn cast_i64(value: &Value, path: &str) -> Result<i64> {
    Ok(cast_f64(value, path)?.trunc() as i64)
}

pub fn cast_u64(value: &Value, path: &str) -> Result<u64> {
    let val = cast_f64(value, path)?;
    if val < 0.0 {
        return Err(XlsxBuildError::invalid(
            path,
            format!("expected a non-negative number, found {val}"),
        ));
    }
    Ok(val.trunc() as u64)
}

pub fn cast_str_list(value: &Value, path: &str) -> Result<Vec<String>> {
    match value {
        Value::String(val) => Ok(vec![val.clone()]),
        Value::Array(l_values) => l_values
            .iter()
            .enumerate()
            .map(|(idx, val)| cast_str(val, &derive_index_path(path, idx)))
            .collect(),
        _ => Err(XlsxBuildError::schema(path, "string or list of strings", value)),
    }
}

pub fn cast_map<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| XlsxBuildError::schema(path, "object", value))
}

pub fn cast_list<'a>(value: &'a Value, path: &str) -> Result<&'a [Value]> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| XlsxBuildError::schema(path, "list", value))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ScalarHelpers

fn get_present<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|val| !val.is_null())
}

/// Read a bool, falling back to `default` when absent or null.
pub fn get_bool_value(map: &Map<String, Value>, key: &str, default: bool, path: &str) -> Result<bool> {
    match get_present(map, key) {
        Some(val) => cast_bool(val, &derive_field_path(path, key)),
        None => Ok(default),
    }
}

/// Read a number, falling back to `default` when absent or null.
pub fn get_f64_value(map: &Map<String, Value>, key: &str, default: f64, path: &str) -> Result<f64> {
    match get_present(map, key) {
        Some(val) => cast_f64(val, &derive_field_path(path, key)),
        None => Ok(default),
    }
}

/// Read a string, empty when absent or null.
pub fn get_str_value(map: &Map<String, Value>, key: &str, path: &str) -> Result<String> {
    match get_present(map, key) {
        Some(val) => cast_str(val, &derive_field_path(path, key)),
        None => Ok(String::new()),
    }
}

/// Read a list, empty when absent or null.
pub fn get_list_value<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a [Value]> {
    match get_present(map, key) {
        Some(val) => cast_list(val, &derive_field_path(path, key)),
        None => Ok(&[]),
    }
}

/// Read a nested map, `None` when absent or null.
pub fn get_map_value<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<&'a Map<String, Value>>> {
    match get_present(map, key) {
        Some(val) => cast_map(val, &derive_field_path(path, key)).map(Some),
        None => Ok(None),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq)]
    struct SpecProbe {
        label: String,
        n_count: i64,
        n_size: u64,
        if_on: bool,
        ratio: f64,
        ratio_opt: Option<f64>,
        l_tags: Vec<String>,
    }

    fn derive_probe_fields() -> Vec<SpecField<SpecProbe>> {
        vec![
            SpecField::new("Label", EnumFieldSetter::Str(|p: &mut SpecProbe, v: String| p.label = v)),
            SpecField::new("Count", EnumFieldSetter::Int(|p: &mut SpecProbe, v: i64| p.n_count = v)),
            SpecField::new("Size", EnumFieldSetter::UInt(|p: &mut SpecProbe, v: u64| p.n_size = v)),
            SpecField::new("On", EnumFieldSetter::Bool(|p: &mut SpecProbe, v: bool| p.if_on = v)),
            SpecField::new("Ratio", EnumFieldSetter::Float(|p: &mut SpecProbe, v: f64| p.ratio = v)),
            SpecField::new(
                "RatioOpt",
                EnumFieldSetter::OptFloat(|p: &mut SpecProbe, v: Option<f64>| p.ratio_opt = v),
            ),
            SpecField::new(
                "Tags",
                EnumFieldSetter::StrList(|p: &mut SpecProbe, v: Vec<String>| p.l_tags = v),
            ),
        ]
    }

    fn map_probe(value: Value) -> Result<SpecProbe> {
        let mut probe = SpecProbe::default();
        let map = value.as_object().cloned().unwrap_or_default();
        map_fields(&mut probe, &map, &derive_probe_fields(), "probe")?;
        Ok(probe)
    }

    #[test]
    fn test_map_fields_converts_each_kind() {
        let probe = map_probe(json!({
            "Label": "x",
            "Count": -2.9,
            "Size": 3.7,
            "On": true,
            "Ratio": 0.5,
            "RatioOpt": 0.0,
            "Tags": "only",
            "Unknown": [1, 2]
        }))
        .unwrap();
        assert_eq!(probe.label, "x");
        assert_eq!(probe.n_count, -2);
        assert_eq!(probe.n_size, 3);
        assert!(probe.if_on);
        assert_eq!(probe.ratio, 0.5);
        assert_eq!(probe.ratio_opt, Some(0.0));
        assert_eq!(probe.l_tags, vec!["only".to_string()]);
    }

    #[test]
    fn test_map_fields_skips_absent_and_null() {
        let probe = map_probe(json!({"Label": null})).unwrap();
        assert_eq!(probe, SpecProbe::default());
    }

    #[test]
    fn test_map_fields_rejects_wrong_kind() {
        let err = map_probe(json!({"Count": "7"})).unwrap_err();
        match err {
            XlsxBuildError::Schema { path, expected, found } => {
                assert_eq!(path, "probe.Count");
                assert_eq!(expected, "number");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_map_fields_rejects_negative_uint() {
        let err = map_probe(json!({"Size": -1})).unwrap_err();
        assert!(matches!(err, XlsxBuildError::InvalidValue { .. }));
    }

    #[test]
    fn test_cast_str_list_accepts_list() {
        let l_values = cast_str_list(&json!(["a", "b"]), "tags").unwrap();
        assert_eq!(l_values, vec!["a".to_string(), "b".to_string()]);
        assert!(cast_str_list(&json!(["a", 1]), "tags").is_err());
    }

    #[test]
    fn test_scalar_helpers_default_and_validate() {
        let map = json!({"a": true, "b": 2.5, "c": "text", "d": null})
            .as_object()
            .cloned()
            .unwrap();
        assert!(get_bool_value(&map, "a", false, "").unwrap());
        assert!(!get_bool_value(&map, "missing", false, "").unwrap());
        assert_eq!(get_f64_value(&map, "b", 100.0, "").unwrap(), 2.5);
        assert_eq!(get_f64_value(&map, "d", 100.0, "").unwrap(), 100.0);
        assert_eq!(get_str_value(&map, "c", "").unwrap(), "text");
        assert!(get_bool_value(&map, "c", false, "").is_err());
        assert!(get_list_value(&map, "missing", "").unwrap().is_empty());
        assert!(get_map_value(&map, "d", "").unwrap().is_none());
    }
}
