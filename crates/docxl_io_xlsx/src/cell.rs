//! Cell classification and cell writes.

use rust_xlsxwriter::{Formula, Worksheet};
use serde_json::Value;

use crate::conf::C_FORMULA_MARKER;
use crate::error::{Result, XlsxBuildError};
use crate::mapper::derive_index_path;
use crate::spec::{EnumCellValue, EnumRawCell};
use crate::style::{StyleHandle, StyleRegistry};

/// Cell ready to be written: classified value plus at most one style handle.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecResolvedCell {
    pub value: EnumCellValue,
    pub style: Option<StyleHandle>,
}

/// Parse one raw grid entry.
///
/// `null` skips the position, `[]` is an empty cell, `[value, style]` is a styled
/// value and a bare scalar is an unstyled value.
pub fn parse_raw_cell(value: &Value, path: &str) -> Result<EnumRawCell> {
    match value {
        Value::Null => Ok(EnumRawCell::Skip),
        Value::Array(l_parts) => match l_parts.as_slice() {
            [] => Ok(EnumRawCell::Empty),
            [val] => Ok(EnumRawCell::Bare(val.clone())),
            [val, Value::Null] => Ok(EnumRawCell::Bare(val.clone())),
            [val, Value::String(style)] => Ok(EnumRawCell::Styled(val.clone(), style.clone())),
            [_, other] => Err(XlsxBuildError::schema(
                derive_index_path(path, 1),
                "style name",
                other,
            )),
            _ => Err(XlsxBuildError::invalid(
                path,
                format!("expected [value, style], found {} items", l_parts.len()),
            )),
        },
        Value::Object(_) => Err(XlsxBuildError::schema(path, "cell", value)),
        scalar => Ok(EnumRawCell::Bare(scalar.clone())),
    }
}

/// Parse one grid row.
pub fn parse_raw_row(value: &Value, path: &str) -> Result<Vec<EnumRawCell>> {
    let l_values = value
        .as_array()
        .ok_or_else(|| XlsxBuildError::schema(path, "row list", value))?;
    l_values
        .iter()
        .enumerate()
        .map(|(idx, val)| parse_raw_cell(val, &derive_index_path(path, idx)))
        .collect()
}

/// Classify a scalar as a literal or a formula.
pub fn classify_value(value: &Value, path: &str) -> Result<EnumCellValue> {
    match value {
        Value::Null => Ok(EnumCellValue::None),
        Value::Bool(val) => Ok(EnumCellValue::Boolean(*val)),
        Value::Number(val) => val
            .as_f64()
            .map(EnumCellValue::Number)
            .ok_or_else(|| XlsxBuildError::schema(path, "finite number", value)),
        Value::String(val) if val.starts_with(C_FORMULA_MARKER) => {
            Ok(EnumCellValue::Formula(val.clone()))
        }
        Value::String(val) => Ok(EnumCellValue::String(val.clone())),
        Value::Array(_) | Value::Object(_) => Err(XlsxBuildError::schema(path, "scalar", value)),
    }
}

/// Resolve a raw cell against the registry. `None` means the position is skipped.
///
/// Under `no_style`, bare and styled values are written without a format;
/// `[]` keeps the default style in every mode.
pub fn resolve_cell(
    raw: &EnumRawCell,
    registry: &StyleRegistry,
    no_style: bool,
    path: &str,
) -> Result<Option<SpecResolvedCell>> {
    let cell = match raw {
        EnumRawCell::Skip => return Ok(None),
        EnumRawCell::Empty => SpecResolvedCell {
            value: EnumCellValue::String(String::new()),
            style: Some(registry.handle_default()?),
        },
        EnumRawCell::Bare(value) => SpecResolvedCell {
            value: classify_value(value, path)?,
            style: if no_style {
                None
            } else {
                Some(registry.handle_default()?)
            },
        },
        EnumRawCell::Styled(value, style) => SpecResolvedCell {
            value: classify_value(value, path)?,
            style: if no_style {
                None
            } else {
                Some(registry.resolve(style)?)
            },
        },
    };
    Ok(Some(cell))
}

/// Resolve a whole row, keeping skipped positions as `None`.
pub fn resolve_row(
    row: &[EnumRawCell],
    registry: &StyleRegistry,
    no_style: bool,
    path: &str,
) -> Result<Vec<Option<SpecResolvedCell>>> {
    row.iter()
        .enumerate()
        .map(|(idx, raw)| resolve_cell(raw, registry, no_style, &derive_index_path(path, idx)))
        .collect()
}

/// Write one resolved cell at zero-based coordinates.
pub fn write_resolved_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    cell: &SpecResolvedCell,
    registry: &StyleRegistry,
) -> Result<()> {
    let format = match cell.style {
        Some(handle) => Some(registry.format(handle)?),
        None => None,
    };

    match (&cell.value, format) {
        (EnumCellValue::None, Some(fmt)) => {
            worksheet.write_blank(row, col, fmt)?;
        }
        (EnumCellValue::None, None) => {}
        (EnumCellValue::String(val), Some(fmt)) => {
            worksheet.write_string_with_format(row, col, val, fmt)?;
        }
        (EnumCellValue::String(val), None) => {
            worksheet.write_string(row, col, val)?;
        }
        (EnumCellValue::Number(val), Some(fmt)) => {
            worksheet.write_number_with_format(row, col, *val, fmt)?;
        }
        (EnumCellValue::Number(val), None) => {
            worksheet.write_number(row, col, *val)?;
        }
        (EnumCellValue::Boolean(val), Some(fmt)) => {
            worksheet.write_boolean_with_format(row, col, *val, fmt)?;
        }
        (EnumCellValue::Boolean(val), None) => {
            worksheet.write_boolean(row, col, *val)?;
        }
        (EnumCellValue::Formula(val), Some(fmt)) => {
            worksheet.write_formula_with_format(row, col, Formula::new(val.as_str()), fmt)?;
        }
        (EnumCellValue::Formula(val), None) => {
            worksheet.write_formula(row, col, Formula::new(val.as_str()))?;
        }
    }
    Ok(())
}

/// Text of a committed cell as used for table headers and pivot fields.
pub fn derive_cell_text(value: &EnumCellValue) -> String {
    match value {
        EnumCellValue::None => String::new(),
        EnumCellValue::String(val) | EnumCellValue::Formula(val) => val.clone(),
        EnumCellValue::Number(val) => derive_number_text(*val),
        EnumCellValue::Boolean(val) => (if *val { "TRUE" } else { "FALSE" }).to_string(),
    }
}

/// Render a number without a trailing `.0` for integral values.
pub fn derive_number_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Format;
    use serde_json::json;

    fn derive_registry() -> StyleRegistry {
        let mut registry = StyleRegistry::new();
        registry
            .register(crate::conf::C_DEFAULT_STYLE, Format::new())
            .unwrap();
        registry
            .register("style1", Format::new().set_bold())
            .unwrap();
        registry
    }

    #[test]
    fn test_parse_raw_cell_shapes() {
        assert_eq!(parse_raw_cell(&json!(null), "c").unwrap(), EnumRawCell::Skip);
        assert_eq!(parse_raw_cell(&json!([]), "c").unwrap(), EnumRawCell::Empty);
        assert_eq!(
            parse_raw_cell(&json!(["x", "style1"]), "c").unwrap(),
            EnumRawCell::Styled(json!("x"), "style1".to_string())
        );
        assert_eq!(parse_raw_cell(&json!(3), "c").unwrap(), EnumRawCell::Bare(json!(3)));
        assert!(parse_raw_cell(&json!({"v": 1}), "c").is_err());
        assert!(parse_raw_cell(&json!(["x", 1]), "c").is_err());
        assert!(parse_raw_cell(&json!(["x", "s", "t"]), "c").is_err());
    }

    #[test]
    fn test_empty_cell_resolves_to_default_style() {
        let registry = derive_registry();
        for no_style in [false, true] {
            let cell = resolve_cell(&EnumRawCell::Empty, &registry, no_style, "c")
                .unwrap()
                .unwrap();
            assert_eq!(cell.value, EnumCellValue::String(String::new()));
            assert_eq!(cell.style, Some(registry.handle_default().unwrap()));
        }
    }

    #[test]
    fn test_formula_is_classified_by_marker() {
        let registry = derive_registry();
        let cell = resolve_cell(
            &EnumRawCell::Styled(json!("=SUM(A1:A2)"), "style1".to_string()),
            &registry,
            false,
            "c",
        )
        .unwrap()
        .unwrap();
        assert_eq!(cell.value, EnumCellValue::Formula("=SUM(A1:A2)".to_string()));
        assert_eq!(cell.style, Some(registry.resolve("style1").unwrap()));

        let cell = resolve_cell(&EnumRawCell::Bare(json!("=A1")), &registry, true, "c")
            .unwrap()
            .unwrap();
        assert_eq!(cell.value, EnumCellValue::Formula("=A1".to_string()));
        assert_eq!(cell.style, None);
    }

    #[test]
    fn test_unknown_style_is_rejected() {
        let registry = derive_registry();
        let err = resolve_cell(
            &EnumRawCell::Styled(json!(1), "nope".to_string()),
            &registry,
            false,
            "c",
        )
        .unwrap_err();
        assert!(matches!(err, XlsxBuildError::UnknownStyle(_)));
    }

    #[test]
    fn test_nested_value_is_schema_error() {
        let registry = derive_registry();
        let err = resolve_cell(&EnumRawCell::Bare(json!([1])), &registry, false, "c").unwrap_err();
        assert!(matches!(err, XlsxBuildError::Schema { .. }));
    }

    #[test]
    fn test_derive_cell_text() {
        assert_eq!(derive_cell_text(&EnumCellValue::Number(3.0)), "3");
        assert_eq!(derive_cell_text(&EnumCellValue::Number(2.5)), "2.5");
        assert_eq!(derive_cell_text(&EnumCellValue::Boolean(true)), "TRUE");
    }
}
