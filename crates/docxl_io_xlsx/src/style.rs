//! Named cell styles: sub-builders, translation to encoder formats and the
//! per-build registry.

use std::collections::BTreeMap;

use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, FormatPattern, FormatScript, FormatUnderline};
use serde_json::{Map, Value};

use crate::conf::C_DEFAULT_STYLE;
use crate::error::{Result, XlsxBuildError};
use crate::mapper::{
    EnumFieldSetter, SpecField, cast_map, derive_field_path, get_map_value, map_fields,
};
use crate::spec::{
    SpecAlignment, SpecBorder, SpecBorderEdge, SpecCellProtection, SpecFill, SpecFont, SpecStyle,
    SpecXlsxBuildReport,
};
use crate::util::parse_hex_color;

const C_KEY_CUSTOM_NUM_FMT: &str = "CustomNumFmt";

////////////////////////////////////////////////////////////////////////////////
// #region SubBuilders

fn derive_font_fields() -> Vec<SpecField<SpecFont>> {
    vec![
        SpecField::new("Bold", EnumFieldSetter::Bool(|f: &mut SpecFont, v: bool| f.bold = v)),
        SpecField::new("Italic", EnumFieldSetter::Bool(|f: &mut SpecFont, v: bool| f.italic = v)),
        SpecField::new(
            "Underline",
            EnumFieldSetter::Str(|f: &mut SpecFont, v: String| f.underline = v),
        ),
        SpecField::new("Family", EnumFieldSetter::Str(|f: &mut SpecFont, v: String| f.family = v)),
        SpecField::new("Size", EnumFieldSetter::Float(|f: &mut SpecFont, v: f64| f.size = v)),
        SpecField::new("Strike", EnumFieldSetter::Bool(|f: &mut SpecFont, v: bool| f.strike = v)),
        SpecField::new("Color", EnumFieldSetter::Str(|f: &mut SpecFont, v: String| f.color = v)),
        SpecField::new(
            "VertAlign",
            EnumFieldSetter::Str(|f: &mut SpecFont, v: String| f.vert_align = v),
        ),
    ]
}

pub fn build_font(map: &Map<String, Value>, path: &str) -> Result<SpecFont> {
    let mut font = SpecFont::default();
    map_fields(&mut font, map, &derive_font_fields(), path)?;
    Ok(font)
}

pub fn build_fill(map: &Map<String, Value>, path: &str) -> Result<SpecFill> {
    let l_fields = vec![
        SpecField::new("Type", EnumFieldSetter::Str(|f: &mut SpecFill, v: String| f.fill_type = v)),
        SpecField::new(
            "Color",
            EnumFieldSetter::StrList(|f: &mut SpecFill, v: Vec<String>| f.color = v),
        ),
        SpecField::new("Pattern", EnumFieldSetter::Int(|f: &mut SpecFill, v: i64| f.pattern = v)),
        SpecField::new("Shading", EnumFieldSetter::Int(|f: &mut SpecFill, v: i64| f.shading = v)),
    ];
    let mut fill = SpecFill::default();
    map_fields(&mut fill, map, &l_fields, path)?;
    Ok(fill)
}

/// Build the four directional edges; absent edges stay unset.
pub fn build_border(map: &Map<String, Value>, path: &str) -> Result<SpecBorder> {
    let l_fields = vec![
        SpecField::new(
            "Color",
            EnumFieldSetter::Str(|e: &mut SpecBorderEdge, v: String| e.color = v),
        ),
        SpecField::new("Style", EnumFieldSetter::Int(|e: &mut SpecBorderEdge, v: i64| e.style = v)),
    ];
    let mut border = SpecBorder::default();
    for direction in ["left", "top", "bottom", "right"] {
        let Some(map_edge) = get_map_value(map, direction, path)? else {
            continue;
        };
        let mut edge = SpecBorderEdge::default();
        map_fields(&mut edge, map_edge, &l_fields, &derive_field_path(path, direction))?;
        match direction {
            "left" => border.left = Some(edge),
            "top" => border.top = Some(edge),
            "bottom" => border.bottom = Some(edge),
            _ => border.right = Some(edge),
        }
    }
    Ok(border)
}

pub fn build_alignment(map: &Map<String, Value>, path: &str) -> Result<SpecAlignment> {
    let l_fields = vec![
        SpecField::new(
            "Horizontal",
            EnumFieldSetter::Str(|a: &mut SpecAlignment, v: String| a.horizontal = v),
        ),
        SpecField::new("Indent", EnumFieldSetter::Int(|a: &mut SpecAlignment, v: i64| a.indent = v)),
        SpecField::new(
            "JustifyLastLine",
            EnumFieldSetter::Bool(|a: &mut SpecAlignment, v: bool| a.justify_last_line = v),
        ),
        SpecField::new(
            "ReadingOrder",
            EnumFieldSetter::UInt(|a: &mut SpecAlignment, v: u64| a.reading_order = v),
        ),
        SpecField::new(
            "RelativeIndent",
            EnumFieldSetter::Int(|a: &mut SpecAlignment, v: i64| a.relative_indent = v),
        ),
        SpecField::new(
            "ShrinkToFit",
            EnumFieldSetter::Bool(|a: &mut SpecAlignment, v: bool| a.shrink_to_fit = v),
        ),
        SpecField::new(
            "TextRotation",
            EnumFieldSetter::Int(|a: &mut SpecAlignment, v: i64| a.text_rotation = v),
        ),
        SpecField::new(
            "Vertical",
            EnumFieldSetter::Str(|a: &mut SpecAlignment, v: String| a.vertical = v),
        ),
        SpecField::new(
            "WrapText",
            EnumFieldSetter::Bool(|a: &mut SpecAlignment, v: bool| a.wrap_text = v),
        ),
    ];
    let mut alignment = SpecAlignment::default();
    map_fields(&mut alignment, map, &l_fields, path)?;
    Ok(alignment)
}

pub fn build_protection(map: &Map<String, Value>, path: &str) -> Result<SpecCellProtection> {
    let l_fields = vec![
        SpecField::new(
            "Hidden",
            EnumFieldSetter::Bool(|p: &mut SpecCellProtection, v: bool| p.hidden = v),
        ),
        SpecField::new(
            "Locked",
            EnumFieldSetter::OptBool(|p: &mut SpecCellProtection, v: Option<bool>| p.locked = v),
        ),
    ];
    let mut protection = SpecCellProtection::default();
    map_fields(&mut protection, map, &l_fields, path)?;
    Ok(protection)
}

/// Build one named style. `CustomNumFmt` must be present.
pub fn build_style(map: &Map<String, Value>, path: &str) -> Result<SpecStyle> {
    let empty = Map::new();
    let custom_num_fmt = match map.get(C_KEY_CUSTOM_NUM_FMT) {
        Some(Value::String(val)) => val.clone(),
        Some(Value::Null) | None => {
            return Err(XlsxBuildError::MissingKey(derive_field_path(
                path,
                C_KEY_CUSTOM_NUM_FMT,
            )));
        }
        Some(other) => {
            return Err(XlsxBuildError::schema(
                derive_field_path(path, C_KEY_CUSTOM_NUM_FMT),
                "string",
                other,
            ));
        }
    };

    Ok(SpecStyle {
        font: build_font(
            get_map_value(map, "Font", path)?.unwrap_or(&empty),
            &derive_field_path(path, "Font"),
        )?,
        fill: build_fill(
            get_map_value(map, "Fill", path)?.unwrap_or(&empty),
            &derive_field_path(path, "Fill"),
        )?,
        border: build_border(
            get_map_value(map, "Border", path)?.unwrap_or(&empty),
            &derive_field_path(path, "Border"),
        )?,
        alignment: build_alignment(
            get_map_value(map, "Alignment", path)?.unwrap_or(&empty),
            &derive_field_path(path, "Alignment"),
        )?,
        protection: build_protection(
            get_map_value(map, "Protection", path)?.unwrap_or(&empty),
            &derive_field_path(path, "Protection"),
        )?,
        custom_num_fmt,
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Registry

/// Opaque, immutable handle of a registered style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleHandle(u32);

impl StyleHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Name to handle map plus the encoder format behind each handle.
///
/// One registry per build; every name is registered once.
#[derive(Debug, Default)]
pub struct StyleRegistry {
    l_formats: Vec<Format>,
    dict_handle_by_name: BTreeMap<String, StyleHandle>,
}

impl StyleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `format` under `name`. Names are never re-registered.
    pub fn register(&mut self, name: &str, format: Format) -> Result<StyleHandle> {
        if self.dict_handle_by_name.contains_key(name) {
            return Err(XlsxBuildError::invalid(
                derive_field_path("style", name),
                "style is already registered",
            ));
        }
        let n_index = u32::try_from(self.l_formats.len())
            .map_err(|_| XlsxBuildError::invalid("style", "too many styles"))?;
        let handle = StyleHandle(n_index);
        self.l_formats.push(format);
        self.dict_handle_by_name.insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Look up the handle of a registered style.
    pub fn resolve(&self, name: &str) -> Result<StyleHandle> {
        self.dict_handle_by_name
            .get(name)
            .copied()
            .ok_or_else(|| XlsxBuildError::UnknownStyle(name.to_string()))
    }

    /// Handle of `DEFAULT_STYLE`.
    pub fn handle_default(&self) -> Result<StyleHandle> {
        self.resolve(C_DEFAULT_STYLE)
    }

    /// Encoder format behind `handle`.
    pub fn format(&self, handle: StyleHandle) -> Result<&Format> {
        self.l_formats
            .get(handle.index())
            .ok_or_else(|| XlsxBuildError::UnknownStyle(format!("#{}", handle.0)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dict_handle_by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.l_formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.l_formats.is_empty()
    }
}

/// Parse and register every named style, in declared order.
///
/// `DEFAULT_STYLE` is registered as an empty format when the document omits it.
pub fn build_style_registry(
    raw_styles: &Map<String, Value>,
    report: &mut SpecXlsxBuildReport,
) -> Result<StyleRegistry> {
    let mut registry = StyleRegistry::new();
    for (name, raw) in raw_styles {
        let path = derive_field_path("style", name);
        let spec = build_style(cast_map(raw, &path)?, &path)?;
        let format = derive_format_from_style(&spec, &path, report)?;
        registry.register(name, format)?;
    }
    if !registry.contains(C_DEFAULT_STYLE) {
        registry.register(C_DEFAULT_STYLE, Format::new())?;
    }
    log::debug!("registered {} styles", registry.len());
    Ok(registry)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FormatTranslation

/// Parse a color string for a style field; invalid colors are input errors.
pub fn derive_color(value: &str, path: &str) -> Result<Color> {
    parse_hex_color(value)
        .map(Color::RGB)
        .ok_or_else(|| XlsxBuildError::invalid(path, format!("invalid color `{value}`")))
}

/// Translate a parsed style into an encoder format.
pub fn derive_format_from_style(
    spec: &SpecStyle,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) -> Result<Format> {
    let mut format = Format::new();
    format = apply_font(format, &spec.font, &derive_field_path(path, "Font"))?;
    format = apply_fill(format, &spec.fill, &derive_field_path(path, "Fill"), report)?;
    format = apply_border(format, &spec.border, &derive_field_path(path, "Border"))?;
    format = apply_alignment(format, &spec.alignment, &derive_field_path(path, "Alignment"))?;

    if spec.protection.hidden {
        format = format.set_hidden();
    }
    if spec.protection.locked == Some(false) {
        format = format.set_unlocked();
    }
    if !spec.custom_num_fmt.is_empty() {
        format = format.set_num_format(spec.custom_num_fmt.as_str());
    }
    Ok(format)
}

fn apply_font(mut format: Format, font: &SpecFont, path: &str) -> Result<Format> {
    if font.bold {
        format = format.set_bold();
    }
    if font.italic {
        format = format.set_italic();
    }
    if font.strike {
        format = format.set_font_strikethrough();
    }
    if !font.family.is_empty() {
        format = format.set_font_name(font.family.as_str());
    }
    if font.size > 0.0 {
        format = format.set_font_size(font.size);
    }
    if !font.color.is_empty() {
        format = format.set_font_color(derive_color(&font.color, &derive_field_path(path, "Color"))?);
    }
    if !font.underline.is_empty() {
        let underline = derive_format_underline(&font.underline).ok_or_else(|| {
            XlsxBuildError::invalid(
                derive_field_path(path, "Underline"),
                format!("unknown underline `{}`", font.underline),
            )
        })?;
        format = format.set_underline(underline);
    }
    match font.vert_align.trim() {
        "" | "baseline" => {}
        "superscript" => format = format.set_font_script(FormatScript::Superscript),
        "subscript" => format = format.set_font_script(FormatScript::Subscript),
        other => {
            return Err(XlsxBuildError::invalid(
                derive_field_path(path, "VertAlign"),
                format!("unknown vertical alignment `{other}`"),
            ));
        }
    }
    Ok(format)
}

fn apply_fill(
    mut format: Format,
    fill: &SpecFill,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) -> Result<Format> {
    let Some(color_first) = fill.color.first() else {
        return Ok(format);
    };
    let color = derive_color(color_first, &derive_field_path(path, "Color"))?;

    match fill.fill_type.as_str() {
        "gradient" => {
            report.warn(format!(
                "{path}: gradient fills are not supported; using a solid fill of {color_first}"
            ));
            format = format.set_background_color(color);
        }
        "pattern" | "" => {
            let pattern = derive_format_pattern(fill.pattern).ok_or_else(|| {
                XlsxBuildError::invalid(
                    derive_field_path(path, "Pattern"),
                    format!("unknown fill pattern {}", fill.pattern),
                )
            })?;
            match pattern {
                FormatPattern::None => {}
                FormatPattern::Solid => format = format.set_background_color(color),
                other => {
                    format = format.set_pattern(other).set_foreground_color(color);
                    if let Some(color_second) = fill.color.get(1) {
                        format = format.set_background_color(derive_color(
                            color_second,
                            &derive_field_path(path, "Color"),
                        )?);
                    }
                }
            }
        }
        other => {
            return Err(XlsxBuildError::invalid(
                derive_field_path(path, "Type"),
                format!("unknown fill type `{other}`"),
            ));
        }
    }
    Ok(format)
}

fn apply_border(mut format: Format, border: &SpecBorder, path: &str) -> Result<Format> {
    if let Some(edge) = &border.left {
        format = format.set_border_left(derive_format_border(edge.style));
        if !edge.color.is_empty() {
            format = format.set_border_left_color(derive_color(&edge.color, &derive_field_path(path, "left"))?);
        }
    }
    if let Some(edge) = &border.top {
        format = format.set_border_top(derive_format_border(edge.style));
        if !edge.color.is_empty() {
            format = format.set_border_top_color(derive_color(&edge.color, &derive_field_path(path, "top"))?);
        }
    }
    if let Some(edge) = &border.bottom {
        format = format.set_border_bottom(derive_format_border(edge.style));
        if !edge.color.is_empty() {
            format = format.set_border_bottom_color(derive_color(
                &edge.color,
                &derive_field_path(path, "bottom"),
            )?);
        }
    }
    if let Some(edge) = &border.right {
        format = format.set_border_right(derive_format_border(edge.style));
        if !edge.color.is_empty() {
            format = format.set_border_right_color(derive_color(
                &edge.color,
                &derive_field_path(path, "right"),
            )?);
        }
    }
    Ok(format)
}

fn apply_alignment(mut format: Format, alignment: &SpecAlignment, path: &str) -> Result<Format> {
    if !alignment.horizontal.is_empty() {
        let align = derive_format_align_horizontal(&alignment.horizontal).ok_or_else(|| {
            XlsxBuildError::invalid(
                derive_field_path(path, "Horizontal"),
                format!("unknown horizontal alignment `{}`", alignment.horizontal),
            )
        })?;
        format = format.set_align(align);
    }
    if !alignment.vertical.is_empty() {
        let align = derive_format_align_vertical(&alignment.vertical).ok_or_else(|| {
            XlsxBuildError::invalid(
                derive_field_path(path, "Vertical"),
                format!("unknown vertical alignment `{}`", alignment.vertical),
            )
        })?;
        format = format.set_align(align);
    }
    if alignment.indent > 0 {
        format = format.set_indent(u8::try_from(alignment.indent.min(250)).unwrap_or(250));
    }
    if alignment.text_rotation != 0 {
        format = format.set_rotation(derive_rotation(alignment.text_rotation));
    }
    if alignment.wrap_text {
        format = format.set_text_wrap();
    }
    if alignment.shrink_to_fit {
        format = format.set_shrink();
    }
    if alignment.reading_order > 0 {
        format = format.set_reading_direction(u8::try_from(alignment.reading_order.min(2)).unwrap_or(0));
    }
    Ok(format)
}

/// Excel stores downward angles as 91..=180 and stacked text as 255.
fn derive_rotation(value: i64) -> i16 {
    match value {
        255 => 270,
        91..=180 => -((value - 90) as i16),
        _ => value.clamp(-90, 90) as i16,
    }
}

fn derive_format_underline(value: &str) -> Option<FormatUnderline> {
    match value.trim() {
        "single" => Some(FormatUnderline::Single),
        "double" => Some(FormatUnderline::Double),
        "singleAccounting" => Some(FormatUnderline::SingleAccounting),
        "doubleAccounting" => Some(FormatUnderline::DoubleAccounting),
        "none" => Some(FormatUnderline::None),
        _ => None,
    }
}

/// Excel pattern index 0..=18.
fn derive_format_pattern(index: i64) -> Option<FormatPattern> {
    let l_patterns = [
        FormatPattern::None,
        FormatPattern::Solid,
        FormatPattern::MediumGray,
        FormatPattern::DarkGray,
        FormatPattern::LightGray,
        FormatPattern::DarkHorizontal,
        FormatPattern::DarkVertical,
        FormatPattern::DarkDown,
        FormatPattern::DarkUp,
        FormatPattern::DarkGrid,
        FormatPattern::DarkTrellis,
        FormatPattern::LightHorizontal,
        FormatPattern::LightVertical,
        FormatPattern::LightDown,
        FormatPattern::LightUp,
        FormatPattern::LightGrid,
        FormatPattern::LightTrellis,
        FormatPattern::Gray125,
        FormatPattern::Gray0625,
    ];
    usize::try_from(index)
        .ok()
        .and_then(|idx| l_patterns.get(idx).copied())
}

/// Excel border index 0..=13.
fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        8 => FormatBorder::MediumDashed,
        9 => FormatBorder::DashDot,
        10 => FormatBorder::MediumDashDot,
        11 => FormatBorder::DashDotDot,
        12 => FormatBorder::MediumDashDotDot,
        13 => FormatBorder::SlantDashDot,
        _ => FormatBorder::None,
    }
}

fn derive_format_align_horizontal(align: &str) -> Option<FormatAlign> {
    match align.trim() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "fill" => Some(FormatAlign::Fill),
        "justify" => Some(FormatAlign::Justify),
        "centerContinuous" | "center_across" => Some(FormatAlign::CenterAcross),
        "distributed" => Some(FormatAlign::Distributed),
        _ => None,
    }
}

fn derive_format_align_vertical(align: &str) -> Option<FormatAlign> {
    match align.trim() {
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "center" | "middle" => Some(FormatAlign::VerticalCenter),
        "justify" => Some(FormatAlign::VerticalJustify),
        "distributed" => Some(FormatAlign::VerticalDistributed),
        _ => None,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn derive_map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_build_style_reads_every_fragment() {
        let spec = build_style(
            &derive_map(json!({
                "Font": {"Bold": true, "Size": 11, "Color": "#FF0000", "VertAlign": "superscript"},
                "Fill": {"Type": "pattern", "Color": "#00FF00", "Pattern": 1},
                "Border": {"left": {"Color": "#000000", "Style": 1}},
                "Alignment": {"Horizontal": "center", "WrapText": true},
                "Protection": {"Locked": false},
                "CustomNumFmt": "0.00"
            })),
            "style.s",
        )
        .unwrap();
        assert!(spec.font.bold);
        assert_eq!(spec.font.size, 11.0);
        assert_eq!(spec.fill.color, vec!["#00FF00".to_string()]);
        assert_eq!(spec.fill.pattern, 1);
        assert_eq!(spec.border.left.as_ref().map(|e| e.style), Some(1));
        assert!(spec.border.right.is_none());
        assert!(spec.alignment.wrap_text);
        assert_eq!(spec.protection.locked, Some(false));
        assert_eq!(spec.custom_num_fmt, "0.00");
    }

    #[test]
    fn test_build_style_requires_custom_num_fmt() {
        let err = build_style(&derive_map(json!({"Font": {}})), "style.s").unwrap_err();
        assert!(matches!(err, XlsxBuildError::MissingKey(ref key) if key == "style.s.CustomNumFmt"));
    }

    #[test]
    fn test_build_style_rejects_wrong_kind() {
        let err = build_style(
            &derive_map(json!({"Font": {"Bold": "yes"}, "CustomNumFmt": ""})),
            "style.s",
        )
        .unwrap_err();
        assert!(matches!(err, XlsxBuildError::Schema { .. }));
    }

    #[test]
    fn test_registry_interns_names_once() {
        let mut report = SpecXlsxBuildReport::default();
        let registry = build_style_registry(
            &derive_map(json!({
                "style1": {"Font": {"Bold": true}, "CustomNumFmt": "0.00"},
                "style2": {"CustomNumFmt": ""}
            })),
            &mut report,
        )
        .unwrap();
        assert_eq!(registry.len(), 3);
        let handle = registry.resolve("style1").unwrap();
        assert_eq!(handle, registry.resolve("style1").unwrap());
        assert_ne!(handle, registry.resolve("style2").unwrap());
        assert!(registry.handle_default().is_ok());
        assert!(matches!(
            registry.resolve("missing"),
            Err(XlsxBuildError::UnknownStyle(_))
        ));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_registry_rejects_duplicate_registration() {
        let mut registry = StyleRegistry::new();
        registry.register("a", Format::new()).unwrap();
        assert!(registry.register("a", Format::new()).is_err());
    }

    #[test]
    fn test_gradient_fill_degrades_with_warning() {
        let mut report = SpecXlsxBuildReport::default();
        let registry = build_style_registry(
            &derive_map(json!({
                "g": {"Fill": {"Type": "gradient", "Color": ["#FFFFFF", "#000000"]}, "CustomNumFmt": ""}
            })),
            &mut report,
        )
        .unwrap();
        assert!(registry.contains("g"));
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_invalid_color_is_input_error() {
        let mut report = SpecXlsxBuildReport::default();
        let err = build_style_registry(
            &derive_map(json!({"bad": {"Font": {"Color": "blue"}, "CustomNumFmt": ""}})),
            &mut report,
        )
        .unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_derive_rotation_maps_excel_angles() {
        assert_eq!(derive_rotation(45), 45);
        assert_eq!(derive_rotation(135), -45);
        assert_eq!(derive_rotation(255), 270);
    }
}
