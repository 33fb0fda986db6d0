//! Stateless helpers: cell references, colors, index casts and password hashes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use sha2::Digest;

use crate::conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, N_PROTECTION_SALT_LEN,
};
use crate::error::{Result, XlsxBuildError};
use crate::spec::{EnumProtectionAlgorithm, SpecCellRange};

/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [char; 7] = ['*', ':', '?', '/', '\\', '[', ']'];

////////////////////////////////////////////////////////////////////////////////
// #region CellReferences

/// Parse column letters (`"A"`, `"$AB"`) into a zero-based index.
pub fn parse_column_letters(letters: &str) -> Option<u16> {
    let letters = letters.trim().trim_start_matches('$');
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut n_col: usize = 0;
    for chr in letters.chars() {
        if !chr.is_ascii_alphabetic() {
            return None;
        }
        n_col = n_col * 26 + (chr.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    if n_col == 0 || n_col > N_NCOLS_EXCEL_MAX {
        return None;
    }
    u16::try_from(n_col - 1).ok()
}

/// Render a zero-based column index as letters.
pub fn derive_column_letters(col: u16) -> String {
    let mut n_col = col as usize + 1;
    let mut l_chars = Vec::new();
    while n_col > 0 {
        let n_rem = (n_col - 1) % 26;
        l_chars.push((b'A' + n_rem as u8) as char);
        n_col = (n_col - 1) / 26;
    }
    l_chars.iter().rev().collect()
}

/// Parse an A1 reference (`"B3"`, `"$B$3"`) into zero-based `(row, col)`.
pub fn parse_cell_ref(cell: &str) -> Option<(u32, u16)> {
    let cell = cell.trim();
    let n_split = cell
        .char_indices()
        .find(|(idx, chr)| chr.is_ascii_digit() && *idx > 0)
        .map(|(idx, _)| idx)?;
    let (letters, digits) = cell.split_at(n_split);
    let letters = letters.trim_end_matches('$');
    let col = parse_column_letters(letters)?;
    let n_row: usize = digits.parse().ok()?;
    if n_row == 0 || n_row > N_NROWS_EXCEL_MAX {
        return None;
    }
    Some((u32::try_from(n_row - 1).ok()?, col))
}

/// Render zero-based `(row, col)` as an A1 reference.
pub fn derive_cell_ref(row: u32, col: u16) -> String {
    format!("{}{}", derive_column_letters(col), row + 1)
}

/// Parse `"A1:C3"` (or a single cell) into a normalized range.
pub fn parse_cell_range(range: &str) -> Option<SpecCellRange> {
    let (first, last) = match range.split_once(':') {
        Some((first, last)) => (first, last),
        None => (range, range),
    };
    let (row_a, col_a) = parse_cell_ref(first)?;
    let (row_b, col_b) = parse_cell_ref(last)?;
    Some(SpecCellRange {
        row_first: row_a.min(row_b),
        col_first: col_a.min(col_b),
        row_last: row_a.max(row_b),
        col_last: col_a.max(col_b),
    })
}

/// Render a range as `"A1:C3"`.
pub fn derive_range_ref(range: &SpecCellRange) -> String {
    format!(
        "{}:{}",
        derive_cell_ref(range.row_first, range.col_first),
        derive_cell_ref(range.row_last, range.col_last)
    )
}

/// Split `"Sheet1!A1:B2"` or `"'My Sheet'!A1:B2"` into sheet name and range text.
pub fn split_sheet_range(reference: &str) -> Option<(String, &str)> {
    let (sheet, range) = reference.trim().trim_start_matches('=').rsplit_once('!')?;
    let sheet = sheet
        .strip_prefix('\'')
        .and_then(|val| val.strip_suffix('\''))
        .map(|val| val.replace("''", "'"))
        .unwrap_or_else(|| sheet.to_string());
    if sheet.is_empty() || range.is_empty() {
        return None;
    }
    Some((sheet, range))
}

/// Cast a zero-based row index for the encoder.
pub fn cast_row_num(value: usize) -> Result<u32> {
    if value >= N_NROWS_EXCEL_MAX {
        return Err(XlsxBuildError::invalid("row", format!("row index overflow: {value}")));
    }
    u32::try_from(value)
        .map_err(|_| XlsxBuildError::invalid("row", format!("row index overflow: {value}")))
}

/// Cast a zero-based column index for the encoder.
pub fn cast_col_num(value: usize) -> Result<u16> {
    if value >= N_NCOLS_EXCEL_MAX {
        return Err(XlsxBuildError::invalid("col", format!("column index overflow: {value}")));
    }
    u16::try_from(value)
        .map_err(|_| XlsxBuildError::invalid("col", format!("column index overflow: {value}")))
}

/// Check a sheet name against Excel's naming rules.
pub fn validate_sheet_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(XlsxBuildError::invalid("sheet_order", "sheet name is empty"));
    }
    if name.chars().count() > N_LEN_EXCEL_SHEET_NAME_MAX {
        return Err(XlsxBuildError::invalid(
            "sheet_order",
            format!("sheet name `{name}` exceeds {N_LEN_EXCEL_SHEET_NAME_MAX} characters"),
        ));
    }
    if let Some(chr) = name.chars().find(|chr| TUP_EXCEL_ILLEGAL.contains(chr)) {
        return Err(XlsxBuildError::invalid(
            "sheet_order",
            format!("sheet name `{name}` contains illegal character `{chr}`"),
        ));
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Colors

/// Parse `"#RRGGBB"` / `"RRGGBB"` (or `"#AARRGGBB"`, alpha dropped) into RGB.
pub fn parse_hex_color(value: &str) -> Option<u32> {
    let hex = value.trim().trim_start_matches('#');
    if !hex.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    let hex = match hex.len() {
        6 => hex,
        8 => &hex[2..],
        _ => return None,
    };
    u32::from_str_radix(hex, 16).ok()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PasswordHashes

/// Legacy 16-bit workbook password hash, as upper-case hex.
pub fn hash_password_xor(password: &str) -> String {
    let l_chars: Vec<u16> = password.encode_utf16().collect();
    let mut hash: u16 = 0;
    for char_code in l_chars.iter().rev() {
        hash = ((hash >> 14) & 0x01) | ((hash << 1) & 0x7FFF);
        hash ^= char_code;
    }
    hash = ((hash >> 14) & 0x01) | ((hash << 1) & 0x7FFF);
    hash ^= l_chars.len() as u16;
    hash ^= 0xCE4B;
    format!("{hash:04X}")
}

/// Salt derived from the password so repeated builds stay byte-stable.
pub fn derive_protection_salt(password: &str) -> [u8; N_PROTECTION_SALT_LEN] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(b"docxl.workbook.protection");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut salt = [0u8; N_PROTECTION_SALT_LEN];
    salt.copy_from_slice(&digest[..N_PROTECTION_SALT_LEN]);
    salt
}

fn derive_iterated_hash<D: Digest>(salt: &[u8], password: &str, spin_count: u32) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(salt);
    for unit in password.encode_utf16() {
        hasher.update(unit.to_le_bytes());
    }
    let mut hash = hasher.finalize().to_vec();
    for n_iter in 0..spin_count {
        let mut hasher = D::new();
        hasher.update(&hash);
        hasher.update(n_iter.to_le_bytes());
        hash = hasher.finalize().to_vec();
    }
    hash
}

/// Salted, iterated hash as `(hash_b64, salt_b64)`.
///
/// Returns `None` for algorithms without a digest in this crate (`XOR`, `MD4`).
pub fn hash_password_iterated(
    algorithm: EnumProtectionAlgorithm,
    password: &str,
    spin_count: u32,
) -> Option<(String, String)> {
    let salt = derive_protection_salt(password);
    let hash = match algorithm {
        EnumProtectionAlgorithm::Md5 => derive_iterated_hash::<md5::Md5>(&salt, password, spin_count),
        EnumProtectionAlgorithm::Sha1 => {
            derive_iterated_hash::<sha1::Sha1>(&salt, password, spin_count)
        }
        EnumProtectionAlgorithm::Sha256 => {
            derive_iterated_hash::<sha2::Sha256>(&salt, password, spin_count)
        }
        EnumProtectionAlgorithm::Sha384 => {
            derive_iterated_hash::<sha2::Sha384>(&salt, password, spin_count)
        }
        EnumProtectionAlgorithm::Sha512 => {
            derive_iterated_hash::<sha2::Sha512>(&salt, password, spin_count)
        }
        EnumProtectionAlgorithm::Xor | EnumProtectionAlgorithm::Md4 => return None,
    };
    Some((BASE64_ENGINE.encode(hash), BASE64_ENGINE.encode(salt)))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters_round_trip_edges() {
        assert_eq!(parse_column_letters("A"), Some(0));
        assert_eq!(parse_column_letters("z"), Some(25));
        assert_eq!(parse_column_letters("AA"), Some(26));
        assert_eq!(parse_column_letters("XFD"), Some(16_383));
        assert_eq!(parse_column_letters("XFE"), None);
        assert_eq!(parse_column_letters(""), None);
        assert_eq!(derive_column_letters(0), "A");
        assert_eq!(derive_column_letters(27), "AB");
        assert_eq!(derive_column_letters(16_383), "XFD");
    }

    #[test]
    fn test_parse_cell_ref_accepts_absolute_markers() {
        assert_eq!(parse_cell_ref("A1"), Some((0, 0)));
        assert_eq!(parse_cell_ref("$C$12"), Some((11, 2)));
        assert_eq!(parse_cell_ref("C0"), None);
        assert_eq!(parse_cell_ref("12"), None);
        assert_eq!(parse_cell_ref("A"), None);
    }

    #[test]
    fn test_parse_cell_range_normalizes_corners() {
        let range = parse_cell_range("C5:A1").unwrap();
        assert_eq!(derive_range_ref(&range), "A1:C5");
        assert_eq!(range.n_rows(), 5);
        assert_eq!(range.n_cols(), 3);
        assert!(parse_cell_range("B2").unwrap().is_single_cell());
        assert_eq!(parse_cell_range("A1:"), None);
    }

    #[test]
    fn test_split_sheet_range_handles_quotes() {
        assert_eq!(
            split_sheet_range("Sheet1!A1:E31"),
            Some(("Sheet1".to_string(), "A1:E31"))
        );
        assert_eq!(
            split_sheet_range("'Q1 ''Sales'''!$A$1:$B$2"),
            Some(("Q1 'Sales'".to_string(), "$A$1:$B$2"))
        );
        assert_eq!(split_sheet_range("A1:B2"), None);
    }

    #[test]
    fn test_validate_sheet_name() {
        assert!(validate_sheet_name("Report").is_ok());
        assert!(validate_sheet_name("a/b").is_err());
        assert!(validate_sheet_name(&"x".repeat(32)).is_err());
        assert!(validate_sheet_name(" ").is_err());
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FF0000"), Some(0xFF0000));
        assert_eq!(parse_hex_color("00ff00"), Some(0x00FF00));
        assert_eq!(parse_hex_color("FF0000FF"), Some(0x0000FF));
        assert_eq!(parse_hex_color("red"), None);
        assert_eq!(parse_hex_color("a\u{20ac}bcde"), None);
        assert_eq!(parse_hex_color("+FFFFF"), None);
    }

    #[test]
    fn test_hash_password_xor_known_values() {
        // Values Excel writes for these passwords.
        assert_eq!(hash_password_xor("password"), "83AF");
        assert_eq!(hash_password_xor(""), "CE4B");
    }

    #[test]
    fn test_hash_password_iterated_is_deterministic() {
        let first = hash_password_iterated(EnumProtectionAlgorithm::Sha512, "secret", 10).unwrap();
        let second = hash_password_iterated(EnumProtectionAlgorithm::Sha512, "secret", 10).unwrap();
        assert_eq!(first, second);
        let other = hash_password_iterated(EnumProtectionAlgorithm::Sha512, "other", 10).unwrap();
        assert_ne!(first.0, other.0);
        // 64-byte digest -> 88 base64 chars; 16-byte salt -> 24.
        assert_eq!(first.0.len(), 88);
        assert_eq!(first.1.len(), 24);
        assert!(hash_password_iterated(EnumProtectionAlgorithm::Md4, "secret", 10).is_none());
    }
}
