//! Human-readable size parsing (e.g. "100MB", "2GB").

use thiserror::Error;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid size '{0}' - expected a byte count or a KB/MB/GB suffix")]
pub struct SizeParseError(String);

/// Parses a size string into bytes.
///
/// Accepts a bare byte count or a case-insensitive `KB`/`K`, `MB`/`M`,
/// `GB`/`G` suffix with optional whitespace before it.
pub fn parse_size(input: &str) -> Result<u64, SizeParseError> {
    let trimmed = input.trim();
    let upper = trimmed.to_uppercase();

    let (digits, multiplier): (&str, u64) = match upper.as_bytes() {
        [.., b'K', b'B'] | [.., b'K'] => (strip_suffix(trimmed, &upper, 'K'), 1 << 10),
        [.., b'M', b'B'] | [.., b'M'] => (strip_suffix(trimmed, &upper, 'M'), 1 << 20),
        [.., b'G', b'B'] | [.., b'G'] => (strip_suffix(trimmed, &upper, 'G'), 1 << 30),
        _ => (trimmed, 1),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| SizeParseError(input.to_string()))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| SizeParseError(input.to_string()))
}

/// Cuts the unit suffix (`X` or `XB`) off the original string.
fn strip_suffix<'a>(original: &'a str, upper: &str, unit: char) -> &'a str {
    let suffix_len = if upper.ends_with('B') { 2 } else { 1 };
    debug_assert!(upper.chars().rev().nth(suffix_len - 1) == Some(unit));
    &original[..original.len() - suffix_len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_bytes() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("4096").unwrap(), 4096);
    }

    #[test]
    fn parses_suffixes() {
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("1k").unwrap(), 1024);
        assert_eq!(parse_size("100MB").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_size("100 mb").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("  2GB  ").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("lots").is_err());
        assert!(parse_size("1.5GB").is_err());
        assert!(parse_size("-1GB").is_err());
        assert!(parse_size("9TB").is_err());
    }
}
