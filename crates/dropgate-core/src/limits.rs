//! Multipart limit configuration.

use serde::{Deserialize, Serialize};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;
const TB: u64 = 1024 * GB;

/// Limits applied while parsing a multipart body.
///
/// Defaults mirror the process-wide defaults: one file per request, 20 MB
/// per file, 500 KiB per non-file field value, 120-byte field names and at
/// most 120 header pairs per part. Field and part counts are unbounded
/// unless configured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    /// Max field name size in bytes.
    pub field_name_size: usize,
    /// Max non-file field value size in bytes.
    pub field_size: u64,
    /// Max file size in bytes, enforced mid-stream.
    pub file_size: u64,
    /// Max number of file parts per request.
    pub files: u32,
    /// Max number of non-file fields per request.
    pub fields: u32,
    /// Max number of parts (files + fields) per request.
    pub parts: u32,
    /// Max header pairs per part.
    pub header_pairs: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            field_name_size: 120,
            field_size: 500 * KB,
            file_size: 20 * 1_000_000,
            files: 1,
            fields: u32::MAX,
            parts: u32::MAX,
            header_pairs: 120,
        }
    }
}

impl UploadLimits {
    /// Apply per-request overrides on top of these limits.
    pub fn merged(&self, overrides: &LimitOverrides) -> UploadLimits {
        UploadLimits {
            field_name_size: overrides.field_name_size.unwrap_or(self.field_name_size),
            field_size: overrides.field_size.unwrap_or(self.field_size),
            file_size: overrides.file_size.unwrap_or(self.file_size),
            files: overrides.files.unwrap_or(self.files),
            fields: overrides.fields.unwrap_or(self.fields),
            parts: overrides.parts.unwrap_or(self.parts),
            header_pairs: overrides.header_pairs.unwrap_or(self.header_pairs),
        }
    }
}

/// Per-request limit overrides, merged over a policy's limits by the
/// admission gate. Installed into request extensions by upstream middleware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitOverrides {
    pub field_name_size: Option<usize>,
    pub field_size: Option<u64>,
    pub file_size: Option<u64>,
    pub files: Option<u32>,
    pub fields: Option<u32>,
    pub parts: Option<u32>,
    pub header_pairs: Option<usize>,
}

/// Convert a human size such as `"10MB"`, `"500 KB"` or `"123"` to bytes.
///
/// Units are KB/MB/GB/TB (1024-based, case-insensitive); a bare number is
/// returned as-is. Returns `None` when nothing numeric can be parsed.
pub fn parse_size(input: &str) -> Option<u64> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    let upper = compact.to_uppercase();

    let (amount, multiplier) = match upper.len().checked_sub(2).map(|i| upper.split_at(i)) {
        Some((head, "KB")) => (head, KB),
        Some((head, "MB")) => (head, MB),
        Some((head, "GB")) => (head, GB),
        Some((head, "TB")) => (head, TB),
        _ => (upper.as_str(), 1),
    };

    let value: f64 = amount.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("10KB"), Some(10 * 1024));
        assert_eq!(parse_size("2MB"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("1TB"), Some(1024u64.pow(4)));
    }

    #[test]
    fn test_parse_size_case_and_spaces() {
        assert_eq!(parse_size("10 kb"), Some(10 * 1024));
        assert_eq!(parse_size(" 2 Mb "), Some(2 * 1024 * 1024));
    }

    #[test]
    fn test_parse_size_plain_number() {
        assert_eq!(parse_size("512000"), Some(512000));
    }

    #[test]
    fn test_parse_size_fractional() {
        assert_eq!(parse_size("1.5KB"), Some(1536));
    }

    #[test]
    fn test_parse_size_invalid() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size("-1MB"), None);
    }

    #[test]
    fn test_merged_overrides() {
        let limits = UploadLimits::default();
        let overrides = LimitOverrides {
            file_size: Some(1024),
            fields: Some(3),
            ..Default::default()
        };

        let merged = limits.merged(&overrides);
        assert_eq!(merged.file_size, 1024);
        assert_eq!(merged.fields, 3);
        assert_eq!(merged.field_name_size, limits.field_name_size);
        assert_eq!(merged.files, limits.files);
    }

    #[test]
    fn test_merged_empty_overrides_is_identity() {
        let limits = UploadLimits::default();
        assert_eq!(limits.merged(&LimitOverrides::default()), limits);
    }
}
