use serde::Deserialize;

use crate::error::ReplayError;

/// One line of disk mapping input: which device replays
/// against which staged mount point, and how large an I/O to perform.
#[derive(Debug, Clone, Deserialize)]
pub struct DiskMappingLine {
    pub siteid: u64,
    pub host: u64,
    pub devicename: String,
    pub mountpoint: String,
    pub readsize: String,
}

#[derive(Debug, Clone)]
pub struct DiskMapping {
    pub device: String,
    pub mount_point: String,
    pub stage_size_bytes: u64,
}

/// Parses one newline-delimited JSON disk mapping input into per-device
/// mappings with `readsize` resolved to bytes.
pub fn parse_disk_mappings(text: &str) -> Result<Vec<DiskMapping>, ReplayError> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let parsed: DiskMappingLine =
                serde_json::from_str(line).map_err(|e| ReplayError::BadDiskMapping(format!("{line}: {e}")))?;
            Ok(DiskMapping {
                device: parsed.devicename,
                mount_point: parsed.mountpoint,
                stage_size_bytes: parse_human_size(&parsed.readsize)?,
            })
        })
        .collect()
}

/// Parses a human-readable byte size like `"100 mib"` or `"4G"`.
/// Accepts `Ki/Mi/Gi` (binary, 1024-based) and `K/M/G` (decimal,
/// 1000-based) suffixes, case-insensitive, with or without a space
/// before the suffix.
fn parse_human_size(input: &str) -> Result<u64, ReplayError> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();
    let (number_part, multiplier) = if let Some(n) = lower.strip_suffix("kib") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix("mib") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("gib") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("ki") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix("mi") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("gi") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix('k') {
        (n, 1000)
    } else if let Some(n) = lower.strip_suffix('m') {
        (n, 1_000_000)
    } else if let Some(n) = lower.strip_suffix('g') {
        (n, 1_000_000_000)
    } else {
        (lower.as_str(), 1)
    };

    let number: f64 = number_part
        .trim()
        .parse()
        .map_err(|_| ReplayError::BadDiskMapping(format!("could not parse size from `{input}`")))?;
    Ok((number * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mib_case_insensitively() {
        assert_eq!(parse_human_size("100 mib").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_human_size("100MIB").unwrap(), 100 * 1024 * 1024);
    }

    #[test]
    fn parses_decimal_gigabyte_suffix() {
        assert_eq!(parse_human_size("4G").unwrap(), 4_000_000_000);
    }

    #[test]
    fn parses_one_line_of_json() {
        let line = r#"{"siteid":1,"host":1,"devicename":"sda","mountpoint":"/replay/sda","readsize":"100 mib"}"#;
        let mappings = parse_disk_mappings(line).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].device, "sda");
        assert_eq!(mappings[0].stage_size_bytes, 100 * 1024 * 1024);
    }
}
