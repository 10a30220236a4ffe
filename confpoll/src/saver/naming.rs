//! Snapshot file names: `{host}_{YYYYmmdd_HHMMSS}[-{seq}].{ext}`.

use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::Regex;

/// Capture timestamp format used in file names.
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

static SNAPSHOT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<host>.+)_(?P<stamp>[0-9]{8}_[0-9]{6})(?:-(?P<seq>[0-9]+))?\.(?P<ext>.+)$")
        .expect("snapshot name pattern is valid")
});

/// The ordering key of a snapshot among those of one host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotName {
    pub stamp: String,
    pub seq: u32,
}

/// Make a host usable as a file name prefix.
///
/// Path separators and `%` are percent-escaped, so distinct hosts never
/// share a prefix.
pub fn sanitize_host(host: &str) -> String {
    let mut out = String::with_capacity(host.len());
    for c in host.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out
}

pub fn stamp(at: DateTime<Local>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

/// Build a file name; sequence 0 has no suffix.
pub fn file_name(host: &str, stamp: &str, seq: u32, extension: &str) -> String {
    if seq == 0 {
        format!("{host}_{stamp}.{extension}")
    } else {
        format!("{host}_{stamp}-{seq}.{extension}")
    }
}

/// Parse `name` if it is a snapshot of exactly `host` (already sanitised)
/// with `extension`.
pub fn parse(name: &str, host: &str, extension: &str) -> Option<SnapshotName> {
    let caps = SNAPSHOT_NAME.captures(name)?;
    if &caps["host"] != host || &caps["ext"] != extension {
        return None;
    }
    let seq = match caps.name("seq") {
        Some(seq) => seq.as_str().parse().ok()?,
        None => 0,
    };
    Some(SnapshotName {
        stamp: caps["stamp"].to_string(),
        seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name() {
        assert_eq!(
            file_name("10.0.0.1", "20240131_235959", 0, "cfg"),
            "10.0.0.1_20240131_235959.cfg"
        );
        assert_eq!(
            file_name("r1", "20240131_235959", 2, "cfg"),
            "r1_20240131_235959-2.cfg"
        );
    }

    #[test]
    fn test_stamp() {
        let at = Local.with_ymd_and_hms(2024, 1, 31, 23, 59, 58).unwrap();
        assert_eq!(stamp(at), "20240131_235958");
    }

    #[test]
    fn test_parse_exact_host() {
        let name = "r1_x_20240131_235959.cfg";
        assert_eq!(parse(name, "r1", "cfg"), None);
        assert_eq!(
            parse(name, "r1_x", "cfg"),
            Some(SnapshotName {
                stamp: "20240131_235959".into(),
                seq: 0
            })
        );
    }

    #[test]
    fn test_parse_sequence_and_extension() {
        assert_eq!(parse("r1_20240131_235959-3.cfg", "r1", "cfg").unwrap().seq, 3);
        assert_eq!(parse("r1_20240131_235959.txt", "r1", "cfg"), None);
        assert_eq!(parse("r1_latest.cfg", "r1", "cfg"), None);
    }

    #[test]
    fn test_ordering() {
        let a = parse("r1_20240131_235959-1.cfg", "r1", "cfg").unwrap();
        let b = parse("r1_20240131_235959-2.cfg", "r1", "cfg").unwrap();
        let c = parse("r1_20240201_000000.cfg", "r1", "cfg").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_sanitize_host() {
        assert_eq!(sanitize_host("10.0.0.1"), "10.0.0.1");
        assert_eq!(sanitize_host("10.0.0.0/24"), "10.0.0.0%2F24");
        assert_eq!(sanitize_host(r"a\b"), "a%5Cb");
        assert_eq!(sanitize_host("a%2Fb"), "a%252Fb");
        assert_ne!(sanitize_host("lab/r1"), sanitize_host("lab_r1"));
    }
}
