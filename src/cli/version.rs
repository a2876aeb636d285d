//! The `version` command.

use std::io::{self, Write};

use crate::build_info::{build_details, VersionInfo};

pub fn print(json: bool) -> anyhow::Result<()> {
    let info = build_details();
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &info)?;
        writeln!(out)?;
    } else {
        write_text(&mut out, &info)?;
    }
    Ok(())
}

/// Aligned `key: value` lines with bold keys. Empty values are skipped.
fn write_text(out: &mut impl Write, info: &VersionInfo) -> io::Result<()> {
    let values = info.values();
    let width = values.keys().map(|k| k.len()).max().unwrap_or(0);
    for (key, value) in values.iter().filter(|(_, v)| !v.is_empty()) {
        writeln!(out, "\x1b[1m{key:>width$}\x1b[0m: {value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_output_skips_empty_values() {
        let info = VersionInfo {
            name: "echo".into(),
            version: "1.2.3".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            ..Default::default()
        };
        let mut out = Vec::new();
        write_text(&mut out, &info).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("OS/Arch\x1b[0m: linux/x86_64"));
        assert!(text.contains("Version\x1b[0m: 1.2.3"));
        assert!(!text.contains("Build Code"));
    }
}
