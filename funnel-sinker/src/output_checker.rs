use anyhow::Result;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::record::Record;

/// The malformations the concurrent writer defect produces, plus the two
/// whole-file checks a finished run must pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectKind {
    /// A separator comma alone on a line.
    LoneSeparator,

    /// Two records merged onto one line without a separator between them.
    MergedRecords,

    /// The file does not parse as one JSON array of records.
    NotAnArray,

    /// Record codes do not ascend, so fragments were appended out of order.
    OutOfOrder,
}

#[derive(Debug, Clone)]
pub struct Defect {
    /// 1-based line number, 0 for whole-file defects.
    pub line: usize,

    pub kind: DefectKind,

    pub text: String,
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {:?}: {}", self.line, self.kind, self.text)
    }
}

/// Scan a finished output file for the defect symptoms.
///
/// Line checks catch the raw symptoms even when the file still parses; the
/// parse and order checks catch everything else. An empty result means the
/// run is clean.
pub fn check_output<P: AsRef<Path>>(path: P) -> Result<Vec<Defect>> {
    let content = fs::read_to_string(path)?;

    let mut defects = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();

        if trimmed == "," {
            defects.push(Defect {
                line: i + 1,
                kind: DefectKind::LoneSeparator,
                text: line.to_string(),
            });
        }

        if line.matches("\"code\"").count() > 1 {
            defects.push(Defect {
                line: i + 1,
                kind: DefectKind::MergedRecords,
                text: line.to_string(),
            });
        }
    }

    match serde_json::from_str::<Vec<Record>>(&content) {
        Ok(records) => {
            for window in records.windows(2) {
                if window[0].code >= window[1].code {
                    defects.push(Defect {
                        line: 0,
                        kind: DefectKind::OutOfOrder,
                        text: format!(
                            "code {} appears after code {}",
                            window[1].code, window[0].code
                        ),
                    });
                }
            }
        }
        Err(e) => {
            defects.push(Defect {
                line: 0,
                kind: DefectKind::NotAnArray,
                text: e.to_string(),
            });
        }
    }

    Ok(defects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_core::tool::setup_log;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> Result<std::path::PathBuf> {
        let path = std::env::temp_dir().join(format!("funnel_checker_{}_{}", std::process::id(), name));
        let mut file = fs::File::create(&path)?;
        file.write_all(content.as_bytes())?;
        Ok(path)
    }

    #[test]
    fn test_clean_file_has_no_defects() -> Result<()> {
        setup_log();

        let content = "[\n{\"code\":10000,\"ref\":\"A\",\"type\":0,\"nature\":null,\"etat\":0,\"ref2\":null},\n{\"code\":10001,\"ref\":\"B\",\"type\":1,\"nature\":2,\"etat\":1,\"ref2\":null}\n]\n";
        let path = write_temp("clean", content)?;

        let defects = check_output(&path)?;
        assert!(defects.is_empty(), "unexpected defects: {:?}", defects);

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_lone_separator_is_reported() -> Result<()> {
        setup_log();

        // The classic symptom: the separator landed on its own line because
        // a later fragment was appended before an earlier one.
        let content = "[\n{\"code\":10000,\"ref\":\"A\",\"type\":0,\"nature\":null,\"etat\":0,\"ref2\":null}\n,\n{\"code\":10001,\"ref\":\"B\",\"type\":1,\"nature\":2,\"etat\":1,\"ref2\":null}\n]\n";
        let path = write_temp("lone_separator", content)?;

        let defects = check_output(&path)?;
        assert!(defects
            .iter()
            .any(|d| d.kind == DefectKind::LoneSeparator && d.line == 3));

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_merged_records_are_reported() -> Result<()> {
        setup_log();

        let content = "[\n{\"code\":10000,\"ref\":\"A\",\"type\":0,\"nature\":null,\"etat\":0,\"ref2\":null}{\"code\":10001,\"ref\":\"B\",\"type\":1,\"nature\":2,\"etat\":1,\"ref2\":null}\n]\n";
        let path = write_temp("merged", content)?;

        let defects = check_output(&path)?;
        assert!(defects.iter().any(|d| d.kind == DefectKind::MergedRecords));
        assert!(defects.iter().any(|d| d.kind == DefectKind::NotAnArray));

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_out_of_order_codes_are_reported() -> Result<()> {
        setup_log();

        let content = "[\n{\"code\":10001,\"ref\":\"B\",\"type\":1,\"nature\":2,\"etat\":1,\"ref2\":null},\n{\"code\":10000,\"ref\":\"A\",\"type\":0,\"nature\":null,\"etat\":0,\"ref2\":null}\n]\n";
        let path = write_temp("out_of_order", content)?;

        let defects = check_output(&path)?;
        assert!(defects.iter().any(|d| d.kind == DefectKind::OutOfOrder));

        fs::remove_file(path)?;
        Ok(())
    }
}
