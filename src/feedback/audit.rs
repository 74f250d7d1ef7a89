// src/feedback/audit.rs

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::models::CorrectionRecord;

/// Append-only correction log, one JSONL file per month.
///
/// Write-only audit trail for downstream analysis and export; the pipeline
/// never reads it back.
#[derive(Debug, Clone)]
pub struct CorrectionLog {
    dir: PathBuf,
}

impl CorrectionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CorrectionLog { dir: dir.into() }
    }

    pub fn append(&self, record: &CorrectionRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create learning dir {}", self.dir.display()))?;

        let filename = format!("corrections_{}.jsonl", record.recorded_at.format("%Y_%m"));
        let path = self.dir.join(filename);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open correction log {}", path.display()))?;

        let line = serde_json::to_string(record).context("Failed to serialize correction")?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CtiEntry, CtiEntryId, RequestType, SlaPriority};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn entry(id: i64) -> CtiEntry {
        CtiEntry {
            id: CtiEntryId(id),
            bu_number: "42".to_string(),
            bu_description: String::new(),
            category: "Access Management".to_string(),
            entry_type: "Password Reset".to_string(),
            item: "AD Account".to_string(),
            resolver_group: "IAM-L1".to_string(),
            resolver_group_description: String::new(),
            request_type: RequestType::Incident,
            sla: SlaPriority::P3,
            service_description: String::new(),
            times_predicted: 0,
            times_confirmed: 0,
            example_count: 0,
        }
    }

    #[test]
    fn appends_one_jsonl_line_per_correction_in_monthly_file() {
        let dir = std::env::temp_dir().join(format!("triage-audit-{}", Uuid::new_v4()));
        let log = CorrectionLog::new(&dir);

        let record = CorrectionRecord {
            id: Uuid::new_v4(),
            recorded_at: Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap(),
            ticket_content: "cannot login. forgot password".to_string(),
            original_prediction: Some(entry(1)),
            corrected_to: entry(2),
            corrected_by: "engineer.a".to_string(),
            confidence_before: Some(0.71),
        };

        log.append(&record).unwrap();
        log.append(&record).unwrap();

        let path = dir.join("corrections_2026_08.jsonl");
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: CorrectionRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.corrected_to.id, CtiEntryId(2));
        assert_eq!(parsed.corrected_by, "engineer.a");

        std::fs::remove_dir_all(&dir).ok();
    }
}
