use std::{fmt, path::Path, sync::Arc};

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use regex::Regex;

use super::{
    layout::{Grade, LayoutTable},
    parser::ScheduleParser,
    sheet::Workbook,
    ParseError,
};
use crate::{storage::ScheduleRepository, Error, Result};

/// Whether a file name carries the workbook extension, in any letter case.
pub fn is_workbook_name(file_name: &str) -> bool {
    Path::new(file_name.trim())
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"))
}

/// Target date encoded in an intake file name (`dd.mm.xlsx`, current year).
pub fn target_date(file_name: &str, today: NaiveDate) -> Result<NaiveDate> {
    let bad = || Error::Parse(ParseError::BadFileName(file_name.to_string()));
    if !is_workbook_name(file_name) {
        return Err(bad());
    }

    let re = Regex::new(r"^(\d{2})\.(\d{2})\.[^./\\]+$").map_err(|e| Error::External(e.to_string()))?;
    let caps = re.captures(file_name.trim()).ok_or_else(bad)?;
    let day: u32 = caps[1].parse().map_err(|_| bad())?;
    let month: u32 = caps[2].parse().map_err(|_| bad())?;

    NaiveDate::from_ymd_opt(today.year(), month, day).ok_or_else(bad)
}

/// What happened to one upload, rendered as the status text sent back to the
/// uploader.
#[derive(Debug)]
pub struct IngestReport {
    pub date: NaiveDate,
    pub saved: Vec<Grade>,
    pub failed: Vec<(Grade, ParseError)>,
    pub storage_error: Option<Error>,
    pub lessons: usize,
}

impl IngestReport {
    /// Every grade decoded and the snapshot was stored.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.storage_error.is_none()
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(e) = &self.storage_error {
            return write!(f, "Ошибка при сохранении расписания в базу данных!\nОшибка:\n{e}");
        }
        if self.failed.is_empty() {
            return f.write_str("Расписание сохранено успешно!");
        }

        let mut parts: Vec<String> = self
            .failed
            .iter()
            .map(|(grade, e)| {
                format!("Ошибка при парсинге расписания {grade}-х классов!\nОшибка:\n{e}")
            })
            .collect();
        if !self.saved.is_empty() {
            let tags: Vec<&str> = self.saved.iter().map(|g| g.tag()).collect();
            parts.push(format!("Расписание {}-х классов сохранено.", tags.join(", ")));
        }
        f.write_str(&parts.join("\n\n"))
    }
}

/// Turns an uploaded workbook into a stored snapshot.
pub struct ScheduleIngestor {
    repo: Arc<dyn ScheduleRepository>,
    layouts: Arc<LayoutTable>,
    retention_days: i64,
}

impl ScheduleIngestor {
    pub fn new(
        repo: Arc<dyn ScheduleRepository>,
        layouts: Arc<LayoutTable>,
        retention_days: i64,
    ) -> Self {
        Self {
            repo,
            layouts,
            retention_days,
        }
    }

    /// Validate the name, read the file, remove it, then decode and store.
    ///
    /// The intake file is gone when this returns, whatever the outcome (a name
    /// that fails validation is removed too). Errors are whole-upload failures;
    /// per-grade failures live in the report.
    pub async fn ingest_upload(
        &self,
        path: &Path,
        file_name: &str,
        today: NaiveDate,
    ) -> Result<IngestReport> {
        let date = match target_date(file_name, today) {
            Ok(d) => d,
            Err(e) => {
                remove_intake(path).await;
                return Err(e);
            }
        };

        let owned = path.to_path_buf();
        let opened = tokio::task::spawn_blocking(move || Workbook::open(&owned)).await;
        remove_intake(path).await;

        let workbook = opened.map_err(|e| Error::External(format!("workbook reader panicked: {e}")))??;
        Ok(self.ingest(&workbook, date, today).await)
    }

    /// Decode every grade and persist whatever decoded. Storage is untouched
    /// when no grade decoded.
    pub async fn ingest(&self, workbook: &Workbook, date: NaiveDate, today: NaiveDate) -> IngestReport {
        let outcome = ScheduleParser::new(&self.layouts).parse(workbook, date);
        let snapshot = outcome.snapshot();

        let mut report = IngestReport {
            date,
            saved: Vec::new(),
            failed: Vec::new(),
            storage_error: None,
            lessons: snapshot.len(),
        };
        for (grade, result) in outcome.grades {
            match result {
                Ok(_) => report.saved.push(grade),
                Err(e) => report.failed.push((grade, e)),
            }
        }

        if report.saved.is_empty() {
            return report;
        }

        let cutoff = today - ChronoDuration::days(self.retention_days);
        if let Err(e) = self.repo.replace_schedule(&snapshot, cutoff).await {
            tracing::error!(%date, error = %e, "failed to store schedule");
            report.saved.clear();
            report.storage_error = Some(e);
        }
        report
    }
}

async fn remove_intake(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove intake file");
        }
    }
}
