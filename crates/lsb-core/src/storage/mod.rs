//! Persistence port for lessons and recipients.

pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    domain::Recipient,
    schedule::{Grade, Lesson, ScheduleSnapshot},
    Result,
};

pub use sqlite::SqliteRepository;

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// True when any regular lesson is stored for `date`.
    async fn schedule_exists(&self, date: NaiveDate) -> Result<bool>;

    /// Atomically: drop every date `<= purge_on_or_before`, drop the lessons of
    /// `snapshot.grades` on `snapshot.date`, insert the snapshot. Other grades'
    /// lessons for the date are kept. On error nothing changes.
    async fn replace_schedule(
        &self,
        snapshot: &ScheduleSnapshot,
        purge_on_or_before: NaiveDate,
    ) -> Result<()>;

    /// Regular lessons of one class sub-group, ordered by period.
    async fn regular_lessons(
        &self,
        date: NaiveDate,
        class_letter: &str,
        group: u32,
    ) -> Result<Vec<Lesson>>;

    /// University-day lessons of one grade's roaming group, ordered by period.
    async fn university_day_lessons(
        &self,
        date: NaiveDate,
        grade: Grade,
        group: u32,
    ) -> Result<Vec<Lesson>>;

    async fn snapshot(&self, date: NaiveDate) -> Result<ScheduleSnapshot>;

    async fn upsert_recipient(&self, recipient: &Recipient) -> Result<()>;

    async fn recipient(&self, id: i64) -> Result<Option<Recipient>>;

    /// Recipient ids in ascending order, optionally limited to class letters
    /// starting with `class_prefix` (`"10"` → every 10th-grade class).
    async fn recipient_ids(&self, class_prefix: Option<&str>) -> Result<Vec<i64>>;

    /// Returns whether a recipient was removed.
    async fn remove_recipient(&self, id: i64) -> Result<bool>;
}
