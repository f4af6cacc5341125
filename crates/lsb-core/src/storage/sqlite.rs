use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::ScheduleRepository;
use crate::{
    domain::Recipient,
    schedule::{Grade, Lesson, ScheduleSnapshot},
    Error, Result,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS regular_schedule (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lesson_number INTEGER NOT NULL,
    lesson_info TEXT NOT NULL,
    date TEXT NOT NULL,
    grade TEXT NOT NULL,
    class_letter TEXT NOT NULL,
    class_group INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS regular_schedule_date ON regular_schedule (date, class_letter, class_group);

CREATE TABLE IF NOT EXISTS uday_schedule (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lesson_number INTEGER NOT NULL,
    lesson_info TEXT NOT NULL,
    date TEXT NOT NULL,
    grade TEXT NOT NULL,
    uday_group INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS uday_schedule_date ON uday_schedule (date, grade, uday_group);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    class_letter TEXT NOT NULL,
    class_group INTEGER NOT NULL,
    uday_group INTEGER NOT NULL
);
";

const DATE_FMT: &str = "%Y-%m-%d";

/// SQLite-backed repository. Calls are short and synchronous, made under a
/// mutex from inside the async methods.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::External(format!("sqlite mutex poisoned: {e}")))
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_grade(raw: &str) -> rusqlite::Result<Grade> {
    Grade::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown grade {raw:?}").into(),
        )
    })
}

fn delete_older_than(conn: &Connection, cutoff: NaiveDate) -> rusqlite::Result<usize> {
    let key = date_key(cutoff);
    let regular = conn.execute("DELETE FROM regular_schedule WHERE date <= ?1", params![key])?;
    let uday = conn.execute("DELETE FROM uday_schedule WHERE date <= ?1", params![key])?;
    Ok(regular + uday)
}

fn delete_exact(conn: &Connection, date: NaiveDate, grade: Grade) -> rusqlite::Result<usize> {
    let key = date_key(date);
    let regular = conn.execute(
        "DELETE FROM regular_schedule WHERE date = ?1 AND grade = ?2",
        params![key, grade.tag()],
    )?;
    let uday = conn.execute(
        "DELETE FROM uday_schedule WHERE date = ?1 AND grade = ?2",
        params![key, grade.tag()],
    )?;
    Ok(regular + uday)
}

fn insert_regular(conn: &Connection, lessons: &[Lesson]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO regular_schedule (lesson_number, lesson_info, date, grade, class_letter, class_group)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for l in lessons {
        stmt.execute(params![
            l.number,
            l.info,
            date_key(l.date),
            l.grade.tag(),
            l.class_letter.as_deref().unwrap_or_default(),
            l.group,
        ])?;
    }
    Ok(())
}

fn insert_university_day(conn: &Connection, lessons: &[Lesson]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO uday_schedule (lesson_number, lesson_info, date, grade, uday_group)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for l in lessons {
        stmt.execute(params![l.number, l.info, date_key(l.date), l.grade.tag(), l.group])?;
    }
    Ok(())
}

fn regular_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lesson> {
    let date: String = row.get(2)?;
    let grade: String = row.get(3)?;
    Ok(Lesson {
        number: row.get(0)?,
        info: row.get(1)?,
        date: parse_date(&date)?,
        grade: parse_grade(&grade)?,
        class_letter: Some(row.get(4)?),
        group: row.get(5)?,
    })
}

fn university_day_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lesson> {
    let date: String = row.get(2)?;
    let grade: String = row.get(3)?;
    Ok(Lesson {
        number: row.get(0)?,
        info: row.get(1)?,
        date: parse_date(&date)?,
        grade: parse_grade(&grade)?,
        class_letter: None,
        group: row.get(4)?,
    })
}

#[async_trait]
impl ScheduleRepository for SqliteRepository {
    async fn schedule_exists(&self, date: NaiveDate) -> Result<bool> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM regular_schedule WHERE date = ?1)",
            params![date_key(date)],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    async fn replace_schedule(
        &self,
        snapshot: &ScheduleSnapshot,
        purge_on_or_before: NaiveDate,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let purged = delete_older_than(&tx, purge_on_or_before)?;
        let mut replaced = 0;
        for &grade in &snapshot.grades {
            replaced += delete_exact(&tx, snapshot.date, grade)?;
        }
        insert_regular(&tx, &snapshot.regular)?;
        insert_university_day(&tx, &snapshot.university_day)?;
        tx.commit()?;

        tracing::info!(
            date = %snapshot.date,
            grades = ?snapshot.grades,
            regular = snapshot.regular.len(),
            university_day = snapshot.university_day.len(),
            replaced,
            purged,
            "schedule stored"
        );
        Ok(())
    }

    async fn regular_lessons(
        &self,
        date: NaiveDate,
        class_letter: &str,
        group: u32,
    ) -> Result<Vec<Lesson>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT lesson_number, lesson_info, date, grade, class_letter, class_group
             FROM regular_schedule
             WHERE date = ?1 AND class_letter = ?2 AND class_group = ?3
             ORDER BY lesson_number, id",
        )?;
        let rows = stmt.query_map(params![date_key(date), class_letter, group], regular_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn university_day_lessons(
        &self,
        date: NaiveDate,
        grade: Grade,
        group: u32,
    ) -> Result<Vec<Lesson>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT lesson_number, lesson_info, date, grade, uday_group
             FROM uday_schedule
             WHERE date = ?1 AND grade = ?2 AND uday_group = ?3
             ORDER BY lesson_number, id",
        )?;
        let rows = stmt.query_map(
            params![date_key(date), grade.tag(), group],
            university_day_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn snapshot(&self, date: NaiveDate) -> Result<ScheduleSnapshot> {
        let conn = self.lock()?;
        let key = date_key(date);

        let mut stmt = conn.prepare(
            "SELECT lesson_number, lesson_info, date, grade, class_letter, class_group
             FROM regular_schedule WHERE date = ?1 ORDER BY id",
        )?;
        let regular = stmt
            .query_map(params![key], regular_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT lesson_number, lesson_info, date, grade, uday_group
             FROM uday_schedule WHERE date = ?1 ORDER BY id",
        )?;
        let university_day = stmt
            .query_map(params![key], university_day_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut grades: Vec<Grade> = regular
            .iter()
            .chain(&university_day)
            .map(|l| l.grade)
            .collect();
        grades.sort();
        grades.dedup();

        Ok(ScheduleSnapshot {
            date,
            grades,
            regular,
            university_day,
        })
    }

    async fn upsert_recipient(&self, recipient: &Recipient) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, class_letter, class_group, uday_group) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                class_letter = excluded.class_letter,
                class_group = excluded.class_group,
                uday_group = excluded.uday_group",
            params![
                recipient.id,
                recipient.class_letter,
                recipient.class_group,
                recipient.uday_group
            ],
        )?;
        Ok(())
    }

    async fn recipient(&self, id: i64) -> Result<Option<Recipient>> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT id, class_letter, class_group, uday_group FROM users WHERE id = ?1",
                params![id],
                |r| {
                    Ok(Recipient {
                        id: r.get(0)?,
                        class_letter: r.get(1)?,
                        class_group: r.get(2)?,
                        uday_group: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    async fn recipient_ids(&self, class_prefix: Option<&str>) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let ids = match class_prefix {
            Some(prefix) => {
                let mut stmt = conn.prepare(
                    "SELECT id FROM users WHERE substr(class_letter, 1, length(?1)) = ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(params![prefix], |r| r.get(0))?;
                rows.collect::<rusqlite::Result<Vec<i64>>>()?
            }
            None => {
                let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id")?;
                let rows = stmt.query_map([], |r| r.get(0))?;
                rows.collect::<rusqlite::Result<Vec<i64>>>()?
            }
        };
        Ok(ids)
    }

    async fn remove_recipient(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn lesson(d: NaiveDate, number: u32, class: Option<&str>, group: u32, info: &str) -> Lesson {
        Lesson {
            number,
            info: info.to_string(),
            date: d,
            grade: Grade::Tenth,
            group,
            class_letter: class.map(str::to_string),
        }
    }

    fn snapshot(d: NaiveDate) -> ScheduleSnapshot {
        ScheduleSnapshot {
            date: d,
            grades: vec![Grade::Tenth],
            regular: vec![
                lesson(d, 1, Some("10А"), 0, "9:25\nФизика"),
                lesson(d, 0, Some("10А"), 0, "8:30\nАлгебра"),
                lesson(d, 0, Some("10А"), 1, "8:30\nХимия"),
            ],
            university_day: vec![lesson(d, 0, None, 3, "9:00\nЛекция")],
        }
    }

    fn recipient(id: i64, class: &str) -> Recipient {
        Recipient {
            id,
            class_letter: class.to_string(),
            class_group: 0,
            uday_group: 1,
        }
    }

    #[tokio::test]
    async fn replacing_a_date_twice_keeps_one_copy() {
        let repo = SqliteRepository::in_memory().unwrap();
        let d = date(2024, 9, 6);
        let cutoff = date(2024, 9, 4);

        repo.replace_schedule(&snapshot(d), cutoff).await.unwrap();
        let first = repo.snapshot(d).await.unwrap().normalized();
        repo.replace_schedule(&snapshot(d), cutoff).await.unwrap();
        let second = repo.snapshot(d).await.unwrap().normalized();

        assert_eq!(first, second);
        assert_eq!(second, snapshot(d).normalized());
    }

    #[tokio::test]
    async fn dates_on_or_before_cutoff_are_purged() {
        let repo = SqliteRepository::in_memory().unwrap();
        let old = date(2024, 9, 2);
        let recent = date(2024, 9, 3);
        repo.replace_schedule(&snapshot(old), date(2024, 8, 1)).await.unwrap();
        repo.replace_schedule(&snapshot(recent), date(2024, 8, 1)).await.unwrap();

        // today = 09-04, retention 2 days
        repo.replace_schedule(&snapshot(date(2024, 9, 5)), date(2024, 9, 2))
            .await
            .unwrap();

        assert!(!repo.schedule_exists(old).await.unwrap());
        assert!(repo.snapshot(old).await.unwrap().is_empty());
        assert!(repo.schedule_exists(recent).await.unwrap());
    }

    #[tokio::test]
    async fn lessons_are_filtered_and_ordered_by_period() {
        let repo = SqliteRepository::in_memory().unwrap();
        let d = date(2024, 9, 6);
        repo.replace_schedule(&snapshot(d), date(2024, 9, 1)).await.unwrap();

        let infos: Vec<String> = repo
            .regular_lessons(d, "10А", 0)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.info)
            .collect();
        assert_eq!(infos, vec!["8:30\nАлгебра", "9:25\nФизика"]);

        let uday = repo
            .university_day_lessons(d, Grade::Tenth, 3)
            .await
            .unwrap();
        assert_eq!(uday.len(), 1);
        assert_eq!(uday[0].class_letter, None);
        assert_eq!(uday[0].grade, Grade::Tenth);
        assert!(repo
            .university_day_lessons(d, Grade::Tenth, 4)
            .await
            .unwrap()
            .is_empty());
        assert!(repo
            .university_day_lessons(d, Grade::Eleventh, 3)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn replacing_one_grade_keeps_the_other() {
        let repo = SqliteRepository::in_memory().unwrap();
        let d = date(2024, 9, 6);
        let cutoff = date(2024, 9, 1);

        let mut both = snapshot(d);
        both.grades.push(Grade::Eleventh);
        both.regular.push(Lesson {
            grade: Grade::Eleventh,
            ..lesson(d, 0, Some("11А"), 0, "8:30\nПраво")
        });
        repo.replace_schedule(&both, cutoff).await.unwrap();

        let mut tenth = ScheduleSnapshot::new(d);
        tenth.grades.push(Grade::Tenth);
        tenth.regular.push(lesson(d, 0, Some("10А"), 0, "8:30\nГеометрия"));
        repo.replace_schedule(&tenth, cutoff).await.unwrap();

        let eleventh = repo.regular_lessons(d, "11А", 0).await.unwrap();
        assert_eq!(eleventh.len(), 1);
        assert_eq!(eleventh[0].info, "8:30\nПраво");

        let infos: Vec<String> = repo
            .regular_lessons(d, "10А", 0)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.info)
            .collect();
        assert_eq!(infos, vec!["8:30\nГеометрия"]);
        assert!(repo.regular_lessons(d, "10А", 1).await.unwrap().is_empty());
        assert!(repo
            .university_day_lessons(d, Grade::Tenth, 3)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(
            repo.snapshot(d).await.unwrap().grades,
            vec![Grade::Tenth, Grade::Eleventh]
        );
    }

    #[tokio::test]
    async fn recipients_upsert_filter_and_remove() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.upsert_recipient(&recipient(1, "10А")).await.unwrap();
        repo.upsert_recipient(&recipient(2, "11Б")).await.unwrap();
        repo.upsert_recipient(&recipient(3, "10Б")).await.unwrap();

        let mut moved = recipient(1, "10В");
        moved.class_group = 1;
        repo.upsert_recipient(&moved).await.unwrap();
        assert_eq!(repo.recipient(1).await.unwrap(), Some(moved));

        assert_eq!(repo.recipient_ids(Some("10")).await.unwrap(), vec![1, 3]);
        assert_eq!(repo.recipient_ids(None).await.unwrap(), vec![1, 2, 3]);

        assert!(repo.remove_recipient(2).await.unwrap());
        assert!(!repo.remove_recipient(2).await.unwrap());
        assert_eq!(repo.recipient(2).await.unwrap(), None);
    }
}
