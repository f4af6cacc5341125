use chrono::{Duration as ChronoDuration, NaiveDate};

use super::{
    layout::{Grade, LayoutKind, LayoutTable},
    lesson::Lesson,
};
use crate::{domain::Recipient, storage::ScheduleRepository, Result};

/// A recipient's lessons for one date.
///
/// On their grade's university day: their roaming group's lessons, then the
/// class-wide (group 0) lessons. Otherwise their class sub-group's lessons.
pub async fn lessons_for(
    repo: &dyn ScheduleRepository,
    layouts: &LayoutTable,
    recipient: &Recipient,
    date: NaiveDate,
) -> Result<Vec<Lesson>> {
    let university_day = Grade::of_class(&recipient.class_letter)
        .filter(|&g| layouts.kind_for(g, date) == LayoutKind::UniversityDay);

    let Some(grade) = university_day else {
        return repo
            .regular_lessons(date, &recipient.class_letter, recipient.class_group)
            .await;
    };

    let mut lessons = repo
        .university_day_lessons(date, grade, recipient.uday_group)
        .await?;
    lessons.extend(repo.regular_lessons(date, &recipient.class_letter, 0).await?);
    Ok(lessons)
}

/// `сегодня`, `завтра`, or `dd.mm`.
pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "сегодня".to_string()
    } else if date == today + ChronoDuration::days(1) {
        "завтра".to_string()
    } else {
        date.format("%d.%m").to_string()
    }
}

pub fn announcement(date: NaiveDate, today: NaiveDate) -> String {
    format!("загружено расписание на {}🗓", day_label(date, today))
}

/// Lessons as one message, blank line between periods.
pub fn render_day(lessons: &[Lesson]) -> String {
    if lessons.is_empty() {
        return "уроков нет".to_string();
    }
    lessons
        .iter()
        .map(|l| l.info.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleSnapshot;
    use crate::storage::SqliteRepository;

    fn lesson(d: NaiveDate, number: u32, class: Option<&str>, group: u32, info: &str) -> Lesson {
        lesson_of(Grade::Tenth, d, number, class, group, info)
    }

    fn lesson_of(
        grade: Grade,
        d: NaiveDate,
        number: u32,
        class: Option<&str>,
        group: u32,
        info: &str,
    ) -> Lesson {
        Lesson {
            number,
            info: info.to_string(),
            date: d,
            grade,
            group,
            class_letter: class.map(str::to_string),
        }
    }

    fn student(class: &str, class_group: u32, uday_group: u32) -> Recipient {
        Recipient {
            id: 1,
            class_letter: class.to_string(),
            class_group,
            uday_group,
        }
    }

    async fn seeded(d: NaiveDate) -> SqliteRepository {
        let repo = SqliteRepository::in_memory().unwrap();
        let snapshot = ScheduleSnapshot {
            date: d,
            grades: vec![Grade::Tenth, Grade::Eleventh],
            regular: vec![
                lesson(d, 7, Some("10А"), 0, "классный час"),
                lesson(d, 1, Some("10А"), 1, "Химия Б"),
                lesson(d, 0, Some("10А"), 1, "Алгебра Б"),
            ],
            university_day: vec![
                lesson(d, 1, None, 3, "Семинар"),
                lesson(d, 0, None, 3, "Лекция"),
                lesson(d, 0, None, 4, "чужая группа"),
                lesson_of(Grade::Eleventh, d, 0, None, 3, "группа 11 класса"),
            ],
        };
        let cutoff = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        repo.replace_schedule(&snapshot, cutoff).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn regular_day_uses_class_sub_group() {
        let friday = NaiveDate::from_ymd_opt(2024, 9, 6).unwrap();
        let repo = seeded(friday).await;

        let got = lessons_for(&repo, &LayoutTable::default(), &student("10А", 1, 3), friday)
            .await
            .unwrap();
        assert_eq!(render_day(&got), "Алгебра Б\n\nХимия Б");
    }

    #[tokio::test]
    async fn university_day_puts_group_lessons_first() {
        let monday = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        let repo = seeded(monday).await;

        let got = lessons_for(&repo, &LayoutTable::default(), &student("10А", 1, 3), monday)
            .await
            .unwrap();
        let infos: Vec<&str> = got.iter().map(|l| l.info.as_str()).collect();
        assert_eq!(infos, vec!["Лекция", "Семинар", "классный час"]);
    }

    #[test]
    fn day_labels() {
        let today = NaiveDate::from_ymd_opt(2024, 9, 5).unwrap();
        assert_eq!(day_label(today, today), "сегодня");
        assert_eq!(day_label(today.succ_opt().unwrap(), today), "завтра");
        assert_eq!(
            announcement(NaiveDate::from_ymd_opt(2024, 9, 9).unwrap(), today),
            "загружено расписание на 09.09🗓"
        );
        assert_eq!(render_day(&[]), "уроков нет");
    }
}
