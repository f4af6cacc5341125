use std::collections::HashSet;

use chrono::NaiveDate;

use super::{
    layout::{Grade, LayoutKind, LayoutTable, Pass, PassKind},
    lesson::{Lesson, ScheduleSnapshot},
    sheet::{CellRef, Sheet, Workbook},
    ParseError,
};

/// Lessons decoded from one grade's sheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GradeSchedule {
    pub grade: Grade,
    pub kind: LayoutKind,
    pub regular: Vec<Lesson>,
    pub university_day: Vec<Lesson>,
}

/// Per-grade results of one workbook. A failed grade never hides the other.
#[derive(Debug)]
pub struct ParseOutcome {
    pub date: NaiveDate,
    pub grades: Vec<(Grade, Result<GradeSchedule, ParseError>)>,
}

impl ParseOutcome {
    /// Lessons of every grade that decoded cleanly.
    pub fn snapshot(&self) -> ScheduleSnapshot {
        let mut snapshot = ScheduleSnapshot::new(self.date);
        for schedule in self.succeeded() {
            snapshot.grades.push(schedule.grade);
            snapshot.regular.extend(schedule.regular.iter().cloned());
            snapshot
                .university_day
                .extend(schedule.university_day.iter().cloned());
        }
        snapshot
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &GradeSchedule> {
        self.grades.iter().filter_map(|(_, r)| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (Grade, &ParseError)> {
        self.grades
            .iter()
            .filter_map(|(g, r)| r.as_ref().err().map(|e| (*g, e)))
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

pub struct ScheduleParser<'a> {
    layouts: &'a LayoutTable,
}

impl<'a> ScheduleParser<'a> {
    pub fn new(layouts: &'a LayoutTable) -> Self {
        Self { layouts }
    }

    pub fn parse(&self, workbook: &Workbook, date: NaiveDate) -> ParseOutcome {
        let grades = Grade::ALL
            .into_iter()
            .map(|grade| {
                let result = self.parse_grade(workbook, grade, date);
                if let Err(e) = &result {
                    tracing::warn!(%grade, %date, error = %e, "grade sheet rejected");
                }
                (grade, result)
            })
            .collect();
        ParseOutcome { date, grades }
    }

    pub fn parse_grade(
        &self,
        workbook: &Workbook,
        grade: Grade,
        date: NaiveDate,
    ) -> Result<GradeSchedule, ParseError> {
        let kind = self.layouts.kind_for(grade, date);
        let spec = self.layouts.spec(grade, kind)?;
        let sheet = workbook
            .find_tagged(grade.tag())
            .or_else(|| workbook.sheet(grade.fallback_sheet()))
            .ok_or(ParseError::MissingSheet {
                grade,
                index: grade.fallback_sheet(),
            })?;

        let mut out = GradeSchedule {
            grade,
            kind,
            regular: Vec::new(),
            university_day: Vec::new(),
        };
        for pass in &spec.passes {
            let sink = if pass.yields_university_day() {
                &mut out.university_day
            } else {
                &mut out.regular
            };
            self.decode_pass(sheet, pass, grade, date, sink)?;
        }

        tracing::debug!(
            %grade,
            ?kind,
            sheet = sheet.name(),
            regular = out.regular.len(),
            university_day = out.university_day.len(),
            "grade decoded"
        );
        Ok(out)
    }

    fn decode_pass(
        &self,
        sheet: &Sheet,
        pass: &Pass,
        grade: Grade,
        date: NaiveDate,
        out: &mut Vec<Lesson>,
    ) -> Result<(), ParseError> {
        let times = pass.times.resolve(sheet)?;
        let body_first = pass.body_first_row();
        let mut seen: HashSet<String> = HashSet::new();

        for col in pass.first_col..=pass.last_col {
            let header_cell = CellRef::new(pass.header_row, col);
            let Some(header) = sheet.value(header_cell)? else {
                if column_is_blank(sheet, col, body_first, pass.last_row)? {
                    continue;
                }
                return Err(ParseError::EmptyHeader { cell: header_cell });
            };

            let (class_letter, group) = match pass.kind {
                PassKind::ClassGroups => {
                    let label_cell = CellRef::new(pass.header_row + 1, col);
                    let label = sheet.value(label_cell)?.unwrap_or_default();
                    let group = self.layouts.sub_group(label).ok_or_else(|| {
                        ParseError::BadGroupLabel {
                            cell: label_cell,
                            value: label.to_string(),
                        }
                    })?;
                    (Some(header.trim().to_string()), group)
                }
                PassKind::RoamingGroups => {
                    let group = leading_number(header).ok_or_else(|| ParseError::BadGroupNumber {
                        cell: header_cell,
                        value: header.to_string(),
                    })?;
                    // wide groups span several merged columns
                    if !seen.insert(group.to_string()) {
                        continue;
                    }
                    (None, group)
                }
                PassKind::Classes => {
                    let letter = header.trim().to_string();
                    if !seen.insert(letter.clone()) {
                        continue;
                    }
                    (Some(letter), 0)
                }
            };

            for row in body_first..=pass.last_row {
                let cell = CellRef::new(row, col);
                let Some(text) = sheet.value(cell)? else {
                    continue;
                };
                let period = (row - body_first) as usize;
                let time = times
                    .get(period)
                    .and_then(|t| t.as_deref())
                    .ok_or(ParseError::MissingTimeLabel { cell, period })?;

                out.push(Lesson {
                    number: period as u32,
                    info: lesson_info(time, text),
                    date,
                    grade,
                    group,
                    class_letter: class_letter.clone(),
                });
            }
        }
        Ok(())
    }
}

fn column_is_blank(sheet: &Sheet, col: u32, first: u32, last: u32) -> Result<bool, ParseError> {
    for row in first..=last {
        if sheet.value(CellRef::new(row, col))?.is_some() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `"3 группа"` → 3.
fn leading_number(s: &str) -> Option<u32> {
    s.split_whitespace().next()?.parse().ok()
}

fn lesson_info(time: &str, text: &str) -> String {
    format!("{time}\n{}", text.replace("\n\n", "\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> CellRef {
        CellRef::parse_a1(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const FRIDAY: (i32, u32, u32) = (2024, 9, 6);
    const MONDAY: (i32, u32, u32) = (2024, 9, 2);
    const WEDNESDAY: (i32, u32, u32) = (2024, 9, 4);

    /// Grade 10 regular grid: class letters on row 2, sub-groups on row 3,
    /// period numbers in B, times in C from row 4.
    fn tenth_regular(name: &str) -> Sheet {
        let mut s = Sheet::new(name);
        s.set(at("B4"), "1").set(at("B5"), "2").set(at("B6"), "3");
        s.set(at("C4"), "8:30-\n9:15")
            .set(at("C5"), "9:25-10:10")
            .set(at("C6"), "10:20-11:05");

        s.set(at("D2"), "10А").merge(at("D2"), at("E2"));
        s.set(at("D3"), "гр.А").set(at("E3"), "гр. Б");
        s.set(at("D4"), "Алгебра\n\nкаб. 21");
        s.set(at("D5"), "Физика").merge(at("D5"), at("E5"));
        s.set(at("E6"), "История");
        s
    }

    fn eleventh_regular(name: &str) -> Sheet {
        let mut s = Sheet::new(name);
        s.set(at("C4"), "8:30-9:15").set(at("C5"), "9:25-10:10");
        s.set(at("D2"), "11Б").set(at("D3"), "гр.А");
        s.set(at("D5"), "Химия");
        s
    }

    fn tenth_university_day(name: &str) -> Sheet {
        let mut s = Sheet::new(name);
        s.set(at("C3"), "9:00-10:30").set(at("C4"), "10:40-12:10");
        s.set(at("C10"), "13:00-13:45");

        s.set(at("D2"), "1 группа").merge(at("D2"), at("E2"));
        s.set(at("D3"), "Лекция").merge(at("D3"), at("E3"));
        s.set(at("F2"), "2 группа").set(at("F4"), "Семинар");

        s.set(at("D9"), "10А").merge(at("D9"), at("E9"));
        s.set(at("D10"), "Физкультура").merge(at("D10"), at("E10"));
        s
    }

    /// Grade 11 university-day grid: roaming groups on row 3, class rows
    /// from row 10.
    fn eleventh_university_day(name: &str) -> Sheet {
        let mut s = Sheet::new(name);
        s.set(at("C4"), "9:00-10:30").set(at("C5"), "10:40-12:10");
        s.set(at("C11"), "13:00-13:45").set(at("C12"), "13:55-14:40");

        s.set(at("D3"), "1 группа").set(at("D4"), "Право");
        s.set(at("E3"), "2 группа").merge(at("E3"), at("F3"));
        s.set(at("E5"), "Экономика").merge(at("E5"), at("F5"));

        s.set(at("D10"), "11А").set(at("D11"), "Физкультура");
        s.set(at("E10"), "11Б").set(at("E12"), "Литература");
        s
    }

    fn class_letters(g: &GradeSchedule) -> Vec<&str> {
        let mut out: Vec<&str> = g
            .regular
            .iter()
            .filter_map(|l| l.class_letter.as_deref())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn decoded(outcome: &ParseOutcome, grade: Grade) -> &GradeSchedule {
        outcome
            .grades
            .iter()
            .find(|(g, _)| *g == grade)
            .and_then(|(_, r)| r.as_ref().ok())
            .unwrap()
    }

    #[test]
    fn regular_grid_is_decoded_per_class_and_group() {
        let table = LayoutTable::default();
        let wb = Workbook::new(vec![Sheet::new("титул"), tenth_regular("10")]);
        let d = date(FRIDAY.0, FRIDAY.1, FRIDAY.2);

        let g = ScheduleParser::new(&table)
            .parse_grade(&wb, Grade::Tenth, d)
            .unwrap();

        assert_eq!(g.kind, LayoutKind::Regular);
        assert!(g.university_day.is_empty());
        let mut got: Vec<(u32, u32, &str)> = g
            .regular
            .iter()
            .map(|l| (l.group, l.number, l.info.as_str()))
            .collect();
        got.sort();
        assert_eq!(
            got,
            vec![
                (0, 0, "8:30-9:15\nАлгебра\nкаб. 21"),
                (0, 1, "9:25-10:10\nФизика"),
                (1, 1, "9:25-10:10\nФизика"),
                (1, 2, "10:20-11:05\nИстория"),
            ]
        );
        assert!(g
            .regular
            .iter()
            .all(|l| l.class_letter.as_deref() == Some("10А") && l.date == d));
    }

    #[test]
    fn university_day_grid_yields_group_and_class_lessons() {
        let table = LayoutTable::default();
        let wb = Workbook::new(vec![tenth_university_day("10")]);
        let d = date(MONDAY.0, MONDAY.1, MONDAY.2);

        let g = ScheduleParser::new(&table)
            .parse_grade(&wb, Grade::Tenth, d)
            .unwrap();

        assert_eq!(g.kind, LayoutKind::UniversityDay);

        // the merged "1 группа" header is counted once
        let uday: Vec<(u32, u32, &str)> = g
            .university_day
            .iter()
            .map(|l| (l.group, l.number, l.info.as_str()))
            .collect();
        assert_eq!(
            uday,
            vec![
                (1, 0, "9:00-10:30\nЛекция"),
                (2, 1, "10:40-12:10\nСеминар"),
            ]
        );
        assert!(g.university_day.iter().all(|l| l.class_letter.is_none()));

        assert_eq!(g.regular.len(), 1);
        let l = &g.regular[0];
        assert_eq!(l.class_letter.as_deref(), Some("10А"));
        assert_eq!((l.group, l.number), (0, 0));
        assert_eq!(l.info, "13:00-13:45\nФизкультура");
    }

    #[test]
    fn one_bad_grade_does_not_block_the_other() {
        let table = LayoutTable::default();
        let mut broken = eleventh_regular("11");
        broken.set(at("D3"), "группа 3");
        let wb = Workbook::new(vec![tenth_regular("10"), broken]);

        let outcome = ScheduleParser::new(&table).parse(&wb, date(FRIDAY.0, FRIDAY.1, FRIDAY.2));

        assert!(!outcome.is_complete());
        let failures: Vec<_> = outcome.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Grade::Eleventh);
        assert!(matches!(
            failures[0].1,
            ParseError::BadGroupLabel { cell, .. } if *cell == at("D3")
        ));

        let snapshot = outcome.snapshot();
        assert_eq!(snapshot.regular.len(), 4);
        assert!(snapshot
            .regular
            .iter()
            .all(|l| l.class_letter.as_deref() == Some("10А")));
    }

    #[test]
    fn tagged_sheets_win_over_positions() {
        let table = LayoutTable::default();
        let wb = Workbook::new(vec![eleventh_regular("11"), tenth_regular("10")]);

        let outcome = ScheduleParser::new(&table).parse(&wb, date(FRIDAY.0, FRIDAY.1, FRIDAY.2));

        assert!(outcome.is_complete());
        let snapshot = outcome.snapshot();
        assert_eq!(snapshot.regular.len(), 5);
        assert!(snapshot
            .regular
            .iter()
            .any(|l| l.class_letter.as_deref() == Some("11Б") && l.info == "9:25-10:10\nХимия"));
    }

    #[test]
    fn missing_sheet_names_the_fallback_index() {
        let table = LayoutTable::default();
        let wb = Workbook::new(vec![Sheet::new("титул")]);

        let err = ScheduleParser::new(&table)
            .parse_grade(&wb, Grade::Eleventh, date(FRIDAY.0, FRIDAY.1, FRIDAY.2))
            .unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingSheet {
                grade: Grade::Eleventh,
                index: 1
            }
        ));
    }

    #[test]
    fn untagged_sheets_are_taken_in_grade_order() {
        let table = LayoutTable::default();
        let cases = [
            (
                FRIDAY,
                tenth_regular("Лист1"),
                eleventh_regular("Лист2"),
                (LayoutKind::Regular, LayoutKind::Regular),
            ),
            (
                MONDAY,
                tenth_university_day("Лист1"),
                eleventh_regular("Лист2"),
                (LayoutKind::UniversityDay, LayoutKind::Regular),
            ),
            (
                WEDNESDAY,
                tenth_regular("Лист1"),
                eleventh_university_day("Лист2"),
                (LayoutKind::Regular, LayoutKind::UniversityDay),
            ),
        ];

        for (day, first, second, (tenth_kind, eleventh_kind)) in cases {
            let d = date(day.0, day.1, day.2);
            let wb = Workbook::new(vec![first, second]);
            let outcome = ScheduleParser::new(&table).parse(&wb, d);
            assert!(outcome.is_complete(), "{d}: {:?}", outcome.failures().collect::<Vec<_>>());

            let tenth = decoded(&outcome, Grade::Tenth);
            let eleventh = decoded(&outcome, Grade::Eleventh);
            assert_eq!((tenth.kind, eleventh.kind), (tenth_kind, eleventh_kind), "{d}");
            assert_eq!(class_letters(tenth), vec!["10А"], "{d}");
            assert!(class_letters(eleventh).iter().all(|c| c.starts_with("11")), "{d}");
            assert!(tenth.regular.iter().all(|l| l.grade == Grade::Tenth));
            assert!(eleventh.regular.iter().all(|l| l.grade == Grade::Eleventh));
        }
    }

    #[test]
    fn eleventh_grade_university_day_on_wednesday() {
        let table = LayoutTable::default();
        let wb = Workbook::new(vec![tenth_regular("10"), eleventh_university_day("11")]);
        let d = date(WEDNESDAY.0, WEDNESDAY.1, WEDNESDAY.2);

        let g = ScheduleParser::new(&table)
            .parse_grade(&wb, Grade::Eleventh, d)
            .unwrap();

        assert_eq!(g.kind, LayoutKind::UniversityDay);
        let uday: Vec<(u32, u32, &str)> = g
            .university_day
            .iter()
            .map(|l| (l.group, l.number, l.info.as_str()))
            .collect();
        assert_eq!(
            uday,
            vec![
                (1, 0, "9:00-10:30\nПраво"),
                (2, 1, "10:40-12:10\nЭкономика"),
            ]
        );

        let regular: Vec<(Option<&str>, u32, u32, &str)> = g
            .regular
            .iter()
            .map(|l| (l.class_letter.as_deref(), l.group, l.number, l.info.as_str()))
            .collect();
        assert_eq!(
            regular,
            vec![
                (Some("11А"), 0, 0, "13:00-13:45\nФизкультура"),
                (Some("11Б"), 0, 1, "13:55-14:40\nЛитература"),
            ]
        );
    }

    #[test]
    fn lesson_without_time_label_is_an_error() {
        let table = LayoutTable::default();
        let mut sheet = eleventh_regular("11");
        sheet.set(at("D12"), "Факультатив");
        let wb = Workbook::new(vec![tenth_regular("10"), sheet]);

        let err = ScheduleParser::new(&table)
            .parse_grade(&wb, Grade::Eleventh, date(FRIDAY.0, FRIDAY.1, FRIDAY.2))
            .unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingTimeLabel { cell, period: 8 } if cell == at("D12")
        ));
        assert!(err.to_string().contains("D12"));
    }

    #[test]
    fn column_with_lessons_but_no_header_is_an_error() {
        let table = LayoutTable::default();
        let mut sheet = eleventh_regular("11");
        sheet.set(at("G5"), "Биология");
        let wb = Workbook::new(vec![tenth_regular("10"), sheet]);

        let err = ScheduleParser::new(&table)
            .parse_grade(&wb, Grade::Eleventh, date(FRIDAY.0, FRIDAY.1, FRIDAY.2))
            .unwrap_err();
        assert!(matches!(err, ParseError::EmptyHeader { cell } if cell == at("G2")));
    }
}
