//! Which grid a grade's sheet uses on a given day, and where its parts sit.
//!
//! The table is plain data: the built-in default mirrors the institution's
//! current template, and a JSON file can replace it when the template moves.

use std::{collections::HashSet, fmt, path::Path};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{
    sheet::{column_name, CellRef, Sheet},
    ParseError,
};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "10")]
    Tenth,
    #[serde(rename = "11")]
    Eleventh,
}

impl Grade {
    pub const ALL: [Grade; 2] = [Grade::Tenth, Grade::Eleventh];

    /// Sheet tag and class-letter prefix.
    pub fn tag(self) -> &'static str {
        match self {
            Grade::Tenth => "10",
            Grade::Eleventh => "11",
        }
    }

    /// Grade of a class letter such as `10А`.
    pub fn of_class(class_letter: &str) -> Option<Grade> {
        Grade::ALL
            .into_iter()
            .find(|g| class_letter.trim_start().starts_with(g.tag()))
    }

    pub fn parse(s: &str) -> Option<Grade> {
        Grade::ALL.into_iter().find(|g| g.tag() == s.trim())
    }

    /// 0-based sheet position used when no sheet carries the grade's tag:
    /// grade sheets follow each other in grade order.
    pub fn fallback_sheet(self) -> usize {
        match self {
            Grade::Tenth => 0,
            Grade::Eleventh => 1,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Regular,
    UniversityDay,
}

/// Column semantics of one decoding pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    /// Header row holds the class letter, the next row the sub-group label.
    ClassGroups,
    /// Header row holds a roaming-group number; yields university-day lessons.
    RoamingGroups,
    /// Header row holds the class letter; group is always 0.
    Classes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLabels {
    pub column: u32,
    pub first_row: u32,
    pub last_row: u32,
    /// When set, the largest number found in this column over the same rows is
    /// the period count, and exactly that many labels are read positionally.
    /// Otherwise every non-empty label in the range is taken in order.
    #[serde(default)]
    pub count_column: Option<u32>,
}

impl TimeLabels {
    /// Labels indexed by period number. `None` marks a period without a label.
    pub fn resolve(&self, sheet: &Sheet) -> std::result::Result<Vec<Option<String>>, ParseError> {
        let clean = |s: &str| s.replace('\n', "");

        let Some(count_column) = self.count_column else {
            let mut labels = Vec::new();
            for row in self.first_row..=self.last_row {
                if let Some(v) = sheet.value(CellRef::new(row, self.column))? {
                    labels.push(Some(clean(v)));
                }
            }
            return Ok(labels);
        };

        let mut periods: Option<u32> = None;
        for row in self.first_row..=self.last_row {
            let Some(v) = sheet.value(CellRef::new(row, count_column))? else {
                continue;
            };
            if let Ok(n) = v.trim().parse::<u32>() {
                periods = Some(periods.map_or(n, |p| p.max(n)));
            }
        }
        let periods = periods.ok_or_else(|| ParseError::NoPeriods {
            column: column_name(count_column),
        })?;

        (0..periods)
            .map(|i| {
                let cell = CellRef::new(self.first_row + i, self.column);
                Ok(sheet.value(cell)?.map(clean))
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pass {
    pub kind: PassKind,
    pub header_row: u32,
    pub first_col: u32,
    pub last_col: u32,
    /// Last lesson row, inclusive.
    pub last_row: u32,
    pub times: TimeLabels,
}

impl Pass {
    pub fn body_first_row(&self) -> u32 {
        match self.kind {
            PassKind::ClassGroups => self.header_row + 2,
            PassKind::RoamingGroups | PassKind::Classes => self.header_row + 1,
        }
    }

    pub fn yields_university_day(&self) -> bool {
        self.kind == PassKind::RoamingGroups
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSpec {
    pub grade: Grade,
    pub kind: LayoutKind,
    pub passes: Vec<Pass>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversityDay {
    pub grade: Grade,
    /// 0 = Monday.
    pub weekday: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutTable {
    pub university_days: Vec<UniversityDay>,
    #[serde(default = "default_sub_group_labels")]
    pub sub_group_labels: [String; 2],
    pub layouts: Vec<LayoutSpec>,
}

fn default_sub_group_labels() -> [String; 2] {
    ["гр.А".to_string(), "гр.Б".to_string()]
}

impl LayoutTable {
    /// Load and validate a JSON table.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let table: LayoutTable = serde_json::from_str(&raw)?;
        table.validate()?;
        Ok(table)
    }

    pub fn kind_for(&self, grade: Grade, date: NaiveDate) -> LayoutKind {
        let weekday = date.weekday().num_days_from_monday();
        if self
            .university_days
            .iter()
            .any(|d| d.grade == grade && d.weekday == weekday)
        {
            LayoutKind::UniversityDay
        } else {
            LayoutKind::Regular
        }
    }

    pub fn spec(&self, grade: Grade, kind: LayoutKind) -> std::result::Result<&LayoutSpec, ParseError> {
        self.layouts
            .iter()
            .find(|l| l.grade == grade && l.kind == kind)
            .ok_or(ParseError::MissingLayout { grade, kind })
    }

    /// Sub-group index (0/1) of a label, ignoring all whitespace.
    pub fn sub_group(&self, label: &str) -> Option<u32> {
        let compact: String = label.split_whitespace().collect();
        self.sub_group_labels
            .iter()
            .position(|l| *l == compact)
            .map(|i| i as u32)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Error::Parse(ParseError::InvalidLayout(msg));

        let [a, b] = &self.sub_group_labels;
        if a.trim().is_empty() || b.trim().is_empty() || a == b {
            return Err(invalid("sub-group labels must be two distinct non-empty strings".into()));
        }

        for day in &self.university_days {
            if day.weekday > 6 {
                return Err(invalid(format!("weekday {} out of range 0..=6", day.weekday)));
            }
        }

        let mut seen = HashSet::new();
        for spec in &self.layouts {
            let id = format!("{}/{:?}", spec.grade, spec.kind);
            if !seen.insert((spec.grade, spec.kind)) {
                return Err(invalid(format!("{id}: duplicate layout")));
            }
            if spec.passes.is_empty() {
                return Err(invalid(format!("{id}: no passes")));
            }
            for pass in &spec.passes {
                let t = &pass.times;
                let coords_ok = pass.header_row > 0
                    && pass.first_col > 0
                    && t.column > 0
                    && t.first_row > 0
                    && t.count_column != Some(0);
                if !coords_ok {
                    return Err(invalid(format!("{id}: coordinates are 1-based")));
                }
                if pass.first_col > pass.last_col {
                    return Err(invalid(format!("{id}: empty column span")));
                }
                if pass.body_first_row() > pass.last_row {
                    return Err(invalid(format!("{id}: no lesson rows")));
                }
                if t.first_row > t.last_row {
                    return Err(invalid(format!("{id}: empty time-label range")));
                }
            }
        }

        for grade in Grade::ALL {
            self.spec(grade, LayoutKind::Regular)?;
        }
        for day in &self.university_days {
            self.spec(day.grade, LayoutKind::UniversityDay)?;
        }
        Ok(())
    }
}

impl Default for LayoutTable {
    fn default() -> Self {
        let times = |first_row, last_row| TimeLabels {
            column: 3,
            first_row,
            last_row,
            count_column: None,
        };
        let pass = |kind, header_row, last_col, last_row, times| Pass {
            kind,
            header_row,
            first_col: 4,
            last_col,
            last_row,
            times,
        };

        Self {
            university_days: vec![
                UniversityDay {
                    grade: Grade::Tenth,
                    weekday: 0,
                },
                UniversityDay {
                    grade: Grade::Eleventh,
                    weekday: 2,
                },
            ],
            sub_group_labels: default_sub_group_labels(),
            layouts: vec![
                LayoutSpec {
                    grade: Grade::Tenth,
                    kind: LayoutKind::Regular,
                    passes: vec![pass(
                        PassKind::ClassGroups,
                        2,
                        23,
                        11,
                        TimeLabels {
                            count_column: Some(2),
                            ..times(4, 14)
                        },
                    )],
                },
                LayoutSpec {
                    grade: Grade::Eleventh,
                    kind: LayoutKind::Regular,
                    passes: vec![pass(PassKind::ClassGroups, 2, 23, 12, times(4, 11))],
                },
                LayoutSpec {
                    grade: Grade::Tenth,
                    kind: LayoutKind::UniversityDay,
                    passes: vec![
                        pass(PassKind::RoamingGroups, 2, 27, 8, times(3, 8)),
                        pass(PassKind::Classes, 9, 27, 12, times(10, 11)),
                    ],
                },
                LayoutSpec {
                    grade: Grade::Eleventh,
                    kind: LayoutKind::UniversityDay,
                    passes: vec![
                        pass(PassKind::RoamingGroups, 3, 23, 9, times(4, 9)),
                        pass(PassKind::Classes, 10, 23, 13, times(11, 12)),
                    ],
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn university_day_depends_on_grade_and_weekday() {
        let t = LayoutTable::default();
        let monday = date(2024, 9, 2);
        let wednesday = date(2024, 9, 4);
        let friday = date(2024, 9, 6);

        assert_eq!(t.kind_for(Grade::Tenth, monday), LayoutKind::UniversityDay);
        assert_eq!(t.kind_for(Grade::Eleventh, monday), LayoutKind::Regular);
        assert_eq!(t.kind_for(Grade::Tenth, wednesday), LayoutKind::Regular);
        assert_eq!(t.kind_for(Grade::Eleventh, wednesday), LayoutKind::UniversityDay);
        assert_eq!(t.kind_for(Grade::Tenth, friday), LayoutKind::Regular);
        assert_eq!(t.kind_for(Grade::Eleventh, friday), LayoutKind::Regular);
    }

    #[test]
    fn builtin_table_is_valid() {
        LayoutTable::default().validate().unwrap();
    }

    #[test]
    fn sub_group_labels_ignore_whitespace() {
        let t = LayoutTable::default();
        assert_eq!(t.sub_group("гр.А"), Some(0));
        assert_eq!(t.sub_group(" гр. Б\n"), Some(1));
        assert_eq!(t.sub_group("гр.В"), None);
    }

    #[test]
    fn untagged_sheets_fall_back_in_grade_order() {
        assert_eq!(Grade::Tenth.fallback_sheet(), 0);
        assert_eq!(Grade::Eleventh.fallback_sheet(), 1);
    }

    #[test]
    fn grade_of_class_letter() {
        assert_eq!(Grade::of_class("10А"), Some(Grade::Tenth));
        assert_eq!(Grade::of_class("11Б"), Some(Grade::Eleventh));
        assert_eq!(Grade::of_class("9А"), None);
    }

    #[test]
    fn table_round_trips_through_json() {
        let t = LayoutTable::default();
        let json = serde_json::to_string_pretty(&t).unwrap();
        assert!(json.contains("\"university_day\""));
        assert!(json.contains("\"10\""));

        let back: LayoutTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn missing_regular_layout_is_rejected() {
        let mut t = LayoutTable::default();
        t.layouts
            .retain(|l| !(l.grade == Grade::Eleventh && l.kind == LayoutKind::Regular));

        let err = t.validate().unwrap_err();
        assert!(err.to_string().contains("11"), "{err}");
    }

    #[test]
    fn counted_time_labels_read_positionally() {
        let mut sheet = Sheet::new("10");
        sheet.set(CellRef::new(4, 2), "1").set(CellRef::new(5, 2), "2");
        sheet.set(CellRef::new(6, 2), "итого");
        sheet.set(CellRef::new(4, 3), "8:30-\n9:15");
        sheet.set(CellRef::new(5, 3), "9:25-10:10");
        sheet.set(CellRef::new(6, 3), "10:20-11:05");

        let labels = TimeLabels {
            column: 3,
            first_row: 4,
            last_row: 14,
            count_column: Some(2),
        };
        assert_eq!(
            labels.resolve(&sheet).unwrap(),
            vec![Some("8:30-9:15".to_string()), Some("9:25-10:10".to_string())]
        );

        let empty = Sheet::new("10");
        assert!(matches!(
            labels.resolve(&empty),
            Err(ParseError::NoPeriods { ref column }) if column == "B"
        ));
    }
}
