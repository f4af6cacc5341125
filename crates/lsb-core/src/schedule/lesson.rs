use chrono::NaiveDate;

use super::layout::Grade;

/// One scheduled period.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Lesson {
    /// 0-based period number within the day.
    pub number: u32,
    /// Time label and lesson text, newline-joined.
    pub info: String,
    pub date: NaiveDate,
    pub grade: Grade,
    /// Sub-group (0/1) for regular lessons, roaming-group number for
    /// university-day lessons.
    pub group: u32,
    /// `None` for university-day lessons, which belong to a roaming group
    /// rather than a class.
    pub class_letter: Option<String>,
}

/// Lessons of one date for the grades in `grades`.
///
/// Storing a snapshot replaces only those grades' lessons for the date; lessons
/// of other grades stay as they are.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleSnapshot {
    pub date: NaiveDate,
    pub grades: Vec<Grade>,
    pub regular: Vec<Lesson>,
    pub university_day: Vec<Lesson>,
}

impl ScheduleSnapshot {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            grades: Vec::new(),
            regular: Vec::new(),
            university_day: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.regular.len() + self.university_day.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy, for comparing snapshots regardless of insertion order.
    pub fn normalized(mut self) -> Self {
        self.grades.sort();
        self.grades.dedup();
        self.regular.sort();
        self.university_day.sort();
        self
    }
}
