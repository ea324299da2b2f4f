//! Term codes and the term lifecycle.
//!
//! A term's status is never stored. It is derived from the three optional
//! timestamps on the term row every time it is read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Status of a term, derived from [`TermDates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermStatus {
    Created,
    Harvested,
    Opened,
    Closed,
}

/// The timestamps that drive a term's status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermDates {
    pub harvested_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TermDates {
    /// Derives the status from the timestamps.
    pub fn status(&self) -> TermStatus {
        if self.closed_at.is_some() {
            TermStatus::Closed
        } else if self.opened_at.is_some() {
            TermStatus::Opened
        } else if self.harvested_at.is_some() {
            TermStatus::Harvested
        } else {
            TermStatus::Created
        }
    }

    /// Records a completed harvest. Opened/closed dates are cleared so the
    /// rebuilt term starts over as Harvested.
    pub fn mark_harvested(self, now: DateTime<Utc>) -> Self {
        Self {
            harvested_at: Some(now),
            opened_at: None,
            closed_at: None,
        }
    }

    /// Harvested -> Opened
    pub fn open(self, now: DateTime<Utc>) -> Result<Self, HarvestError> {
        match self.status() {
            TermStatus::Harvested => Ok(Self {
                opened_at: Some(now),
                ..self
            }),
            other => Err(invalid_transition("open", other)),
        }
    }

    /// Opened -> Closed
    pub fn close(self, now: DateTime<Utc>) -> Result<Self, HarvestError> {
        match self.status() {
            TermStatus::Opened => Ok(Self {
                closed_at: Some(now),
                ..self
            }),
            other => Err(invalid_transition("close", other)),
        }
    }

    /// Closed -> Opened
    pub fn reopen(self) -> Result<Self, HarvestError> {
        match self.status() {
            TermStatus::Closed => Ok(Self {
                closed_at: None,
                ..self
            }),
            other => Err(invalid_transition("reopen", other)),
        }
    }

    /// Opened -> Harvested (or Created when the term was never harvested)
    pub fn unopen(self) -> Result<Self, HarvestError> {
        match self.status() {
            TermStatus::Opened => Ok(Self {
                opened_at: None,
                ..self
            }),
            other => Err(invalid_transition("unopen", other)),
        }
    }
}

fn invalid_transition(action: &str, status: TermStatus) -> HarvestError {
    HarvestError::validation(format!("cannot {} a term in status {:?}", action, status))
}

/// Kind of academic period encoded in the last two digits of a term code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermType {
    WinterQuarter,
    SpringSemester,
    SpringQuarter,
    SummerSessionI,
    SummerSpecialSession,
    SummerSessionII,
    SummerQuarter,
    FallSemester,
    FallQuarter,
    Unknown,
}

impl TermType {
    /// Decodes the term type from a term code such as `202409`.
    pub fn from_code(term_code: i32) -> Self {
        match term_code % 100 {
            1 => TermType::WinterQuarter,
            2 => TermType::SpringSemester,
            3 => TermType::SpringQuarter,
            4 => TermType::SummerSessionI,
            5 => TermType::SummerSpecialSession,
            6 => TermType::SummerSessionII,
            7 => TermType::SummerQuarter,
            9 => TermType::FallSemester,
            10 => TermType::FallQuarter,
            _ => TermType::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TermType::WinterQuarter => "Winter Quarter",
            TermType::SpringSemester => "Spring Semester",
            TermType::SpringQuarter => "Spring Quarter",
            TermType::SummerSessionI => "Summer Session I",
            TermType::SummerSpecialSession => "Summer Special Session",
            TermType::SummerSessionII => "Summer Session II",
            TermType::SummerQuarter => "Summer Quarter",
            TermType::FallSemester => "Fall Semester",
            TermType::FallQuarter => "Fall Quarter",
            TermType::Unknown => "Term",
        }
    }

    pub fn is_semester(&self) -> bool {
        matches!(self, TermType::SpringSemester | TermType::FallSemester)
    }
}

/// Calendar year of a term code.
pub fn term_year(term_code: i32) -> i32 {
    term_code / 100
}

/// Human readable name, e.g. `"Fall Semester 2024"` for `202409`.
pub fn term_name(term_code: i32) -> String {
    let term_type = TermType::from_code(term_code);
    match term_type {
        TermType::Unknown => format!("Term {}", term_code),
        _ => format!("{} {}", term_type.label(), term_year(term_code)),
    }
}

/// True when the term code denotes a semester-style term.
pub fn is_semester(term_code: i32) -> bool {
    TermType::from_code(term_code).is_semester()
}
