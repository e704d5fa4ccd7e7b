use serde::Serialize;

use crate::catalog::GradeDistribution;
use crate::terms::{ExamPeriod, StudyLevel, StudyMode};

/// Registrar-compatible 1-decimal rounding used for all stored totals:
/// `floor(10*x + 0.5) / 10`.
pub fn round_mark(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    Month1,
    Month2,
    Month3,
    PeriodExam,
}

impl MarkKind {
    pub fn label(self) -> &'static str {
        match self {
            MarkKind::Month1 => "درجة الشهر الأول",
            MarkKind::Month2 => "درجة الشهر الثاني",
            MarkKind::Month3 => "درجة الشهر الثالث",
            MarkKind::PeriodExam => "درجة اختبار الفترة",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkCheck {
    pub ok: bool,
    pub error: Option<String>,
}

/// Range check for one submitted mark. Null marks never reach this point;
/// "not yet entered" is the caller's state, not a validation failure.
pub fn check_mark(value: f64, max_allowed: u32, kind: MarkKind) -> MarkCheck {
    if !value.is_finite() {
        return MarkCheck {
            ok: false,
            error: Some(format!("{} ليست رقمًا صالحًا", kind.label())),
        };
    }
    if value < 0.0 || value > max_allowed as f64 {
        return MarkCheck {
            ok: false,
            error: Some(format!(
                "{} يجب أن تكون بين 0 و {}",
                kind.label(),
                max_allowed
            )),
        };
    }
    MarkCheck {
        ok: true,
        error: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodTotals {
    pub work_total: f64,
    pub period_total: f64,
}

/// Continuous-assessment total plus the period exam. A missing month
/// contributes 0 so that totals stay computable while marks are still being
/// entered through the month; the three-month average is rescaled from the
/// monthly maximum onto the average-grade scale.
pub fn calculate_totals(
    month1: Option<f64>,
    month2: Option<f64>,
    month3: Option<f64>,
    period_exam: Option<f64>,
    dist: &GradeDistribution,
) -> PeriodTotals {
    let month_sum = month1.unwrap_or(0.0) + month2.unwrap_or(0.0) + month3.unwrap_or(0.0);
    let work_total = if dist.monthly_grade > 0 {
        round_mark(month_sum / 3.0 * dist.average_grade as f64 / dist.monthly_grade as f64)
    } else {
        0.0
    };
    let period_total = round_mark(work_total + period_exam.unwrap_or(0.0));
    PeriodTotals {
        work_total,
        period_total,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRestriction {
    pub can_enter_grades: bool,
    pub available_periods: Vec<ExamPeriod>,
    pub restrictions: Vec<String>,
}

impl StudentRestriction {
    pub fn allows(&self, period: ExamPeriod) -> bool {
        self.can_enter_grades && self.available_periods.contains(&period)
    }
}

/// Single source of truth for grade-entry eligibility. Both the interactive
/// save path and the bulk import call this before accepting any mark.
///
/// Correspondence-mode diploma holders are excluded from local grade entry
/// at every level. Third-year third-period results are issued by the central
/// examination board, not entered here.
pub fn resolve_restrictions(
    level: StudyLevel,
    mode: StudyMode,
    is_diploma: bool,
) -> StudentRestriction {
    if mode == StudyMode::Correspondence && is_diploma {
        return StudentRestriction {
            can_enter_grades: false,
            available_periods: Vec::new(),
            restrictions: vec![
                "طلاب الانتساب من حملة الدبلوم لا يُرصد لهم درجات في المعهد".to_string(),
            ],
        };
    }

    let available_periods = match level {
        StudyLevel::ThirdYear => vec![ExamPeriod::First, ExamPeriod::Second],
        _ => vec![ExamPeriod::First, ExamPeriod::Second, ExamPeriod::Third],
    };
    let restrictions = if level == StudyLevel::ThirdYear {
        vec!["نتيجة الفترة الثالثة للسنة الثالثة تصدر عن لجنة الامتحانات المركزية".to_string()]
    } else {
        Vec::new()
    };

    StudentRestriction {
        can_enter_grades: true,
        available_periods,
        restrictions,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterGrade {
    Excellent,
    VeryGood,
    Good,
    Acceptable,
    Weak,
    Fail,
}

impl LetterGrade {
    pub fn from_percentage(percentage: f64) -> LetterGrade {
        if percentage >= 95.0 {
            LetterGrade::Excellent
        } else if percentage >= 85.0 {
            LetterGrade::VeryGood
        } else if percentage >= 75.0 {
            LetterGrade::Good
        } else if percentage >= 65.0 {
            LetterGrade::Acceptable
        } else if percentage >= 50.0 {
            LetterGrade::Weak
        } else {
            LetterGrade::Fail
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LetterGrade::Excellent => "ممتاز",
            LetterGrade::VeryGood => "جيد جداً",
            LetterGrade::Good => "جيد",
            LetterGrade::Acceptable => "مقبول",
            LetterGrade::Weak => "ضعيف",
            LetterGrade::Fail => "راسب",
        }
    }

    pub fn gpa(self) -> f64 {
        match self {
            LetterGrade::Excellent => 4.0,
            LetterGrade::VeryGood => 3.5,
            LetterGrade::Good => 3.0,
            LetterGrade::Acceptable => 2.5,
            LetterGrade::Weak => 2.0,
            LetterGrade::Fail => 0.0,
        }
    }

    pub fn passed(self) -> bool {
        self != LetterGrade::Fail
    }
}

pub const STATUS_PASS: &str = "نجح";
pub const STATUS_FAIL: &str = "راسب";
pub const STATUS_INCOMPLETE: &str = "غير مكتمل";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    pub final_total: f64,
    pub percentage: f64,
    pub grade: LetterGrade,
}

impl FinalResult {
    pub fn status(&self) -> &'static str {
        if self.grade.passed() {
            STATUS_PASS
        } else {
            STATUS_FAIL
        }
    }
}

/// The third period is cumulative by institute rule: its total is the sum of
/// both earlier period totals plus the third-period exam. Not an
/// accumulation bug.
pub fn calculate_final_result(
    first_period_total: f64,
    second_period_total: f64,
    third_period_exam: f64,
    dist: &GradeDistribution,
) -> FinalResult {
    let final_total = round_mark(first_period_total + second_period_total + third_period_exam);
    let percentage = if dist.third_period_total > 0 {
        round_mark(final_total / dist.third_period_total as f64 * 100.0)
    } else {
        0.0
    };
    FinalResult {
        final_total,
        percentage,
        grade: LetterGrade::from_percentage(percentage),
    }
}
