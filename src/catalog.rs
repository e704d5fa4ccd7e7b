use serde::Serialize;

use crate::terms::StudyLevel;

/// Maximum points allotted to each grade component of one subject at one
/// study level. Period totals are `average_grade + period_exam`; the final
/// result is always expressed on the `third_period_total` scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDistribution {
    pub monthly_grade: u32,
    pub average_grade: u32,
    pub period_exam: u32,
    pub two_periods_total: u32,
    pub third_period_total: u32,
}

struct SubjectDef {
    name: &'static str,
    base: GradeDistribution,
}

const fn base(monthly: u32, exam: u32) -> GradeDistribution {
    GradeDistribution {
        monthly_grade: monthly,
        average_grade: monthly,
        period_exam: exam,
        two_periods_total: 2 * (monthly + exam),
        third_period_total: 100,
    }
}

// The institute's fixed subject catalog. Every base row keeps
// average + exam = 40 so that two periods sum to 80 and the cumulative
// third period lands on a 100-point scale.
const SUBJECTS: &[SubjectDef] = &[
    SubjectDef {
        name: "القرآن الكريم",
        base: base(20, 20),
    },
    SubjectDef {
        name: "التجويد",
        base: base(15, 25),
    },
    SubjectDef {
        name: "التفسير",
        base: base(12, 28),
    },
    SubjectDef {
        name: "الحديث الشريف",
        base: base(12, 28),
    },
    SubjectDef {
        name: "الفقه",
        base: base(15, 25),
    },
    SubjectDef {
        name: "العقيدة",
        base: base(12, 28),
    },
    SubjectDef {
        name: "النحو",
        base: base(15, 25),
    },
    SubjectDef {
        name: "الصرف",
        base: base(12, 28),
    },
    SubjectDef {
        name: "السيرة النبوية",
        base: base(10, 30),
    },
    SubjectDef {
        name: "الأخلاق والآداب",
        base: base(10, 30),
    },
];

fn reduce(v: u32) -> u32 {
    (v as f64 * 0.75).round() as u32
}

/// Graduation-level students carry a lightened continuous-assessment load:
/// the four scalable maxima drop to 75% (rounded), while the cumulative
/// third-period scale stays at its base value.
fn reduced(d: GradeDistribution) -> GradeDistribution {
    GradeDistribution {
        monthly_grade: reduce(d.monthly_grade),
        average_grade: reduce(d.average_grade),
        period_exam: reduce(d.period_exam),
        two_periods_total: reduce(d.two_periods_total),
        third_period_total: d.third_period_total,
    }
}

/// Exact-name lookup. A miss means "grades are not a supported feature for
/// this subject", which callers report as a data error rather than a crash.
pub fn distribution_for(subject_name: &str, level: StudyLevel) -> Option<GradeDistribution> {
    let subject_name = subject_name.trim();
    let def = SUBJECTS.iter().find(|s| s.name == subject_name)?;
    Some(match level {
        StudyLevel::Graduation => reduced(def.base),
        _ => def.base,
    })
}

pub fn subject_names() -> impl Iterator<Item = &'static str> {
    SUBJECTS.iter().map(|s| s.name)
}

pub fn subject_count() -> usize {
    SUBJECTS.len()
}
