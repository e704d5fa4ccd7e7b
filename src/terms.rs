use serde::{Deserialize, Serialize};

/// Study levels offered by the institute. The Arabic labels are the only
/// representation that crosses the IPC boundary; the ASCII codes are what
/// gets stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyLevel {
    FirstYear,
    SecondYear,
    ThirdYear,
    Graduation,
}

impl StudyLevel {
    pub const ALL: [StudyLevel; 4] = [
        StudyLevel::FirstYear,
        StudyLevel::SecondYear,
        StudyLevel::ThirdYear,
        StudyLevel::Graduation,
    ];

    pub fn code(self) -> &'static str {
        match self {
            StudyLevel::FirstYear => "first_year",
            StudyLevel::SecondYear => "second_year",
            StudyLevel::ThirdYear => "third_year",
            StudyLevel::Graduation => "graduation",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StudyLevel::FirstYear => "السنة الأولى",
            StudyLevel::SecondYear => "السنة الثانية",
            StudyLevel::ThirdYear => "السنة الثالثة",
            StudyLevel::Graduation => "التخرج",
        }
    }

    pub fn from_code(code: &str) -> Option<StudyLevel> {
        Self::ALL.iter().copied().find(|l| l.code() == code)
    }

    pub fn from_label(label: &str) -> Option<StudyLevel> {
        let label = label.trim();
        Self::ALL.iter().copied().find(|l| l.label() == label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyMode {
    Regular,
    Correspondence,
}

impl StudyMode {
    pub const ALL: [StudyMode; 2] = [StudyMode::Regular, StudyMode::Correspondence];

    pub fn code(self) -> &'static str {
        match self {
            StudyMode::Regular => "regular",
            StudyMode::Correspondence => "correspondence",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StudyMode::Regular => "نظامي",
            StudyMode::Correspondence => "انتساب",
        }
    }

    pub fn from_code(code: &str) -> Option<StudyMode> {
        Self::ALL.iter().copied().find(|m| m.code() == code)
    }

    pub fn from_label(label: &str) -> Option<StudyMode> {
        let label = label.trim();
        Self::ALL.iter().copied().find(|m| m.label() == label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamPeriod {
    First,
    Second,
    Third,
}

impl ExamPeriod {
    pub const ALL: [ExamPeriod; 3] = [ExamPeriod::First, ExamPeriod::Second, ExamPeriod::Third];

    pub fn code(self) -> &'static str {
        match self {
            ExamPeriod::First => "period1",
            ExamPeriod::Second => "period2",
            ExamPeriod::Third => "period3",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExamPeriod::First => "الفترة الأولى",
            ExamPeriod::Second => "الفترة الثانية",
            ExamPeriod::Third => "الفترة الثالثة",
        }
    }

    pub fn from_code(code: &str) -> Option<ExamPeriod> {
        Self::ALL.iter().copied().find(|p| p.code() == code)
    }

    pub fn from_label(label: &str) -> Option<ExamPeriod> {
        let label = label.trim();
        Self::ALL.iter().copied().find(|p| p.label() == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn study_level_labels_round_trip() {
        for level in StudyLevel::ALL {
            assert_eq!(StudyLevel::from_label(level.label()), Some(level));
            assert_eq!(StudyLevel::from_code(level.code()), Some(level));
        }
        assert_eq!(StudyLevel::from_label("سنة خامسة"), None);
        assert_eq!(StudyLevel::from_code("fifth_year"), None);
    }

    #[test]
    fn study_mode_labels_round_trip() {
        for mode in StudyMode::ALL {
            assert_eq!(StudyMode::from_label(mode.label()), Some(mode));
            assert_eq!(StudyMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(StudyMode::from_label("مسائي"), None);
    }

    #[test]
    fn exam_period_labels_round_trip() {
        for period in ExamPeriod::ALL {
            assert_eq!(ExamPeriod::from_label(period.label()), Some(period));
            assert_eq!(ExamPeriod::from_code(period.code()), Some(period));
        }
        assert_eq!(ExamPeriod::from_label("الفترة الرابعة"), None);
    }

    #[test]
    fn labels_tolerate_surrounding_whitespace() {
        assert_eq!(
            StudyLevel::from_label("  السنة الأولى "),
            Some(StudyLevel::FirstYear)
        );
        assert_eq!(
            ExamPeriod::from_label(" الفترة الثالثة"),
            Some(ExamPeriod::Third)
        );
    }
}
