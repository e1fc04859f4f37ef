use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    T1,
    T2,
    T3,
    T4,
}

impl Term {
    pub const ALL: [Term; 4] = [Term::T1, Term::T2, Term::T3, Term::T4];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "T1" | "1" => Some(Self::T1),
            "T2" | "2" => Some(Self::T2),
            "T3" | "3" => Some(Self::T3),
            "T4" | "4" => Some(Self::T4),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::T1 => "T1",
            Self::T2 => "T2",
            Self::T3 => "T3",
            Self::T4 => "T4",
        }
    }

    /// Share of the final grade carried by this term.
    pub fn final_weight(self) -> f64 {
        match self {
            Self::T1 | Self::T2 | Self::T3 => 0.20,
            Self::T4 => 0.40,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Pt,
    Quiz,
    Exam,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Pt, Category::Quiz, Category::Exam];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PT" | "LAB" | "PT/LAB" => Some(Self::Pt),
            "QUIZ" => Some(Self::Quiz),
            "EXAM" => Some(Self::Exam),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pt => "PT",
            Self::Quiz => "QUIZ",
            Self::Exam => "EXAM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub max_score: f64,
    #[serde(default)]
    pub transmutation_base: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_external_id: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermConfig {
    pub term: Term,
    pub pt_weight: f64,
    pub quiz_weight: f64,
    pub exam_weight: f64,
    #[serde(default)]
    pub assessments: Vec<Assessment>,
}

impl TermConfig {
    /// An unconfigured term: default split, no assessments.
    pub fn empty(term: Term) -> Self {
        Self {
            term,
            pt_weight: 40.0,
            quiz_weight: 20.0,
            exam_weight: 40.0,
            assessments: Vec::new(),
        }
    }

    pub fn weight(&self, category: Category) -> f64 {
        match category {
            Category::Pt => self.pt_weight,
            Category::Quiz => self.quiz_weight,
            Category::Exam => self.exam_weight,
        }
    }

    /// Enabled assessments of one category, in display order.
    pub fn enabled_in(&self, category: Category) -> Vec<&Assessment> {
        let mut out: Vec<&Assessment> = self
            .assessments
            .iter()
            .filter(|a| a.enabled && a.category == category)
            .collect();
        out.sort_by_key(|a| a.order);
        out
    }

    pub fn find(&self, assessment_id: &str) -> Option<&Assessment> {
        self.assessments.iter().find(|a| a.id == assessment_id)
    }
}

/// One buffered write, keyed by `studentId:assessmentId`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    pub student_id: String,
    pub assessment_id: String,
    pub score: Option<f64>,
}

impl PendingWrite {
    pub fn key(&self) -> String {
        write_key(&self.student_id, &self.assessment_id)
    }
}

pub fn write_key(student_id: &str, assessment_id: &str) -> String {
    format!("{}:{}", student_id, assessment_id)
}

/// Half-up rounding to 2 decimals.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}
