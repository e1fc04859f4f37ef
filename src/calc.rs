use crate::model::{round_off_2_decimals, Assessment, Category, Term, TermConfig};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Where the engine reads scores from. Implementations must not mutate.
pub trait ScoreSource {
    fn effective_score(&self, student_id: &str, assessment: &Assessment) -> Option<f64>;
}

/// Descending thresholds on the term total; anything below the last maps to 5.00.
const GRADE_BANDS: [(f64, f64); 9] = [
    (97.5, 1.00),
    (94.5, 1.25),
    (91.5, 1.50),
    (86.5, 1.75),
    (81.5, 2.00),
    (76.0, 2.25),
    (70.5, 2.50),
    (65.0, 2.75),
    (59.5, 3.00),
];
const FAILING_GRADE: f64 = 5.00;
pub const PASSING_CUTOFF: f64 = 3.00;

pub fn percent(score: Option<f64>, max: f64) -> Option<f64> {
    let score = score?;
    if max <= 0.0 {
        return None;
    }
    Some((score / max * 100.0).clamp(0.0, 100.0))
}

/// Raises a sub-threshold score to `base`% of `max`. Never lowers a score.
pub fn transmute(raw: Option<f64>, max: f64, base: f64) -> Option<f64> {
    let raw = raw?;
    if base == 0.0 {
        return Some(raw);
    }
    let threshold = (base / 100.0) * max;
    if raw < threshold {
        Some(threshold)
    } else {
        Some(raw)
    }
}

pub fn weighted(avg: Option<f64>, weight: f64) -> Option<f64> {
    avg.map(|a| (a / 100.0) * weight)
}

pub fn numeric_band(total: f64) -> f64 {
    GRADE_BANDS
        .iter()
        .find(|(cutoff, _)| total >= *cutoff)
        .map(|(_, grade)| *grade)
        .unwrap_or(FAILING_GRADE)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryAverage {
    /// Enabled assessments in the category.
    pub assessed: usize,
    /// Mean percentage; `None` until every enabled assessment is scored.
    pub average: Option<f64>,
    /// Some effective score exceeded its assessment's maximum.
    pub over_max: bool,
}

pub fn category_average<S: ScoreSource + ?Sized>(
    source: &S,
    student_id: &str,
    assessments: &[&Assessment],
) -> CategoryAverage {
    let mut percents: Vec<f64> = Vec::with_capacity(assessments.len());
    let mut complete = true;
    let mut over_max = false;
    let mut assessed = 0;

    for a in assessments.iter().filter(|a| a.enabled) {
        assessed += 1;
        let effective = source.effective_score(student_id, a);
        if let Some(v) = effective {
            if v > a.max_score {
                over_max = true;
            }
        }
        let transmuted = transmute(effective, a.max_score, a.transmutation_base);
        match percent(transmuted, a.max_score) {
            Some(p) => percents.push(p),
            None => complete = false,
        }
    }

    let average = if complete && assessed > 0 {
        Some(percents.iter().sum::<f64>() / percents.len() as f64)
    } else {
        None
    };
    CategoryAverage {
        assessed,
        average,
        over_max,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericGrade {
    Band(f64),
    /// Some score exceeds its configured maximum.
    Error,
    /// Not yet computable.
    Pending,
}

impl NumericGrade {
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Band(v) => Some(v),
            Self::Error | Self::Pending => None,
        }
    }
}

impl fmt::Display for NumericGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Band(v) => write!(f, "{:.2}", v),
            Self::Error => f.write_str("(error)"),
            Self::Pending => f.write_str("-"),
        }
    }
}

impl Serialize for NumericGrade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryValues {
    pub pt: Option<f64>,
    pub quiz: Option<f64>,
    pub exam: Option<f64>,
}

impl CategoryValues {
    fn set(&mut self, category: Category, value: Option<f64>) {
        match category {
            Category::Pt => self.pt = value,
            Category::Quiz => self.quiz = value,
            Category::Exam => self.exam = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedTermGrade {
    pub term: Term,
    pub total_percent: Option<f64>,
    pub numeric_grade: NumericGrade,
    pub category_average: CategoryValues,
    pub category_weighted: CategoryValues,
}

impl DerivedTermGrade {
    pub fn pending(term: Term) -> Self {
        Self {
            term,
            total_percent: None,
            numeric_grade: NumericGrade::Pending,
            category_average: CategoryValues::default(),
            category_weighted: CategoryValues::default(),
        }
    }
}

pub fn term_grade<S: ScoreSource + ?Sized>(
    source: &S,
    student_id: &str,
    cfg: &TermConfig,
) -> DerivedTermGrade {
    let mut out = DerivedTermGrade::pending(cfg.term);
    let mut gradable_categories = 0;
    let mut blocked = false;
    let mut over_max = false;
    let mut sum = 0.0_f64;

    for category in Category::ALL {
        let assessments = cfg.enabled_in(category);
        let avg = category_average(source, student_id, &assessments);
        over_max |= avg.over_max;
        let w = weighted(avg.average, cfg.weight(category));
        out.category_average.set(category, avg.average);
        out.category_weighted.set(category, w);

        // Categories without enabled assessments stay out of the total.
        if avg.assessed == 0 {
            continue;
        }
        gradable_categories += 1;
        match w {
            Some(v) => sum += v,
            None => blocked = true,
        }
    }

    if gradable_categories > 0 && !blocked {
        out.total_percent = Some(sum);
    }
    out.numeric_grade = if over_max {
        NumericGrade::Error
    } else {
        match out.total_percent {
            Some(total) => NumericGrade::Band(numeric_band(total)),
            None => NumericGrade::Pending,
        }
    };
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Remarks {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalGrade {
    pub grade: Option<f64>,
    pub remarks: Option<Remarks>,
}

/// Combines the four term grades. Any term without a numeric band leaves the
/// final grade undefined.
pub fn final_grade(terms: &BTreeMap<Term, DerivedTermGrade>) -> FinalGrade {
    let mut total = 0.0_f64;
    for term in Term::ALL {
        let Some(grade) = terms.get(&term).and_then(|g| g.numeric_grade.value()) else {
            return FinalGrade {
                grade: None,
                remarks: None,
            };
        };
        total += grade * term.final_weight();
    }
    let grade = round_off_2_decimals(total);
    let remarks = if grade <= PASSING_CUTOFF {
        Remarks::Passed
    } else {
        Remarks::Failed
    };
    FinalGrade {
        grade: Some(grade),
        remarks: Some(remarks),
    }
}
