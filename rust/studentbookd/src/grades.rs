use serde::Serialize;

use crate::model::{GradeEntry, SUBJECTS, SUBJECT_MAX_SCORE, TOTAL_SUBJECT};

/// Group label used when an entry carries no grade level.
pub const UNSET_GRADE_LABEL: &str = "未設定";
/// Group label used when an entry carries no test name.
pub const OTHER_TEST_LABEL: &str = "その他";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeField {
    Score,
    MaxScore,
    Average,
}

impl GradeField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "score" => Some(Self::Score),
            "maxScore" => Some(Self::MaxScore),
            "average" => Some(Self::Average),
            _ => None,
        }
    }

    fn is_aggregated(self) -> bool {
        matches!(self, Self::Score | Self::MaxScore)
    }
}

/// Leading-integer parse: optional whitespace and sign, then digits.
/// Anything without leading digits is 0, negatives clamp to 0, overflow
/// saturates.
pub fn parse_score(raw: &str) -> u32 {
    let t = raw.trim_start();
    let (negative, rest) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let digits: &str = {
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        &rest[..end]
    };
    if digits.is_empty() || negative {
        return 0;
    }
    digits
        .bytes()
        .fold(0u32, |acc, b| acc.saturating_mul(10).saturating_add(u32::from(b - b'0')))
}

/// Prepends a fresh set (five subjects then the Total row) for one test.
/// Returns `None` when either key is blank.
pub fn create_grade_set(
    entries: &[GradeEntry],
    grade_level: &str,
    test_name: &str,
) -> Option<Vec<GradeEntry>> {
    let grade_level = grade_level.trim();
    let test_name = test_name.trim();
    if grade_level.is_empty() || test_name.is_empty() {
        return None;
    }

    let mut out = Vec::with_capacity(entries.len() + SUBJECTS.len() + 1);
    for subject in SUBJECTS {
        out.push(GradeEntry {
            subject: subject.to_string(),
            test_name: test_name.to_string(),
            grade_level: grade_level.to_string(),
            score: 0,
            max_score: SUBJECT_MAX_SCORE,
            average: 0,
        });
    }
    out.push(GradeEntry {
        subject: TOTAL_SUBJECT.to_string(),
        test_name: test_name.to_string(),
        grade_level: grade_level.to_string(),
        score: 0,
        max_score: SUBJECT_MAX_SCORE * SUBJECTS.len() as u32,
        average: 0,
    });
    out.extend(entries.iter().cloned());
    Some(out)
}

/// Overwrites the Total row of (test, grade) with the sums of its siblings.
/// Does nothing when that pair has no Total row.
pub fn recompute_total(entries: &mut [GradeEntry], test_name: &str, grade_level: &str) {
    let (score, max_score) = entries
        .iter()
        .filter(|g| g.belongs_to(test_name, grade_level) && !g.is_total())
        .fold((0u32, 0u32), |(s, m), g| {
            (s.saturating_add(g.score), m.saturating_add(g.max_score))
        });
    if let Some(total) = entries
        .iter_mut()
        .find(|g| g.belongs_to(test_name, grade_level) && g.is_total())
    {
        total.score = score;
        total.max_score = max_score;
    }
}

/// Sets one field of the entry matching (test, subject, grade) and restores
/// the Total row when a subject's score or max score changed.
/// Returns `None` when no entry matches.
pub fn update_entry_field(
    entries: &[GradeEntry],
    test_name: &str,
    subject: &str,
    field: GradeField,
    raw_value: &str,
    grade_level: &str,
) -> Option<Vec<GradeEntry>> {
    let idx = entries.iter().position(|g| {
        g.test_name == test_name && g.subject == subject && g.grade_level == grade_level
    })?;

    let value = parse_score(raw_value);
    let mut out = entries.to_vec();
    let target = &mut out[idx];
    match field {
        GradeField::Score => target.score = value,
        GradeField::MaxScore => target.max_score = value,
        GradeField::Average => target.average = value,
    }

    if subject != TOTAL_SUBJECT && field.is_aggregated() {
        recompute_total(&mut out, test_name, grade_level);
    }
    Some(out)
}

/// Removes the entry at `index`. Removing a subject row recomputes its Total;
/// removing the last subject row of a test removes the Total row as well.
pub fn delete_entry(entries: &[GradeEntry], index: usize) -> Option<Vec<GradeEntry>> {
    let removed = entries.get(index)?.clone();
    let mut out = entries.to_vec();
    out.remove(index);
    if removed.is_total() {
        return Some(out);
    }

    let test = removed.test_name.as_str();
    let grade = removed.grade_level.as_str();
    let siblings_left = out
        .iter()
        .any(|g| g.belongs_to(test, grade) && !g.is_total());
    if siblings_left {
        recompute_total(&mut out, test, grade);
    } else {
        out.retain(|g| !(g.belongs_to(test, grade) && g.is_total()));
    }
    Some(out)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeGroup {
    pub key: String,
    pub grade_label: String,
    pub test_label: String,
    /// Members in their flat order, paired with their index in the flat list.
    pub members: Vec<(usize, GradeEntry)>,
}

impl GradeGroup {
    pub fn total(&self) -> Option<&GradeEntry> {
        self.members.iter().map(|(_, g)| g).find(|g| g.is_total())
    }

    pub fn subjects(&self) -> impl Iterator<Item = &GradeEntry> {
        self.members.iter().map(|(_, g)| g).filter(|g| !g.is_total())
    }
}

fn display_labels(entry: &GradeEntry) -> (&str, &str) {
    let grade = if entry.grade_level.is_empty() {
        UNSET_GRADE_LABEL
    } else {
        entry.grade_level.as_str()
    };
    let test = if entry.test_name.is_empty() {
        OTHER_TEST_LABEL
    } else {
        entry.test_name.as_str()
    };
    (grade, test)
}

/// Stable grouping by (grade, test) in order of first appearance.
pub fn group_for_display(entries: &[GradeEntry]) -> Vec<GradeGroup> {
    let mut groups: Vec<GradeGroup> = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let (grade, test) = display_labels(entry);
        match groups
            .iter_mut()
            .find(|g| g.grade_label == grade && g.test_label == test)
        {
            Some(group) => group.members.push((idx, entry.clone())),
            None => groups.push(GradeGroup {
                key: format!("{grade}_{test}"),
                grade_label: grade.to_string(),
                test_label: test.to_string(),
                members: vec![(idx, entry.clone())],
            }),
        }
    }
    groups
}
