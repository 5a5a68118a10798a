use serde::{Deserialize, Deserializer, Serialize};

/// Reserved subject label of the aggregate row in every grade set.
pub const TOTAL_SUBJECT: &str = "合計点";

/// Subjects generated for a new grade set, in display order.
pub const SUBJECTS: [&str; 5] = ["国語", "数学", "英語", "社会", "理科"];

pub const SUBJECT_MAX_SCORE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GradeLevel {
    Elementary1,
    Elementary2,
    Elementary3,
    Elementary4,
    Elementary5,
    Elementary6,
    Junior1,
    Junior2,
    Junior3,
    Senior1,
    Senior2,
    Senior3,
    Other,
}

impl GradeLevel {
    pub const ALL: [GradeLevel; 13] = [
        GradeLevel::Elementary1,
        GradeLevel::Elementary2,
        GradeLevel::Elementary3,
        GradeLevel::Elementary4,
        GradeLevel::Elementary5,
        GradeLevel::Elementary6,
        GradeLevel::Junior1,
        GradeLevel::Junior2,
        GradeLevel::Junior3,
        GradeLevel::Senior1,
        GradeLevel::Senior2,
        GradeLevel::Senior3,
        GradeLevel::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Elementary1 => "小1",
            Self::Elementary2 => "小2",
            Self::Elementary3 => "小3",
            Self::Elementary4 => "小4",
            Self::Elementary5 => "小5",
            Self::Elementary6 => "小6",
            Self::Junior1 => "中1",
            Self::Junior2 => "中2",
            Self::Junior3 => "中3",
            Self::Senior1 => "高1",
            Self::Senior2 => "高2",
            Self::Senior3 => "高3",
            Self::Other => "その他",
        }
    }

    /// Exact label match; labels are compared verbatim, as stored.
    pub fn from_label(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.label() == s)
    }
}

/// Reads `null` as the field's default, the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lesson {
    #[serde(deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub subject: String,
    #[serde(deserialize_with = "null_as_default")]
    pub instructor: String,
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(deserialize_with = "null_as_default")]
    pub homework: String,
    #[serde(deserialize_with = "null_as_default")]
    pub comment: String,
}

impl Lesson {
    /// Blank lesson dated today (local time).
    pub fn dated_today() -> Self {
        Lesson {
            date: chrono::Local::now().format("%Y-%m-%d").to_string(),
            ..Lesson::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GradeEntry {
    #[serde(deserialize_with = "null_as_default")]
    pub subject: String,
    #[serde(rename = "test", deserialize_with = "null_as_default")]
    pub test_name: String,
    #[serde(rename = "grade", deserialize_with = "null_as_default")]
    pub grade_level: String,
    #[serde(deserialize_with = "null_as_default")]
    pub score: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub max_score: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub average: u32,
}

impl GradeEntry {
    pub fn is_total(&self) -> bool {
        self.subject == TOTAL_SUBJECT
    }

    pub fn belongs_to(&self, test_name: &str, grade_level: &str) -> bool {
        self.test_name == test_name && self.grade_level == grade_level
    }
}

/// Stored student document. The store-assigned id lives beside it, not in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Student {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "grade", deserialize_with = "null_as_default")]
    pub grade_level: String,
    #[serde(deserialize_with = "null_as_default")]
    pub school: String,
    #[serde(deserialize_with = "null_as_default")]
    pub notes: String,
    #[serde(deserialize_with = "null_as_default")]
    pub lessons: Vec<Lesson>,
    #[serde(deserialize_with = "null_as_default")]
    pub grades: Vec<GradeEntry>,
}

impl Student {
    pub fn identity_key(&self) -> (&str, &str) {
        (self.name.as_str(), self.grade_level.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStudent {
    pub id: String,
    #[serde(flatten)]
    pub student: Student,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_levels_cover_thirteen_labels() {
        assert_eq!(GradeLevel::ALL.len(), 13);
        assert_eq!(GradeLevel::from_label("中2"), Some(GradeLevel::Junior2));
        assert_eq!(GradeLevel::from_label("その他"), Some(GradeLevel::Other));
        assert_eq!(GradeLevel::from_label("火1"), None);
        assert_eq!(GradeLevel::from_label(" 中2"), None);
    }

    #[test]
    fn student_document_uses_backup_field_names() {
        let raw = r#"{
            "id": "abc",
            "name": "山田",
            "grade": "中1",
            "grades": [{"subject":"数学","test":"期末","grade":"中1","score":80,"maxScore":100}]
        }"#;
        let s: StoredStudent = serde_json::from_str(raw).expect("parse student");
        assert_eq!(s.id, "abc");
        assert_eq!(s.student.grade_level, "中1");
        assert_eq!(s.student.school, "");
        assert_eq!(s.student.grades[0].test_name, "期末");
        assert_eq!(s.student.grades[0].max_score, 100);
        assert_eq!(s.student.grades[0].average, 0);

        let out = serde_json::to_value(&s).expect("serialize");
        assert_eq!(out["grades"][0]["maxScore"], 100);
        assert_eq!(out["grades"][0]["test"], "期末");
        assert_eq!(out["id"], "abc");
    }
}
