// src/models/question.rs

use std::path::Path;

use serde::{Deserialize, Serialize};

const BUNDLED_BANK: &str = include_str!("../../data/exam_questions.json");

/// Answer modality of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Free-text answer.
    Blank,
    /// Choice among `options`, optionally with a free-text "Other: ..." entry.
    Multiple,
    /// Spoken answer, recorded and transcribed.
    Audio,
}

/// One question of the static bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,

    /// Mapped from `type` since it is a reserved keyword in Rust.
    #[serde(rename = "type")]
    pub question_type: QuestionType,

    #[serde(rename = "question")]
    pub prompt: String,

    /// Ordered list of answers considered correct. May be empty for audio
    /// questions graded by hand.
    #[serde(rename = "answers", default)]
    pub accepted_answers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,

    /// Text read aloud for audio questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_text: Option<String>,
}

/// Random sub-sampling group a section belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingGroup {
    Written,
    Audio,
}

/// Whether a section is the standard variant or the accommodation (control) one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionVariant {
    Standard,
    Control,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sections with a sampling group only show the sampled subset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SamplingGroup>,
    pub questions: Vec<Question>,
}

impl Section {
    pub fn variant(&self) -> SectionVariant {
        if self.id.ends_with("_control") {
            SectionVariant::Control
        } else {
            SectionVariant::Standard
        }
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn question_ids(&self) -> Vec<String> {
        self.questions.iter().map(|q| q.id.clone()).collect()
    }
}

/// Read-only catalog of exam sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBank {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub sections: Vec<Section>,
}

/// Error raised while loading a question bank.
#[derive(Debug)]
pub enum BankError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for BankError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BankError::Io(e) => write!(f, "failed to read question bank: {}", e),
            BankError::Parse(e) => write!(f, "failed to parse question bank: {}", e),
            BankError::Invalid(msg) => write!(f, "invalid question bank: {}", msg),
        }
    }
}

impl std::error::Error for BankError {}

impl QuestionBank {
    /// The bank shipped with the binary.
    pub fn bundled() -> Result<Self, BankError> {
        Self::from_json(BUNDLED_BANK)
    }

    pub fn from_path(path: &Path) -> Result<Self, BankError> {
        let raw = std::fs::read_to_string(path).map_err(BankError::Io)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, BankError> {
        let bank: QuestionBank = serde_json::from_str(raw).map_err(BankError::Parse)?;
        bank.validate()?;
        Ok(bank)
    }

    fn validate(&self) -> Result<(), BankError> {
        if self.sections.is_empty() {
            return Err(BankError::Invalid("no sections".to_string()));
        }
        for section in &self.sections {
            if !crate::store::is_valid_segment(&section.id) {
                return Err(BankError::Invalid(format!("bad section id '{}'", section.id)));
            }
            if section.questions.is_empty() {
                return Err(BankError::Invalid(format!("section '{}' is empty", section.id)));
            }
            for question in &section.questions {
                if !crate::store::is_valid_segment(&question.id) {
                    return Err(BankError::Invalid(format!(
                        "bad question id '{}' in '{}'",
                        question.id, section.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn section_index(&self, id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.id == id)
    }

    /// All question ids of every section sampled from `group`.
    pub fn pool(&self, group: SamplingGroup) -> Vec<String> {
        self.sections
            .iter()
            .filter(|s| s.sample == Some(group))
            .flat_map(|s| s.question_ids())
            .collect()
    }

    /// Resolves a `"{sectionId}_{questionId}"` answer key.
    ///
    /// Section ids contain underscores themselves, so the key is matched
    /// against the known section ids rather than split.
    pub fn resolve_key(&self, key: &str) -> Option<(&Section, &Question)> {
        self.sections
            .iter()
            .filter_map(|section| {
                let question_id = key.strip_prefix(section.id.as_str())?.strip_prefix('_')?;
                Some((section, section.question(question_id)?))
            })
            .next()
    }
}

/// Builds the answer key of a question within a section.
pub fn question_key(section_id: &str, question_id: &str) -> String {
    format!("{}_{}", section_id, question_id)
}

/// DTO for sending a question to the exam taker (no accepted answers).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_text: Option<String>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            question_type: q.question_type,
            prompt: q.prompt.clone(),
            options: q.options.clone(),
            tts_text: q.tts_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_bank_loads() {
        let bank = QuestionBank::bundled().unwrap();
        assert_eq!(bank.sections.len(), 4);
        assert!(bank.pool(SamplingGroup::Written).len() >= 5);
        assert!(bank.pool(SamplingGroup::Audio).len() >= 5);
    }

    #[test]
    fn resolve_key_handles_underscored_section_ids() {
        let bank = QuestionBank::bundled().unwrap();
        let (section, question) = bank.resolve_key("section1_control_c2").unwrap();
        assert_eq!(section.id, "section1_control");
        assert_eq!(question.id, "c2");
        assert_eq!(section.variant(), SectionVariant::Control);
    }

    #[test]
    fn resolve_key_misses_unknown_questions() {
        let bank = QuestionBank::bundled().unwrap();
        assert!(bank.resolve_key("section1_standard_nope").is_none());
        assert!(bank.resolve_key("section9_standard_w1").is_none());
        assert!(bank.resolve_key("garbage").is_none());
    }

    #[test]
    fn invalid_bank_is_rejected() {
        let raw = r#"{"title": "t", "sections": [{"id": "a.b", "title": "x", "questions": [
            {"id": "q1", "type": "blank", "question": "?", "answers": ["a"]}
        ]}]}"#;
        assert!(matches!(QuestionBank::from_json(raw), Err(BankError::Invalid(_))));
    }
}
