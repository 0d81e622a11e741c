//! Assessment types, results and band arithmetic

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Minimum essay length accepted for scoring
pub const MIN_ESSAY_WORDS: usize = 50;

/// Candidate turns required before a speaking transcript can be scored
pub const MIN_SPEAKING_TURNS: usize = 3;

pub const WRITING_CRITERIA: [&str; 4] = [
    "task_achievement",
    "coherence_cohesion",
    "lexical_resource",
    "grammatical_range",
];

pub const SPEAKING_CRITERIA: [&str; 4] = [
    "fluency_coherence",
    "lexical_resource",
    "grammatical_range",
    "pronunciation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skill {
    Writing,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssessmentType {
    AcademicWriting,
    GeneralWriting,
    AcademicSpeaking,
    GeneralSpeaking,
}

impl AssessmentType {
    pub const ALL: [AssessmentType; 4] = [
        AssessmentType::AcademicWriting,
        AssessmentType::GeneralWriting,
        AssessmentType::AcademicSpeaking,
        AssessmentType::GeneralSpeaking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentType::AcademicWriting => "academic-writing",
            AssessmentType::GeneralWriting => "general-writing",
            AssessmentType::AcademicSpeaking => "academic-speaking",
            AssessmentType::GeneralSpeaking => "general-speaking",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AssessmentType::AcademicWriting => "Academic Writing",
            AssessmentType::GeneralWriting => "General Training Writing",
            AssessmentType::AcademicSpeaking => "Academic Speaking",
            AssessmentType::GeneralSpeaking => "General Training Speaking",
        }
    }

    pub fn skill(&self) -> Skill {
        match self {
            AssessmentType::AcademicWriting | AssessmentType::GeneralWriting => Skill::Writing,
            AssessmentType::AcademicSpeaking | AssessmentType::GeneralSpeaking => Skill::Speaking,
        }
    }

    pub fn is_academic(&self) -> bool {
        matches!(
            self,
            AssessmentType::AcademicWriting | AssessmentType::AcademicSpeaking
        )
    }

    /// Default Task 2 prompt shown on the assessment page
    pub fn sample_prompt(&self) -> &'static str {
        match self {
            AssessmentType::AcademicWriting => {
                "Some people believe that universities should focus on providing academic skills, \
                 while others think they should prepare students for employment. Discuss both views \
                 and give your own opinion."
            }
            AssessmentType::GeneralWriting => {
                "In many countries people are choosing to live alone. What are the reasons for this, \
                 and is it a positive or negative development?"
            }
            AssessmentType::AcademicSpeaking | AssessmentType::GeneralSpeaking => {
                "Talk with Maya, your examiner, through all three parts of the speaking test."
            }
        }
    }
}

impl fmt::Display for AssessmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssessmentType {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssessmentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AssessmentError::UnknownType(s.to_string()))
    }
}

/// Whether a result came from the model or from the canned fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub id: String,
    pub assessment_type: AssessmentType,
    pub overall_band: Option<f32>,
    pub criteria: BTreeMap<String, f32>,
    pub feedback: String,
    pub source: ResultSource,
    pub submitted_at: DateTime<Utc>,
}

impl AssessmentResult {
    pub fn scored(assessment_type: AssessmentType, criteria: BTreeMap<String, f32>, feedback: String) -> Self {
        let overall_band = overall_band(criteria.values().copied());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            assessment_type,
            overall_band,
            criteria,
            feedback,
            source: ResultSource::Model,
            submitted_at: Utc::now(),
        }
    }

    pub fn fallback(assessment_type: AssessmentType, feedback: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            assessment_type,
            overall_band: None,
            criteria: BTreeMap::new(),
            feedback: feedback.to_string(),
            source: ResultSource::Fallback,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssessmentError {
    #[error("Unknown assessment type: {0}")]
    UnknownType(String),

    #[error("{0} is not a {1} assessment")]
    WrongSkill(AssessmentType, &'static str),

    #[error("Essay has {words} words; at least {minimum} are required")]
    EssayTooShort { words: usize, minimum: usize },

    #[error("Conversation not found or expired")]
    ConversationNotFound,

    #[error("Conversation is already complete")]
    ConversationComplete,

    #[error("Conversation has {turns} answers; at least {minimum} are required for scoring")]
    ConversationTooShort { turns: usize, minimum: usize },

    #[error("Conversation state error: {0}")]
    State(String),
}

/// Round to the nearest half band, ties upward (6.25 -> 6.5, 6.75 -> 7.0)
pub fn round_band(score: f32) -> f32 {
    ((score * 2.0).round() / 2.0).clamp(0.0, 9.0)
}

/// Mean of criterion bands, rounded; `None` without criteria
pub fn overall_band(bands: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, count) = bands.fold((0.0_f32, 0_u32), |(sum, count), band| (sum + band, count + 1));
    (count > 0).then(|| round_band(sum / count as f32))
}

/// Pull criterion bands and feedback out of a model reply.
///
/// The reply must contain one JSON object; prose around it is ignored. Every
/// criterion must be a number in 0..=9. Returns `None` otherwise.
pub fn parse_band_scores(reply: &str, criteria: &[&str]) -> Option<(BTreeMap<String, f32>, String)> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }

    let parsed: Value = serde_json::from_str(&reply[start..=end]).ok()?;
    let object = parsed.as_object()?;

    let mut bands = BTreeMap::new();
    for criterion in criteria {
        let band = object.get(*criterion)?.as_f64()? as f32;
        if !(0.0..=9.0).contains(&band) {
            return None;
        }
        bands.insert(criterion.to_string(), round_band(band));
    }

    let feedback = object
        .get("feedback")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Some((bands, feedback))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assessment_type_round_trip_names() {
        for t in AssessmentType::ALL {
            assert_eq!(t.as_str().parse::<AssessmentType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
        assert!("academic-reading".parse::<AssessmentType>().is_err());
    }

    #[test]
    fn test_skill() {
        assert_eq!(AssessmentType::GeneralWriting.skill(), Skill::Writing);
        assert_eq!(AssessmentType::AcademicSpeaking.skill(), Skill::Speaking);
    }

    #[test]
    fn test_round_band() {
        assert_eq!(round_band(6.25), 6.5);
        assert_eq!(round_band(6.75), 7.0);
        assert_eq!(round_band(6.1), 6.0);
        assert_eq!(round_band(6.6), 6.5);
        assert_eq!(round_band(9.4), 9.0);
    }

    #[test]
    fn test_overall_band() {
        assert_eq!(overall_band([6.0, 6.5, 6.5, 6.0].into_iter()), Some(6.5));
        assert_eq!(overall_band([7.0, 7.0, 6.5, 6.5].into_iter()), Some(7.0));
        assert_eq!(overall_band(std::iter::empty()), None);
    }

    #[test]
    fn test_parse_band_scores_with_surrounding_prose() {
        let reply = r#"Here is the evaluation:
        {"task_achievement": 6, "coherence_cohesion": 6.5, "lexical_resource": 7,
         "grammatical_range": 6.4, "feedback": "  Clear position throughout. "}
        Good luck!"#;

        let (bands, feedback) = parse_band_scores(reply, &WRITING_CRITERIA).unwrap();
        assert_eq!(bands["task_achievement"], 6.0);
        assert_eq!(bands["grammatical_range"], 6.5);
        assert_eq!(feedback, "Clear position throughout.");
    }

    #[test]
    fn test_parse_band_scores_rejects_bad_replies() {
        assert!(parse_band_scores("no json here", &WRITING_CRITERIA).is_none());
        assert!(parse_band_scores(r#"{"task_achievement": 6}"#, &WRITING_CRITERIA).is_none());
        assert!(parse_band_scores(
            r#"{"fluency_coherence": 12, "lexical_resource": 6, "grammatical_range": 6, "pronunciation": 6}"#,
            &SPEAKING_CRITERIA
        )
        .is_none());
        assert!(parse_band_scores("} {", &WRITING_CRITERIA).is_none());
    }

    #[test]
    fn test_scored_result_computes_overall() {
        let criteria = WRITING_CRITERIA
            .iter()
            .map(|c| (c.to_string(), 5.5))
            .collect();
        let result = AssessmentResult::scored(AssessmentType::AcademicWriting, criteria, String::new());
        assert_eq!(result.overall_band, Some(5.5));
        assert_eq!(result.source, ResultSource::Model);
    }
}
