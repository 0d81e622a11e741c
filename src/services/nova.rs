//! Nova scoring and examiner turns
//!
//! Writing and speaking scoring go to Nova Micro; Maya's examiner replies go
//! to the Nova Sonic model id. Every call is retried on transient Bedrock
//! errors and bounded by the configured timeout. When a call still fails, or
//! the reply cannot be parsed, callers get canned text instead of an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::NovaConfig;
use crate::monitoring::{CloudWatch, METRIC_AI_FALLBACK};
use crate::services::assessment::{
    parse_band_scores, AssessmentError, AssessmentResult, AssessmentType, Skill, MIN_ESSAY_WORDS,
    SPEAKING_CRITERIA, WRITING_CRITERIA,
};
use crate::services::bedrock::BedrockError;
use crate::utils::{retry_with_backoff, truncate_str, word_count, RetryConfig};

const WRITING_FALLBACK_FEEDBACK: &str = "We could not score your essay automatically right now. \
Your attempt has been saved. Review your essay for a clear position, logical paragraphing, \
a range of vocabulary and accurate complex sentences.";

const SPEAKING_FALLBACK_FEEDBACK: &str = "We could not score your speaking test automatically \
right now. Your attempt has been saved. Keep practising extended answers with examples and \
a range of linking expressions.";

const EXAMINER_FALLBACK_REPLY: &str =
    "Thank you. Could you tell me a little more about that, and give me an example?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Examiner,
    Candidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub speaker: Speaker,
    pub text: String,
}

impl ChatTurn {
    pub fn examiner(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Examiner,
            text: text.into(),
        }
    }

    pub fn candidate(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Candidate,
            text: text.into(),
        }
    }
}

/// Text completion against a hosted model
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        model_id: &str,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<String, BedrockError>;
}

/// Examiner reply for one Maya turn
#[derive(Debug, Clone)]
pub struct ExaminerReply {
    pub text: String,
    pub fallback: bool,
}

pub struct NovaService {
    client: Arc<dyn ModelClient>,
    config: NovaConfig,
    retry: RetryConfig,
    metrics: Arc<CloudWatch>,
}

impl NovaService {
    pub fn new(client: Arc<dyn ModelClient>, config: NovaConfig, metrics: Arc<CloudWatch>) -> Self {
        Self {
            client,
            config,
            retry: RetryConfig::nova(),
            metrics,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Score a Task 2 essay
    pub async fn assess_writing(
        &self,
        assessment_type: AssessmentType,
        task_prompt: &str,
        essay: &str,
    ) -> Result<AssessmentResult, AssessmentError> {
        if assessment_type.skill() != Skill::Writing {
            return Err(AssessmentError::WrongSkill(assessment_type, "writing"));
        }

        let words = word_count(essay);
        if words < MIN_ESSAY_WORDS {
            return Err(AssessmentError::EssayTooShort {
                words,
                minimum: MIN_ESSAY_WORDS,
            });
        }

        let system = writing_system_prompt(assessment_type);
        let turns = [ChatTurn::candidate(format!(
            "Task prompt:\n{}\n\nCandidate essay ({} words):\n{}",
            task_prompt, words, essay
        ))];

        let reply = self.call(&self.config.micro_model_id, &system, &turns).await;
        Ok(self.to_result(assessment_type, reply, &WRITING_CRITERIA, WRITING_FALLBACK_FEEDBACK))
    }

    /// Score a speaking transcript
    pub async fn assess_speaking(
        &self,
        assessment_type: AssessmentType,
        transcript: &[ChatTurn],
    ) -> Result<AssessmentResult, AssessmentError> {
        if assessment_type.skill() != Skill::Speaking {
            return Err(AssessmentError::WrongSkill(assessment_type, "speaking"));
        }

        let rendered = transcript
            .iter()
            .map(|turn| match turn.speaker {
                Speaker::Examiner => format!("Examiner: {}", turn.text),
                Speaker::Candidate => format!("Candidate: {}", turn.text),
            })
            .collect::<Vec<_>>()
            .join("\n");

        let system = speaking_system_prompt(assessment_type);
        let turns = [ChatTurn::candidate(format!("Transcript:\n{}", rendered))];

        let reply = self.call(&self.config.micro_model_id, &system, &turns).await;
        Ok(self.to_result(assessment_type, reply, &SPEAKING_CRITERIA, SPEAKING_FALLBACK_FEEDBACK))
    }

    /// Next examiner line for a Maya conversation
    pub async fn examiner_reply(&self, examiner_instructions: &str, turns: &[ChatTurn]) -> ExaminerReply {
        match self.call(&self.config.sonic_model_id, examiner_instructions, turns).await {
            Ok(text) => ExaminerReply {
                text: text.trim().to_string(),
                fallback: false,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Examiner reply failed, using fallback");
                self.metrics.put_metric(METRIC_AI_FALLBACK, "maya", 1.0);
                ExaminerReply {
                    text: EXAMINER_FALLBACK_REPLY.to_string(),
                    fallback: true,
                }
            }
        }
    }

    fn to_result(
        &self,
        assessment_type: AssessmentType,
        reply: Result<String, BedrockError>,
        criteria: &[&str],
        fallback_feedback: &str,
    ) -> AssessmentResult {
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(assessment_type = %assessment_type, error = %e, "Scoring call failed, using fallback");
                self.metrics.put_metric(METRIC_AI_FALLBACK, assessment_type.as_str(), 1.0);
                return AssessmentResult::fallback(assessment_type, fallback_feedback);
            }
        };

        match parse_band_scores(&reply, criteria) {
            Some((bands, feedback)) => AssessmentResult::scored(assessment_type, bands, feedback),
            None => {
                tracing::warn!(
                    assessment_type = %assessment_type,
                    reply = %truncate_str(&reply, 200),
                    "Unparseable scoring reply, using fallback"
                );
                self.metrics.put_metric(METRIC_AI_FALLBACK, assessment_type.as_str(), 1.0);
                AssessmentResult::fallback(assessment_type, fallback_feedback)
            }
        }
    }

    async fn call(&self, model_id: &str, system: &str, turns: &[ChatTurn]) -> Result<String, BedrockError> {
        let timeout = Duration::from_secs(self.config.timeout_seconds);

        let attempt = retry_with_backoff(&self.retry, BedrockError::is_retryable, || {
            self.client.complete(model_id, system, turns)
        });

        match tokio::time::timeout(timeout, attempt).await {
            Ok(outcome) => {
                if outcome.attempts > 1 {
                    tracing::debug!(model_id, attempts = outcome.attempts, "Model call needed retries");
                }
                outcome.result
            }
            Err(_) => Err(BedrockError::Timeout(self.config.timeout_seconds)),
        }
    }
}

fn writing_system_prompt(assessment_type: AssessmentType) -> String {
    let module = if assessment_type.is_academic() { "Academic" } else { "General Training" };
    format!(
        "You are a certified IELTS examiner scoring this {module} Writing Task 2 response. \
         Score each criterion on the 0-9 band scale in steps of 0.5. \
         Reply with a single JSON object and nothing else, using exactly these keys: \
         \"task_achievement\", \"coherence_cohesion\", \"lexical_resource\", \
         \"grammatical_range\" (numbers) and \"feedback\" (two to four sentences of advice)."
    )
}

fn speaking_system_prompt(assessment_type: AssessmentType) -> String {
    let module = if assessment_type.is_academic() { "Academic" } else { "General Training" };
    format!(
        "You are a certified IELTS examiner scoring this {module} Speaking test from a transcript. \
         Judge pronunciation from word choice and self-corrections visible in the text. \
         Score each criterion on the 0-9 band scale in steps of 0.5. \
         Reply with a single JSON object and nothing else, using exactly these keys: \
         \"fluency_coherence\", \"lexical_resource\", \"grammatical_range\", \
         \"pronunciation\" (numbers) and \"feedback\" (two to four sentences of advice)."
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Model client replaying canned replies in order; errors once exhausted
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, BedrockError>>>,
        pub calls: Mutex<Vec<(String, String, Vec<ChatTurn>)>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Result<String, BedrockError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(
            &self,
            model_id: &str,
            system: &str,
            turns: &[ChatTurn],
        ) -> Result<String, BedrockError> {
            self.calls
                .lock()
                .unwrap()
                .push((model_id.to_string(), system.to_string(), turns.to_vec()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BedrockError::ValidationError("no scripted reply".to_string())))
        }
    }

    pub fn writing_reply() -> String {
        r#"{"task_achievement": 6.5, "coherence_cohesion": 7, "lexical_resource": 6.5, "grammatical_range": 6, "feedback": "Well organised."}"#.to_string()
    }

    pub fn speaking_reply() -> String {
        r#"{"fluency_coherence": 7, "lexical_resource": 6.5, "grammatical_range": 6.5, "pronunciation": 7, "feedback": "Fluent."}"#.to_string()
    }

    pub fn essay(words: usize) -> String {
        vec!["word"; words].join(" ")
    }

    pub fn nova(model: Arc<ScriptedModel>) -> (NovaService, Arc<CloudWatch>) {
        let metrics = Arc::new(CloudWatch::new("test").unwrap());
        let service = NovaService::new(model, NovaConfig::default(), metrics.clone()).with_retry(
            RetryConfig::default()
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );
        (service, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::services::assessment::ResultSource;

    #[tokio::test]
    async fn test_writing_scored_by_micro_model() {
        let model = ScriptedModel::new(vec![Ok(writing_reply())]);
        let (nova, _) = nova(model.clone());

        let result = nova
            .assess_writing(AssessmentType::AcademicWriting, "Discuss.", &essay(250))
            .await
            .unwrap();

        assert_eq!(result.source, ResultSource::Model);
        assert_eq!(result.overall_band, Some(6.5));
        assert_eq!(result.feedback, "Well organised.");

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].0, "amazon.nova-micro-v1:0");
        assert!(calls[0].1.contains("Academic Writing Task 2"));
        assert!(calls[0].2[0].text.contains("250 words"));
    }

    #[tokio::test]
    async fn test_short_essay_rejected_without_model_call() {
        let model = ScriptedModel::new(vec![]);
        let (nova, _) = nova(model.clone());

        let err = nova
            .assess_writing(AssessmentType::GeneralWriting, "Discuss.", &essay(49))
            .await
            .unwrap_err();

        assert!(matches!(err, AssessmentError::EssayTooShort { words: 49, .. }));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_speaking_type_rejected_for_writing() {
        let (nova, _) = nova(ScriptedModel::new(vec![]));
        let err = nova
            .assess_writing(AssessmentType::AcademicSpeaking, "x", &essay(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::WrongSkill(..)));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let model = ScriptedModel::new(vec![
            Err(BedrockError::Throttled("slow down".to_string())),
            Ok(writing_reply()),
        ]);
        let (nova, metrics) = nova(model.clone());

        let result = nova
            .assess_writing(AssessmentType::AcademicWriting, "Discuss.", &essay(120))
            .await
            .unwrap();

        assert_eq!(result.source, ResultSource::Model);
        assert_eq!(model.call_count(), 2);
        assert_eq!(metrics.metric_value(METRIC_AI_FALLBACK, "academic-writing"), 0.0);
    }

    #[tokio::test]
    async fn test_permanent_error_falls_back() {
        let model = ScriptedModel::new(vec![Err(BedrockError::AccessDenied("no".to_string()))]);
        let (nova, metrics) = nova(model.clone());

        let result = nova
            .assess_writing(AssessmentType::AcademicWriting, "Discuss.", &essay(120))
            .await
            .unwrap();

        assert_eq!(result.source, ResultSource::Fallback);
        assert_eq!(result.overall_band, None);
        assert_eq!(model.call_count(), 1);
        assert_eq!(metrics.metric_value(METRIC_AI_FALLBACK, "academic-writing"), 1.0);
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back() {
        let model = ScriptedModel::new(vec![Ok("Band 7, nice work!".to_string())]);
        let (nova, _) = nova(model);

        let result = nova
            .assess_speaking(
                AssessmentType::GeneralSpeaking,
                &[ChatTurn::examiner("Hello"), ChatTurn::candidate("Hi")],
            )
            .await
            .unwrap();

        assert_eq!(result.source, ResultSource::Fallback);
    }

    #[tokio::test]
    async fn test_speaking_transcript_rendered() {
        let model = ScriptedModel::new(vec![Ok(speaking_reply())]);
        let (nova, _) = nova(model.clone());

        let result = nova
            .assess_speaking(
                AssessmentType::AcademicSpeaking,
                &[ChatTurn::examiner("Where are you from?"), ChatTurn::candidate("Lisbon.")],
            )
            .await
            .unwrap();

        assert_eq!(result.overall_band, Some(7.0));
        let calls = model.calls.lock().unwrap();
        assert!(calls[0].2[0].text.contains("Examiner: Where are you from?\nCandidate: Lisbon."));
    }

    #[tokio::test]
    async fn test_examiner_reply_fallback() {
        let model = ScriptedModel::new(vec![Err(BedrockError::ValidationError("bad".to_string()))]);
        let (nova, metrics) = nova(model.clone());

        let reply = nova.examiner_reply("Be Maya.", &[ChatTurn::candidate("Hi")]).await;
        assert!(reply.fallback);
        assert_eq!(reply.text, EXAMINER_FALLBACK_REPLY);
        assert_eq!(metrics.metric_value(METRIC_AI_FALLBACK, "maya"), 1.0);

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].0, "amazon.nova-sonic-v1:0");
    }
}
