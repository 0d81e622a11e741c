//! Maya, the conversational speaking examiner
//!
//! Conversation state lives in the cache under `maya:conv:{id}` for 30
//! minutes after the last turn. Each candidate answer moves the test along:
//! answers 1-4 belong to Part 1, 5-6 to Part 2 and the rest to Part 3. After
//! the tenth answer Maya closes the test without another model call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::MockCache;
use crate::services::assessment::{AssessmentError, AssessmentType, Skill};
use crate::services::nova::{ChatTurn, NovaService, Speaker};

/// Idle lifetime of a conversation
pub const CONVERSATION_TTL: Duration = Duration::from_secs(30 * 60);

/// Candidate answers after which the test is over
pub const MAX_CANDIDATE_TURNS: usize = 10;

const GREETING: &str = "Good morning. My name is Maya and I'll be your examiner today. \
Could you tell me your full name, please?";

const CLOSING: &str = "Thank you, that is the end of the speaking test. \
You can now request your assessment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeakingPart {
    #[serde(rename = "part1")]
    Introduction,
    #[serde(rename = "part2")]
    LongTurn,
    #[serde(rename = "part3")]
    Discussion,
}

impl SpeakingPart {
    /// Part that the `n`th candidate answer (1-based) belongs to
    pub fn for_turn(n: usize) -> Self {
        match n {
            0..=4 => SpeakingPart::Introduction,
            5..=6 => SpeakingPart::LongTurn,
            _ => SpeakingPart::Discussion,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            SpeakingPart::Introduction => 1,
            SpeakingPart::LongTurn => 2,
            SpeakingPart::Discussion => 3,
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            SpeakingPart::Introduction => {
                "This is Part 1. Ask one short question about familiar topics such as home, \
                 work, studies or hobbies."
            }
            SpeakingPart::LongTurn => {
                "This is Part 2. Give the candidate one cue-card topic to talk about for up to \
                 two minutes, or ask one follow-up question on their long turn."
            }
            SpeakingPart::Discussion => {
                "This is Part 3. Ask one abstract discussion question that develops the Part 2 \
                 topic."
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_email: String,
    pub assessment_type: AssessmentType,
    pub turns: Vec<ChatTurn>,
    pub started_at: DateTime<Utc>,
    pub complete: bool,
}

impl Conversation {
    pub fn candidate_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.speaker == Speaker::Candidate)
            .count()
    }
}

/// Outcome of one conversation step
#[derive(Debug, Clone, Serialize)]
pub struct MayaTurn {
    pub conversation_id: String,
    pub reply: String,
    pub part: SpeakingPart,
    pub candidate_turns: usize,
    pub complete: bool,
    pub fallback: bool,
}

pub struct MayaService {
    cache: Arc<MockCache>,
    nova: Arc<NovaService>,
}

impl MayaService {
    pub fn new(cache: Arc<MockCache>, nova: Arc<NovaService>) -> Self {
        Self { cache, nova }
    }

    /// Open a conversation; Maya greets the candidate
    pub fn start(&self, user_email: &str, assessment_type: AssessmentType) -> Result<MayaTurn, AssessmentError> {
        if assessment_type.skill() != Skill::Speaking {
            return Err(AssessmentError::WrongSkill(assessment_type, "speaking"));
        }

        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            user_email: user_email.to_string(),
            assessment_type,
            turns: vec![ChatTurn::examiner(GREETING)],
            started_at: Utc::now(),
            complete: false,
        };
        self.save(&conversation)?;

        tracing::info!(conversation_id = %conversation.id, %assessment_type, "Maya conversation started");

        Ok(MayaTurn {
            conversation_id: conversation.id,
            reply: GREETING.to_string(),
            part: SpeakingPart::Introduction,
            candidate_turns: 0,
            complete: false,
            fallback: false,
        })
    }

    /// Record a candidate answer and produce Maya's next line
    pub async fn respond(
        &self,
        conversation_id: &str,
        user_email: &str,
        message: &str,
    ) -> Result<MayaTurn, AssessmentError> {
        let mut conversation = self.transcript(conversation_id, user_email)?;
        if conversation.complete {
            return Err(AssessmentError::ConversationComplete);
        }

        conversation.turns.push(ChatTurn::candidate(message.trim()));
        let answered = conversation.candidate_turns();
        let part = SpeakingPart::for_turn(answered);

        let (reply, fallback) = if answered >= MAX_CANDIDATE_TURNS {
            conversation.complete = true;
            (CLOSING.to_string(), false)
        } else {
            let next_part = SpeakingPart::for_turn(answered + 1);
            let instructions = examiner_instructions(conversation.assessment_type, next_part);
            let reply = self.nova.examiner_reply(&instructions, &conversation.turns).await;
            (reply.text, reply.fallback)
        };

        conversation.turns.push(ChatTurn::examiner(reply.clone()));
        self.save(&conversation)?;

        tracing::debug!(conversation_id, answered, part = part.number(), fallback, "Maya turn");

        Ok(MayaTurn {
            conversation_id: conversation.id,
            reply,
            part,
            candidate_turns: answered,
            complete: conversation.complete,
            fallback,
        })
    }

    /// Conversation owned by `user_email`; someone else's id reads as missing
    pub fn transcript(&self, conversation_id: &str, user_email: &str) -> Result<Conversation, AssessmentError> {
        let conversation: Conversation = self
            .cache
            .get_json(&cache_key(conversation_id))
            .map_err(|e| AssessmentError::State(e.to_string()))?
            .ok_or(AssessmentError::ConversationNotFound)?;

        if conversation.user_email != user_email {
            return Err(AssessmentError::ConversationNotFound);
        }
        Ok(conversation)
    }

    /// Take the conversation out of the cache for scoring. Of several
    /// concurrent claims only one gets it.
    pub fn claim(&self, conversation_id: &str, user_email: &str) -> Result<Conversation, AssessmentError> {
        let conversation: Conversation = self
            .cache
            .take_json(&cache_key(conversation_id))
            .map_err(|e| AssessmentError::State(e.to_string()))?
            .ok_or(AssessmentError::ConversationNotFound)?;

        if conversation.user_email != user_email {
            self.save(&conversation)?;
            return Err(AssessmentError::ConversationNotFound);
        }
        Ok(conversation)
    }

    /// Put a claimed conversation back, e.g. when scoring failed
    pub fn restore(&self, conversation: &Conversation) -> Result<(), AssessmentError> {
        self.save(conversation)
    }

    fn save(&self, conversation: &Conversation) -> Result<(), AssessmentError> {
        self.cache
            .set_json(&cache_key(&conversation.id), conversation, Some(CONVERSATION_TTL))
            .map_err(|e| AssessmentError::State(e.to_string()))
    }
}

fn cache_key(conversation_id: &str) -> String {
    format!("maya:conv:{}", conversation_id)
}

fn examiner_instructions(assessment_type: AssessmentType, part: SpeakingPart) -> String {
    let module = if assessment_type.is_academic() { "Academic" } else { "General Training" };
    format!(
        "You are Maya, a friendly and professional IELTS {module} Speaking examiner. \
         Reply with your next line only, in one to three sentences. Do not score or correct \
         the candidate. {}",
        part.instructions()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KeyTtl;
    use crate::db::ManualClock;
    use crate::services::bedrock::BedrockError;
    use crate::services::nova::testing::{nova, ScriptedModel};

    fn maya(model: Arc<ScriptedModel>) -> (MayaService, Arc<MockCache>, Arc<ManualClock>) {
        let clock = ManualClock::at(0.0);
        let cache = Arc::new(MockCache::with_clock(clock.clone()));
        let (nova, _) = nova(model);
        (MayaService::new(cache.clone(), Arc::new(nova)), cache, clock)
    }

    fn replies(n: usize) -> Vec<Result<String, BedrockError>> {
        (0..n).map(|i| Ok(format!("Question {}?", i + 1))).collect()
    }

    #[test]
    fn test_part_boundaries() {
        assert_eq!(SpeakingPart::for_turn(1), SpeakingPart::Introduction);
        assert_eq!(SpeakingPart::for_turn(4), SpeakingPart::Introduction);
        assert_eq!(SpeakingPart::for_turn(5), SpeakingPart::LongTurn);
        assert_eq!(SpeakingPart::for_turn(6), SpeakingPart::LongTurn);
        assert_eq!(SpeakingPart::for_turn(7), SpeakingPart::Discussion);
        assert_eq!(SpeakingPart::for_turn(12), SpeakingPart::Discussion);
    }

    #[tokio::test]
    async fn test_start_stores_greeting() {
        let (maya, cache, _) = maya(ScriptedModel::new(vec![]));
        let turn = maya.start("a@example.com", AssessmentType::AcademicSpeaking).unwrap();

        assert_eq!(turn.reply, GREETING);
        assert_eq!(turn.candidate_turns, 0);
        assert_eq!(
            cache.ttl(&cache_key(&turn.conversation_id)),
            KeyTtl::Expires(CONVERSATION_TTL)
        );
    }

    #[tokio::test]
    async fn test_start_rejects_writing_type() {
        let (maya, _, _) = maya(ScriptedModel::new(vec![]));
        assert!(matches!(
            maya.start("a@example.com", AssessmentType::AcademicWriting),
            Err(AssessmentError::WrongSkill(..))
        ));
    }

    #[tokio::test]
    async fn test_conversation_runs_to_completion() {
        let model = ScriptedModel::new(replies(9));
        let (maya, _, _) = maya(model.clone());
        let id = maya
            .start("a@example.com", AssessmentType::GeneralSpeaking)
            .unwrap()
            .conversation_id;

        let mut parts = Vec::new();
        for i in 1..=MAX_CANDIDATE_TURNS {
            let turn = maya.respond(&id, "a@example.com", &format!("Answer {}", i)).await.unwrap();
            assert_eq!(turn.candidate_turns, i);
            parts.push(turn.part.number());
            if i < MAX_CANDIDATE_TURNS {
                assert!(!turn.complete);
                assert_eq!(turn.reply, format!("Question {}?", i));
            } else {
                assert!(turn.complete);
                assert_eq!(turn.reply, CLOSING);
            }
        }

        assert_eq!(parts, vec![1, 1, 1, 1, 2, 2, 3, 3, 3, 3]);
        assert_eq!(model.call_count(), 9);

        let err = maya.respond(&id, "a@example.com", "More").await.unwrap_err();
        assert!(matches!(err, AssessmentError::ConversationComplete));

        let transcript = maya.transcript(&id, "a@example.com").unwrap();
        assert_eq!(transcript.turns.len(), 21);
        assert!(transcript.complete);
    }

    #[tokio::test]
    async fn test_model_failure_uses_fallback_reply() {
        let model = ScriptedModel::new(vec![Err(BedrockError::AccessDenied("no".to_string()))]);
        let (maya, _, _) = maya(model);
        let id = maya
            .start("a@example.com", AssessmentType::AcademicSpeaking)
            .unwrap()
            .conversation_id;

        let turn = maya.respond(&id, "a@example.com", "I'm Sam").await.unwrap();
        assert!(turn.fallback);
        assert!(!turn.complete);
    }

    #[tokio::test]
    async fn test_other_users_conversation_is_hidden() {
        let (maya, _, _) = maya(ScriptedModel::new(replies(1)));
        let id = maya
            .start("a@example.com", AssessmentType::AcademicSpeaking)
            .unwrap()
            .conversation_id;

        assert!(matches!(
            maya.respond(&id, "b@example.com", "hello").await,
            Err(AssessmentError::ConversationNotFound)
        ));
    }

    #[tokio::test]
    async fn test_conversation_expires_when_idle() {
        let (maya, _, clock) = maya(ScriptedModel::new(replies(1)));
        let id = maya
            .start("a@example.com", AssessmentType::AcademicSpeaking)
            .unwrap()
            .conversation_id;

        clock.advance(CONVERSATION_TTL.as_secs_f64());
        assert!(matches!(
            maya.respond(&id, "a@example.com", "hello").await,
            Err(AssessmentError::ConversationNotFound)
        ));
    }

    #[tokio::test]
    async fn test_claim_is_single_use() {
        let (maya, _, _) = maya(ScriptedModel::new(vec![]));
        let id = maya
            .start("a@example.com", AssessmentType::AcademicSpeaking)
            .unwrap()
            .conversation_id;

        let claimed = maya.claim(&id, "a@example.com").unwrap();
        assert_eq!(claimed.id, id);
        assert!(matches!(
            maya.claim(&id, "a@example.com"),
            Err(AssessmentError::ConversationNotFound)
        ));
        assert!(maya.transcript(&id, "a@example.com").is_err());

        maya.restore(&claimed).unwrap();
        assert_eq!(maya.transcript(&id, "a@example.com").unwrap().turns.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_by_other_user_leaves_conversation() {
        let (maya, _, _) = maya(ScriptedModel::new(vec![]));
        let id = maya
            .start("a@example.com", AssessmentType::AcademicSpeaking)
            .unwrap()
            .conversation_id;

        assert!(matches!(
            maya.claim(&id, "b@example.com"),
            Err(AssessmentError::ConversationNotFound)
        ));
        assert!(maya.claim(&id, "a@example.com").is_ok());
    }
}
