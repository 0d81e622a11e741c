//! Services module
//!
//! Business logic and external service integrations.

pub mod accounts;
pub mod assessment;
pub mod bedrock;
pub mod maya;
pub mod nova;
pub mod payments;
pub mod sessions;

pub use accounts::{AccountError, AccountService, NewUser, UserProfile};
pub use assessment::{AssessmentError, AssessmentResult, AssessmentType, ResultSource, Skill};
pub use bedrock::{BedrockError, BedrockService, ConverseRequest};
pub use maya::{Conversation, MayaService, MayaTurn, SpeakingPart};
pub use nova::{ChatTurn, ModelClient, NovaService, Speaker};
pub use payments::{
    is_checkout_session_id, product_for, CheckoutSession, CheckoutStatus, PaymentError, PaymentGateway, Product,
    StripeGateway,
};
pub use sessions::{Session, SessionStore};
