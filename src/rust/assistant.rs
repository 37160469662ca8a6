//! Keyword routing for the patient-facing assistant.
//!
//! Symptom descriptions are handed to the [`InferenceEngine`]; scheduling and
//! provider requests get canned acknowledgements with the matching action
//! flag set. Nothing here books appointments or opens conversations.

use std::sync::Arc;

use serde::Serialize;

use crate::classifier::{ClassifierError, InferenceEngine, Prediction};

/// Conditions listed in a symptom reply.
pub const DEFAULT_ASSISTANT_TOP_K: usize = 3;

const SYMPTOM_KEYWORDS: &[&str] = &[
    "headache",
    "fever",
    "cough",
    "sore throat",
    "symptom",
    "feeling",
    "experiencing",
    "suffer",
    "pain",
    "nausea",
    "rash",
];
const SCHEDULE_KEYWORDS: &[&str] = &["appointment", "schedule", "book", "visit"];
const PROVIDER_KEYWORDS: &[&str] = &["doctor", "provider", "message", "connect"];

const SCHEDULE_REPLY: &str =
    "I can help you schedule an appointment with primary care. What day works best for you?";
const PROVIDER_REPLY: &str = "Okay, connecting you with your provider through our secure messaging system.";
const UNKNOWN_REPLY: &str =
    "I'm not sure how to help with that. Could you describe your symptoms or ask to schedule an appointment?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    SymptomAnalysis,
    ScheduleAppointment,
    ConnectToProvider,
    Unknown,
}

/// Classifies `text` by the first keyword group it mentions. Symptom words
/// win over scheduling words, which win over provider words.
pub fn detect_intent(text: &str) -> Intent {
    let text = text.to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));
    if mentions(SYMPTOM_KEYWORDS) {
        Intent::SymptomAnalysis
    } else if mentions(SCHEDULE_KEYWORDS) {
        Intent::ScheduleAppointment
    } else if mentions(PROVIDER_KEYWORDS) {
        Intent::ConnectToProvider
    } else {
        Intent::Unknown
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Actions {
    pub schedule_appointment: bool,
    pub connect_to_provider: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantReply {
    pub text: String,
    pub intent: Intent,
    pub actions: Actions,
}

/// Answers free-text messages, backed by a shared read-only engine.
#[derive(Debug, Clone)]
pub struct Assistant {
    engine: Arc<InferenceEngine>,
    top_k: usize,
}

impl Assistant {
    pub fn new(engine: Arc<InferenceEngine>) -> Self {
        Self {
            engine,
            top_k: DEFAULT_ASSISTANT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    /// Routes `text` and builds the reply. Blocks for the forward pass when
    /// the message describes symptoms.
    pub fn respond(&self, text: &str) -> Result<AssistantReply, ClassifierError> {
        let intent = detect_intent(text);
        log::debug!("Detected intent {:?}", intent);
        let mut actions = Actions::default();
        let text = match intent {
            Intent::SymptomAnalysis => {
                let predictions = self.engine.predict_top_k(text, self.top_k)?;
                describe_conditions(&predictions)
            }
            Intent::ScheduleAppointment => {
                actions.schedule_appointment = true;
                SCHEDULE_REPLY.to_string()
            }
            Intent::ConnectToProvider => {
                actions.connect_to_provider = true;
                PROVIDER_REPLY.to_string()
            }
            Intent::Unknown => UNKNOWN_REPLY.to_string(),
        };
        Ok(AssistantReply { text, intent, actions })
    }
}

fn describe_conditions(predictions: &[Prediction]) -> String {
    let listed: Vec<String> = predictions
        .iter()
        .map(|p| format!("{} ({:.1}%)", p.label, p.probability * 100.0))
        .collect();
    format!(
        "Based on your symptoms, the most likely conditions are: {}. \
         Please consult a healthcare provider for a proper diagnosis.",
        listed.join(", ")
    )
}
