//! Request and reply types shared by every transport.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl GenerateRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            temperature: None,
            max_output_tokens: None,
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Embedding task hint. Retrieval quality depends on queries and documents
/// being embedded with matching task types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    RetrievalDocument,
    RetrievalQuery,
    SemanticSimilarity,
}

impl EmbedTask {
    #[must_use]
    pub fn as_api_str(self) -> &'static str {
        match self {
            Self::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            Self::RetrievalQuery => "RETRIEVAL_QUERY",
            Self::SemanticSimilarity => "SEMANTIC_SIMILARITY",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbedRequest {
    pub model: String,
    pub text: String,
    pub task: EmbedTask,
    /// Optional document title, only meaningful for `RetrievalDocument`.
    pub title: Option<String>,
}

/// Outcome of a generation call. A safety refusal is a successful call
/// with `blocked` set, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateReply {
    pub text: String,
    pub blocked: bool,
}

impl GenerateReply {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            blocked: false,
        }
    }

    #[must_use]
    pub fn safety_blocked() -> Self {
        Self {
            text: String::new(),
            blocked: true,
        }
    }
}
