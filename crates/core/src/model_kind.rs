//! Model capability tags and the classifier that resolves them at deploy time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What an instance can do. Chat instances generate text; embedding
/// instances encode text into vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Chat,
    Embedding,
}

impl ModelKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embedding => "embedding",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "embedding" => Ok(Self::Embedding),
            other => Err(format!("unknown model kind '{other}'")),
        }
    }
}

/// Resolves a [`ModelKind`] for a model name when the deploy request does
/// not carry one.
pub trait ModelClassifier: Send + Sync {
    fn classify(&self, model_name: &str) -> ModelKind;
}

/// Sentence-embedding models shipped in the default catalogue.
pub const EMBEDDING_CATALOGUE: &[&str] = &[
    "sentence-transformers/paraphrase-MiniLM-L3-v2",
    "sentence-transformers/all-MiniLM-L6-v2",
    "sentence-transformers/all-MiniLM-L12-v2",
    "BAAI/bge-small-en-v1.5",
    "BAAI/bge-base-en-v1.5",
];

const EMBEDDING_INDICATORS: &[&str] = &[
    "sentence-transformers",
    "bge-",
    "gte-",
    "e5-",
    "embed",
    "embedding",
    "mpnet",
    "minilm",
    "retrieval",
];

/// Default classifier: catalogue lookup, then lowercase substring match.
#[derive(Debug, Clone, Default)]
pub struct NamePatternClassifier {
    extra_catalogue: Vec<String>,
}

impl NamePatternClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat additional exact model names as embedding models.
    pub fn with_catalogue_entry(mut self, model_name: impl Into<String>) -> Self {
        self.extra_catalogue.push(model_name.into());
        self
    }
}

impl ModelClassifier for NamePatternClassifier {
    fn classify(&self, model_name: &str) -> ModelKind {
        let in_catalogue = EMBEDDING_CATALOGUE.contains(&model_name)
            || self.extra_catalogue.iter().any(|m| m == model_name);
        if in_catalogue {
            return ModelKind::Embedding;
        }

        let lower = model_name.to_lowercase();
        if EMBEDDING_INDICATORS.iter().any(|ind| lower.contains(ind)) {
            ModelKind::Embedding
        } else {
            ModelKind::Chat
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_models_are_embedding() {
        let c = NamePatternClassifier::new();
        for name in EMBEDDING_CATALOGUE {
            assert_eq!(c.classify(name), ModelKind::Embedding, "{name}");
        }
    }

    #[test]
    fn indicator_match_is_case_insensitive() {
        let c = NamePatternClassifier::new();
        assert_eq!(c.classify("intfloat/E5-large-v2"), ModelKind::Embedding);
        assert_eq!(c.classify("nomic-ai/nomic-Embed-text"), ModelKind::Embedding);
    }

    #[test]
    fn chat_models_fall_through() {
        let c = NamePatternClassifier::new();
        assert_eq!(c.classify("Qwen/Qwen2-0.5B-Instruct"), ModelKind::Chat);
        assert_eq!(c.classify("gpt2"), ModelKind::Chat);
    }

    #[test]
    fn extra_catalogue_entry_wins() {
        let c = NamePatternClassifier::new().with_catalogue_entry("acme/vectors");
        assert_eq!(c.classify("acme/vectors"), ModelKind::Embedding);
    }

    #[test]
    fn kind_parses_from_query_string() {
        assert_eq!("Embedding".parse::<ModelKind>(), Ok(ModelKind::Embedding));
        assert!("vision".parse::<ModelKind>().is_err());
    }
}
