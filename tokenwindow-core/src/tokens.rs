use serde::{Deserialize, Serialize};

/// Model family hint for token estimation. The heuristic divisor varies
/// little between current families, but the seam keeps host integrations
/// free to swap in a real tokenizer per family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    #[default]
    Claude,
    Generic,
}

/// Token estimation seam. Implementations are bound to a model family at
/// construction and must not perform I/O per call.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> u32;

    fn model_family(&self) -> ModelFamily {
        ModelFamily::Generic
    }
}

/// Heuristic counter: ~4 bytes per token, rounded up so that a non-empty
/// message never counts as zero tokens.
#[derive(Debug, Clone)]
pub struct HeuristicCounter {
    family: ModelFamily,
    bytes_per_token: u32,
}

impl HeuristicCounter {
    pub fn new(family: ModelFamily) -> Self {
        Self {
            family,
            bytes_per_token: 4,
        }
    }
}

impl Default for HeuristicCounter {
    fn default() -> Self {
        Self::new(ModelFamily::Claude)
    }
}

impl TokenCounter for HeuristicCounter {
    fn count_tokens(&self, text: &str) -> u32 {
        let bytes = text.len() as u32;
        bytes.div_ceil(self.bytes_per_token)
    }

    fn model_family(&self) -> ModelFamily {
        self.family
    }
}
