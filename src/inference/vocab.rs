use std::{collections::HashMap, path::Path};

use shakmaty::uci::UciMove;

use crate::error::InferenceError;

/// Fixed move vocabulary of a policy network: UCI move (from White's
/// point of view) to index in the network's output layer.
///
/// Shipped next to the weights as a JSON object such as
/// `{"e2e4": 0, "d2d4": 1, ...}`.
#[derive(Debug, Clone)]
pub struct MoveVocabulary {
    index: HashMap<UciMove, usize>,
}

impl MoveVocabulary {
    pub fn from_json(json: &str) -> Result<Self, InferenceError> {
        let parsed: HashMap<String, usize> = serde_json::from_str(json)
            .map_err(|e| InferenceError::Vocabulary(format!("not a move map: {e}")))?;

        let index = parsed
            .into_iter()
            .map(|(uci_str, idx)| {
                uci_str
                    .parse::<UciMove>()
                    .map(|uci| (uci, idx))
                    .map_err(|_| InferenceError::Vocabulary(format!("bad move {uci_str:?}")))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        if index.is_empty() {
            return Err(InferenceError::Vocabulary("vocabulary is empty".to_string()));
        }
        Ok(Self { index })
    }

    pub fn from_file(path: &Path) -> Result<Self, InferenceError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            InferenceError::Vocabulary(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, uci: &UciMove) -> Option<usize> {
        self.index.get(uci).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Largest index plus one; the policy output must be at least this wide.
    pub fn width(&self) -> usize {
        self.index.values().max().map_or(0, |m| m + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_move_map() {
        let vocab = MoveVocabulary::from_json(r#"{"e2e4": 0, "g1f3": 1, "e7e8q": 7}"#).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.width(), 8);
        assert_eq!(vocab.get(&"g1f3".parse().unwrap()), Some(1));
        assert_eq!(vocab.get(&"a2a3".parse().unwrap()), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(MoveVocabulary::from_json("[1, 2]").is_err());
        assert!(MoveVocabulary::from_json(r#"{"zz99": 0}"#).is_err());
        assert!(MoveVocabulary::from_json("{}").is_err());
    }
}
