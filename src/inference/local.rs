use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use async_trait::async_trait;
use ndarray::{ArrayView1, Axis, Ix1, Ix2};
use ort::{session::Session, value::Tensor};
use rand::Rng;
use shakmaty::{CastlingMode, Chess, Position};
use tracing::{debug, info, instrument};

use super::tensor::{elo_category, prepare};
use super::{GenerationRequest, InferenceBackend, MoveVocabulary, truncate_at_stop};
use crate::board::BoardState;
use crate::config::{ExecutionEngine, LocalSettings};
use crate::error::InferenceError;
use crate::fallback::position_rng;
use crate::types::{MoveProbability, PolicyEvaluation};

/// A policy/value network in the Maia2 ONNX format, loaded once and shared
/// read-only by every request.
///
/// ONNX sessions need exclusive access while running, so the network
/// holds several independent sessions and a request only waits when all
/// of them are busy.
pub struct PolicyNetwork {
    sessions: Vec<Mutex<Session>>,
    next: AtomicUsize,
    vocabulary: MoveVocabulary,
    elo_self: i64,
    elo_oppo: i64,
}

impl PolicyNetwork {
    /// Initialize from a local `.onnx` file path
    pub fn from_file(
        path: &Path,
        vocabulary: MoveVocabulary,
        settings: &LocalSettings,
    ) -> Result<Self, InferenceError> {
        let sessions = (0..settings.sessions.max(1))
            .map(|_| Ok(Mutex::new(Session::builder()?.commit_from_file(path)?)))
            .collect::<Result<Vec<_>, InferenceError>>()?;
        Ok(Self {
            sessions,
            next: AtomicUsize::new(0),
            vocabulary,
            elo_self: elo_category(settings.elo_self),
            elo_oppo: elo_category(settings.elo_oppo),
        })
    }

    /// First idle session starting from a rotating offset; blocks on one
    /// only when every session is busy.
    fn checkout(&self) -> MutexGuard<'_, Session> {
        let len = self.sessions.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            match self.sessions[(start + offset) % len].try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            }
        }
        self.sessions[start]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Policy over the legal moves of `board` plus the value estimate for
    /// the side to move.
    pub fn evaluate(&self, board: &BoardState) -> Result<PolicyEvaluation, InferenceError> {
        let input = prepare(board.position())?;

        let (logits_maia, raw_value) = {
            let mut session = self.checkout();
            let outputs = session.run(ort::inputs! {
                "boards" => Tensor::from_array(input.board_tensor)?,
                "elo_self" => Tensor::from_array(([1usize], vec![self.elo_self]))?,
                "elo_oppo" => Tensor::from_array(([1usize], vec![self.elo_oppo]))?,
            })?;

            let logits_maia = outputs["logits_maia"]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix2>()?
                .index_axis(Axis(0), 0)
                .to_owned();
            let logits_value = outputs["logits_value"]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix1>()?;
            (logits_maia, logits_value[[0]])
        };

        if logits_maia.len() < self.vocabulary.width() {
            return Err(InferenceError::Vocabulary(format!(
                "policy has {} outputs, vocabulary needs {}",
                logits_maia.len(),
                self.vocabulary.width()
            )));
        }

        Ok(self.process_output(logits_maia.view(), raw_value, &input.position, input.mirrored))
    }

    fn process_output(
        &self,
        logits_maia: ArrayView1<f32>,
        raw_value: f32,
        chess: &Chess,
        mirrored: bool,
    ) -> PolicyEvaluation {
        // Compute side-to-move's winning probability
        let mut win_prob = (raw_value / 2.0 + 0.5).clamp(0.0, 1.0);
        if mirrored {
            win_prob = 1.0 - win_prob;
        }

        let mut max_logit = f32::NEG_INFINITY;
        let mut move_data = Vec::new();

        for m in chess.legal_moves() {
            // index lookup happens in the network's (white) perspective
            let uci = m.to_uci(CastlingMode::Standard);
            if let Some(idx) = self.vocabulary.get(&uci) {
                let logit = logits_maia[idx];
                max_logit = max_logit.max(logit);
                let actual = if mirrored { uci.to_mirrored() } else { uci };
                move_data.push((actual, logit));
            }
        }

        // Softmax over legal moves only
        let exps: Vec<f32> = move_data
            .iter()
            .map(|&(_, logit)| (logit - max_logit).exp())
            .collect();
        let sum_exp: f32 = exps.iter().sum();

        let mut policy: Vec<MoveProbability> = move_data
            .into_iter()
            .zip(exps)
            .map(|((uci, _), exp)| MoveProbability {
                uci,
                probability: exp / sum_exp,
            })
            .collect();

        policy.sort_by(|a, b| b.probability.total_cmp(&a.probability));

        PolicyEvaluation {
            policy,
            value: win_prob,
        }
    }

    /// Pick a move and phrase it the way a chat model is asked to.
    /// Temperature zero takes the most probable move; otherwise moves are
    /// sampled from the tempered policy with an RNG seeded from the
    /// position.
    pub fn complete(
        &self,
        board: &BoardState,
        temperature: f32,
        seed: u64,
    ) -> Result<String, InferenceError> {
        let evaluation = self.evaluate(board)?;
        if evaluation.policy.is_empty() {
            return Ok("<think>The policy has no move for this position.</think>".to_string());
        }

        let chosen = if temperature <= 0.0 {
            &evaluation.policy[0]
        } else {
            let probabilities: Vec<f32> = evaluation.policy.iter().map(|p| p.probability).collect();
            let mut rng = position_rng(seed, board);
            &evaluation.policy[sample_index(&probabilities, temperature, &mut rng)]
        };

        Ok(format!(
            "<think>Policy network gives {} {:.1}%; win probability {:.1}% for the side to move.</think>\n<uci_move>{}</uci_move>",
            chosen.uci,
            chosen.probability * 100.0,
            evaluation.value * 100.0,
            chosen.uci
        ))
    }
}

/// Draw an index from `probabilities` sharpened by `temperature`.
///
/// Weights are computed as `exp((ln p - ln p_max) / T)`, so the most
/// probable entry always weighs 1 and small temperatures approach the
/// argmax instead of underflowing. `probabilities` is sorted best first.
fn sample_index<R: Rng>(probabilities: &[f32], temperature: f32, rng: &mut R) -> usize {
    let scaled: Vec<f32> = probabilities.iter().map(|p| p.ln() / temperature).collect();
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return 0;
    }
    let weights: Vec<f32> = scaled.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return 0;
    }

    let mut target = rng.random::<f32>() * total;
    for (i, w) in weights.iter().enumerate() {
        if target < *w {
            return i;
        }
        target -= w;
    }
    0
}

/// In-process backend around a [`PolicyNetwork`]. Works from the board
/// alone; the prompt in `request.messages` is not consumed.
pub struct LocalBackend {
    network: Arc<PolicyNetwork>,
    seed: u64,
    label: String,
}

impl LocalBackend {
    #[instrument(skip(settings), fields(engine = ?settings.engine))]
    pub fn load(model_path: &Path, settings: &LocalSettings) -> Result<Self, InferenceError> {
        match settings.engine {
            ExecutionEngine::Tract => {
                ort::set_api(ort_tract::api());
            }
            ExecutionEngine::Candle => {
                ort::set_api(ort_candle::api());
            }
        }

        let vocabulary_path = settings
            .vocabulary
            .clone()
            .unwrap_or_else(|| model_path.with_file_name("all_moves.json"));
        let vocabulary = MoveVocabulary::from_file(&vocabulary_path)?;
        debug!(moves = vocabulary.len(), path = %vocabulary_path.display(), "vocabulary loaded");

        let network = PolicyNetwork::from_file(model_path, vocabulary, settings)?;
        info!(sessions = settings.sessions, path = %model_path.display(), "policy network loaded");

        Ok(Self::new(network, settings.seed, model_path.display().to_string()))
    }

    pub fn new(network: PolicyNetwork, seed: u64, label: String) -> Self {
        Self {
            network: Arc::new(network),
            seed,
            label,
        }
    }
}

#[async_trait]
impl InferenceBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferenceError> {
        let network = Arc::clone(&self.network);
        let board = request.board.clone();
        let temperature = request.options.temperature;
        let seed = self.seed;
        let text = tokio::task::spawn_blocking(move || network.complete(&board, temperature, seed))
            .await
            .map_err(|e| InferenceError::Unavailable(format!("policy worker failed: {e}")))??;
        Ok(truncate_at_stop(text, &request.options.stop_sequences))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    use super::*;

    const POLICY: [f32; 6] = [0.35, 0.25, 0.2, 0.1, 0.06, 0.04];

    fn picks(temperature: f32) -> Vec<usize> {
        (0..200)
            .map(|seed| {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                sample_index(&POLICY, temperature, &mut rng)
            })
            .collect()
    }

    #[test]
    fn small_temperature_is_nearly_greedy() {
        assert!(picks(0.01).iter().all(|&i| i == 0));
        assert!(picks(1e-6).iter().all(|&i| i == 0));
    }

    #[test]
    fn unit_temperature_samples_the_policy() {
        let picks = picks(1.0);
        assert!(picks.iter().all(|&i| i < POLICY.len()));
        let best = picks.iter().filter(|&&i| i == 0).count();
        let worst = picks.iter().filter(|&&i| i == 5).count();
        assert!(best > worst, "best {best}, worst {worst}");
        assert!(picks.iter().any(|&i| i != 0));
    }

    #[test]
    fn degenerate_policy_takes_the_first_entry() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        assert_eq!(sample_index(&[0.0, 0.0], 0.5, &mut rng), 0);
        assert_eq!(sample_index(&[1.0], 2.0, &mut rng), 0);
    }
}
