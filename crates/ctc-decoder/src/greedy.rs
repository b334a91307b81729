//! CTC greedy-декодирование.
//!
//! argmax по кадру → схлопывание повторов → удаление blank.

use tracing::debug;

use ctc_core::math::argmax;
use ctc_core::{CtcDecoder, CtcError, CtcResult, DecodeOutput, LogProbTable, LOG_ONE};

/// Простой CTC greedy-декодер.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreedyDecoder {
    /// ID blank-токена.
    blank: usize,
}

impl GreedyDecoder {
    pub fn new(blank: usize) -> Self {
        Self { blank }
    }

    /// ID blank-токена.
    pub fn blank(&self) -> usize {
        self.blank
    }

    /// Декодировать таблицу в последовательность меток.
    ///
    /// При равенстве лог-вероятностей выбирается меньший индекс.
    pub fn decode(&self, log_probs: &LogProbTable) -> Vec<usize> {
        self.best_path(log_probs).0
    }

    /// То же, что [`Self::decode`], плюс лог-вероятность лучшего пути.
    pub fn decode_with_score(&self, log_probs: &LogProbTable) -> CtcResult<DecodeOutput> {
        if !log_probs.is_empty() && self.blank >= log_probs.vocab_size() {
            return Err(CtcError::Config(format!(
                "blank={} вне словаря размера {}",
                self.blank,
                log_probs.vocab_size()
            )));
        }
        let (labels, score) = self.best_path(log_probs);
        debug!(
            "CTC greedy: {} кадров → {} меток, score={:.3}",
            log_probs.num_frames(),
            labels.len(),
            score
        );
        Ok(DecodeOutput::new(labels, score))
    }

    fn best_path(&self, log_probs: &LogProbTable) -> (Vec<usize>, f32) {
        let mut decoded = Vec::new();
        let mut prev: Option<usize> = None;
        let mut score = LOG_ONE;

        for row in log_probs.rows() {
            let Some(tok) = argmax(row) else { break };
            score += row[tok];

            // CTC: убрать blanks и последовательные дубликаты
            if tok != self.blank && Some(tok) != prev {
                decoded.push(tok);
            }
            prev = Some(tok);
        }

        (decoded, score)
    }
}

impl CtcDecoder for GreedyDecoder {
    fn name(&self) -> &str {
        "ctc-greedy"
    }

    fn decode(&self, log_probs: &LogProbTable) -> CtcResult<DecodeOutput> {
        self.decode_with_score(log_probs)
    }
}
