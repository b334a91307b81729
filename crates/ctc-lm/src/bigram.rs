//! Биграммная модель: таблица log P(next | previous).

use serde::{Deserialize, Serialize};
use tracing::debug;

use ctc_core::math::log_softmax;
use ctc_core::{CtcError, CtcResult, ExternalScorer};

/// Плотная таблица биграмм `[vocab × vocab]`, строка = предыдущая метка.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigramLm {
    vocab_size: usize,
    /// Метка, с которой начинается история (SOS).
    sos: usize,
    log_probs: Vec<f32>,
}

impl BigramLm {
    /// Построить из готовой матрицы лог-вероятностей (строки нормализуются).
    pub fn from_matrix(rows: Vec<Vec<f32>>, sos: usize) -> CtcResult<Self> {
        let vocab_size = rows.len();
        if vocab_size == 0 {
            return Err(CtcError::Config("BigramLm: пустая матрица".into()));
        }
        let mut log_probs = Vec::with_capacity(vocab_size * vocab_size);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != vocab_size {
                return Err(CtcError::Shape(format!(
                    "BigramLm: строка {i} имеет длину {}, ожидалось {vocab_size}",
                    row.len()
                )));
            }
            log_probs.extend(log_softmax(row));
        }
        Self::checked(vocab_size, sos, log_probs)
    }

    /// Оценить по обучающим последовательностям со сглаживанием add-k.
    ///
    /// Каждая последовательность оборачивается в `sos … eos`; переход в `eos`
    /// учитывается как обычная биграмма.
    pub fn from_counts(
        vocab_size: usize,
        sequences: &[Vec<usize>],
        sos: usize,
        eos: usize,
        add_k: f32,
    ) -> CtcResult<Self> {
        if vocab_size == 0 {
            return Err(CtcError::Config("BigramLm: vocab_size=0".into()));
        }
        if !(add_k > 0.0 && add_k.is_finite()) {
            return Err(CtcError::Config(format!("BigramLm: add_k={add_k} должно быть > 0")));
        }
        if eos >= vocab_size {
            return Err(CtcError::Config(format!(
                "BigramLm: eos={eos} вне словаря размера {vocab_size}"
            )));
        }

        let mut counts = vec![add_k; vocab_size * vocab_size];
        let mut pairs = 0usize;
        for seq in sequences {
            let mut prev = sos;
            for &label in seq.iter().chain(std::iter::once(&eos)) {
                if label >= vocab_size || prev >= vocab_size {
                    return Err(CtcError::Config(format!(
                        "BigramLm: метка {label} вне словаря размера {vocab_size}"
                    )));
                }
                counts[prev * vocab_size + label] += 1.0;
                prev = label;
                pairs += 1;
            }
        }

        let log_probs = counts
            .chunks_exact(vocab_size)
            .flat_map(|row| {
                let total: f32 = row.iter().sum();
                row.iter().map(move |&c| (c / total).ln())
            })
            .collect();

        debug!(
            "BigramLm: {} последовательностей, {pairs} биграмм, vocab={vocab_size}",
            sequences.len()
        );
        Self::checked(vocab_size, sos, log_probs)
    }

    fn checked(vocab_size: usize, sos: usize, log_probs: Vec<f32>) -> CtcResult<Self> {
        if sos >= vocab_size {
            return Err(CtcError::Config(format!(
                "BigramLm: sos={sos} вне словаря размера {vocab_size}"
            )));
        }
        Ok(Self {
            vocab_size,
            sos,
            log_probs,
        })
    }

    /// log P(next | prev).
    pub fn log_prob(&self, prev: usize, next: usize) -> Option<f32> {
        if prev >= self.vocab_size || next >= self.vocab_size {
            return None;
        }
        Some(self.log_probs[prev * self.vocab_size + next])
    }

    fn row(&self, prev: usize) -> &[f32] {
        &self.log_probs[prev * self.vocab_size..(prev + 1) * self.vocab_size]
    }
}

impl ExternalScorer for BigramLm {
    type Token = usize;
    type Output = usize;
    type State = usize;

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn initial_state(&self) -> CtcResult<usize> {
        Ok(self.sos)
    }

    fn encode(&self, label: usize) -> CtcResult<usize> {
        if label >= self.vocab_size {
            return Err(CtcError::Scorer(format!(
                "BigramLm: метка {label} вне словаря размера {}",
                self.vocab_size
            )));
        }
        Ok(label)
    }

    fn step(&self, token: &usize, _state: &usize) -> CtcResult<(usize, usize)> {
        Ok((*token, *token))
    }

    fn score(&self, output: &usize) -> CtcResult<Vec<f32>> {
        Ok(self.row(*output).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_counts_add_k() {
        // vocab: 0=blank, 1=eos/sos, 2, 3
        let lm = BigramLm::from_counts(4, &[vec![2, 3], vec![2]], 1, 1, 1.0).unwrap();
        // из sos: 2 встречается дважды → (2+1)/(2+4)
        let p = lm.log_prob(1, 2).unwrap().exp();
        assert!((p - 0.5).abs() < 1e-6);
        // строка 3: только 3→eos один раз → (1+1)/(1+4)
        let p = lm.log_prob(3, 1).unwrap().exp();
        assert!((p - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_rows_are_normalized() {
        let lm = BigramLm::from_matrix(
            vec![vec![1.0, 2.0, 3.0], vec![0.0, 0.0, 0.0], vec![-1.0, 5.0, 0.5]],
            1,
        )
        .unwrap();
        for prev in 0..3 {
            let total: f32 = lm.score(&prev).unwrap().iter().map(|lp| lp.exp()).sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_state_is_last_label() {
        let lm = BigramLm::from_counts(4, &[vec![2, 3]], 1, 1, 0.5).unwrap();
        let s0 = lm.initial_state().unwrap();
        assert_eq!(s0, 1);
        let (_, s1) = lm.next_log_probs(2, &s0).unwrap();
        assert_eq!(s1, 2);
        let seq = lm.sequence_log_prob(1, &[2, 3], 1).unwrap();
        let expected =
            lm.log_prob(1, 2).unwrap() + lm.log_prob(2, 3).unwrap() + lm.log_prob(3, 1).unwrap();
        assert!((seq - expected).abs() < 1e-5);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(BigramLm::from_matrix(vec![vec![0.0, 0.0], vec![0.0]], 0).is_err());
        assert!(BigramLm::from_counts(3, &[vec![7]], 1, 1, 1.0).is_err());
        assert!(BigramLm::from_counts(3, &[], 1, 1, 0.0).is_err());
        assert!(BigramLm::from_counts(3, &[], 5, 1, 1.0).is_err());
    }

    #[test]
    fn test_serde_roundtrip_keeps_table() {
        let lm = BigramLm::from_counts(3, &[vec![2]], 1, 1, 1.0).unwrap();
        let json = serde_json::to_string(&lm).unwrap();
        let back: BigramLm = serde_json::from_str(&json).unwrap();
        assert_eq!(back.log_prob(1, 2), lm.log_prob(1, 2));
    }
}
