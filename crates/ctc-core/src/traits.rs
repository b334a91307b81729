//! Трейты на границах декодера.
//!
//! [`ExternalScorer`] — единый интерфейс внешней модели (LSTM-LM, n-граммы и
//! т.д.), которую декодер потребляет, но не реализует. [`CtcDecoder`] —
//! единый интерфейс декодеров для фасада.

use crate::error::{CtcError, CtcResult};
use crate::types::{DecodeOutput, LogProbTable};

/// Внешняя модель, оценивающая следующую метку по истории.
///
/// Состояние непрозрачно для декодера и копируется ([`Clone`]) при каждом
/// ветвлении гипотезы: две живые гипотезы никогда не делят одно состояние.
///
/// # Пример
/// ```ignore
/// let state = lm.initial_state()?;
/// let (log_probs, state) = lm.next_log_probs(sos, &state)?;
/// let p_a = log_probs[a];
/// ```
pub trait ExternalScorer {
    /// Представление метки на входе модели (например, эмбеддинг).
    type Token;
    /// Выход одного шага модели (например, скрытое состояние последнего слоя).
    type Output;
    /// Рекуррентное состояние.
    type State: Clone;

    /// Размер словаря выходного распределения.
    fn vocab_size(&self) -> usize;

    /// Состояние до первой метки.
    fn initial_state(&self) -> CtcResult<Self::State>;

    /// Закодировать метку.
    fn encode(&self, label: usize) -> CtcResult<Self::Token>;

    /// Один шаг модели: `(token, state) → (output, new_state)`.
    fn step(&self, token: &Self::Token, state: &Self::State)
        -> CtcResult<(Self::Output, Self::State)>;

    /// Лог-распределение следующей метки по выходу шага.
    fn score(&self, output: &Self::Output) -> CtcResult<Vec<f32>>;

    /// `encode → step → score` для одной метки.
    ///
    /// Возвращает распределение следующей метки после `label` и новое
    /// состояние.
    fn next_log_probs(&self, label: usize, state: &Self::State) -> CtcResult<(Vec<f32>, Self::State)> {
        let token = self.encode(label)?;
        let (output, new_state) = self.step(&token, state)?;
        let log_probs = self.score(&output)?;
        if log_probs.len() != self.vocab_size() {
            return Err(CtcError::Scorer(format!(
                "скорер вернул {} значений вместо {}",
                log_probs.len(),
                self.vocab_size()
            )));
        }
        Ok((log_probs, new_state))
    }

    /// Лог-вероятность полной последовательности `sos, labels..., eos`.
    fn sequence_log_prob(&self, sos: usize, labels: &[usize], eos: usize) -> CtcResult<f32> {
        let mut state = self.initial_state()?;
        let mut prev = sos;
        let mut total = 0.0f32;
        for &label in labels.iter().chain(std::iter::once(&eos)) {
            let (log_probs, next) = self.next_log_probs(prev, &state)?;
            total += lookup(&log_probs, label)?;
            state = next;
            prev = label;
        }
        Ok(total)
    }
}

/// Безопасный доступ к распределению скорера.
pub fn lookup(log_probs: &[f32], label: usize) -> CtcResult<f32> {
    log_probs.get(label).copied().ok_or_else(|| {
        CtcError::Scorer(format!(
            "метка {label} вне распределения скорера размера {}",
            log_probs.len()
        ))
    })
}

/// Единый интерфейс декодеров одного высказывания.
pub trait CtcDecoder: Send + Sync {
    /// Имя декодера для логов.
    fn name(&self) -> &str;

    /// Декодировать таблицу лог-вероятностей в лучшую гипотезу.
    fn decode(&self, log_probs: &LogProbTable) -> CtcResult<DecodeOutput>;
}
