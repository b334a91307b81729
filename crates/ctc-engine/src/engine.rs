//! Выбор декодера по конфигурации.
//!
//! `CtcEngine` — единая точка входа: greedy, beam search или beam search
//! с внешней моделью, в зависимости от [`DecodeConfig`].

use rayon::prelude::*;
use tracing::{debug, info, warn};

use ctc_core::{CtcDecoder, CtcResult, DecodeConfig, DecodeOutput, ExternalScorer, LogProbTable};
use ctc_decoder::{BeamSearchDecoder, FusedBeamSearch, GreedyDecoder};

/// Единый движок CTC-декодирования.
///
/// Под капотом хранит `Box<dyn CtcDecoder>` и делегирует вызовы.
pub struct CtcEngine {
    /// Внутренний декодер.
    inner: Box<dyn CtcDecoder>,
    config: DecodeConfig,
}

impl CtcEngine {
    /// Движок без внешней модели.
    ///
    /// # Ошибки
    /// Возвращает ошибку, если конфигурация некорректна или
    /// `fusion_mode` требует внешний скорер.
    pub fn new(config: DecodeConfig) -> CtcResult<Self> {
        config.validate()?;
        config.validate_scorer(false)?;

        let inner: Box<dyn CtcDecoder> = if config.is_greedy() {
            Box::new(GreedyDecoder::new(config.blank))
        } else {
            Box::new(BeamSearchDecoder::new(config.clone())?)
        };

        Ok(Self::from_decoder(inner, config))
    }

    /// Движок с внешней моделью (shallow fusion или рескоринг).
    pub fn with_scorer<S>(config: DecodeConfig, scorer: S) -> CtcResult<Self>
    where
        S: ExternalScorer + Send + Sync + 'static,
    {
        if !config.fusion_mode.needs_scorer() {
            warn!("CtcEngine: fusion_mode=none, внешняя модель не используется");
            return Self::new(config);
        }

        let inner = Box::new(FusedBeamSearch::new(config.clone(), scorer)?);
        Ok(Self::from_decoder(inner, config))
    }

    fn from_decoder(inner: Box<dyn CtcDecoder>, config: DecodeConfig) -> Self {
        info!(
            "CtcEngine: декодер '{}' (beam={}, fusion={}, weight={})",
            inner.name(),
            config.beam_width,
            config.fusion_mode,
            config.fusion_weight
        );
        Self { inner, config }
    }

    /// Имя активного декодера.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Конфигурация декодирования.
    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Декодировать одно высказывание.
    pub fn decode(&self, log_probs: &LogProbTable) -> CtcResult<DecodeOutput> {
        self.inner.decode(log_probs)
    }

    /// Декодировать батч параллельно; порядок результатов совпадает со входом.
    ///
    /// Первая ошибка прерывает весь батч.
    pub fn decode_batch(&self, batch: &[LogProbTable]) -> CtcResult<Vec<DecodeOutput>> {
        debug!("CtcEngine: батч из {} высказываний", batch.len());
        batch.par_iter().map(|table| self.inner.decode(table)).collect()
    }
}
