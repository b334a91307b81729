//! CTC prefix beam search с опциональной внешней моделью.
//!
//! Алгоритм (покадровый, time-synchronous):
//! 1. Луч = {пустая гипотеза}, `p_blank = 0`, `p_nonblank = LOG_ZERO`
//! 2. Для каждого кадра `t`:
//!    a. Каждая гипотеза остаётся без расширения ([`PrefixScorer::stay`])
//!    b. Кандидаты — top-`beam_width` меток кадра (без blank и EOS)
//!    c. Каждая гипотеза расширяется каждым кандидатом ([`PrefixScorer::extend`]),
//!       при shallow fusion к скору добавляется вклад внешней модели
//!    d. Гипотезы с одинаковыми метками сливаются (logsumexp масс)
//!    e. Остаются `beam_width` лучших по скору
//! 3. При рескоринге скор каждой гипотезы пересчитывается по полной
//!    последовательности внешней моделью.
//!
//! Покадровый цикл использует только переходы `stay`/`extend`;
//! [`PrefixScorer::score`] служит эталоном точной вероятности префикса
//! и в цикле не вызывается.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use ctc_core::math::{log_add_exp, top_k};
use ctc_core::traits::lookup;
use ctc_core::{
    debug as ctc_debug, CtcDecoder, CtcError, CtcResult, DecodeConfig, DecodeOutput,
    ExternalScorer, FusionMode, LogProbTable, LOG_ONE, LOG_ZERO,
};

use crate::prefix::PrefixScorer;

/// Гипотеза луча.
///
/// Значение-запись: расширение создаёт новую гипотезу, существующая не
/// изменяется.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    labels: Vec<usize>,
    p_blank: f32,
    p_nonblank: f32,
    lm_log_prob: f32,
    score: f32,
}

impl Hypothesis {
    fn initial() -> Self {
        Self {
            labels: Vec::new(),
            p_blank: LOG_ONE,
            p_nonblank: LOG_ZERO,
            lm_log_prob: 0.0,
            score: LOG_ONE,
        }
    }

    /// Метки без SOS.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Масса выравниваний, заканчивающихся blank.
    pub fn p_blank(&self) -> f32 {
        self.p_blank
    }

    /// Масса выравниваний, заканчивающихся не-blank.
    pub fn p_nonblank(&self) -> f32 {
        self.p_nonblank
    }

    /// Полная CTC лог-вероятность `logsumexp(p_blank, p_nonblank)`.
    pub fn ctc_log_prob(&self) -> f32 {
        log_add_exp(self.p_blank, self.p_nonblank)
    }

    /// Накопленная лог-вероятность внешней модели.
    pub fn lm_log_prob(&self) -> f32 {
        self.lm_log_prob
    }

    /// Ранжирующий скор.
    pub fn score(&self) -> f32 {
        self.score
    }

    fn last(&self) -> Option<usize> {
        self.labels.last().copied()
    }

    fn to_output(&self, with_lm: bool) -> DecodeOutput {
        let out = DecodeOutput::new(self.labels.clone(), self.ctc_log_prob()).with_score(self.score);
        if with_lm {
            out.with_lm_log_prob(self.lm_log_prob)
        } else {
            out
        }
    }
}

/// Порядок луча: скор по убыванию, затем более длинный префикс,
/// затем лексикографически меньшая последовательность.
fn beam_order(a: &Hypothesis, b: &Hypothesis) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.labels.len().cmp(&a.labels.len()))
        .then_with(|| a.labels.cmp(&b.labels))
}

/// Состояние внешней модели, принадлежащее одной гипотезе.
#[derive(Debug, Clone)]
enum LmContext<S> {
    /// Все метки поглощены; известно распределение следующей метки.
    Ready {
        state: S,
        next_log_probs: Arc<[f32]>,
    },
    /// Последняя метка ещё не подана в модель (вычисляется лениво).
    Pending { parent_state: S, label: usize },
}

impl<S: Clone> LmContext<S> {
    fn is_ready(&self) -> bool {
        matches!(self, LmContext::Ready { .. })
    }

    fn resolve<L>(&mut self, scorer: &L) -> CtcResult<()>
    where
        L: ExternalScorer<State = S>,
    {
        if let LmContext::Pending {
            parent_state,
            label,
        } = self
        {
            let (dist, state) = scorer.next_log_probs(*label, parent_state)?;
            *self = LmContext::Ready {
                state,
                next_log_probs: dist.into(),
            };
        }
        Ok(())
    }
}

/// Гипотеза вместе с её копией состояния внешней модели.
#[derive(Debug, Clone)]
struct Entry<S> {
    hyp: Hypothesis,
    lm: Option<LmContext<S>>,
}

/// Внешний скорер-заглушка для декодирования без LM.
///
/// Ненаселённый тип: значение создать нельзя, используется только как
/// параметр типа при `scorer = None`.
#[derive(Debug, Clone, Copy)]
pub enum NoScorer {}

impl ExternalScorer for NoScorer {
    type Token = ();
    type Output = ();
    type State = ();

    fn vocab_size(&self) -> usize {
        match *self {}
    }

    fn initial_state(&self) -> CtcResult<()> {
        match *self {}
    }

    fn encode(&self, _label: usize) -> CtcResult<()> {
        match *self {}
    }

    fn step(&self, _token: &(), _state: &()) -> CtcResult<((), ())> {
        match *self {}
    }

    fn score(&self, _output: &()) -> CtcResult<Vec<f32>> {
        match *self {}
    }
}

/// CTC beam search декодер.
#[derive(Debug, Clone)]
pub struct BeamSearchDecoder {
    config: DecodeConfig,
}

impl BeamSearchDecoder {
    /// Создать декодер; конфигурация проверяется сразу.
    pub fn new(config: DecodeConfig) -> CtcResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Текущая конфигурация.
    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Декодирование только по CTC.
    ///
    /// Ошибка конфигурации, если `fusion_mode != none`.
    pub fn decode(&self, log_probs: &LogProbTable) -> CtcResult<DecodeOutput> {
        self.search::<NoScorer>(log_probs, None)
            .map(|beam| self.best(&beam))
    }

    /// Декодирование с внешней моделью согласно `fusion_mode`.
    pub fn decode_with_scorer<S: ExternalScorer>(
        &self,
        log_probs: &LogProbTable,
        scorer: &S,
    ) -> CtcResult<DecodeOutput> {
        self.search(log_probs, Some(scorer))
            .map(|beam| self.best(&beam))
    }

    /// Весь финальный луч (N-best), лучший первым.
    pub fn decode_nbest<S: ExternalScorer>(
        &self,
        log_probs: &LogProbTable,
        scorer: Option<&S>,
    ) -> CtcResult<Vec<DecodeOutput>> {
        let with_lm = self.config.fusion_mode.needs_scorer();
        let beam = self.search(log_probs, scorer)?;
        Ok(beam.iter().map(|h| h.to_output(with_lm)).collect())
    }

    fn best(&self, beam: &[Hypothesis]) -> DecodeOutput {
        let with_lm = self.config.fusion_mode.needs_scorer();
        beam.first()
            .map(|h| h.to_output(with_lm))
            .unwrap_or_else(|| DecodeOutput::new(Vec::new(), LOG_ZERO))
    }

    /// Полный поиск; возвращает финальный луч, отсортированный по скору.
    pub fn search<S: ExternalScorer>(
        &self,
        log_probs: &LogProbTable,
        scorer: Option<&S>,
    ) -> CtcResult<Vec<Hypothesis>> {
        let cfg = &self.config;
        cfg.validate_scorer(scorer.is_some())?;
        let scorer = if cfg.fusion_mode.needs_scorer() {
            scorer
        } else {
            None
        };

        let vocab = log_probs.vocab_size();
        if vocab > 0 {
            cfg.validate_vocab(vocab)?;
            if let Some(lm) = scorer {
                if lm.vocab_size() != vocab {
                    return Err(CtcError::Config(format!(
                        "словарь скорера ({}) не совпадает со словарём CTC ({vocab})",
                        lm.vocab_size()
                    )));
                }
            }
        }

        let prefix = PrefixScorer::new(log_probs, cfg.blank, cfg.eos)?;
        let fusion = match scorer {
            Some(lm) if cfg.fusion_mode == FusionMode::ShallowFusion => Some(lm),
            _ => None,
        };
        let max_len = cfg.max_decode_length.unwrap_or(usize::MAX);

        debug!(
            "CTC beam search: {} кадров, vocab={}, beam={}, fusion={}, weight={}",
            log_probs.num_frames(),
            vocab,
            cfg.beam_width,
            cfg.fusion_mode,
            cfg.fusion_weight
        );

        // Начальная гипотеза: SOS уже подан во внешнюю модель
        let initial_lm = match fusion {
            Some(lm) => {
                let (dist, state) = lm.next_log_probs(cfg.eos, &lm.initial_state()?)?;
                Some(LmContext::Ready {
                    state,
                    next_log_probs: dist.into(),
                })
            }
            None => None,
        };
        let mut beam = vec![Entry {
            hyp: Hypothesis::initial(),
            lm: initial_lm,
        }];

        for t in 0..log_probs.num_frames() {
            let candidates: Vec<usize> = top_k(log_probs.row(t), cfg.beam_width)
                .into_iter()
                .filter(|&c| c != cfg.blank && c != cfg.eos)
                .collect();

            let mut next: Vec<Entry<S::State>> = Vec::with_capacity(beam.len() * (candidates.len() + 1));
            let mut index: HashMap<Vec<usize>, usize> = HashMap::new();

            for entry in beam.iter_mut() {
                let last = entry.hyp.last();
                let extendable = entry.hyp.labels.len() < max_len && !candidates.is_empty();

                // Распределение следующей метки считается один раз на гипотезу,
                // до копирования в ветку без расширения
                if extendable {
                    if let (Some(lm), Some(ctx)) = (fusion, entry.lm.as_mut()) {
                        ctx.resolve(lm)?;
                    }
                }
                let hyp = &entry.hyp;

                // Префикс не расширен
                let (p_blank, p_nonblank) = prefix.stay(t, hyp.p_blank, hyp.p_nonblank, last);
                merge_into(
                    &mut next,
                    &mut index,
                    Entry {
                        hyp: Hypothesis {
                            labels: hyp.labels.clone(),
                            p_blank,
                            p_nonblank,
                            lm_log_prob: hyp.lm_log_prob,
                            score: LOG_ZERO,
                        },
                        lm: entry.lm.clone(),
                    },
                );

                if !extendable {
                    continue;
                }

                // Префикс расширен
                for &c in &candidates {
                    let p_nonblank = prefix.extend(t, hyp.p_blank, hyp.p_nonblank, last, c);
                    let (lm_delta, lm) = match &entry.lm {
                        Some(LmContext::Ready {
                            state,
                            next_log_probs,
                        }) => (
                            lookup(next_log_probs, c)?,
                            Some(LmContext::Pending {
                                parent_state: state.clone(),
                                label: c,
                            }),
                        ),
                        Some(LmContext::Pending { .. }) => {
                            return Err(CtcError::Scorer(
                                "состояние внешней модели не вычислено".into(),
                            ))
                        }
                        None => (0.0, None),
                    };

                    let mut labels = Vec::with_capacity(hyp.labels.len() + 1);
                    labels.extend_from_slice(&hyp.labels);
                    labels.push(c);

                    merge_into(
                        &mut next,
                        &mut index,
                        Entry {
                            hyp: Hypothesis {
                                labels,
                                p_blank: LOG_ZERO,
                                p_nonblank,
                                lm_log_prob: hyp.lm_log_prob + lm_delta,
                                score: LOG_ZERO,
                            },
                            lm,
                        },
                    );
                }
            }

            for entry in next.iter_mut() {
                entry.hyp.score = self.rank(&entry.hyp, fusion.is_some());
            }
            next.sort_by(|a, b| beam_order(&a.hyp, &b.hyp));
            next.truncate(cfg.beam_width);
            beam = next;

            if ctc_debug::enabled() {
                let summary: Vec<String> = beam
                    .iter()
                    .map(|e| format!("{:?}:{:.3}", e.hyp.labels, e.hyp.score))
                    .collect();
                trace!("CTC beam t={}: [{}]", t, summary.join(", "));
            }
        }

        let mut hyps: Vec<Hypothesis> = beam.into_iter().map(|e| e.hyp).collect();

        if let (Some(lm), FusionMode::Rescoring) = (scorer, cfg.fusion_mode) {
            for hyp in hyps.iter_mut() {
                hyp.lm_log_prob = lm.sequence_log_prob(cfg.eos, &hyp.labels, cfg.eos)?;
                hyp.score = self.rank(hyp, true);
            }
            hyps.sort_by(beam_order);
        }

        if let Some(best) = hyps.first() {
            debug!(
                "CTC beam search: лучшая гипотеза {} меток, ctc={:.3}, score={:.3}",
                best.labels.len(),
                best.ctc_log_prob(),
                best.score
            );
        }

        Ok(hyps)
    }

    /// Ранжирующий скор гипотезы.
    fn rank(&self, hyp: &Hypothesis, with_lm: bool) -> f32 {
        let lm = if with_lm {
            self.config.fusion_weight * hyp.lm_log_prob
        } else {
            0.0
        };
        hyp.ctc_log_prob() + lm + self.config.length_penalty * hyp.labels.len() as f32
    }
}

/// Добавить гипотезу в новый луч, сливая её с уже имеющейся с теми же метками.
fn merge_into<S: Clone>(
    next: &mut Vec<Entry<S>>,
    index: &mut HashMap<Vec<usize>, usize>,
    entry: Entry<S>,
) {
    match index.get(&entry.hyp.labels) {
        Some(&i) => {
            let existing = &mut next[i];
            existing.hyp.p_blank = log_add_exp(existing.hyp.p_blank, entry.hyp.p_blank);
            existing.hyp.p_nonblank = log_add_exp(existing.hyp.p_nonblank, entry.hyp.p_nonblank);
            // Одинаковые метки — одинаковое состояние LM; берём уже вычисленное
            let existing_ready = existing.lm.as_ref().is_some_and(LmContext::is_ready);
            let incoming_ready = entry.lm.as_ref().is_some_and(LmContext::is_ready);
            if !existing_ready && incoming_ready {
                existing.lm = entry.lm;
            }
        }
        None => {
            index.insert(entry.hyp.labels.clone(), next.len());
            next.push(entry);
        }
    }
}

impl CtcDecoder for BeamSearchDecoder {
    fn name(&self) -> &str {
        "ctc-beam-search"
    }

    fn decode(&self, log_probs: &LogProbTable) -> CtcResult<DecodeOutput> {
        BeamSearchDecoder::decode(self, log_probs)
    }
}

/// Beam search декодер вместе с внешней моделью.
#[derive(Debug, Clone)]
pub struct FusedBeamSearch<S> {
    decoder: BeamSearchDecoder,
    scorer: S,
}

impl<S: ExternalScorer> FusedBeamSearch<S> {
    pub fn new(config: DecodeConfig, scorer: S) -> CtcResult<Self> {
        Ok(Self {
            decoder: BeamSearchDecoder::new(config)?,
            scorer,
        })
    }

    /// Внешняя модель.
    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    /// Весь финальный луч.
    pub fn decode_nbest(&self, log_probs: &LogProbTable) -> CtcResult<Vec<DecodeOutput>> {
        self.decoder.decode_nbest(log_probs, Some(&self.scorer))
    }
}

impl<S> CtcDecoder for FusedBeamSearch<S>
where
    S: ExternalScorer + Send + Sync,
{
    fn name(&self) -> &str {
        "ctc-beam-search-lm"
    }

    fn decode(&self, log_probs: &LogProbTable) -> CtcResult<DecodeOutput> {
        self.decoder.decode_with_scorer(log_probs, &self.scorer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLANK: usize = 0;
    const A: usize = 1;
    const B: usize = 2;
    const EOS: usize = 3;

    fn table(rows: &[[f32; 4]]) -> LogProbTable {
        LogProbTable::new(rows.iter().map(|r| r.iter().map(|p| p.ln()).collect()).collect())
            .unwrap()
    }

    fn decoder(beam_width: usize) -> BeamSearchDecoder {
        BeamSearchDecoder::new(DecodeConfig::beam(beam_width).with_labels(BLANK, EOS)).unwrap()
    }

    #[test]
    fn test_blank_a_a_collapses_to_single_a() {
        let t = table(&[
            [0.98, 0.01, 0.01, 0.0],
            [0.01, 0.98, 0.01, 0.0],
            [0.01, 0.98, 0.01, 0.0],
        ]);
        assert_eq!(decoder(1).decode(&t).unwrap().labels, vec![A]);
        assert_eq!(decoder(4).decode(&t).unwrap().labels, vec![A]);
    }

    #[test]
    fn test_empty_input_returns_empty_sequence() {
        let t = LogProbTable::empty(4);
        let out = decoder(3).decode(&t).unwrap();
        assert!(out.labels.is_empty());
        assert_eq!(out.ctc_log_prob, LOG_ONE);
    }

    #[test]
    fn test_beam_order_tie_breaks() {
        let mk = |labels: Vec<usize>, score: f32| Hypothesis {
            labels,
            p_blank: LOG_ZERO,
            p_nonblank: LOG_ZERO,
            lm_log_prob: 0.0,
            score,
        };
        let mut hyps = vec![mk(vec![B], -1.0), mk(vec![A], -1.0), mk(vec![A, B], -1.0), mk(vec![], -0.5)];
        hyps.sort_by(beam_order);
        let order: Vec<Vec<usize>> = hyps.into_iter().map(|h| h.labels).collect();
        assert_eq!(order, vec![vec![], vec![A, B], vec![A], vec![B]]);
    }

    #[test]
    fn test_merge_combines_masses() {
        let mut next: Vec<Entry<()>> = Vec::new();
        let mut index = HashMap::new();
        let mk = |p_blank: f32, p_nonblank: f32| Entry {
            hyp: Hypothesis {
                labels: vec![A],
                p_blank,
                p_nonblank,
                lm_log_prob: 0.0,
                score: LOG_ZERO,
            },
            lm: None,
        };
        merge_into(&mut next, &mut index, mk(0.2f32.ln(), 0.1f32.ln()));
        merge_into(&mut next, &mut index, mk(LOG_ZERO, 0.3f32.ln()));
        assert_eq!(next.len(), 1);
        assert!((next[0].hyp.p_blank - 0.2f32.ln()).abs() < 1e-6);
        assert!((next[0].hyp.p_nonblank - 0.4f32.ln()).abs() < 1e-6);
        assert!((next[0].hyp.ctc_log_prob() - 0.6f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_fusion_without_scorer_is_config_error() {
        let config = DecodeConfig::beam(2)
            .with_labels(BLANK, EOS)
            .with_fusion(FusionMode::Rescoring, 1.0);
        let dec = BeamSearchDecoder::new(config).unwrap();
        let err = dec.decode(&LogProbTable::empty(4)).unwrap_err();
        assert!(matches!(err, CtcError::Config(_)));
    }

    #[test]
    fn test_invalid_beam_width_rejected() {
        assert!(BeamSearchDecoder::new(DecodeConfig::beam(0)).is_err());
    }
}
