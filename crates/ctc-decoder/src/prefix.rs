//! CTC prefix scoring.
//!
//! Прямая рекурсия CTC для префиксов (Watanabe et al., "Hybrid CTC/Attention
//! Architecture for End-to-End Speech Recognition", Algorithm 2), расширенная
//! на пакет кандидатов следующей метки.
//!
//! Для префикса `g` и кадра `t` хранятся две лог-вероятности:
//! - `r[t].0` — выравнивания `g`, заканчивающиеся не-blank меткой;
//! - `r[t].1` — выравнивания `g`, заканчивающиеся blank.
//!
//! Расширение `h = g + c`:
//!
//! ```text
//! phi[t]  = r_g[t].1                          если c == last(g)
//!         = logsumexp(r_g[t].0, r_g[t].1)     иначе
//! r_h[t].0 = logsumexp(r_h[t-1].0, phi[t-1]) + lp(t, c)
//! r_h[t].1 = logsumexp(r_h[t-1].0, r_h[t-1].1) + lp(t, blank)
//! psi     = logsumexp_t(phi[t-1] + lp(t, c))
//! ```
//!
//! Для EOS `psi = logsumexp(r_g[T-1].0, r_g[T-1].1)`: префикс уже завершён.

use ctc_core::math::log_add_exp;
use ctc_core::{CtcError, CtcResult, LogProbTable, LOG_ONE, LOG_ZERO};

/// Состояние прямой рекурсии для одного префикса.
///
/// Не изменяется после вычисления; для расширения создаётся новое.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixState {
    /// `(r_non_blank[t], r_blank[t])` для `t` в `[0, xlen)`.
    r: Vec<(f32, f32)>,
    /// Длина префикса (без SOS), которому принадлежит состояние.
    prefix_len: usize,
}

impl PrefixState {
    /// Количество кадров.
    pub fn num_frames(&self) -> usize {
        self.r.len()
    }

    /// Длина префикса, которому принадлежит состояние.
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// `r_non_blank[t]`.
    pub fn non_blank(&self, t: usize) -> f32 {
        self.r[t].0
    }

    /// `r_blank[t]`.
    pub fn blank(&self, t: usize) -> f32 {
        self.r[t].1
    }

    /// `logsumexp(r_nb[t], r_b[t])`.
    fn total(&self, t: usize) -> f32 {
        log_add_exp(self.r[t].0, self.r[t].1)
    }

    /// Вероятность того, что префикс завершён к последнему кадру,
    /// т.е. полная CTC-вероятность `P(prefix | X)`.
    pub fn prefix_log_prob(&self) -> f32 {
        match self.r.last() {
            Some(&(nb, b)) => log_add_exp(nb, b),
            // Нулевая длина: пустой префикс достоверен, непустой невозможен
            None if self.prefix_len == 0 => LOG_ONE,
            None => LOG_ZERO,
        }
    }
}

/// Движок префиксных CTC-вероятностей для одного высказывания.
#[derive(Debug, Clone, Copy)]
pub struct PrefixScorer<'a> {
    log_probs: &'a LogProbTable,
    blank: usize,
    eos: usize,
}

impl<'a> PrefixScorer<'a> {
    /// Создать скорер для таблицы одного высказывания.
    pub fn new(log_probs: &'a LogProbTable, blank: usize, eos: usize) -> CtcResult<Self> {
        let vocab = log_probs.vocab_size();
        if vocab > 0 {
            for (name, idx) in [("blank", blank), ("eos", eos)] {
                if idx >= vocab {
                    return Err(CtcError::Config(format!(
                        "{name}={idx} вне словаря размера {vocab}"
                    )));
                }
            }
        }
        Ok(Self {
            log_probs,
            blank,
            eos,
        })
    }

    /// Количество кадров (xlen).
    pub fn num_frames(&self) -> usize {
        self.log_probs.num_frames()
    }

    /// Состояние пустого префикса: вся масса на blank-пути,
    /// `r_b[t] = sum_{s <= t} lp(s, blank)`.
    pub fn initial_state(&self) -> PrefixState {
        let mut r = Vec::with_capacity(self.num_frames());
        let mut acc = LOG_ONE;
        for t in 0..self.num_frames() {
            acc += self.log_probs.get(t, self.blank);
            r.push((LOG_ZERO, acc));
        }
        PrefixState { r, prefix_len: 0 }
    }

    /// Префиксные лог-вероятности `prefix + c` для каждого кандидата `c`
    /// и соответствующие новые состояния.
    ///
    /// `prefix` — метки без SOS, `previous` — состояние этого префикса.
    pub fn score(
        &self,
        prefix: &[usize],
        candidates: &[usize],
        previous: &PrefixState,
    ) -> (Vec<f32>, Vec<PrefixState>) {
        let last = prefix.last().copied();
        let mut scores = Vec::with_capacity(candidates.len());
        let mut states = Vec::with_capacity(candidates.len());

        for &c in candidates {
            let (psi, state) = self.extend_prefix(prefix.len(), last, c, previous);
            // P(... eos | X): префикс завершён без новых не-blank меток
            let psi = if c == self.eos {
                previous.prefix_log_prob()
            } else {
                psi
            };
            scores.push(psi);
            states.push(state);
        }

        (scores, states)
    }

    fn extend_prefix(
        &self,
        ylen: usize,
        last: Option<usize>,
        c: usize,
        previous: &PrefixState,
    ) -> (f32, PrefixState) {
        let xlen = self.num_frames();
        let mut r = vec![(LOG_ZERO, LOG_ZERO); xlen];
        let prefix_len = ylen + 1;

        // Префикс длины ylen + 1 не может завершиться раньше кадра ylen
        if xlen == 0 || ylen > xlen {
            return (LOG_ZERO, PrefixState { r, prefix_len });
        }
        if ylen == 0 {
            r[0].0 = self.log_probs.get(0, c);
        }

        // Повтор последней метки возможен только через blank
        let phi = |t: usize| -> f32 {
            if last == Some(c) {
                previous.blank(t)
            } else {
                previous.total(t)
            }
        };

        let start = ylen.max(1);
        let mut psi = r[start - 1].0;
        for t in start..xlen {
            let lp_c = self.log_probs.get(t, c);
            let phi_prev = phi(t - 1);
            r[t].0 = log_add_exp(r[t - 1].0, phi_prev) + lp_c;
            r[t].1 = log_add_exp(r[t - 1].0, r[t - 1].1) + self.log_probs.get(t, self.blank);
            psi = log_add_exp(psi, phi_prev + lp_c);
        }

        (psi, PrefixState { r, prefix_len })
    }

    /// Полная CTC лог-вероятность `P(labels | X)` по цепочке [`Self::score`].
    pub fn sequence_log_prob(&self, labels: &[usize]) -> f32 {
        let mut state = self.initial_state();
        for (i, &c) in labels.iter().enumerate() {
            let (_, mut states) = self.score(&labels[..i], &[c], &state);
            match states.pop() {
                Some(next) => state = next,
                None => return LOG_ZERO,
            }
        }
        state.prefix_log_prob()
    }

    /// Покадровый переход «префикс не расширен» на кадре `t`.
    ///
    /// Возвращает новые `(p_blank, p_nonblank)`: blank после любого окончания
    /// плюс повтор последней метки без blank (схлопывается в тот же префикс).
    pub fn stay(&self, t: usize, p_blank: f32, p_nonblank: f32, last: Option<usize>) -> (f32, f32) {
        let new_p_blank = log_add_exp(p_blank, p_nonblank) + self.log_probs.get(t, self.blank);
        let new_p_nonblank = match last {
            Some(l) => p_nonblank + self.log_probs.get(t, l),
            None => LOG_ZERO,
        };
        (new_p_blank, new_p_nonblank)
    }

    /// Покадровый переход «префикс расширен меткой `c`» на кадре `t`.
    ///
    /// Возвращает `p_nonblank` расширенного префикса (`p_blank` у него
    /// нулевой). Повтор последней метки допустим только после blank.
    pub fn extend(
        &self,
        t: usize,
        p_blank: f32,
        p_nonblank: f32,
        last: Option<usize>,
        c: usize,
    ) -> f32 {
        let lp = self.log_probs.get(t, c);
        if last == Some(c) {
            p_blank + lp
        } else {
            log_add_exp(p_blank, p_nonblank) + lp
        }
    }
}
