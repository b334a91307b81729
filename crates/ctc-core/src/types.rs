//! Общие типы CTC-декодирования.
//!
//! Содержит матрицу лог-вероятностей одного высказывания и результат
//! декодирования, используемые всеми крейтами workspace.

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{CtcError, CtcResult};
use crate::math::{clamp_log, log_softmax, log_sum_exp};

// ---------------------------------------------------------------------------
// Матрица лог-вероятностей
// ---------------------------------------------------------------------------

/// Покадровые лог-вероятности меток одного высказывания.
///
/// Хранится построчно (time-major): строка `t` — распределение по словарю
/// на кадре `t`. После создания не изменяется; декодеры только заимствуют её.
///
/// Значения `-inf` (и всё ниже [`LOG_ZERO`](crate::math::LOG_ZERO)) при
/// создании приводятся к `LOG_ZERO`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogProbTable {
    data: Vec<f32>,
    num_frames: usize,
    vocab_size: usize,
}

impl LogProbTable {
    /// Создать таблицу из строк лог-вероятностей.
    ///
    /// Пустой список строк — валидное пустое высказывание, но тогда размер
    /// словаря неизвестен и равен нулю.
    pub fn new(rows: Vec<Vec<f32>>) -> CtcResult<Self> {
        let num_frames = rows.len();
        let vocab_size = rows.first().map(Vec::len).unwrap_or(0);
        if num_frames > 0 && vocab_size == 0 {
            return Err(CtcError::Shape("пустой словарь в строке 0".into()));
        }

        let mut data = Vec::with_capacity(num_frames * vocab_size);
        for (t, row) in rows.into_iter().enumerate() {
            if row.len() != vocab_size {
                return Err(CtcError::Shape(format!(
                    "строка {t}: ожидалось {vocab_size} меток, получено {}",
                    row.len()
                )));
            }
            data.extend(row.into_iter().map(clamp_log));
        }

        Ok(Self {
            data,
            num_frames,
            vocab_size,
        })
    }

    /// Пустая таблица с известным размером словаря.
    pub fn empty(vocab_size: usize) -> Self {
        Self {
            data: Vec::new(),
            num_frames: 0,
            vocab_size,
        }
    }

    /// Создать таблицу из плоского row-major буфера.
    pub fn from_flat(data: Vec<f32>, num_frames: usize, vocab_size: usize) -> CtcResult<Self> {
        if vocab_size == 0 {
            return Err(CtcError::Shape("vocab_size=0".into()));
        }
        if data.len() != num_frames * vocab_size {
            return Err(CtcError::Shape(format!(
                "буфер из {} значений не соответствует форме [{num_frames}, {vocab_size}]",
                data.len()
            )));
        }
        Ok(Self {
            data: data.into_iter().map(clamp_log).collect(),
            num_frames,
            vocab_size,
        })
    }

    /// Создать таблицу из ненормированных логитов (log_softmax по строкам).
    pub fn from_logits(rows: Vec<Vec<f32>>) -> CtcResult<Self> {
        let rows = rows.iter().map(|r| log_softmax(r)).collect();
        Self::new(rows)
    }

    /// Создать таблицу из тензора `[seq_len, num_classes]` с лог-вероятностями
    /// (например, выхода CTC-головы после log_softmax).
    pub fn from_tensor(log_probs: &Tensor) -> CtcResult<Self> {
        let rows: Vec<Vec<f32>> = Self::tensor_rows(log_probs)?;
        Self::new(rows)
    }

    /// То же, что [`Self::from_tensor`], но вход — логиты до log_softmax.
    pub fn from_tensor_logits(logits: &Tensor) -> CtcResult<Self> {
        let rows: Vec<Vec<f32>> = Self::tensor_rows(logits)?;
        Self::from_logits(rows)
    }

    /// Разрезать дополненный батч `[batch, seq_len, num_classes]` на таблицы
    /// по длинам высказываний.
    pub fn from_padded_batch(log_probs: &Tensor, lengths: &[usize]) -> CtcResult<Vec<Self>> {
        let (batch, max_len, _) = log_probs.dims3().map_err(|_| {
            CtcError::Shape(format!(
                "ожидался тензор [batch, seq, classes], получено {:?}",
                log_probs.dims()
            ))
        })?;
        if lengths.len() != batch {
            return Err(CtcError::Shape(format!(
                "batch={batch}, но передано {} длин",
                lengths.len()
            )));
        }

        let all: Vec<Vec<Vec<f32>>> = log_probs.to_dtype(DType::F32)?.to_vec3()?;
        all.into_iter()
            .zip(lengths)
            .enumerate()
            .map(|(b, (mut rows, &len))| {
                if len > max_len {
                    return Err(CtcError::Shape(format!(
                        "элемент {b}: длина {len} больше seq_len={max_len}"
                    )));
                }
                rows.truncate(len);
                Self::new(rows)
            })
            .collect()
    }

    fn tensor_rows(tensor: &Tensor) -> CtcResult<Vec<Vec<f32>>> {
        if tensor.rank() != 2 {
            return Err(CtcError::Shape(format!(
                "ожидался тензор [seq, classes], получено {:?}",
                tensor.dims()
            )));
        }
        Ok(tensor.to_dtype(DType::F32)?.to_vec2()?)
    }

    /// Количество кадров (xlen).
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Размер словаря (включая blank).
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Нет ни одного кадра.
    pub fn is_empty(&self) -> bool {
        self.num_frames == 0
    }

    /// Распределение на кадре `t`.
    pub fn row(&self, t: usize) -> &[f32] {
        let start = t * self.vocab_size;
        &self.data[start..start + self.vocab_size]
    }

    /// Лог-вероятность метки `label` на кадре `t`.
    #[inline]
    pub fn get(&self, t: usize, label: usize) -> f32 {
        self.data[t * self.vocab_size + label]
    }

    /// Итератор по строкам.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        // chunks_exact(0) паникует, а пустая таблица может иметь vocab_size=0
        self.data.chunks_exact(self.vocab_size.max(1))
    }

    /// Проверить, что каждая строка — корректный log_softmax
    /// (сумма вероятностей равна 1 с точностью `tolerance`).
    pub fn is_normalized(&self, tolerance: f32) -> bool {
        self.rows()
            .all(|row| (log_sum_exp(row).exp() - 1.0).abs() <= tolerance)
    }
}

// ---------------------------------------------------------------------------
// Результат декодирования
// ---------------------------------------------------------------------------

/// Результат декодирования одного высказывания.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeOutput {
    /// Последовательность меток без blank и без маркеров SOS/EOS.
    pub labels: Vec<usize>,

    /// CTC лог-вероятность гипотезы.
    ///
    /// Для greedy — сумма лог-вероятностей лучшего пути, для beam search —
    /// сумма по всем выравниваниям, сохранившимся в луче.
    pub ctc_log_prob: f32,

    /// Итоговый ранжирующий скор (с вкладом внешней модели и length penalty).
    pub score: f32,

    /// Накопленная лог-вероятность внешней модели, если она участвовала.
    pub lm_log_prob: Option<f32>,
}

impl DecodeOutput {
    /// Результат без внешней модели: скор совпадает с CTC лог-вероятностью.
    pub fn new(labels: Vec<usize>, ctc_log_prob: f32) -> Self {
        Self {
            labels,
            ctc_log_prob,
            score: ctc_log_prob,
            lm_log_prob: None,
        }
    }

    /// Задать итоговый скор.
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Добавить вклад внешней модели.
    pub fn with_lm_log_prob(mut self, lm_log_prob: f32) -> Self {
        self.lm_log_prob = Some(lm_log_prob);
        self
    }

    /// Количество меток.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Пустая гипотеза.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::LOG_ZERO;
    use candle_core::Device;

    #[test]
    fn test_new_rejects_ragged_rows() {
        let err = LogProbTable::new(vec![vec![0.0, -1.0], vec![0.0]]).unwrap_err();
        assert!(matches!(err, CtcError::Shape(_)));
    }

    #[test]
    fn test_empty_table() {
        let table = LogProbTable::new(Vec::new()).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.rows().count(), 0);
        assert!(table.is_normalized(1e-4));
    }

    #[test]
    fn test_neg_infinity_clamped() {
        let table = LogProbTable::new(vec![vec![0.0, f32::NEG_INFINITY]]).unwrap();
        assert_eq!(table.get(0, 1), LOG_ZERO);
        assert!(table.is_normalized(1e-4));
    }

    #[test]
    fn test_from_logits_normalizes() {
        let table = LogProbTable::from_logits(vec![vec![1.0, 2.0, 0.5], vec![0.0, 0.0, 0.0]]).unwrap();
        assert!(table.is_normalized(1e-5));
        assert!((table.get(1, 2) - (1.0f32 / 3.0).ln()).abs() < 1e-5);
    }

    #[test]
    fn test_from_tensor_and_padded_batch() {
        let device = Device::Cpu;
        let lp = Tensor::new(&[[0.0f32, LOG_ZERO], [LOG_ZERO, 0.0]], &device).unwrap();
        let table = LogProbTable::from_tensor(&lp).unwrap();
        assert_eq!(table.num_frames(), 2);
        assert_eq!(table.vocab_size(), 2);
        assert_eq!(table.row(1), &[LOG_ZERO, 0.0]);

        let batch = Tensor::zeros((2, 3, 4), DType::F32, &device).unwrap();
        let tables = LogProbTable::from_padded_batch(&batch, &[3, 1]).unwrap();
        assert_eq!(tables[0].num_frames(), 3);
        assert_eq!(tables[1].num_frames(), 1);
        assert!(LogProbTable::from_padded_batch(&batch, &[4, 1]).is_err());
        assert!(LogProbTable::from_tensor(&batch).is_err());
    }
}
