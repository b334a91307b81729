//! Численные примитивы в лог-пространстве.
//!
//! Все вероятности хранятся как натуральные логарифмы. Нулевая вероятность
//! представлена конечной константой [`LOG_ZERO`], а не `-inf`: она поглощается
//! в [`log_add_exp`] и не требует отдельных веток в рекурсиях.

use std::cmp::Ordering;

/// Логарифм нулевой вероятности.
pub const LOG_ZERO: f32 = -1.0e10;

/// Логарифм единичной вероятности.
pub const LOG_ONE: f32 = 0.0;

/// Устойчивый `log(exp(a) + exp(b))` (вычитание максимума).
#[inline]
pub fn log_add_exp(a: f32, b: f32) -> f32 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if hi <= LOG_ZERO {
        return LOG_ZERO;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Устойчивый `log(sum(exp(x)))` по срезу. Пустой срез → [`LOG_ZERO`].
pub fn log_sum_exp(values: &[f32]) -> f32 {
    let max = values.iter().copied().fold(LOG_ZERO, f32::max);
    if max <= LOG_ZERO {
        return LOG_ZERO;
    }
    let sum: f32 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Приводит `-inf` и всё, что ниже [`LOG_ZERO`], к [`LOG_ZERO`].
#[inline]
pub fn clamp_log(x: f32) -> f32 {
    if x.is_nan() {
        x
    } else {
        x.max(LOG_ZERO)
    }
}

/// log_softmax строки логитов.
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let norm = log_sum_exp(logits);
    logits.iter().map(|&x| clamp_log(x - norm)).collect()
}

/// Индекс максимума; при равенстве побеждает меньший индекс.
pub fn argmax(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in row.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Порядок «по убыванию значения, затем по возрастанию индекса».
#[inline]
fn rank_desc(row: &[f32], a: usize, b: usize) -> Ordering {
    row[b].total_cmp(&row[a]).then(a.cmp(&b))
}

/// Top-k индексов строки по убыванию значения (равенство → меньший индекс).
pub fn top_k(row: &[f32], k: usize) -> Vec<usize> {
    let k = k.min(row.len());
    if k == 0 {
        return Vec::new();
    }
    let mut indices: Vec<usize> = (0..row.len()).collect();
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, |&a, &b| rank_desc(row, a, b));
        indices.truncate(k);
    }
    indices.sort_unstable_by(|&a, &b| rank_desc(row, a, b));
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_add_exp_matches_direct_sum() {
        let a = 0.3f32.ln();
        let b = 0.2f32.ln();
        assert!((log_add_exp(a, b) - 0.5f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_log_add_exp_not_less_than_inputs() {
        for &(a, b) in &[(-1.0f32, -2.0f32), (-50.0, -0.1), (-3.0, -3.0), (0.0, -80.0)] {
            let s = log_add_exp(a, b);
            assert!(s >= a && s >= b, "{s} < max({a}, {b})");
        }
    }

    #[test]
    fn test_log_zero_is_absorbing() {
        assert_eq!(log_add_exp(LOG_ZERO, LOG_ZERO), LOG_ZERO);
        assert_eq!(log_add_exp(f32::NEG_INFINITY, LOG_ZERO), LOG_ZERO);
        assert!((log_add_exp(LOG_ZERO, -2.0) + 2.0).abs() < 1e-6);
        assert_eq!(log_sum_exp(&[]), LOG_ZERO);
    }

    #[test]
    fn test_log_sum_exp_large_values() {
        let s = log_sum_exp(&[1000.0, 1000.0]);
        assert!((s - (1000.0 + 2f32.ln())).abs() < 1e-3);
    }

    #[test]
    fn test_log_softmax_normalized() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = lp.iter().map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_argmax_ties_pick_lowest() {
        assert_eq!(argmax(&[0.1, 0.5, 0.5, 0.2]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_top_k_order_and_ties() {
        let row = [0.1, 0.4, 0.4, 0.05, 0.9];
        assert_eq!(top_k(&row, 3), vec![4, 1, 2]);
        assert_eq!(top_k(&row, 10), vec![4, 1, 2, 0, 3]);
        assert!(top_k(&row, 0).is_empty());
    }
}
