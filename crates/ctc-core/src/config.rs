//! Конфигурация CTC-декодирования.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CtcError, CtcResult};

/// Способ подключения внешней языковой модели.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Только CTC.
    #[default]
    None,
    /// Shallow fusion: вклад LM добавляется к скору на каждом расширении.
    ShallowFusion,
    /// Рескоринг: LM переранжирует финальный луч после поиска.
    Rescoring,
}

impl FusionMode {
    /// Строковый идентификатор (совпадает с serde-представлением).
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMode::None => "none",
            FusionMode::ShallowFusion => "shallow_fusion",
            FusionMode::Rescoring => "rescoring",
        }
    }

    /// Парсинг из строки.
    pub fn from_str_loose(s: &str) -> Option<FusionMode> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" | "off" | "" => Some(FusionMode::None),
            "shallow_fusion" | "shallow" | "fusion" => Some(FusionMode::ShallowFusion),
            "rescoring" | "rescore" => Some(FusionMode::Rescoring),
            _ => None,
        }
    }

    /// Требует ли режим внешний скорер.
    pub fn needs_scorer(&self) -> bool {
        !matches!(self, FusionMode::None)
    }
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Параметры декодирования одного высказывания.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Ширина луча (>= 1). 1 без внешней модели — greedy-путь.
    pub beam_width: usize,

    /// Максимальное число меток в гипотезе.
    /// `None` — ограничено только количеством кадров.
    pub max_decode_length: Option<usize>,

    /// Режим использования внешней модели.
    pub fusion_mode: FusionMode,

    /// Вес внешней модели.
    pub fusion_weight: f32,

    /// Аддитивный бонус (штраф при отрицательном значении) за каждую метку.
    pub length_penalty: f32,

    /// Индекс blank-метки.
    pub blank: usize,

    /// Индекс EOS (он же SOS для внешней модели).
    pub eos: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            beam_width: 1,
            max_decode_length: None,
            fusion_mode: FusionMode::None,
            fusion_weight: 0.0,
            length_penalty: 0.0,
            blank: 0,
            eos: 1,
        }
    }
}

impl DecodeConfig {
    /// Greedy-конфигурация с заданными blank и EOS.
    pub fn greedy(blank: usize, eos: usize) -> Self {
        Self {
            blank,
            eos,
            ..Self::default()
        }
    }

    /// Beam search заданной ширины.
    pub fn beam(beam_width: usize) -> Self {
        Self {
            beam_width,
            ..Self::default()
        }
    }

    /// Задать ширину луча.
    pub fn with_beam_width(mut self, beam_width: usize) -> Self {
        self.beam_width = beam_width;
        self
    }

    /// Задать лимит длины гипотезы.
    pub fn with_max_decode_length(mut self, max_len: usize) -> Self {
        self.max_decode_length = Some(max_len);
        self
    }

    /// Задать режим и вес внешней модели.
    pub fn with_fusion(mut self, mode: FusionMode, weight: f32) -> Self {
        self.fusion_mode = mode;
        self.fusion_weight = weight;
        self
    }

    /// Задать length penalty.
    pub fn with_length_penalty(mut self, penalty: f32) -> Self {
        self.length_penalty = penalty;
        self
    }

    /// Задать индексы blank и EOS.
    pub fn with_labels(mut self, blank: usize, eos: usize) -> Self {
        self.blank = blank;
        self.eos = eos;
        self
    }

    /// Разобрать конфигурацию из JSON-строки и проверить её.
    pub fn from_json_str(json: &str) -> CtcResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Загрузить конфигурацию из JSON-файла.
    pub fn from_json_file(path: impl AsRef<Path>) -> CtcResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&data)?;
        debug!("DecodeConfig загружен из {:?}: {:?}", path, config);
        Ok(config)
    }

    /// Проверка параметров, не зависящих от словаря.
    pub fn validate(&self) -> CtcResult<()> {
        if self.beam_width < 1 {
            return Err(CtcError::Config(format!(
                "beam_width должен быть >= 1, получено {}",
                self.beam_width
            )));
        }
        if self.max_decode_length == Some(0) {
            return Err(CtcError::Config("max_decode_length должен быть > 0".into()));
        }
        if self.blank == self.eos {
            return Err(CtcError::Config(format!(
                "blank и eos не могут совпадать (оба = {})",
                self.blank
            )));
        }
        if !self.fusion_weight.is_finite() {
            return Err(CtcError::Config(format!(
                "fusion_weight должен быть конечным, получено {}",
                self.fusion_weight
            )));
        }
        if !self.length_penalty.is_finite() {
            return Err(CtcError::Config(format!(
                "length_penalty должен быть конечным, получено {}",
                self.length_penalty
            )));
        }
        Ok(())
    }

    /// Проверка индексов меток относительно размера словаря.
    pub fn validate_vocab(&self, vocab_size: usize) -> CtcResult<()> {
        for (name, idx) in [("blank", self.blank), ("eos", self.eos)] {
            if idx >= vocab_size {
                return Err(CtcError::Config(format!(
                    "{name}={idx} вне словаря размера {vocab_size}"
                )));
            }
        }
        Ok(())
    }

    /// Проверка наличия внешнего скорера для выбранного режима.
    pub fn validate_scorer(&self, has_scorer: bool) -> CtcResult<()> {
        if self.fusion_mode.needs_scorer() && !has_scorer {
            return Err(CtcError::Config(format!(
                "fusion_mode={} требует внешний скорер",
                self.fusion_mode
            )));
        }
        Ok(())
    }

    /// Greedy-путь: ширина 1, без внешней модели и без ограничения длины.
    ///
    /// Greedy-декодер не знает о `max_decode_length`, поэтому при заданном
    /// ограничении используется beam search ширины 1.
    pub fn is_greedy(&self) -> bool {
        self.beam_width == 1
            && self.fusion_mode == FusionMode::None
            && self.max_decode_length.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DecodeConfig::default();
        assert_eq!(config.beam_width, 1);
        assert_eq!(config.fusion_mode, FusionMode::None);
        assert!(config.is_greedy());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_length_cap_disables_greedy_path() {
        let config = DecodeConfig::greedy(0, 1);
        assert!(config.is_greedy());
        assert!(!config.clone().with_max_decode_length(2).is_greedy());
        assert!(!config.with_fusion(FusionMode::Rescoring, 0.5).is_greedy());
    }

    #[test]
    fn test_rejects_zero_beam() {
        let err = DecodeConfig::beam(0).validate().unwrap_err();
        assert!(matches!(err, CtcError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_max_length_and_aliased_blank() {
        assert!(DecodeConfig::default().with_max_decode_length(0).validate().is_err());
        assert!(DecodeConfig::default().with_labels(3, 3).validate().is_err());
        assert!(DecodeConfig::default()
            .with_fusion(FusionMode::Rescoring, f32::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_scorer_required_for_fusion() {
        let config = DecodeConfig::beam(4).with_fusion(FusionMode::ShallowFusion, 0.5);
        assert!(config.validate_scorer(false).is_err());
        assert!(config.validate_scorer(true).is_ok());
        assert!(DecodeConfig::beam(4).validate_scorer(false).is_ok());
    }

    #[test]
    fn test_vocab_bounds() {
        let config = DecodeConfig::default().with_labels(0, 5);
        assert!(config.validate_vocab(5).is_err());
        assert!(config.validate_vocab(6).is_ok());
    }

    #[test]
    fn test_from_json() {
        let config = DecodeConfig::from_json_str(
            r#"{"beam_width": 8, "fusion_mode": "rescoring", "fusion_weight": 0.3, "eos": 2}"#,
        )
        .unwrap();
        assert_eq!(config.beam_width, 8);
        assert_eq!(config.fusion_mode, FusionMode::Rescoring);
        assert_eq!(config.blank, 0);
        assert_eq!(config.eos, 2);
        assert!(DecodeConfig::from_json_str(r#"{"beam_width": 0}"#).is_err());
    }

    #[test]
    fn test_fusion_mode_parse() {
        assert_eq!(FusionMode::from_str_loose("Shallow-Fusion"), Some(FusionMode::ShallowFusion));
        assert_eq!(FusionMode::from_str_loose("rescore"), Some(FusionMode::Rescoring));
        assert_eq!(FusionMode::from_str_loose("bogus"), None);
    }
}
