//! Конфигурация LSTM языковой модели.

use std::path::Path;

use serde::{Deserialize, Serialize};

use ctc_core::{CtcError, CtcResult};

/// Параметры LSTM-LM: Embedding → N×LSTM → Linear → log_softmax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmLmConfig {
    /// Размер словаря (совпадает со словарём CTC, включая blank и EOS).
    pub vocab_size: usize,

    /// Размерность эмбеддинга.
    pub embed_dim: usize,

    /// Размер скрытого состояния LSTM.
    pub hidden_size: usize,

    /// Количество слоёв LSTM.
    pub num_layers: usize,
}

impl LstmLmConfig {
    /// Загрузить конфигурацию из config.json.
    pub fn from_json_file(path: impl AsRef<Path>) -> CtcResult<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CtcResult<()> {
        if self.vocab_size == 0 || self.embed_dim == 0 || self.hidden_size == 0 {
            return Err(CtcError::Config(format!(
                "LSTM-LM: нулевые размеры (vocab={}, embed={}, hidden={})",
                self.vocab_size, self.embed_dim, self.hidden_size
            )));
        }
        if self.num_layers == 0 {
            return Err(CtcError::Config("LSTM-LM: num_layers=0".into()));
        }
        Ok(())
    }
}
