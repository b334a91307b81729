//! # ctc-core
//!
//! Базовые типы, трейты и определения ошибок для CTC-декодирования.
//!
//! Этот крейт предоставляет фундаментальные абстракции для всех остальных
//! крейтов в workspace:
//!
//! - Матрица лог-вероятностей [`LogProbTable`] и результат [`DecodeOutput`]
//! - Конфигурация [`DecodeConfig`] и режимы внешней модели [`FusionMode`]
//! - Унифицированная обработка ошибок через [`CtcError`]
//! - Трейты [`ExternalScorer`] и [`CtcDecoder`]
//! - Численные примитивы лог-пространства ([`math`])

pub mod config;
pub mod debug;
pub mod error;
pub mod math;
pub mod traits;
pub mod types;

pub use config::{DecodeConfig, FusionMode};
pub use error::{CtcError, CtcResult};
pub use math::{LOG_ONE, LOG_ZERO};
pub use traits::{CtcDecoder, ExternalScorer};
pub use types::{DecodeOutput, LogProbTable};
