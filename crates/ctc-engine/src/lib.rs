//! # ctc-engine
//!
//! Единый фасад CTC-декодирования.
//!
//! `CtcEngine` выбирает greedy или beam search по [`ctc_core::DecodeConfig`],
//! при необходимости подключает внешнюю языковую модель и декодирует батчи
//! параллельно.
//!
//! # Пример
//!
//! ```ignore
//! use ctc_core::{DecodeConfig, FusionMode, LogProbTable};
//! use ctc_engine::CtcEngine;
//!
//! let config = DecodeConfig::beam(8)
//!     .with_labels(0, 1)
//!     .with_fusion(FusionMode::ShallowFusion, 0.3);
//! let engine = CtcEngine::with_scorer(config, lm)?;
//!
//! let result = engine.decode(&LogProbTable::from_tensor(&log_probs)?)?;
//! println!("{:?}", result.labels);
//! ```

mod engine;

pub use engine::CtcEngine;
