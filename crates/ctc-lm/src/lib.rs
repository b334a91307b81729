//! Внешние языковые модели для CTC beam search.
//!
//! Обе модели реализуют [`ctc_core::ExternalScorer`]:
//! - [`LstmLm`]: нейросетевая LSTM-LM на Candle
//! - [`BigramLm`]: таблица биграмм со сглаживанием add-k

pub mod bigram;
pub mod config;
pub mod lstm;

pub use bigram::BigramLm;
pub use config::LstmLmConfig;
pub use lstm::{LstmLm, LstmState};
