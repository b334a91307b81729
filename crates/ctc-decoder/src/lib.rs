//! CTC-декодеры: greedy, prefix scoring и beam search.
//!
//! - [`GreedyDecoder`] — argmax по кадрам, схлопывание повторов и blank
//! - [`PrefixScorer`] — прямая рекурсия CTC для префиксов
//! - [`BeamSearchDecoder`] — prefix beam search с shallow fusion / рескорингом

pub mod beam;
pub mod greedy;
pub mod prefix;

pub use beam::{BeamSearchDecoder, FusedBeamSearch, Hypothesis, NoScorer};
pub use greedy::GreedyDecoder;
pub use prefix::{PrefixScorer, PrefixState};
