//! LSTM языковая модель как внешний скорер CTC beam search.
//!
//! Архитектура:
//! - Embedding(vocab_size, embed_dim)
//! - N-layer LSTM(embed_dim, hidden_size)
//! - Linear(hidden_size, vocab_size) → log_softmax
//!
//! Весовые ключи:
//! - embed.weight: [vocab, embed]
//! - rnn.weight_ih_l{i}: [4*hidden, input]
//! - rnn.weight_hh_l{i}: [4*hidden, hidden]
//! - rnn.bias_ih_l{i}, rnn.bias_hh_l{i}: [4*hidden]
//! - output.weight: [vocab, hidden], output.bias: [vocab]

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::VarBuilder;
use tracing::debug;

use ctc_core::{CtcError, CtcResult, ExternalScorer};

use crate::config::LstmLmConfig;

/// Один слой LSTM.
///
/// Формулы:
/// gates = x @ W_ih^T + h @ W_hh^T + b_ih + b_hh
/// i, f, g, o = gates.chunk(4)
/// c = sigmoid(f) * c_prev + sigmoid(i) * tanh(g)
/// h = sigmoid(o) * tanh(c)
struct LstmLayer {
    weight_ih: Tensor, // [4*hidden, input_size]
    weight_hh: Tensor, // [4*hidden, hidden_size]
    bias_ih: Tensor,   // [4*hidden]
    bias_hh: Tensor,   // [4*hidden]
    hidden_size: usize,
}

impl LstmLayer {
    fn load(
        input_size: usize,
        hidden_size: usize,
        layer_idx: usize,
        vb: &VarBuilder,
    ) -> candle_core::Result<Self> {
        let gate_size = 4 * hidden_size;
        Ok(Self {
            weight_ih: vb.get((gate_size, input_size), &format!("weight_ih_l{layer_idx}"))?,
            weight_hh: vb.get((gate_size, hidden_size), &format!("weight_hh_l{layer_idx}"))?,
            bias_ih: vb.get(gate_size, &format!("bias_ih_l{layer_idx}"))?,
            bias_hh: vb.get(gate_size, &format!("bias_hh_l{layer_idx}"))?,
            hidden_size,
        })
    }

    /// Один шаг: (x [input], h [hidden], c [hidden]) → (h_new, c_new).
    fn step(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let gates = x
            .unsqueeze(0)?
            .matmul(&self.weight_ih.t()?)?
            .broadcast_add(&self.bias_ih)?
            .broadcast_add(&h.unsqueeze(0)?.matmul(&self.weight_hh.t()?)?)?
            .broadcast_add(&self.bias_hh)?
            .squeeze(0)?;

        let hs = self.hidden_size;
        let sigmoid = candle_nn::Activation::Sigmoid;
        let i_gate = sigmoid.forward(&gates.narrow(D::Minus1, 0, hs)?)?;
        let f_gate = sigmoid.forward(&gates.narrow(D::Minus1, hs, hs)?)?;
        let g_gate = gates.narrow(D::Minus1, 2 * hs, hs)?.tanh()?;
        let o_gate = sigmoid.forward(&gates.narrow(D::Minus1, 3 * hs, hs)?)?;

        let c_new = ((f_gate * c)? + (i_gate * g_gate)?)?;
        let h_new = (o_gate * c_new.tanh()?)?;
        Ok((h_new, c_new))
    }
}

/// Состояние LSTM (скрытое состояние и ячейка для каждого слоя).
///
/// Тензоры Candle неизменяемы, поэтому копия на ветвление луча дешёвая
/// и не разделяет изменяемых данных.
#[derive(Debug, Clone)]
pub struct LstmState {
    /// h[i]: [hidden_size] для каждого слоя.
    pub h: Vec<Tensor>,
    /// c[i]: [hidden_size] для каждого слоя.
    pub c: Vec<Tensor>,
}

impl LstmState {
    /// Нулевое начальное состояние.
    pub fn zeros(num_layers: usize, hidden_size: usize, device: &Device) -> CtcResult<Self> {
        let mut h = Vec::with_capacity(num_layers);
        let mut c = Vec::with_capacity(num_layers);
        for _ in 0..num_layers {
            h.push(Tensor::zeros(hidden_size, DType::F32, device)?);
            c.push(Tensor::zeros(hidden_size, DType::F32, device)?);
        }
        Ok(Self { h, c })
    }
}

/// LSTM-LM: Embedding + N-layer LSTM + выходная проекция.
pub struct LstmLm {
    embedding: Tensor, // [vocab_size, embed_dim]
    layers: Vec<LstmLayer>,
    output_weight: Tensor, // [vocab_size, hidden]
    output_bias: Tensor,   // [vocab_size]
    config: LstmLmConfig,
    device: Device,
}

impl LstmLm {
    /// Загрузка весов через VarBuilder (safetensors, готовые тензоры или нули).
    pub fn load(config: LstmLmConfig, vb: VarBuilder) -> CtcResult<Self> {
        config.validate()?;
        let device = vb.device().clone();

        let embedding = vb.get((config.vocab_size, config.embed_dim), "embed.weight")?;

        let rnn_vb = vb.pp("rnn");
        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let input_size = if i == 0 { config.embed_dim } else { config.hidden_size };
            layers.push(LstmLayer::load(input_size, config.hidden_size, i, &rnn_vb)?);
        }

        let out_vb = vb.pp("output");
        let output_weight = out_vb.get((config.vocab_size, config.hidden_size), "weight")?;
        let output_bias = out_vb.get(config.vocab_size, "bias")?;

        debug!(
            "LSTM-LM загружен: vocab={}, embed={}, LSTM {}×{}",
            config.vocab_size, config.embed_dim, config.num_layers, config.hidden_size
        );

        Ok(Self {
            embedding,
            layers,
            output_weight,
            output_bias,
            config,
            device,
        })
    }

    /// Конфигурация модели.
    pub fn config(&self) -> &LstmLmConfig {
        &self.config
    }
}

impl ExternalScorer for LstmLm {
    type Token = Tensor;
    type Output = Tensor;
    type State = LstmState;

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn initial_state(&self) -> CtcResult<LstmState> {
        LstmState::zeros(self.config.num_layers, self.config.hidden_size, &self.device)
    }

    /// Эмбеддинг метки: [embed_dim].
    fn encode(&self, label: usize) -> CtcResult<Tensor> {
        if label >= self.config.vocab_size {
            return Err(CtcError::Scorer(format!(
                "LSTM-LM: метка {label} вне словаря размера {}",
                self.config.vocab_size
            )));
        }
        let idx = Tensor::new(&[label as u32], &self.device)?;
        Ok(self.embedding.embedding(&idx)?.squeeze(0)?)
    }

    /// Прогнать эмбеддинг через LSTM-слои: выход последнего слоя [hidden].
    fn step(&self, token: &Tensor, state: &LstmState) -> CtcResult<(Tensor, LstmState)> {
        let mut x = token.clone();
        let mut new_h = Vec::with_capacity(self.layers.len());
        let mut new_c = Vec::with_capacity(self.layers.len());

        for (i, layer) in self.layers.iter().enumerate() {
            let (h, c) = layer.step(&x, &state.h[i], &state.c[i])?;
            x = h.clone();
            new_h.push(h);
            new_c.push(c);
        }

        Ok((x, LstmState { h: new_h, c: new_c }))
    }

    /// Проекция на словарь + log_softmax.
    fn score(&self, output: &Tensor) -> CtcResult<Vec<f32>> {
        let logits = output
            .unsqueeze(0)?
            .matmul(&self.output_weight.t()?)?
            .broadcast_add(&self.output_bias)?
            .squeeze(0)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        Ok(log_probs.to_dtype(DType::F32)?.to_vec1()?)
    }
}
