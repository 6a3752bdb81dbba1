use candle_core::{Module, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, Linear, VarBuilder};

use crate::config::ModelConfig;
use crate::model::feature_extractor::load_weight_norm_conv;
use crate::model::layers::{layer_norm, LayerNorm};

struct PosConvEmbed {
    conv: Conv1d,
}

impl PosConvEmbed {
    fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv_cfg = Conv1dConfig {
            padding: cfg.num_conv_pos_embeddings / 2,
            groups: cfg.num_conv_pos_embedding_groups,
            ..Default::default()
        };
        Ok(Self {
            conv: load_weight_norm_conv(
                cfg.hidden_size,
                cfg.hidden_size,
                cfg.num_conv_pos_embeddings,
                conv_cfg,
                vb.pp("conv"),
            )?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let seq_len = xs.dim(1)?;
        let h = self.conv.forward(&xs.transpose(1, 2)?.contiguous()?)?;
        h.narrow(2, 0, seq_len)?
            .gelu()?
            .transpose(1, 2)?
            .contiguous()
    }
}

struct SelfAttention {
    q: Linear,
    k: Linear,
    v: Linear,
    out: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl SelfAttention {
    fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let hd = cfg.hidden_size / cfg.num_attention_heads;
        Ok(Self {
            q: candle_nn::linear(cfg.hidden_size, cfg.hidden_size, vb.pp("q_proj"))?,
            k: candle_nn::linear(cfg.hidden_size, cfg.hidden_size, vb.pp("k_proj"))?,
            v: candle_nn::linear(cfg.hidden_size, cfg.hidden_size, vb.pp("v_proj"))?,
            out: candle_nn::linear(cfg.hidden_size, cfg.hidden_size, vb.pp("out_proj"))?,
            num_heads: cfg.num_attention_heads,
            head_dim: hd,
            scale: (hd as f64).powf(-0.5),
        })
    }

    /// `attn_bias` is an additive `(B, 1, 1, T)` term applied to the raw
    /// attention scores; padded key positions carry a large negative value.
    fn forward(&self, xs: &Tensor, attn_bias: Option<&Tensor>) -> candle_core::Result<Tensor> {
        let (b, t, _) = xs.dims3()?;
        let reshape = |x: Tensor| {
            x.reshape((b, t, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };

        let q = reshape((self.q.forward(xs)? * self.scale)?)?;
        let k = reshape(self.k.forward(xs)?)?;
        let v = reshape(self.v.forward(xs)?)?;

        let mut scores = q.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        if let Some(bias) = attn_bias {
            scores = scores.broadcast_add(bias)?;
        }
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let out = attn.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((
            b,
            t,
            self.num_heads * self.head_dim,
        ))?;
        self.out.forward(&out)
    }
}

struct FeedForward {
    up: Linear,
    down: Linear,
}

impl FeedForward {
    fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            up: candle_nn::linear(
                cfg.hidden_size,
                cfg.intermediate_size,
                vb.pp("intermediate_dense"),
            )?,
            down: candle_nn::linear(
                cfg.intermediate_size,
                cfg.hidden_size,
                vb.pp("output_dense"),
            )?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.down.forward(&self.up.forward(xs)?.gelu()?)
    }
}

struct EncoderLayer {
    attn: SelfAttention,
    ln1: LayerNorm,
    ff: FeedForward,
    ln2: LayerNorm,
    stable_pre_norm: bool,
}

impl EncoderLayer {
    fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            attn: SelfAttention::load(cfg, vb.pp("attention"))?,
            ln1: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            ff: FeedForward::load(cfg, vb.pp("feed_forward"))?,
            ln2: layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("final_layer_norm"),
            )?,
            stable_pre_norm: cfg.do_stable_layer_norm,
        })
    }

    fn forward(&self, xs: &Tensor, attn_bias: Option<&Tensor>) -> candle_core::Result<Tensor> {
        if self.stable_pre_norm {
            // Stable pre-norm variant:
            //   h = x + attn(ln1(x))
            //   y = h + ff(ln2(h))
            let h = (xs + self.attn.forward(&self.ln1.forward(xs)?, attn_bias)?)?;
            &h + self.ff.forward(&self.ln2.forward(&h)?)?
        } else {
            // Standard post-norm variant used by wav2vec2-base:
            //   h = ln1(x + attn(x))
            //   y = ln2(h + ff(h))
            let h = self.ln1.forward(&(xs + self.attn.forward(xs, attn_bias)?)?)?;
            self.ln2.forward(&(&h + self.ff.forward(&h)?)?)
        }
    }
}

pub(crate) struct Encoder {
    pos_conv: PosConvEmbed,
    layer_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
}

impl Encoder {
    pub(crate) fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let mut layers = Vec::with_capacity(cfg.num_hidden_layers);
        for i in 0..cfg.num_hidden_layers {
            layers.push(EncoderLayer::load(cfg, vb.pp(format!("layers.{i}")))?);
        }
        Ok(Self {
            pos_conv: PosConvEmbed::load(cfg, vb.pp("pos_conv_embed"))?,
            layer_norm: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            layers,
        })
    }

    pub(crate) fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Run the layer stack, invoking `observe` with each layer's output in
    /// execution order (layer 0 first). The observer is purely a side
    /// channel; it adds no numerical behavior to the forward pass.
    pub(crate) fn forward_observed<F>(
        &self,
        xs: &Tensor,
        attn_bias: Option<&Tensor>,
        mut observe: F,
    ) -> candle_core::Result<Tensor>
    where
        F: FnMut(usize, &Tensor),
    {
        let mut h = (xs + self.pos_conv.forward(xs)?)?;
        for (idx, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h, attn_bias)?;
            observe(idx, &h);
        }
        self.layer_norm.forward(&h)
    }
}
