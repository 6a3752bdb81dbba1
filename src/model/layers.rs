use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Embedding, Init, Linear, VarBuilder};

pub(crate) struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub(crate) fn load(size: usize, eps: f64, vb: VarBuilder) -> candle_core::Result<Self> {
        let weight = vb.get(size, "weight")?;
        let bias = vb.get(size, "bias")?;
        Ok(Self { weight, bias, eps })
    }

    pub(crate) fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self.weight.dim(0)? as f64;
        let mean = (x.sum_keepdim(D::Minus1)? / hidden)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

pub(crate) fn layer_norm(size: usize, eps: f64, vb: VarBuilder) -> candle_core::Result<LayerNorm> {
    LayerNorm::load(size, eps, vb)
}

pub(crate) struct GroupNorm1d {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
    num_groups: usize,
    num_channels: usize,
}

impl GroupNorm1d {
    pub(crate) fn load(
        num_groups: usize,
        num_channels: usize,
        eps: f64,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let weight = vb.get(num_channels, "weight")?;
        let bias = vb.get(num_channels, "bias")?;
        Ok(Self {
            weight,
            bias,
            eps,
            num_groups,
            num_channels,
        })
    }

    pub(crate) fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let (b, c, t) = x.dims3()?;
        if c != self.num_channels || self.num_groups == 0 || c % self.num_groups != 0 {
            return Err(candle_core::Error::Msg(format!(
                "invalid GroupNorm1d shape/groups: channels={c}, configured_channels={}, groups={}",
                self.num_channels, self.num_groups
            )));
        }

        let channels_per_group = c / self.num_groups;
        let denom = (channels_per_group * t) as f64;

        // Mirror PyTorch GroupNorm over (channels_per_group, time) axes.
        let grouped = x.reshape((b, self.num_groups, channels_per_group, t))?;
        let mean = (grouped.sum_keepdim(D::Minus1)?.sum_keepdim(D::Minus2)? / denom)?;
        let centered = grouped.broadcast_sub(&mean)?;
        let var = (centered.sqr()?.sum_keepdim(D::Minus1)?.sum_keepdim(D::Minus2)? / denom)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        let normed = normed.reshape((b, c, t))?;

        let weight = self.weight.reshape((1, c, 1))?;
        let bias = self.bias.reshape((1, c, 1))?;
        normed.broadcast_mul(&weight)?.broadcast_add(&bias)
    }
}

pub(crate) fn group_norm_1d(
    num_groups: usize,
    num_channels: usize,
    eps: f64,
    vb: VarBuilder,
) -> candle_core::Result<GroupNorm1d> {
    GroupNorm1d::load(num_groups, num_channels, eps, vb)
}

/// Linear map applied independently to `splits` equal slices of the input
/// feature axis: `(B, T, splits * in_dim) -> (B, T, splits * out_dim)`.
///
/// Used as a distillation prediction head that maps one shared student
/// representation onto several teacher layers at once. Degenerates to a
/// single `Linear` for `splits == 1`.
pub struct SplitLinear {
    weight: Option<Tensor>,
    bias: Option<Tensor>,
    single: Option<Linear>,
    in_dim: usize,
    out_dim: usize,
    splits: usize,
}

impl SplitLinear {
    pub fn load(
        in_dim: usize,
        splits: usize,
        out_dim: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        if splits == 0 || in_dim == 0 || out_dim == 0 {
            return Err(candle_core::Error::Msg(format!(
                "SplitLinear dimensions must be positive: in_dim={in_dim}, splits={splits}, out_dim={out_dim}"
            )));
        }

        if splits == 1 {
            let single = candle_nn::linear(in_dim, out_dim, vb.pp("layer"))?;
            return Ok(Self {
                weight: None,
                bias: None,
                single: Some(single),
                in_dim,
                out_dim,
                splits,
            });
        }

        let bound = (in_dim as f64).powf(-0.5);
        let init = Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let weight = vb.get_with_hints((splits, in_dim, out_dim), "weight", init)?;
        let bias = vb.get_with_hints((1, 1, splits, out_dim), "bias", init)?;
        Ok(Self {
            weight: Some(weight),
            bias: Some(bias),
            single: None,
            in_dim,
            out_dim,
            splits,
        })
    }

    pub fn splits(&self) -> usize {
        self.splits
    }

    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        if let Some(single) = &self.single {
            return single.forward(xs);
        }
        let (weight, bias) = match (&self.weight, &self.bias) {
            (Some(w), Some(b)) => (w, b),
            _ => {
                return Err(candle_core::Error::Msg(
                    "SplitLinear is missing split parameters".to_string(),
                ))
            }
        };

        let (b, t, _) = xs.dims3()?;
        // (B, T, N*Din) -> (B, T, N, 1, Din) x (N, Din, Dout) -> (B, T, N, Dout)
        let xs = xs.reshape((b, t, self.splits, 1, self.in_dim))?;
        let out = xs.broadcast_matmul(weight)?.squeeze(3)?;
        let out = out.broadcast_add(bias)?;
        out.reshape((b, t, self.splits * self.out_dim))
    }
}

/// Fresh embedding table: normal init with std `dim^-0.5` and a zeroed
/// padding row, for student modules built from scratch.
pub fn init_embedding(
    num_embeddings: usize,
    embedding_dim: usize,
    padding_idx: usize,
    device: &Device,
) -> candle_core::Result<Embedding> {
    if padding_idx >= num_embeddings {
        return Err(candle_core::Error::Msg(format!(
            "padding_idx {padding_idx} out of range for {num_embeddings} embeddings"
        )));
    }
    let std = (embedding_dim as f64).powf(-0.5);
    let weight = Tensor::randn(0f32, std as f32, (num_embeddings, embedding_dim), device)?;

    let mut keep = vec![1f32; num_embeddings];
    keep[padding_idx] = 0.0;
    let keep = Tensor::from_vec(keep, (num_embeddings, 1), device)?;
    let weight = weight.broadcast_mul(&keep)?;
    Ok(Embedding::new(weight, embedding_dim))
}

/// Fresh linear layer: Xavier-uniform weight, zero bias.
pub fn init_linear(
    in_features: usize,
    out_features: usize,
    bias: bool,
    device: &Device,
) -> candle_core::Result<Linear> {
    let bound = (6.0 / (in_features + out_features) as f64).sqrt();
    let weight = Tensor::rand(
        -bound as f32,
        bound as f32,
        (out_features, in_features),
        device,
    )?;
    let bias = if bias {
        Some(Tensor::zeros(out_features, DType::F32, device)?)
    } else {
        None
    };
    Ok(Linear::new(weight, bias))
}
