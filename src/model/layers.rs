use burn::{
    nn::pool::{AvgPool2d, AvgPool2dConfig},
    prelude::*,
    tensor::activation::relu,
};
use std::f64::consts::SQRT_2;

use crate::{
    error::Result,
    model::{
        norm::{SwitchableBatchNorm, SwitchableConditionalBatchNorm},
        slimmable::SlimmableConv2d,
        spectral::SnConv2d,
    },
    width::{Width, WidthMults},
};

/// Switchable batch norm, class-conditional when the block has classes.
#[derive(Module, Debug)]
pub struct BlockNorm<B: Backend> {
    plain: Option<SwitchableBatchNorm<B>>,
    conditional: Option<SwitchableConditionalBatchNorm<B>>,
}
impl<B: Backend> BlockNorm<B> {
    pub fn new(num_features_list: &[usize], num_classes: usize, device: &B::Device) -> Self {
        match num_classes {
            0 => Self {
                plain: Some(SwitchableBatchNorm::new(num_features_list, device)),
                conditional: None,
            },
            _ => Self {
                plain: None,
                conditional: Some(SwitchableConditionalBatchNorm::new(
                    num_features_list,
                    num_classes,
                    device,
                )),
            },
        }
    }

    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        labels: &Tensor<B, 1, Int>,
        width: Width,
    ) -> Tensor<B, 4> {
        match (&self.conditional, &self.plain) {
            (Some(bn), _) => bn.forward(input, labels.clone(), width),
            (None, Some(bn)) => bn.forward(input, width),
            (None, None) => input,
        }
    }

    pub fn active_params(&self, width: Width) -> usize {
        match (&self.conditional, &self.plain) {
            (Some(bn), _) => bn.active_params(width),
            (None, Some(bn)) => bn.active_params(width),
            (None, None) => 0,
        }
    }
}

/// Generator residual block with every channel count scaled by the width.
#[derive(Module, Debug)]
pub struct SlimmableGBlock<B: Backend> {
    b1: BlockNorm<B>,
    c1: SlimmableConv2d<B>,
    b2: BlockNorm<B>,
    c2: SlimmableConv2d<B>,
    c_sc: Option<SlimmableConv2d<B>>,
    upsample: bool,
}
impl<B: Backend> SlimmableGBlock<B> {
    /// `hidden_channels` defaults to `out_channels`; `num_classes == 0` gives
    /// unconditional batch norm.
    pub fn new(
        channels: [usize; 2],
        hidden_channels: Option<usize>,
        upsample: bool,
        num_classes: usize,
        widths: &WidthMults,
        device: &B::Device,
    ) -> Result<Self> {
        let [in_channels, out_channels] = channels;
        let hidden_channels = hidden_channels.unwrap_or(out_channels);
        let learnable_sc = in_channels != out_channels || upsample;

        let in_list = widths.channels("gblock in", in_channels)?;
        let hidden_list = widths.channels("gblock hidden", hidden_channels)?;
        let out_list = widths.channels("gblock out", out_channels)?;

        let b1 = BlockNorm::new(&in_list, num_classes, device);
        let c1 = SlimmableConv2d::new(
            [in_list.clone(), hidden_list.clone()],
            3,
            1,
            1,
            SQRT_2,
            device,
        );
        let b2 = BlockNorm::new(&hidden_list, num_classes, device);
        let c2 = SlimmableConv2d::new([hidden_list, out_list.clone()], 3, 1, 1, SQRT_2, device);
        let c_sc = learnable_sc
            .then(|| SlimmableConv2d::new([in_list, out_list], 1, 1, 0, 1.0, device));

        Ok(Self {
            b1,
            c1,
            b2,
            c2,
            c_sc,
            upsample,
        })
    }

    fn upsample_conv(
        &self,
        input: Tensor<B, 4>,
        conv: &SlimmableConv2d<B>,
        width: Width,
    ) -> Tensor<B, 4> {
        match self.upsample {
            true => conv.forward(upsample_2x(input), width),
            false => conv.forward(input, width),
        }
    }

    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        labels: &Tensor<B, 1, Int>,
        width: Width,
    ) -> Tensor<B, 4> {
        let output = self.b1.forward(input.clone(), labels, width);
        let output = relu(output);
        let output = self.upsample_conv(output, &self.c1, width);
        let output = self.b2.forward(output, labels, width);
        let output = relu(output);
        let output = self.c2.forward(output, width);

        let shortcut = match &self.c_sc {
            Some(c_sc) => self.upsample_conv(input, c_sc, width),
            None => input,
        };

        output.add(shortcut)
    }

    pub fn active_params(&self, width: Width) -> usize {
        self.b1.active_params(width)
            + self.c1.active_params(width)
            + self.b2.active_params(width)
            + self.c2.active_params(width)
            + self
                .c_sc
                .as_ref()
                .map_or(0, |c_sc| c_sc.active_params(width))
    }
}

/// Spectrally normalised discriminator residual block.
#[derive(Module, Debug)]
pub struct DBlock<B: Backend> {
    c1: SnConv2d<B>,
    c2: SnConv2d<B>,
    c_sc: Option<SnConv2d<B>>,
    pool: Option<AvgPool2d>,
}
impl<B: Backend> DBlock<B> {
    /// `hidden_channels` defaults to `in_channels`.
    pub fn new(
        channels: [usize; 2],
        hidden_channels: Option<usize>,
        downsample: bool,
        device: &B::Device,
    ) -> Self {
        let [in_channels, out_channels] = channels;
        let hidden_channels = hidden_channels.unwrap_or(in_channels);
        let learnable_sc = in_channels != out_channels || downsample;

        let c1 = SnConv2d::new([in_channels, hidden_channels], 3, 1, SQRT_2, device);
        let c2 = SnConv2d::new([hidden_channels, out_channels], 3, 1, SQRT_2, device);
        let c_sc =
            learnable_sc.then(|| SnConv2d::new([in_channels, out_channels], 1, 0, 1.0, device));
        let pool = downsample.then(avg_pool_2x);

        Self { c1, c2, c_sc, pool }
    }

    fn downsample(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match &self.pool {
            Some(pool) => pool.forward(input),
            None => input,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = relu(input.clone());
        let output = self.c1.forward(output);
        let output = relu(output);
        let output = self.c2.forward(output);
        let output = self.downsample(output);

        let shortcut = match &self.c_sc {
            Some(c_sc) => self.downsample(c_sc.forward(input)),
            None => input,
        };

        output.add(shortcut)
    }
}

/// First discriminator block: no leading activation, always downsamples.
#[derive(Module, Debug)]
pub struct DBlockOptimized<B: Backend> {
    c1: SnConv2d<B>,
    c2: SnConv2d<B>,
    c_sc: SnConv2d<B>,
    pool: AvgPool2d,
}
impl<B: Backend> DBlockOptimized<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        let [in_channels, out_channels] = channels;

        let c1 = SnConv2d::new([in_channels, out_channels], 3, 1, SQRT_2, device);
        let c2 = SnConv2d::new([out_channels, out_channels], 3, 1, SQRT_2, device);
        let c_sc = SnConv2d::new([in_channels, out_channels], 1, 0, 1.0, device);

        Self {
            c1,
            c2,
            c_sc,
            pool: avg_pool_2x(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.c1.forward(input.clone());
        let output = relu(output);
        let output = self.c2.forward(output);
        let output = self.pool.forward(output);

        let shortcut = self.c_sc.forward(self.pool.forward(input));

        output.add(shortcut)
    }
}

fn avg_pool_2x() -> AvgPool2d {
    AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init()
}

/// Bilinear 2x upsampling with half-pixel centres and edge clamping.
fn upsample_2x<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    let output = upsample_last_dim(input).swap_dims(2, 3);
    upsample_last_dim(output).swap_dims(2, 3)
}

/// Every source column `i` yields `0.75 x[i] + 0.25 x[i - 1]` and
/// `0.75 x[i] + 0.25 x[i + 1]`, neighbours clamped at the border.
fn upsample_last_dim<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch_size, channels, height, width] = input.dims();
    let columns = |range: std::ops::Range<usize>| {
        input
            .clone()
            .slice([0..batch_size, 0..channels, 0..height, range])
    };

    let (previous, next) = match width {
        1 => (input.clone(), input.clone()),
        _ => (
            Tensor::cat(vec![columns(0..1), columns(0..width - 1)], 3),
            Tensor::cat(vec![columns(1..width), columns(width - 1..width)], 3),
        ),
    };
    let even = input.clone() * 0.75 + previous * 0.25;
    let odd = input * 0.75 + next * 0.25;

    Tensor::stack::<5>(vec![even, odd], 4).reshape([batch_size, channels, height, 2 * width])
}
