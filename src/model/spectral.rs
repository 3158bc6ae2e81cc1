//! Spectrally normalised layers used by the discriminator.
//!
//! Each layer keeps an estimate `u` of the leading left singular vector of its
//! weight (viewed as a `[out, rest]` matrix). Every forward pass runs power
//! iteration from the stored `u`; only autodiff backends write the refined
//! estimate back.

use burn::{
    module::{Param, RunningState},
    nn::Initializer,
    prelude::*,
    tensor::{module::conv2d, ops::ConvOptions, Distribution},
};

const EPS: f64 = 1e-12;

#[derive(Module, Debug)]
pub struct SpectralNorm<B: Backend> {
    u: RunningState<Tensor<B, 1>>,
    n_power_iterations: usize,
}

impl<B: Backend> SpectralNorm<B> {
    pub fn new(num_rows: usize, n_power_iterations: usize, device: &B::Device) -> Self {
        let u = Tensor::<B, 2>::random([1, num_rows], Distribution::Normal(0.0, 1.0), device);
        let u = l2_normalize(u).reshape([num_rows]);

        Self {
            u: RunningState::new(u),
            n_power_iterations: n_power_iterations.max(1),
        }
    }

    /// Divides `weight` by its estimated largest singular value.
    pub fn normalize<const D: usize>(&self, weight: Tensor<B, D>) -> Tensor<B, D> {
        let dims = weight.dims();
        let rows = dims[0];
        let cols = dims.iter().skip(1).product::<usize>();
        let matrix = weight.clone().reshape([rows, cols]);
        let detached = matrix.clone().detach();

        let mut u = self.u.value_sync().reshape([1, rows]);
        let mut v = l2_normalize(u.clone().matmul(detached.clone()));
        u = l2_normalize(detached.clone().matmul(v.clone().transpose()).transpose());
        for _ in 1..self.n_power_iterations {
            v = l2_normalize(u.matmul(detached.clone()));
            u = l2_normalize(detached.clone().matmul(v.clone().transpose()).transpose());
        }
        if B::ad_enabled() {
            self.u.update(u.clone().reshape([rows]));
        }

        // Gradient flows through the weight only.
        let sigma = u.matmul(matrix.matmul(v.transpose()));

        weight / sigma.reshape([1usize; D])
    }

    pub fn u(&self) -> Tensor<B, 1> {
        self.u.value_sync()
    }
}

/// Normalises each row of `[1, n]` to unit length.
fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt();
    x / (norm + EPS)
}

#[derive(Module, Debug)]
pub struct SnLinear<B: Backend> {
    /// `[out, in]`.
    pub weight: Param<Tensor<B, 2>>,
    pub bias: Param<Tensor<B, 1>>,
    sn: SpectralNorm<B>,
}

impl<B: Backend> SnLinear<B> {
    pub fn new(d_input: usize, d_output: usize, gain: f64, device: &B::Device) -> Self {
        let weight = Initializer::XavierUniform { gain }.init_with(
            [d_output, d_input],
            Some(d_input),
            Some(d_output),
            device,
        );
        let bias = Initializer::Zeros.init([d_output], device);
        let sn = SpectralNorm::new(d_output, 1, device);

        Self { weight, bias, sn }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let weight = self.sn.normalize(self.weight.val());
        input.matmul(weight.transpose()) + self.bias.val().unsqueeze::<2>()
    }
}

#[derive(Module, Debug)]
pub struct SnConv2d<B: Backend> {
    /// `[out, in, k, k]`.
    pub weight: Param<Tensor<B, 4>>,
    pub bias: Param<Tensor<B, 1>>,
    sn: SpectralNorm<B>,
    padding: usize,
}

impl<B: Backend> SnConv2d<B> {
    pub fn new(
        channels: [usize; 2],
        kernel_size: usize,
        padding: usize,
        gain: f64,
        device: &B::Device,
    ) -> Self {
        let [in_channels, out_channels] = channels;
        let receptive = kernel_size * kernel_size;
        let weight = Initializer::XavierUniform { gain }.init_with(
            [out_channels, in_channels, kernel_size, kernel_size],
            Some(in_channels * receptive),
            Some(out_channels * receptive),
            device,
        );
        let bias = Initializer::Zeros.init([out_channels], device);
        let sn = SpectralNorm::new(out_channels, 1, device);

        Self {
            weight,
            bias,
            sn,
            padding,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let weight = self.sn.normalize(self.weight.val());
        conv2d(
            input,
            weight,
            Some(self.bias.val()),
            ConvOptions::new([1, 1], [self.padding, self.padding], [1, 1], 1),
        )
    }
}

/// Class embedding with a spectrally normalised `[num_classes, dim]` table.
#[derive(Module, Debug)]
pub struct SnEmbedding<B: Backend> {
    pub weight: Param<Tensor<B, 2>>,
    sn: SpectralNorm<B>,
}

impl<B: Backend> SnEmbedding<B> {
    pub fn new(num_embeddings: usize, embedding_dim: usize, gain: f64, device: &B::Device) -> Self {
        let weight = Initializer::XavierUniform { gain }.init_with(
            [num_embeddings, embedding_dim],
            Some(embedding_dim),
            Some(num_embeddings),
            device,
        );
        let sn = SpectralNorm::new(num_embeddings, 1, device);

        Self { weight, sn }
    }

    /// `[N]` labels to `[N, dim]` embeddings.
    pub fn forward(&self, labels: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.sn.normalize(self.weight.val()).select(0, labels)
    }
}
