use burn::{
    module::{Ignored, Param, RunningState},
    nn::{BatchNorm, BatchNormConfig},
    prelude::*,
    tensor::Distribution,
};

use crate::width::Width;

const MOMENTUM: f64 = 0.1;
const EPSILON: f64 = 1e-5;

/// Batch norm holding one independent `BatchNorm` per width, so each width
/// keeps its own affine parameters and running statistics.
#[derive(Module, Debug)]
pub struct SwitchableBatchNorm<B: Backend> {
    bns: Vec<BatchNorm<B, 2>>,
}

impl<B: Backend> SwitchableBatchNorm<B> {
    pub fn new(num_features_list: &[usize], device: &B::Device) -> Self {
        let bns = num_features_list
            .iter()
            .map(|&num_features| {
                BatchNormConfig::new(num_features)
                    .with_momentum(MOMENTUM)
                    .with_epsilon(EPSILON)
                    .init(device)
            })
            .collect();

        Self { bns }
    }

    pub fn num_features(&self, width: Width) -> usize {
        self.bns[width.index()].gamma.dims()[0]
    }

    pub fn forward(&self, input: Tensor<B, 4>, width: Width) -> Tensor<B, 4> {
        self.bns[width.index()].forward(input)
    }

    pub fn active_params(&self, width: Width) -> usize {
        2 * self.num_features(width)
    }
}

/// Non-affine batch norm followed by a per-class scale and shift looked up
/// from an embedding of size `2 * num_features` (scale half first).
#[derive(Module, Debug)]
pub struct ConditionalBatchNorm<B: Backend> {
    pub embed: Param<Tensor<B, 2>>,
    running_mean: RunningState<Tensor<B, 1>>,
    running_var: RunningState<Tensor<B, 1>>,
    num_features: usize,
    momentum: f64,
    epsilon: f64,
}

impl<B: Backend> ConditionalBatchNorm<B> {
    pub fn new(num_features: usize, num_classes: usize, device: &B::Device) -> Self {
        // Built from plain tensors: a tracked tensor cannot become a `Param`.
        let gamma = Tensor::<B, 2>::random(
            [num_classes, num_features],
            Distribution::Normal(1.0, 0.02),
            device,
        );
        let beta = Tensor::<B, 2>::zeros([num_classes, num_features], device);
        let embed = Param::from_tensor(Tensor::cat(vec![gamma, beta], 1));

        Self {
            embed,
            running_mean: RunningState::new(Tensor::zeros([num_features], device)),
            running_var: RunningState::new(Tensor::ones([num_features], device)),
            num_features,
            momentum: MOMENTUM,
            epsilon: EPSILON,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>, labels: Tensor<B, 1, Int>) -> Tensor<B, 4> {
        let normalized = match B::ad_enabled() {
            true => self.normalize_train(input),
            false => self.normalize_inference(input),
        };

        let [batch_size, channels, _, _] = normalized.dims();
        let embed = self.embed.val().select(0, labels);
        let gamma = embed
            .clone()
            .slice([0..batch_size, 0..channels])
            .reshape([batch_size, channels, 1, 1]);
        let beta = embed
            .slice([0..batch_size, channels..2 * channels])
            .reshape([batch_size, channels, 1, 1]);

        normalized * gamma + beta
    }

    fn normalize_inference(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let channels = self.num_features;
        let mean = self.running_mean.value().reshape([1, channels, 1, 1]);
        let var = self.running_var.value().reshape([1, channels, 1, 1]);

        (input - mean) / (var + self.epsilon).sqrt()
    }

    fn normalize_train(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let (mean, var) = batch_stats(input.clone());
        let channels = self.num_features;

        let running_mean = self.running_mean.value_sync();
        let running_var = self.running_var.value_sync();
        let running_mean = running_mean.mul_scalar(1.0 - self.momentum).add(
            mean.clone()
                .detach()
                .reshape([channels])
                .mul_scalar(self.momentum),
        );
        let running_var = running_var.mul_scalar(1.0 - self.momentum).add(
            var.clone()
                .detach()
                .reshape([channels])
                .mul_scalar(self.momentum),
        );
        self.running_mean.update(running_mean.detach());
        self.running_var.update(running_var.detach());

        (input - mean) / (var + self.epsilon).sqrt()
    }

    pub fn running_mean(&self) -> Tensor<B, 1> {
        self.running_mean.value_sync()
    }

    pub fn running_var(&self) -> Tensor<B, 1> {
        self.running_var.value_sync()
    }
}

/// One conditional batch norm per width.
#[derive(Module, Debug)]
pub struct SwitchableConditionalBatchNorm<B: Backend> {
    bns: Vec<ConditionalBatchNorm<B>>,
    num_classes: usize,
    num_features_list: Ignored<Vec<usize>>,
}

impl<B: Backend> SwitchableConditionalBatchNorm<B> {
    pub fn new(num_features_list: &[usize], num_classes: usize, device: &B::Device) -> Self {
        let bns = num_features_list
            .iter()
            .map(|&num_features| ConditionalBatchNorm::new(num_features, num_classes, device))
            .collect();

        Self {
            bns,
            num_classes,
            num_features_list: Ignored(num_features_list.to_vec()),
        }
    }

    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        labels: Tensor<B, 1, Int>,
        width: Width,
    ) -> Tensor<B, 4> {
        self.bns[width.index()].forward(input, labels)
    }

    pub fn active_params(&self, width: Width) -> usize {
        2 * self.num_features_list[width.index()] * self.num_classes
    }
}

/// Per-channel mean and biased variance, both shaped `[1, C, 1, 1]`.
fn batch_stats<B: Backend>(input: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let [batch_size, channels, height, width] = input.dims();
    let flat = batch_size * height * width;

    let mean = input
        .clone()
        .swap_dims(0, 1)
        .reshape([channels, flat])
        .mean_dim(1)
        .reshape([1, channels, 1, 1]);
    let var = input
        .sub(mean.clone())
        .powf_scalar(2.0)
        .swap_dims(0, 1)
        .reshape([channels, flat])
        .mean_dim(1)
        .reshape([1, channels, 1, 1]);

    (mean, var)
}
