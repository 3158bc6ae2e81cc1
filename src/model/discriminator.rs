use burn::{
    module::{Ignored, Module},
    prelude::*,
    tensor::{activation::relu, activation::sigmoid, cast::ToElement},
};
use tracing::debug;

use crate::{
    error::{Error, Result},
    model::{
        layers::{DBlock, DBlockOptimized},
        spectral::{SnEmbedding, SnLinear},
    },
    width::{Width, WidthConfig, WidthMults},
};

/// Projection discriminator holding one full-size copy of every layer per
/// width. `n_share` routes the first `n_share` blocks of every width through
/// the copy owned by the last width; `-1` shares only the output layer.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    block1s: Vec<DBlockOptimized<B>>,
    block2s: Vec<DBlock<B>>,
    block3s: Vec<DBlock<B>>,
    block4s: Vec<DBlock<B>>,
    l5s: Vec<SnLinear<B>>,
    l_ys: Vec<SnEmbedding<B>>,
    n_share: Ignored<i32>,
    num_classes: usize,
    widths: Ignored<WidthMults>,
}
impl<B: Backend> Discriminator<B> {
    /// Copy used by block `depth` (0-based) at width `index`.
    fn block_copy(&self, depth: i32, index: usize) -> usize {
        match *self.n_share > depth {
            true => self.widths.len() - 1,
            false => index,
        }
    }

    fn head_copy(&self, index: usize) -> usize {
        match *self.n_share == -1 {
            true => self.widths.len() - 1,
            false => index,
        }
    }

    /// Scores images `[N, 3, H, W]` with labels `[N]`, returning logits `[N, 1]`.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        labels: Tensor<B, 1, Int>,
        width: Width,
    ) -> Tensor<B, 2> {
        let idx = width.index();

        let output = self.block1s[self.block_copy(0, idx)].forward(input);
        let output = self.block2s[self.block_copy(1, idx)].forward(output);
        let output = self.block3s[self.block_copy(2, idx)].forward(output);
        let output = self.block4s[self.block_copy(3, idx)].forward(output);
        let output = relu(output);

        // Global sum pooling.
        let features = output.sum_dim(3).sum_dim(2).flatten::<2>(1, 3);

        let logits = self.l5s[self.head_copy(idx)].forward(features.clone());
        let projection = self.l_ys[idx].forward(labels);

        logits + (projection * features).sum_dim(1)
    }

    /// Mean sigmoid probabilities `(D(x), D(G(z)))` of real and fake logits.
    pub fn compute_probs(
        &self,
        output_real: Tensor<B, 2>,
        output_fake: Tensor<B, 2>,
    ) -> (f32, f32) {
        let d_x = sigmoid(output_real).mean().into_scalar().to_f32();
        let d_gz = sigmoid(output_fake).mean().into_scalar().to_f32();
        (d_x, d_gz)
    }

    pub fn widths(&self) -> &WidthMults {
        &self.widths
    }

    pub fn select_width(&self, mult: f64) -> Result<Width> {
        self.widths.select(mult)
    }

    pub fn n_share(&self) -> i32 {
        *self.n_share
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    pub num_classes: usize,
    #[config(default = 128)]
    pub ndf: usize,
    #[config(default = 0)]
    pub n_share: i32,
    #[config(default = "WidthConfig::new()")]
    pub width: WidthConfig,
}
impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Discriminator<B>> {
        if !(-1..=4).contains(&self.n_share) {
            return Err(Error::InvalidShare(self.n_share));
        }
        if self.num_classes == 0 {
            return Err(Error::NonPositive("num_classes"));
        }
        if self.ndf == 0 {
            return Err(Error::NonPositive("ndf"));
        }
        let widths = self.width.init()?;
        let ndf = self.ndf;

        let mut block1s = Vec::with_capacity(widths.len());
        let mut block2s = Vec::with_capacity(widths.len());
        let mut block3s = Vec::with_capacity(widths.len());
        let mut block4s = Vec::with_capacity(widths.len());
        let mut l5s = Vec::with_capacity(widths.len());
        let mut l_ys = Vec::with_capacity(widths.len());

        for width in widths.iter() {
            debug!(mult = width.mult(), ndf, "discriminator width");
            block1s.push(DBlockOptimized::new([3, ndf], device));
            block2s.push(DBlock::new([ndf, ndf], None, true, device));
            block3s.push(DBlock::new([ndf, ndf], None, false, device));
            block4s.push(DBlock::new([ndf, ndf], None, false, device));
            l5s.push(SnLinear::new(ndf, 1, 1.0, device));
            l_ys.push(SnEmbedding::new(self.num_classes, ndf, 1.0, device));
        }

        Ok(Discriminator {
            block1s,
            block2s,
            block3s,
            block4s,
            l5s,
            l_ys,
            n_share: Ignored(self.n_share),
            num_classes: self.num_classes,
            widths: Ignored(widths),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::Distribution,
    };

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    fn small_config() -> DiscriminatorConfig {
        DiscriminatorConfig::new(10).with_ndf(8)
    }

    fn images<B: Backend>(batch_size: usize, device: &B::Device) -> Tensor<B, 4> {
        Tensor::random([batch_size, 3, 32, 32], Distribution::Uniform(-1.0, 1.0), device)
    }

    fn to_vec(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn scores_every_width() {
        let device = Default::default();
        let discriminator = small_config().init::<TestBackend>(&device).unwrap();
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 3, 4], &device);

        for width in discriminator.widths().iter() {
            let input = images::<TestBackend>(4, &device);
            let logits = discriminator.forward(input, labels.clone(), width);
            assert_eq!(logits.dims(), [4, 1]);
        }
    }

    #[test]
    fn widths_use_independent_copies_without_sharing() {
        let device = Default::default();
        let discriminator = small_config().init::<TestBackend>(&device).unwrap();
        let input = images::<TestBackend>(2, &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device);

        let widths = discriminator.widths().clone();
        let narrow = to_vec(discriminator.forward(input.clone(), labels.clone(), widths.min()));
        let wide = to_vec(discriminator.forward(input, labels, widths.max()));
        assert_ne!(narrow, wide);
    }

    #[test]
    fn share_routing() {
        let device = Default::default();
        let full_share = small_config()
            .with_n_share(4)
            .init::<TestBackend>(&device)
            .unwrap();
        for index in 0..4 {
            for depth in 0..4 {
                assert_eq!(full_share.block_copy(depth, index), 3);
            }
            assert_eq!(full_share.head_copy(index), index);
        }

        let partial = small_config()
            .with_n_share(2)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(partial.block_copy(0, 1), 3);
        assert_eq!(partial.block_copy(1, 1), 3);
        assert_eq!(partial.block_copy(2, 1), 1);
        assert_eq!(partial.block_copy(3, 1), 1);

        let head_only = small_config()
            .with_n_share(-1)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(head_only.block_copy(0, 0), 0);
        assert_eq!(head_only.head_copy(0), 3);
    }

    #[test]
    fn rejects_out_of_range_share() {
        let device = Default::default();
        for n_share in [-2, 5] {
            assert!(matches!(
                small_config()
                    .with_n_share(n_share)
                    .init::<TestBackend>(&device),
                Err(Error::InvalidShare(_))
            ));
        }
    }

    #[test]
    fn probs_are_mean_sigmoids() {
        let device = Default::default();
        let discriminator = small_config().init::<TestBackend>(&device).unwrap();
        let real = Tensor::<TestBackend, 2>::from_floats([[0.0], [0.0]], &device);
        let fake = Tensor::<TestBackend, 2>::from_floats([[100.0], [-100.0]], &device);

        let (d_x, d_gz) = discriminator.compute_probs(real, fake);
        assert!((d_x - 0.5).abs() < 1e-5);
        assert!((d_gz - 0.5).abs() < 1e-5);
    }

    #[test]
    fn full_share_routes_every_block_through_last_copy() {
        let device = Default::default();
        let input = images::<TestBackend>(2, &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device);

        let mut shared = small_config()
            .with_n_share(4)
            .init::<TestBackend>(&device)
            .unwrap();
        let narrow = shared.widths().min();
        let before = to_vec(shared.forward(input.clone(), labels.clone(), narrow));

        // The narrow width's own block copies are never read.
        shared.block1s[0] = DBlockOptimized::new([3, 8], &device);
        shared.block2s[0] = DBlock::new([8, 8], None, true, &device);
        shared.block3s[0] = DBlock::new([8, 8], None, false, &device);
        shared.block4s[0] = DBlock::new([8, 8], None, false, &device);
        let after = to_vec(shared.forward(input.clone(), labels.clone(), narrow));
        assert_eq!(before, after);

        // Once the heads match as well, narrow and wide widths agree.
        shared.l5s[0] = shared.l5s[3].clone();
        shared.l_ys[0] = shared.l_ys[3].clone();
        let wide = shared.widths().max();
        let narrow_out = to_vec(shared.forward(input.clone(), labels.clone(), narrow));
        let wide_out = to_vec(shared.forward(input.clone(), labels.clone(), wide));
        assert_eq!(narrow_out, wide_out);

        let mut unshared = small_config().init::<TestBackend>(&device).unwrap();
        let before = to_vec(unshared.forward(input.clone(), labels.clone(), narrow));
        unshared.block1s[0] = DBlockOptimized::new([3, 8], &device);
        let after = to_vec(unshared.forward(input, labels, narrow));
        assert_ne!(before, after);
    }

    #[test]
    fn head_share_uses_last_output_layer() {
        let device = Default::default();
        let input = images::<TestBackend>(2, &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([3, 7], &device);

        let mut discriminator = small_config()
            .with_n_share(-1)
            .init::<TestBackend>(&device)
            .unwrap();
        let narrow = discriminator.widths().min();
        let before = to_vec(discriminator.forward(input.clone(), labels.clone(), narrow));

        discriminator.l5s[0] = SnLinear::new(8, 1, 1.0, &device);
        let after = to_vec(discriminator.forward(input.clone(), labels.clone(), narrow));
        assert_eq!(before, after);

        // Blocks stay per width.
        discriminator.block1s[0] = DBlockOptimized::new([3, 8], &device);
        let after = to_vec(discriminator.forward(input, labels, narrow));
        assert_ne!(before, after);
    }

    #[test]
    fn backward_reaches_only_the_active_copies() {
        let device = Default::default();
        let discriminator = small_config()
            .with_n_share(-1)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();
        let input = images::<TestAutodiffBackend>(2, &device);
        let labels = Tensor::<TestAutodiffBackend, 1, Int>::from_ints([0, 1], &device);
        let narrow = discriminator.widths().min();

        let logits = discriminator.forward(input, labels, narrow);
        let grads = logits.sum().backward();

        assert!(discriminator.l_ys[0].weight.grad(&grads).is_some());
        assert!(discriminator.l_ys[3].weight.grad(&grads).is_none());
        assert!(discriminator.l5s[3].weight.grad(&grads).is_some());
        assert!(discriminator.l5s[0].weight.grad(&grads).is_none());
    }
}
