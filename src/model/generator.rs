use burn::{
    module::{Ignored, Module},
    prelude::*,
    tensor::{
        activation::{relu, tanh},
        Distribution,
    },
};
use tracing::debug;

use crate::{
    error::{Error, Result},
    model::{
        layers::SlimmableGBlock,
        norm::SwitchableBatchNorm,
        slimmable::{SlimmableConv2d, SlimmableLinear},
    },
    width::{Width, WidthConfig, WidthMults},
};

/// ResNet generator for 32x32 class-conditional images, runnable at any of
/// its configured widths.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    l1: SlimmableLinear<B>,
    block2: SlimmableGBlock<B>,
    block3: SlimmableGBlock<B>,
    block4: SlimmableGBlock<B>,
    b5: SwitchableBatchNorm<B>,
    c5: SlimmableConv2d<B>,
    num_classes: usize,
    nz: usize,
    bottom_width: usize,
    widths: Ignored<WidthMults>,
}
impl<B: Backend> Generator<B> {
    /// Maps noise `[N, nz]` to images `[N, 3, 32, 32]` in `[-1, 1]`.
    ///
    /// Without labels, classes are drawn uniformly on the noise's device.
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
        labels: Option<Tensor<B, 1, Int>>,
        width: Width,
    ) -> Tensor<B, 4> {
        let [batch_size, _] = input.dims();
        let labels = labels.unwrap_or_else(|| self.random_labels(batch_size, &input.device()));

        let output = self.l1.forward(input, width);
        let channels = self.l1.out_features(width) / (self.bottom_width * self.bottom_width);
        let output = output.reshape([batch_size, channels, self.bottom_width, self.bottom_width]);

        let output = self.block2.forward(output, &labels, width);
        let output = self.block3.forward(output, &labels, width);
        let output = self.block4.forward(output, &labels, width);
        let output = self.b5.forward(output, width);
        let output = relu(output);
        let output = self.c5.forward(output, width);

        tanh(output)
    }

    fn random_labels(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 1, Int> {
        Tensor::random(
            [batch_size],
            Distribution::Uniform(0.0, self.num_classes as f64),
            device,
        )
    }

    /// Samples standard normal noise and generates `num_images` images.
    pub fn generate_images(
        &self,
        num_images: usize,
        labels: Option<Tensor<B, 1, Int>>,
        width: Width,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let noise = Tensor::random(
            [num_images, self.nz],
            Distribution::Normal(0.0, 1.0),
            device,
        );
        self.forward(noise, labels, width)
    }

    pub fn widths(&self) -> &WidthMults {
        &self.widths
    }

    pub fn select_width(&self, mult: f64) -> Result<Width> {
        self.widths.select(mult)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn nz(&self) -> usize {
        self.nz
    }

    /// Parameters touched by a forward pass at `width`.
    pub fn active_params(&self, width: Width) -> usize {
        self.l1.active_params(width)
            + self.block2.active_params(width)
            + self.block3.active_params(width)
            + self.block4.active_params(width)
            + self.b5.active_params(width)
            + self.c5.active_params(width)
    }
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub num_classes: usize,
    #[config(default = 128)]
    pub nz: usize,
    #[config(default = 256)]
    pub ngf: usize,
    #[config(default = 4)]
    pub bottom_width: usize,
    #[config(default = "WidthConfig::new()")]
    pub width: WidthConfig,
}
impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Generator<B>> {
        for (name, value) in [
            ("num_classes", self.num_classes),
            ("nz", self.nz),
            ("ngf", self.ngf),
            ("bottom_width", self.bottom_width),
        ] {
            if value == 0 {
                return Err(Error::NonPositive(name));
            }
        }
        let widths = self.width.init()?;

        let ngf_list = widths.channels("ngf", self.ngf)?;
        let l1_out = ngf_list
            .iter()
            .map(|ngf| self.bottom_width * self.bottom_width * ngf)
            .collect();
        let l1 = SlimmableLinear::new(widths.fixed(self.nz), l1_out, 1.0, device);

        let block = || {
            SlimmableGBlock::<B>::new(
                [self.ngf, self.ngf],
                None,
                true,
                self.num_classes,
                &widths,
                device,
            )
        };
        let block2 = block()?;
        let block3 = block()?;
        let block4 = block()?;

        let b5 = SwitchableBatchNorm::new(&ngf_list, device);
        let c5 = SlimmableConv2d::new([ngf_list.clone(), widths.fixed(3)], 3, 1, 1, 1.0, device);

        for (width, ngf) in widths.iter().zip(&ngf_list) {
            debug!(mult = width.mult(), channels = ngf, "generator width");
        }

        Ok(Generator {
            l1,
            block2,
            block3,
            block4,
            b5,
            c5,
            num_classes: self.num_classes,
            nz: self.nz,
            bottom_width: self.bottom_width,
            widths: Ignored(widths),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    fn small_config() -> GeneratorConfig {
        GeneratorConfig::new(10).with_nz(16).with_ngf(16)
    }

    #[test]
    fn generates_32x32_images_at_every_width() {
        let device = Default::default();
        let generator = small_config().init::<TestBackend>(&device).unwrap();
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 4, 9], &device);

        for width in generator.widths().iter() {
            let noise = Tensor::random([3, 16], Distribution::Normal(0.0, 1.0), &device);
            let images = generator.forward(noise, Some(labels.clone()), width);
            assert_eq!(images.dims(), [3, 3, 32, 32]);

            let values = images.into_data().to_vec::<f32>().unwrap();
            assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn samples_labels_when_absent() {
        let device = Default::default();
        let generator = small_config().init::<TestBackend>(&device).unwrap();
        let width = generator.select_width(0.5).unwrap();

        let images = generator.generate_images(5, None, width, &device);
        assert_eq!(images.dims(), [5, 3, 32, 32]);
    }

    #[test]
    fn trains_through_autodiff_at_narrow_width() {
        let device = Default::default();
        let generator = small_config()
            .init::<Autodiff<TestBackend>>(&device)
            .unwrap();
        let width = generator.widths().min();

        let images = generator.generate_images(2, None, width, &device);
        let grads = images.sum().backward();
        let l1_grad = generator.l1.weight.grad(&grads).unwrap();

        // Rows beyond the narrow slice never take part in the forward pass.
        let [rows, _] = l1_grad.dims();
        let narrow_rows = generator.l1.out_features(width);
        let unused = l1_grad
            .slice([narrow_rows..rows, 0..16])
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(unused.iter().all(|g| *g == 0.0));
    }

    #[test]
    fn active_params_grow_with_width() {
        let device = Default::default();
        let generator = small_config().init::<TestBackend>(&device).unwrap();
        let counts = generator
            .widths()
            .iter()
            .map(|width| generator.active_params(width))
            .collect::<Vec<_>>();
        assert!(counts.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(counts[3] < generator.num_params());
    }

    #[test]
    fn rejects_invalid_configs() {
        let device = Default::default();
        assert!(matches!(
            GeneratorConfig::new(0).init::<TestBackend>(&device),
            Err(Error::NonPositive("num_classes"))
        ));
        assert!(matches!(
            small_config()
                .with_ngf(2)
                .init::<TestBackend>(&device),
            Err(Error::ZeroChannels { .. })
        ));
        assert!(matches!(
            small_config()
                .with_width(WidthConfig::new().with_width_mult_list(vec![]))
                .init::<TestBackend>(&device),
            Err(Error::EmptyWidthList)
        ));
    }
}
