pub mod discriminator;
pub mod generator;
pub mod layers;
pub mod norm;
pub mod slimmable;
pub mod spectral;

use burn::{module::Module, prelude::*};

use crate::{
    error::{Error, Result},
    model::{
        discriminator::{Discriminator, DiscriminatorConfig},
        generator::{Generator, GeneratorConfig},
    },
};

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    pub generator: Generator<B>,
    pub discriminator: Discriminator<B>,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub generator_config: GeneratorConfig,
    pub discriminator_config: DiscriminatorConfig,
}
impl ModelConfig {
    /// Generator and discriminator with the shared defaults for `num_classes`.
    pub fn with_classes(num_classes: usize) -> Self {
        Self::new(
            GeneratorConfig::new(num_classes),
            DiscriminatorConfig::new(num_classes),
        )
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Model<B>> {
        if self.generator_config.num_classes != self.discriminator_config.num_classes {
            return Err(Error::Mismatch("num_classes"));
        }
        if self.generator_config.width != self.discriminator_config.width {
            return Err(Error::Mismatch("width_mult_list"));
        }

        let generator = self.generator_config.init(device)?;
        let discriminator = self.discriminator_config.init(device)?;

        Ok(Model {
            generator,
            discriminator,
        })
    }
}
