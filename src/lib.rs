//! Slimmable conditional GAN with a projection discriminator (cGAN-pd) for
//! 32x32 images, built on burn.
//!
//! A single set of weights serves several channel-width multipliers. Pick one
//! with [`WidthMults::select`] (or `Generator::select_width`) and pass the
//! resulting [`Width`] to every forward call.

pub mod error;
pub mod model;
pub mod utils;
pub mod width;

pub use error::{Error, Result};
pub use model::{
    discriminator::{Discriminator, DiscriminatorConfig},
    generator::{Generator, GeneratorConfig},
    Model as SlimmableCganPd, ModelConfig,
};
pub use width::{Width, WidthConfig, WidthMults};

use burn::{
    backend::NdArray,
    tensor::{Device, Int, Tensor, TensorData},
};
use wasm_bindgen::prelude::*;

type MyBackend = NdArray<f32>;

/// Browser entry point: a generator on the CPU backend.
#[wasm_bindgen]
pub struct Model {
    generator: Generator<MyBackend>,
    device: Device<MyBackend>,
}

#[wasm_bindgen]
impl Model {
    #[wasm_bindgen(constructor)]
    pub fn new(num_classes: usize) -> Result<Model, JsValue> {
        let device = Default::default();
        let generator = GeneratorConfig::new(num_classes)
            .init(&device)
            .map_err(to_js)?;

        Ok(Self { generator, device })
    }

    /// Widths this model can run at.
    #[wasm_bindgen]
    pub fn widths(&self) -> Vec<f64> {
        self.generator.widths().as_slice().to_vec()
    }

    /// Generates one image per label at `width_mult`, returned as
    /// `[N, 3, 32, 32]` RGB values in `0..=255`.
    #[wasm_bindgen]
    pub fn generate(&self, labels: Vec<u32>, width_mult: f64) -> Result<Vec<f32>, JsValue> {
        let width = self.generator.select_width(width_mult).map_err(to_js)?;
        let num_classes = self.generator.num_classes() as u32;
        if let Some(label) = labels.iter().find(|&&label| label >= num_classes) {
            return Err(JsValue::from_str(&format!(
                "label {label} out of range for {num_classes} classes"
            )));
        }

        let num_images = labels.len();
        let labels = labels.into_iter().map(|l| l as i64).collect::<Vec<_>>();
        let labels = Tensor::<MyBackend, 1, Int>::from_data(
            TensorData::new(labels, [num_images]),
            &self.device,
        );

        let images = self
            .generator
            .generate_images(num_images, Some(labels), width, &self.device);
        let data = images
            .to_data()
            .to_vec::<f32>()
            .map_err(|err| JsValue::from_str(&format!("{err:?}")))?
            .iter()
            .map(|c| 255.0 * ((c + 1.0) / 2.0))
            .collect::<Vec<_>>();

        Ok(data)
    }
}

fn to_js(err: Error) -> JsValue {
    JsValue::from_str(&err.to_string())
}
