use burn::{config::Config, prelude::*, tensor::Int};
use slimgan::{utils::save_image, GeneratorConfig};
use std::{error::Error, path::PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(not(feature = "wgpu"))]
type MyBackend = burn::backend::NdArray<f32>;
#[cfg(feature = "wgpu")]
type MyBackend = burn::backend::Wgpu<f32>;

#[derive(Config, Debug)]
pub struct SampleConfig {
    #[config(default = "GeneratorConfig::new(10)")]
    pub generator: GeneratorConfig,
    #[config(default = "String::from(\"/tmp/slimgan\")")]
    pub outdir: String,
    #[config(default = 16)]
    pub num_images: usize,
    #[config(default = 4)]
    pub nrow: u32,
    #[config(default = 42)]
    pub seed: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slimgan=info,slimgan_sample=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading sample config from {path}");
            SampleConfig::load(&path)?
        }
        None => SampleConfig::new(),
    };

    let device = Default::default();
    MyBackend::seed(config.seed);

    // build the generator once, then sample it at every width
    let generator = config.generator.init::<MyBackend>(&device)?;
    let outdir = PathBuf::from(&config.outdir);
    std::fs::create_dir_all(&outdir)?;
    config.save(outdir.join("sample_config.json"))?;

    // cycle through the classes so every grid shows the same labels
    let num_classes = generator.num_classes() as i64;
    let labels = (0..config.num_images as i64)
        .map(|i| i % num_classes)
        .collect::<Vec<_>>();
    let labels = Tensor::<MyBackend, 1, Int>::from_data(
        TensorData::new(labels, [config.num_images]),
        &device,
    );
    let noise = Tensor::<MyBackend, 2>::random(
        [config.num_images, generator.nz()],
        burn::tensor::Distribution::Normal(0.0, 1.0),
        &device,
    );

    info!(
        "Generator has {} parameters across {} widths",
        generator.num_params(),
        generator.widths().len()
    );
    for width in generator.widths().iter() {
        let images = generator.forward(noise.clone(), Some(labels.clone()), width);
        let path = outdir.join(format!("width_{:.2}.png", width.mult()));
        save_image(images, config.nrow, &path)?;

        info!(
            mult = width.mult(),
            active_params = generator.active_params(width),
            "Saved {}",
            path.display()
        );
    }

    Ok(())
}
