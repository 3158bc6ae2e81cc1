use burn::prelude::*;
use image::{ImageResult, Rgb, RgbImage};
use std::path::Path;

/// Lays out a batch `[N, C, H, W]` of images in `[-1, 1]` as a grid with
/// `nrow` images per row. One-channel batches are written as grey.
pub fn image_grid<B: Backend>(images: Tensor<B, 4>, nrow: u32) -> RgbImage {
    let [batch_size, channels, height, width] = images.dims();
    assert!(
        channels == 1 || channels == 3,
        "expected 1 or 3 channels, got {channels}"
    );
    let nrow = nrow.max(1);
    let ncol = (batch_size as f32 / nrow as f32).ceil() as u32;
    let (w, h) = (width as u32, height as u32);

    let pixels = images
        .into_data()
        .iter::<f32>()
        .map(|v| (255.0 * (v.clamp(-1.0, 1.0) + 1.0) / 2.0).round() as u8)
        .collect::<Vec<_>>();
    let plane = height * width;

    let mut imgbuf = RgbImage::new(nrow * w, ncol.max(1) * h);
    for index in 0..batch_size {
        let (col, row) = (index as u32 % nrow, index as u32 / nrow);
        let base = index * channels * plane;
        for (x, y) in (0..w).flat_map(|x| (0..h).map(move |y| (x, y))) {
            let offset = base + (y * w + x) as usize;
            let channel = |c: usize| pixels[offset + c * plane];
            let pixel = match channels {
                1 => Rgb([channel(0); 3]),
                _ => Rgb([channel(0), channel(1), channel(2)]),
            };
            imgbuf.put_pixel(col * w + x, row * h + y, pixel);
        }
    }
    imgbuf
}

pub fn save_image<B: Backend, Q: AsRef<Path>>(
    images: Tensor<B, 4>,
    nrow: u32,
    path: Q,
) -> ImageResult<()> {
    image_grid(images, nrow).save(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn grid_places_images_row_major() {
        let device = Default::default();
        // Three 1x2 images: black, white, mid grey.
        let images = Tensor::<TestBackend, 4>::from_floats(
            [[[[-1.0, -1.0]]], [[[1.0, 1.0]]], [[[0.0, 0.0]]]],
            &device,
        );
        let grid = image_grid(images, 2);
        assert_eq!(grid.dimensions(), (4, 2));
        assert_eq!(grid.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(grid.get_pixel(2, 0), &Rgb([255, 255, 255]));
        assert_eq!(grid.get_pixel(0, 1), &Rgb([128, 128, 128]));
        assert_eq!(grid.get_pixel(2, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn grid_keeps_rgb_channels() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::from_floats(
            [[[[1.0]], [[-1.0]], [[2.0]]]],
            &device,
        );
        let grid = image_grid(images, 4);
        assert_eq!(grid.dimensions(), (4, 1));
        assert_eq!(grid.get_pixel(0, 0), &Rgb([255, 0, 255]));
    }
}
