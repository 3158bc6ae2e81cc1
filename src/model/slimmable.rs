use burn::{
    module::{Ignored, Param},
    nn::Initializer,
    prelude::*,
    tensor::{module::conv2d, ops::ConvOptions},
};

use crate::width::Width;

/// Linear layer whose weight is stored at the widest configuration and
/// sliced down to `[out_features_list[i], in_features_list[i]]` at width `i`.
#[derive(Module, Debug)]
pub struct SlimmableLinear<B: Backend> {
    /// Stored as `[max_out, max_in]` so that every width is a leading block.
    pub weight: Param<Tensor<B, 2>>,
    pub bias: Param<Tensor<B, 1>>,
    in_features_list: Ignored<Vec<usize>>,
    out_features_list: Ignored<Vec<usize>>,
}

impl<B: Backend> SlimmableLinear<B> {
    pub fn new(
        in_features_list: Vec<usize>,
        out_features_list: Vec<usize>,
        gain: f64,
        device: &B::Device,
    ) -> Self {
        assert_eq!(
            in_features_list.len(),
            out_features_list.len(),
            "one feature count per width"
        );
        let max_in = max_of(&in_features_list);
        let max_out = max_of(&out_features_list);

        let weight = Initializer::XavierUniform { gain }.init_with(
            [max_out, max_in],
            Some(max_in),
            Some(max_out),
            device,
        );
        let bias = Initializer::Zeros.init([max_out], device);

        Self {
            weight,
            bias,
            in_features_list: Ignored(in_features_list),
            out_features_list: Ignored(out_features_list),
        }
    }

    pub fn in_features(&self, width: Width) -> usize {
        self.in_features_list[width.index()]
    }

    pub fn out_features(&self, width: Width) -> usize {
        self.out_features_list[width.index()]
    }

    pub fn forward(&self, input: Tensor<B, 2>, width: Width) -> Tensor<B, 2> {
        let in_features = self.in_features(width);
        let out_features = self.out_features(width);

        let weight = self
            .weight
            .val()
            .slice([0..out_features, 0..in_features]);
        let bias = self.bias.val().slice([0..out_features]);

        input.matmul(weight.transpose()) + bias.unsqueeze::<2>()
    }

    pub fn active_params(&self, width: Width) -> usize {
        let out_features = self.out_features(width);
        out_features * self.in_features(width) + out_features
    }
}

/// 2d convolution with the same prefix-slicing of output/input channels.
#[derive(Module, Debug)]
pub struct SlimmableConv2d<B: Backend> {
    /// `[max_out, max_in, k, k]`.
    pub weight: Param<Tensor<B, 4>>,
    pub bias: Param<Tensor<B, 1>>,
    stride: usize,
    padding: usize,
    in_channels_list: Ignored<Vec<usize>>,
    out_channels_list: Ignored<Vec<usize>>,
}

impl<B: Backend> SlimmableConv2d<B> {
    pub fn new(
        channels: [Vec<usize>; 2],
        kernel_size: usize,
        stride: usize,
        padding: usize,
        gain: f64,
        device: &B::Device,
    ) -> Self {
        let [in_channels_list, out_channels_list] = channels;
        assert_eq!(
            in_channels_list.len(),
            out_channels_list.len(),
            "one channel count per width"
        );
        let max_in = max_of(&in_channels_list);
        let max_out = max_of(&out_channels_list);
        let receptive = kernel_size * kernel_size;

        let weight = Initializer::XavierUniform { gain }.init_with(
            [max_out, max_in, kernel_size, kernel_size],
            Some(max_in * receptive),
            Some(max_out * receptive),
            device,
        );
        let bias = Initializer::Zeros.init([max_out], device);

        Self {
            weight,
            bias,
            stride,
            padding,
            in_channels_list: Ignored(in_channels_list),
            out_channels_list: Ignored(out_channels_list),
        }
    }

    pub fn in_channels(&self, width: Width) -> usize {
        self.in_channels_list[width.index()]
    }

    pub fn out_channels(&self, width: Width) -> usize {
        self.out_channels_list[width.index()]
    }

    pub fn forward(&self, input: Tensor<B, 4>, width: Width) -> Tensor<B, 4> {
        let in_channels = self.in_channels(width);
        let out_channels = self.out_channels(width);
        let [_, _, k_h, k_w] = self.weight.dims();

        let weight = self
            .weight
            .val()
            .slice([0..out_channels, 0..in_channels, 0..k_h, 0..k_w]);
        let bias = self.bias.val().slice([0..out_channels]);

        conv2d(
            input,
            weight,
            Some(bias),
            ConvOptions::new(
                [self.stride, self.stride],
                [self.padding, self.padding],
                [1, 1],
                1,
            ),
        )
    }

    pub fn active_params(&self, width: Width) -> usize {
        let [_, _, k_h, k_w] = self.weight.dims();
        let out_channels = self.out_channels(width);
        out_channels * self.in_channels(width) * k_h * k_w + out_channels
    }
}

fn max_of(list: &[usize]) -> usize {
    list.iter().copied().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::width::WidthMults;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn widths() -> WidthMults {
        WidthMults::new(vec![0.5, 1.0]).unwrap()
    }

    #[test]
    fn linear_slices_weight_prefix() {
        let device = Default::default();
        let widths = widths();
        let layer = SlimmableLinear::<TestBackend>::new(vec![4, 8], vec![3, 6], 1.0, &device);
        assert_eq!(layer.weight.dims(), [6, 8]);

        let input = Tensor::<TestBackend, 2>::ones([2, 4], &device);
        let narrow = widths.min();
        let output = layer.forward(input.clone(), narrow);
        assert_eq!(output.dims(), [2, 3]);

        // The narrow output must equal the matching block of the full weight.
        let expected = input.matmul(layer.weight.val().slice([0..3, 0..4]).transpose());
        let got = output.into_data().to_vec::<f32>().unwrap();
        let want = expected.into_data().to_vec::<f32>().unwrap();
        for (g, w) in got.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-5);
        }

        let wide = layer.forward(Tensor::ones([2, 8], &device), widths.max());
        assert_eq!(wide.dims(), [2, 6]);
    }

    #[test]
    fn conv_keeps_spatial_size_with_padding() {
        let device = Default::default();
        let widths = widths();
        let conv =
            SlimmableConv2d::<TestBackend>::new([vec![2, 4], vec![3, 6]], 3, 1, 1, 1.0, &device);

        let out = conv.forward(Tensor::ones([1, 2, 5, 5], &device), widths.min());
        assert_eq!(out.dims(), [1, 3, 5, 5]);
        let out = conv.forward(Tensor::ones([1, 4, 5, 5], &device), widths.max());
        assert_eq!(out.dims(), [1, 6, 5, 5]);
    }

    #[test]
    fn active_params_shrink_with_width() {
        let device = Default::default();
        let widths = widths();
        let conv =
            SlimmableConv2d::<TestBackend>::new([vec![2, 4], vec![3, 6]], 3, 1, 1, 1.0, &device);
        assert_eq!(conv.active_params(widths.min()), 3 * 2 * 9 + 3);
        assert_eq!(conv.active_params(widths.max()), conv.num_params());

        let linear = SlimmableLinear::<TestBackend>::new(vec![4, 8], vec![3, 6], 1.0, &device);
        assert_eq!(linear.active_params(widths.min()), 3 * 4 + 3);
        assert_eq!(linear.active_params(widths.max()), linear.num_params());
    }
}
