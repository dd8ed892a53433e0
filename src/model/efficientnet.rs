//! EfficientNet architecture built with Burn
//!
//! Compound-scaled EfficientNet. The default configuration is B3
//! (width 1.2, depth 1.4): a 40-channel stem, seven MBConv stages and a
//! 1536-channel head. The network is split into a feature extractor and a
//! linear classifier so that backbone weights can be loaded on their own and a
//! fresh head attached for a different class count.
//!
//! Inference runs with eval semantics: on a non-autodiff backend batch norm
//! uses its running statistics and dropout is inactive.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d,
    },
    tensor::{
        activation::{sigmoid, silu, softmax},
        backend::Backend,
        Tensor,
    },
};

/// Architecture identifier stored alongside checkpoints
pub const ARCHITECTURE: &str = "efficientnet_b3";

/// One MBConv stage of the B0 baseline, before compound scaling
#[derive(Debug, Clone, Copy)]
struct StageSpec {
    expand_ratio: usize,
    kernel: usize,
    stride: usize,
    in_channels: usize,
    out_channels: usize,
    repeats: usize,
}

const fn stage(
    expand_ratio: usize,
    kernel: usize,
    stride: usize,
    in_channels: usize,
    out_channels: usize,
    repeats: usize,
) -> StageSpec {
    StageSpec {
        expand_ratio,
        kernel,
        stride,
        in_channels,
        out_channels,
        repeats,
    }
}

const BASELINE_STAGES: [StageSpec; 7] = [
    stage(1, 3, 1, 32, 16, 1),
    stage(6, 3, 2, 16, 24, 2),
    stage(6, 5, 2, 24, 40, 2),
    stage(6, 3, 2, 40, 80, 3),
    stage(6, 5, 1, 80, 112, 3),
    stage(6, 5, 2, 112, 192, 4),
    stage(6, 3, 1, 192, 320, 1),
];

const BASELINE_STEM: usize = 32;
const BASELINE_HEAD: usize = 1280;

/// Configuration for [`EfficientNet`]
#[derive(Config, Debug)]
pub struct EfficientNetConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Channel width multiplier (B3: 1.2)
    #[config(default = "1.2")]
    pub width_mult: f64,

    /// Layer depth multiplier (B3: 1.4)
    #[config(default = "1.4")]
    pub depth_mult: f64,

    /// Dropout before the classifier (B3: 0.3)
    #[config(default = "0.3")]
    pub dropout_rate: f64,

    /// Squeeze-excitation reduction relative to the block input channels
    #[config(default = "0.25")]
    pub se_ratio: f64,
}

impl EfficientNetConfig {
    /// EfficientNet-B3 for `num_classes` outputs
    pub fn b3(num_classes: usize) -> Self {
        Self::new(num_classes)
    }

    /// Scale a channel count by the width multiplier, rounded to a multiple of 8
    pub fn round_filters(&self, channels: usize) -> usize {
        make_divisible(channels as f64 * self.width_mult, 8)
    }

    /// Scale a stage's repeat count by the depth multiplier
    pub fn round_repeats(&self, repeats: usize) -> usize {
        ((repeats as f64 * self.depth_mult).ceil() as usize).max(1)
    }

    /// Channel count of the final feature map
    pub fn head_channels(&self) -> usize {
        self.round_filters(BASELINE_HEAD)
    }
}

fn make_divisible(value: f64, divisor: usize) -> usize {
    let divisor_f = divisor as f64;
    let rounded = ((value + divisor_f / 2.0) as usize / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value {
        rounded + divisor
    } else {
        rounded
    }
}

/// Convolution, batch norm and SiLU
#[derive(Module, Debug)]
pub struct ConvBnSilu<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBnSilu<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel_size / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        silu(self.bn.forward(self.conv.forward(x)))
    }
}

/// Channel attention: global pool, reduce, expand, sigmoid gate
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    pub pool: AdaptiveAvgPool2d,
    pub reduce: Conv2d<B>,
    pub expand: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    pub fn new(channels: usize, squeeze_channels: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, squeeze_channels], [1, 1]).init(device),
            expand: Conv2dConfig::new([squeeze_channels, channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = silu(self.reduce.forward(scale));
        let scale = sigmoid(self.expand.forward(scale));
        x * scale
    }
}

/// Mobile inverted bottleneck block
#[derive(Module, Debug)]
pub struct MBConv<B: Backend> {
    pub expand: Option<ConvBnSilu<B>>,
    pub depthwise: ConvBnSilu<B>,
    pub se: SqueezeExcitation<B>,
    pub project: Conv2d<B>,
    pub project_bn: BatchNorm<B, 2>,
    stride: usize,
    in_channels: usize,
    out_channels: usize,
}

impl<B: Backend> MBConv<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        expand_ratio: usize,
        kernel_size: usize,
        stride: usize,
        se_ratio: f64,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = (expand_ratio != 1)
            .then(|| ConvBnSilu::new(in_channels, hidden, 1, 1, 1, device));
        let depthwise = ConvBnSilu::new(hidden, hidden, kernel_size, stride, hidden, device);
        let squeeze = ((in_channels as f64 * se_ratio) as usize).max(1);
        let se = SqueezeExcitation::new(hidden, squeeze, device);
        let project = Conv2dConfig::new([hidden, out_channels], [1, 1])
            .with_bias(false)
            .init(device);

        Self {
            expand,
            depthwise,
            se,
            project,
            project_bn: BatchNormConfig::new(out_channels).init(device),
            stride,
            in_channels,
            out_channels,
        }
    }

    fn has_residual(&self) -> bool {
        self.stride == 1 && self.in_channels == self.out_channels
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x);
        let x = self.se.forward(x);
        let x = self.project_bn.forward(self.project.forward(x));

        if self.has_residual() {
            x + input
        } else {
            x
        }
    }
}

/// Stem, MBConv stages and 1x1 head: everything before pooling
#[derive(Module, Debug)]
pub struct EfficientNetFeatures<B: Backend> {
    pub stem: ConvBnSilu<B>,
    pub blocks: Vec<MBConv<B>>,
    pub head: ConvBnSilu<B>,
}

impl<B: Backend> EfficientNetFeatures<B> {
    pub fn new(config: &EfficientNetConfig, device: &B::Device) -> Self {
        let stem_channels = config.round_filters(BASELINE_STEM);
        let stem = ConvBnSilu::new(3, stem_channels, 3, 2, 1, device);

        let mut blocks = Vec::new();
        for spec in BASELINE_STAGES {
            let in_channels = config.round_filters(spec.in_channels);
            let out_channels = config.round_filters(spec.out_channels);
            for i in 0..config.round_repeats(spec.repeats) {
                // only the first block of a stage changes stride and width
                let (block_in, stride) = if i == 0 {
                    (in_channels, spec.stride)
                } else {
                    (out_channels, 1)
                };
                blocks.push(MBConv::new(
                    block_in,
                    out_channels,
                    spec.expand_ratio,
                    spec.kernel,
                    stride,
                    config.se_ratio,
                    device,
                ));
            }
        }

        let last_channels = config.round_filters(BASELINE_STAGES[6].out_channels);
        let head = ConvBnSilu::new(last_channels, config.head_channels(), 1, 1, 1, device);

        Self { stem, blocks, head }
    }

    /// `[batch, 3, H, W]` -> `[batch, head_channels, H/32, W/32]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head.forward(x)
    }
}

/// EfficientNet classifier
#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    pub features: EfficientNetFeatures<B>,
    pub pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub classifier: Linear<B>,
}

impl<B: Backend> EfficientNet<B> {
    /// Create a randomly initialised network
    pub fn new(config: &EfficientNetConfig, device: &B::Device) -> Self {
        Self::with_features(EfficientNetFeatures::new(config, device), config, device)
    }

    /// Attach a fresh classifier head to an existing feature extractor
    pub fn with_features(
        features: EfficientNetFeatures<B>,
        config: &EfficientNetConfig,
        device: &B::Device,
    ) -> Self {
        Self {
            features,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            classifier: LinearConfig::new(config.head_channels(), config.num_classes).init(device),
        }
    }

    /// Logits of shape `[batch, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features.forward(x);
        let x = self.pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout.forward(x);
        self.classifier.forward(x)
    }

    /// Class probabilities of shape `[batch, num_classes]`
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    /// Output width read back from the classifier weights
    pub fn num_classes(&self) -> usize {
        // Linear weights are stored [d_input, d_output]
        self.classifier.weight.val().dims()[1]
    }
}
