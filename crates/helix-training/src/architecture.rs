//! Untrained model graphs assembled from a declarative request.
//!
//! A blueprint is a flat list of layers plus the optimizer settings it would
//! be trained with. Nothing is initialized here; only the shape and the
//! parameter budget are computed.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of the dense layer that follows the convolutional stack when the
/// architecture does not name one.
const CNN_DEFAULT_HIDDEN: usize = 128;
const TRANSFORMER_DEFAULT_HIDDEN: usize = 256;
/// Channels × spatial size after two 2x2 pools over a 32x32 input.
const CNN_FLATTENED: usize = 64 * 8 * 8;
const BYTES_PER_PARAMETER: u64 = 4;

fn unknown(what: &str, tag: &str, allowed: &[&str]) -> TrainingError {
    TrainingError::InvalidConfig(format!("unknown {what} '{tag}', expected one of: {}", allowed.join(", ")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Classification,
    Regression,
    Cnn,
    Transformer,
}

impl ModelKind {
    const TAGS: [&'static str; 4] = ["classification", "regression", "cnn", "transformer"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Regression => "regression",
            Self::Cnn => "cnn",
            Self::Transformer => "transformer",
        }
    }
}

impl FromStr for ModelKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classification" => Ok(Self::Classification),
            "regression" => Ok(Self::Regression),
            "cnn" => Ok(Self::Cnn),
            "transformer" => Ok(Self::Transformer),
            other => Err(unknown("model type", other, &Self::TAGS)),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    ReLU,
    Sigmoid,
    Tanh,
    LeakyReLU,
}

impl Activation {
    const TAGS: [&'static str; 4] = ["ReLU", "Sigmoid", "Tanh", "LeakyReLU"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReLU => "ReLU",
            Self::Sigmoid => "Sigmoid",
            Self::Tanh => "Tanh",
            Self::LeakyReLU => "LeakyReLU",
        }
    }
}

impl FromStr for Activation {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ReLU" => Ok(Self::ReLU),
            "Sigmoid" => Ok(Self::Sigmoid),
            "Tanh" => Ok(Self::Tanh),
            "LeakyReLU" => Ok(Self::LeakyReLU),
            other => Err(unknown("activation function", other, &Self::TAGS)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    #[serde(rename = "SGD")]
    Sgd,
    #[serde(rename = "RMSprop")]
    RmsProp,
    #[serde(rename = "AdaGrad")]
    AdaGrad,
}

impl OptimizerKind {
    const TAGS: [&'static str; 4] = ["Adam", "SGD", "RMSprop", "AdaGrad"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adam => "Adam",
            Self::Sgd => "SGD",
            Self::RmsProp => "RMSprop",
            Self::AdaGrad => "AdaGrad",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Adam" => Ok(Self::Adam),
            "SGD" => Ok(Self::Sgd),
            "RMSprop" => Ok(Self::RmsProp),
            "AdaGrad" => Ok(Self::AdaGrad),
            other => Err(unknown("optimizer", other, &Self::TAGS)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Linear { in_features: usize, out_features: usize },
    Conv2d { in_channels: usize, out_channels: usize, kernel_size: usize, padding: usize },
    Activation { function: Activation },
    MaxPool2d { kernel_size: usize },
    Flatten,
}

impl LayerSpec {
    /// Weights plus biases, or `None` when the count overflows. Activations,
    /// pooling and flatten carry none.
    #[must_use]
    pub fn parameter_count(&self) -> Option<u64> {
        let count = match *self {
            Self::Linear { in_features, out_features } => in_features.checked_mul(out_features)?.checked_add(out_features)?,
            Self::Conv2d { in_channels, out_channels, kernel_size, .. } => in_channels
                .checked_mul(out_channels)?
                .checked_mul(kernel_size)?
                .checked_mul(kernel_size)?
                .checked_add(out_channels)?,
            Self::Activation { .. } | Self::MaxPool2d { .. } | Self::Flatten => 0,
        };
        u64::try_from(count).ok()
    }
}

/// Raw build request as it arrives over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintRequest {
    #[serde(alias = "model_type")]
    pub model_type: String,
    /// JSON array of layer widths, e.g. `[64, 128, 1]`.
    pub architecture: String,
    #[serde(alias = "activation_function")]
    pub activation_function: String,
    pub optimizer: String,
    #[serde(alias = "learning_rate")]
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintMetrics {
    pub total_parameters: u64,
    pub trainable_parameters: u64,
    /// Megabytes of `f32` parameters, two decimals.
    pub model_size: f64,
    pub layers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBlueprint {
    pub model_type: ModelKind,
    pub widths: Vec<usize>,
    pub activation_function: Activation,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    pub layers: Vec<LayerSpec>,
}

/// Parse `"[64, 128, 1]"` into widths. Every width must be positive.
pub fn parse_widths(architecture: &str) -> TrainingResult<Vec<usize>> {
    let invalid = || TrainingError::InvalidConfig(format!("invalid architecture '{architecture}', use a format like [64, 128, 1]"));
    let widths: Vec<usize> = serde_json::from_str(architecture).map_err(|_| invalid())?;
    if widths.is_empty() || widths.contains(&0) {
        return Err(invalid());
    }
    Ok(widths)
}

impl ModelBlueprint {
    /// Validate every field of `request` and expand the layer plan.
    ///
    /// # Errors
    /// `InvalidConfig` for unknown tags, a malformed architecture or a learning
    /// rate outside `(0, 1]`.
    pub fn build(request: &BlueprintRequest) -> TrainingResult<Self> {
        let model_type: ModelKind = request.model_type.parse()?;
        let activation: Activation = request.activation_function.parse()?;
        let optimizer: OptimizerKind = request.optimizer.parse()?;
        let lr = request.learning_rate;
        if !(lr > 0.0 && lr <= 1.0) {
            return Err(TrainingError::InvalidConfig(format!("learning_rate must be in (0, 1], got {lr}")));
        }
        let widths = parse_widths(&request.architecture)?;
        let layers = match model_type {
            ModelKind::Classification | ModelKind::Regression => dense_layers(model_type, &widths, activation)?,
            ModelKind::Cnn => cnn_layers(&widths, activation),
            ModelKind::Transformer => transformer_layers(&widths, activation),
        };
        let blueprint = Self { model_type, widths, activation_function: activation, optimizer, learning_rate: lr, layers };
        // Size in bytes must fit as well.
        if blueprint.checked_parameter_count().and_then(|n| n.checked_mul(BYTES_PER_PARAMETER)).is_none() {
            return Err(TrainingError::InvalidConfig(format!(
                "architecture '{}' has too many parameters",
                request.architecture
            )));
        }
        Ok(blueprint)
    }

    fn checked_parameter_count(&self) -> Option<u64> {
        self.layers.iter().try_fold(0u64, |total, layer| total.checked_add(layer.parameter_count()?))
    }

    /// Total parameters. Saturates for plans that did not come through [`Self::build`].
    #[must_use]
    pub fn parameter_count(&self) -> u64 {
        self.checked_parameter_count().unwrap_or(u64::MAX)
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn metrics(&self) -> BlueprintMetrics {
        let total = self.parameter_count();
        let megabytes = total.saturating_mul(BYTES_PER_PARAMETER) as f64 / (1024.0 * 1024.0);
        BlueprintMetrics {
            total_parameters: total,
            trainable_parameters: total,
            model_size: (megabytes * 100.0).round() / 100.0,
            layers: self.layers.len(),
        }
    }

    /// Architecture text in its canonical form.
    #[must_use]
    pub fn architecture(&self) -> String {
        let widths: Vec<String> = self.widths.iter().map(ToString::to_string).collect();
        format!("[{}]", widths.join(", "))
    }

    pub fn to_json(&self) -> TrainingResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

fn dense_layers(kind: ModelKind, widths: &[usize], activation: Activation) -> TrainingResult<Vec<LayerSpec>> {
    if widths.len() < 2 {
        return Err(TrainingError::InvalidConfig(format!(
            "{kind} architecture needs at least an input and an output width"
        )));
    }
    let mut layers = Vec::new();
    let last = widths.len() - 2;
    for (i, pair) in widths.windows(2).enumerate() {
        layers.push(LayerSpec::Linear { in_features: pair[0], out_features: pair[1] });
        if i < last {
            layers.push(LayerSpec::Activation { function: activation });
        }
    }
    if kind == ModelKind::Classification {
        layers.push(LayerSpec::Activation { function: Activation::Sigmoid });
    }
    Ok(layers)
}

fn cnn_layers(widths: &[usize], activation: Activation) -> Vec<LayerSpec> {
    let hidden = widths.first().copied().unwrap_or(CNN_DEFAULT_HIDDEN);
    let output = widths.last().copied().unwrap_or(hidden);
    let act = LayerSpec::Activation { function: activation };
    vec![
        LayerSpec::Conv2d { in_channels: 3, out_channels: 32, kernel_size: 3, padding: 1 },
        act,
        LayerSpec::MaxPool2d { kernel_size: 2 },
        LayerSpec::Conv2d { in_channels: 32, out_channels: 64, kernel_size: 3, padding: 1 },
        act,
        LayerSpec::MaxPool2d { kernel_size: 2 },
        LayerSpec::Flatten,
        LayerSpec::Linear { in_features: CNN_FLATTENED, out_features: hidden },
        act,
        LayerSpec::Linear { in_features: hidden, out_features: output },
    ]
}

fn transformer_layers(widths: &[usize], activation: Activation) -> Vec<LayerSpec> {
    let input = widths[0];
    let hidden = widths.get(1).copied().unwrap_or(TRANSFORMER_DEFAULT_HIDDEN);
    let output = widths[widths.len() - 1];
    vec![
        LayerSpec::Linear { in_features: input, out_features: hidden },
        LayerSpec::Activation { function: activation },
        LayerSpec::Linear { in_features: hidden, out_features: output },
    ]
}
