//! Trainable-model capability.
//!
//! The training loop only sees [`TrainableModel`] and [`ModelFactory`]. The
//! built-in [`MlpFactory`] trains a burn network
//! (`input -> hidden -> ReLU -> hidden -> ReLU -> 1`) with MSE loss and Adam.
//! It runs on NdArray, or on wgpu when the crate is built with the `wgpu`
//! feature and the job asks for a GPU.

use crate::dataset::Batch;
use crate::error::{TrainingError, TrainingResult};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Param};
use burn::nn::loss::{MseLoss, Reduction};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

type CpuBackend = Autodiff<NdArray>;

#[cfg(feature = "wgpu")]
type GpuBackend = Autodiff<burn::backend::Wgpu>;

type ParameterRecorder = BinBytesRecorder<FullPrecisionSettings>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    Cpu,
    Gpu,
}

/// GPU only when it was asked for and the backend has one. Otherwise CPU,
/// without complaint.
#[must_use]
pub fn select_device(gpu_requested: bool, factory: &dyn ModelFactory) -> ComputeDevice {
    if gpu_requested && factory.accelerator_available() { ComputeDevice::Gpu } else { ComputeDevice::Cpu }
}

/// Output of one forward pass with loss.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub predictions: Vec<f32>,
    /// Mean squared error over the batch.
    pub loss: f64,
}

pub trait TrainableModel: Send {
    fn device(&self) -> ComputeDevice;

    fn parameter_count(&self) -> usize;

    /// Forward pass plus loss; keeps the gradients for [`Self::optimize_step`].
    fn forward_loss(&mut self, batch: &Batch<'_>) -> TrainingResult<StepOutput>;

    /// Apply one optimizer update using the gradients of the last `forward_loss`.
    fn optimize_step(&mut self) -> TrainingResult<()>;

    /// Inference only. No gradients are kept.
    fn predict(&self, rows: &[&[f32]]) -> TrainingResult<Vec<f32>>;

    /// Serialized parameters, suitable for storing as an artifact.
    fn export_parameters(&self) -> TrainingResult<Vec<u8>>;
}

/// Everything needed to construct a model for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInit {
    pub input_dim: usize,
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub device: ComputeDevice,
    pub seed: Option<u64>,
}

pub trait ModelFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn accelerator_available(&self) -> bool;

    fn build(&self, init: &ModelInit) -> TrainingResult<Box<dyn TrainableModel>>;
}

/// Builds [`MlpRegressor`]s on the backend matching the requested device.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlpFactory;

impl ModelFactory for MlpFactory {
    fn name(&self) -> &'static str {
        "mlp"
    }

    fn accelerator_available(&self) -> bool {
        cfg!(feature = "wgpu")
    }

    fn build(&self, init: &ModelInit) -> TrainingResult<Box<dyn TrainableModel>> {
        match init.device {
            ComputeDevice::Cpu => Ok(Box::new(adam_regressor::<CpuBackend>(init, NdArrayDevice::default())?)),
            #[cfg(feature = "wgpu")]
            ComputeDevice::Gpu => Ok(Box::new(adam_regressor::<GpuBackend>(
                init,
                burn::backend::wgpu::WgpuDevice::default(),
            )?)),
            #[cfg(not(feature = "wgpu"))]
            ComputeDevice::Gpu => Err(TrainingError::Trainer("built without GPU support".to_string())),
        }
    }
}

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    input: Linear<B>,
    hidden: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Mlp<B> {
    fn new(input_dim: usize, hidden_size: usize, rng: &mut StdRng, device: &B::Device) -> Self {
        Self {
            input: seeded_linear(input_dim, hidden_size, rng, device),
            hidden: seeded_linear(hidden_size, hidden_size, rng, device),
            output: seeded_linear(hidden_size, 1, rng, device),
            activation: Relu::new(),
        }
    }

    /// `[batch, input_dim] -> [batch, 1]`
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.input.forward(input));
        let x = self.activation.forward(self.hidden.forward(x));
        self.output.forward(x)
    }
}

/// Uniform in `±1/sqrt(fan_in)`, drawn from the job's RNG so a seeded job
/// always starts from the same weights.
fn seeded_linear<B: Backend>(inputs: usize, outputs: usize, rng: &mut StdRng, device: &B::Device) -> Linear<B> {
    let bound = 1.0 / (inputs as f32).sqrt();
    let mut draw = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.gen_range(-bound..=bound)).collect() };
    let weight = Tensor::<B, 1>::from_floats(draw(inputs * outputs).as_slice(), device).reshape([inputs, outputs]);
    let bias = Tensor::<B, 1>::from_floats(draw(outputs).as_slice(), device);

    let mut linear = LinearConfig::new(inputs, outputs).init(device);
    linear.weight = Param::from_tensor(weight);
    linear.bias = Some(Param::from_tensor(bias));
    linear
}

fn row_tensor<B: Backend>(rows: &[&[f32]], width: usize, device: &B::Device) -> TrainingResult<Tensor<B, 2>> {
    let mut flat = Vec::with_capacity(rows.len() * width);
    for row in rows {
        if row.len() != width {
            return Err(TrainingError::Trainer(format!("expected {width} features per row, got {}", row.len())));
        }
        flat.extend_from_slice(row);
    }
    Ok(Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([rows.len(), width]))
}

fn column_values<B: Backend>(tensor: Tensor<B, 2>) -> TrainingResult<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| TrainingError::Trainer(format!("could not read predictions: {e:?}")))
}

/// JSON checkpoint written on job completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlpCheckpoint {
    pub architecture: String,
    pub activation: String,
    pub input_dim: usize,
    pub hidden_size: usize,
    pub parameter_count: usize,
    /// Full-precision burn record, hex encoded.
    record: String,
}

/// Regressor on autodiff backend `B`, updated by optimizer `O`.
pub struct MlpRegressor<B: AutodiffBackend, O> {
    model: Mlp<B>,
    optimizer: O,
    /// Gradients of the last `forward_loss`, consumed by `optimize_step`.
    pending: Option<GradientsParams>,
    loss: MseLoss,
    device: B::Device,
    compute: ComputeDevice,
    learning_rate: f64,
    input_dim: usize,
    hidden_size: usize,
}

impl<B: AutodiffBackend, O> std::fmt::Debug for MlpRegressor<B, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlpRegressor")
            .field("compute", &self.compute)
            .field("input_dim", &self.input_dim)
            .field("hidden_size", &self.hidden_size)
            .field("learning_rate", &self.learning_rate)
            .finish_non_exhaustive()
    }
}

/// A fresh regressor trained with Adam.
pub fn adam_regressor<B: AutodiffBackend>(
    init: &ModelInit,
    device: B::Device,
) -> TrainingResult<MlpRegressor<B, impl Optimizer<Mlp<B>, B> + use<B>>> {
    if init.input_dim == 0 {
        return Err(TrainingError::Trainer("model needs at least one input feature".to_string()));
    }
    if init.hidden_size == 0 {
        return Err(TrainingError::Trainer("hidden_size must be >= 1".to_string()));
    }

    let mut rng = match init.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Ok(MlpRegressor {
        model: Mlp::new(init.input_dim, init.hidden_size, &mut rng, &device),
        optimizer: AdamConfig::new().init::<B, Mlp<B>>(),
        pending: None,
        loss: MseLoss::new(),
        device,
        compute: init.device,
        learning_rate: init.learning_rate,
        input_dim: init.input_dim,
        hidden_size: init.hidden_size,
    })
}

/// Restore an exported checkpoint on the CPU backend, for inference.
pub fn load_checkpoint(bytes: &[u8]) -> TrainingResult<Box<dyn TrainableModel>> {
    let checkpoint: MlpCheckpoint = serde_json::from_slice(bytes)?;
    let record = hex::decode(&checkpoint.record)
        .map_err(|e| TrainingError::Trainer(format!("checkpoint record is not hex: {e}")))?;
    let init = ModelInit {
        input_dim: checkpoint.input_dim,
        hidden_size: checkpoint.hidden_size,
        learning_rate: 0.0,
        device: ComputeDevice::Cpu,
        seed: Some(0),
    };
    let mut model = adam_regressor::<CpuBackend>(&init, NdArrayDevice::default())?;
    model.restore(record)?;
    if model.parameter_count() != checkpoint.parameter_count {
        return Err(TrainingError::Trainer(format!(
            "checkpoint declares {} parameters, record holds {}",
            checkpoint.parameter_count,
            model.parameter_count()
        )));
    }
    Ok(Box::new(model))
}

impl<B: AutodiffBackend, O> MlpRegressor<B, O> {
    fn restore(&mut self, bytes: Vec<u8>) -> TrainingResult<()> {
        let record: MlpRecord<B> = <ParameterRecorder as Recorder<B>>::load(&ParameterRecorder::default(), bytes, &self.device)
            .map_err(|e| TrainingError::Trainer(format!("could not load parameters: {e:?}")))?;
        self.model = self.model.clone().load_record(record);
        Ok(())
    }
}

impl<B, O> TrainableModel for MlpRegressor<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<Mlp<B>, B>,
{
    fn device(&self) -> ComputeDevice {
        self.compute
    }

    fn parameter_count(&self) -> usize {
        self.model.num_params()
    }

    fn forward_loss(&mut self, batch: &Batch<'_>) -> TrainingResult<StepOutput> {
        if batch.is_empty() {
            return Err(TrainingError::Trainer("empty batch".to_string()));
        }
        let inputs = row_tensor::<B>(&batch.rows, self.input_dim, &self.device)?;
        let targets = Tensor::<B, 1>::from_floats(batch.targets.as_slice(), &self.device).reshape([batch.len(), 1]);

        let predictions = self.model.forward(inputs);
        let loss = self.loss.forward(predictions.clone(), targets, Reduction::Mean);
        let value = loss.clone().into_scalar().elem::<f64>();
        self.pending = Some(GradientsParams::from_grads(loss.backward(), &self.model));

        Ok(StepOutput { predictions: column_values(predictions)?, loss: value })
    }

    fn optimize_step(&mut self) -> TrainingResult<()> {
        let grads = self
            .pending
            .take()
            .ok_or_else(|| TrainingError::Trainer("optimize_step called without gradients".to_string()))?;
        self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);
        Ok(())
    }

    fn predict(&self, rows: &[&[f32]]) -> TrainingResult<Vec<f32>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let inputs = row_tensor::<B::InnerBackend>(rows, self.input_dim, &self.device)?;
        column_values(self.model.valid().forward(inputs))
    }

    fn export_parameters(&self) -> TrainingResult<Vec<u8>> {
        let record = <ParameterRecorder as Recorder<B>>::record(&ParameterRecorder::default(), self.model.clone().into_record(), ())
            .map_err(|e| TrainingError::Trainer(format!("could not record parameters: {e:?}")))?;
        let checkpoint = MlpCheckpoint {
            architecture: "mlp".to_string(),
            activation: "relu".to_string(),
            input_dim: self.input_dim,
            hidden_size: self.hidden_size,
            parameter_count: self.parameter_count(),
            record: hex::encode(record),
        };
        Ok(serde_json::to_vec_pretty(&checkpoint)?)
    }
}
