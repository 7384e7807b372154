use {
    crate::{
        config::Backend,
        error::{InferError, Result},
        program::TensorProgram,
        tensor_pool::TensorValue,
    },
    base::Tensor,
    candle_core::{DType, Device},
    candle_nn::{Linear, Module, VarBuilder},
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    None,
    Relu,
    Tanh,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Weight prefix in the safetensors file (`<name>.weight`, `<name>.bias`).
    pub name: String,
    pub in_dim: usize,
    pub out_dim: usize,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "default_bias")]
    pub bias: bool,
}

fn default_bias() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    F32,
    /// Rounded to the nearest integer.
    I64,
}

/// A named window of the final hidden vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub name: String,
    #[serde(default)]
    pub offset: usize,
    pub len: usize,
    #[serde(default)]
    pub dtype: OutputType,
}

/// JSON description of a sequential linear program.
///
/// Inputs are widened to f32, flattened and concatenated in declaration order
/// into one row that flows through the layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgramDescriptor {
    pub inputs: Vec<String>,
    pub outputs: Vec<OutputDescriptor>,
    pub layers: Vec<LayerDescriptor>,
}

impl ProgramDescriptor {
    pub fn from_json(json: &str) -> Result<Self> {
        let descriptor: Self = serde_json::from_str(json)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<()> {
        for pair in self.layers.windows(2) {
            if pair[0].out_dim != pair[1].in_dim {
                return Err(InferError::Shape(format!(
                    "layer {} produces {} values but layer {} expects {}",
                    pair[0].name, pair[0].out_dim, pair[1].name, pair[1].in_dim
                )));
            }
        }
        if let Some(last) = self.layers.last() {
            for output in &self.outputs {
                if output.offset + output.len > last.out_dim {
                    return Err(InferError::Shape(format!(
                        "output {} reads past the {} values of the last layer",
                        output.name, last.out_dim
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(feature = "cuda")]
fn device_for(backend: Backend) -> Result<Device> {
    match backend {
        Backend::Cpu => Ok(Device::Cpu),
        Backend::Gpu => Ok(Device::new_cuda(0)?),
    }
}

#[cfg(not(feature = "cuda"))]
fn device_for(backend: Backend) -> Result<Device> {
    if backend == Backend::Gpu {
        log::warn!("GPU backend requested but built without cuda support, using CPU");
    }
    Ok(Device::Cpu)
}

/// Candle-backed program executing one linear layer per step.
pub struct CandleProgram {
    input_names: Vec<String>,
    output_names: Vec<String>,
    outputs: Vec<OutputDescriptor>,
    layers: Vec<(Linear, Activation)>,
    device: Device,
    bound: HashMap<String, candle_core::Tensor>,
    hidden: Option<candle_core::Tensor>,
    readback: HashMap<String, Vec<f32>>,
    cursor: usize,
}

impl CandleProgram {
    /// Build from a descriptor and the raw bytes of a safetensors file.
    pub fn load(descriptor: ProgramDescriptor, weights: &[u8], backend: Backend) -> Result<Self> {
        descriptor.validate()?;
        let device = device_for(backend)?;
        let tensors = candle_core::safetensors::load_buffer(weights, &device)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let mut layers = Vec::with_capacity(descriptor.layers.len());
        for layer in &descriptor.layers {
            let linear = if layer.bias {
                candle_nn::linear(layer.in_dim, layer.out_dim, vb.pp(&layer.name))?
            } else {
                candle_nn::linear_no_bias(layer.in_dim, layer.out_dim, vb.pp(&layer.name))?
            };
            layers.push((linear, layer.activation));
        }
        Ok(Self {
            input_names: descriptor.inputs.clone(),
            output_names: descriptor.outputs.iter().map(|o| o.name.clone()).collect(),
            outputs: descriptor.outputs,
            layers,
            device,
            bound: HashMap::new(),
            hidden: None,
            readback: HashMap::new(),
            cursor: 0,
        })
    }

    fn output_descriptor(&self, name: &str) -> Result<&OutputDescriptor> {
        self.outputs
            .iter()
            .find(|output| output.name == name)
            .ok_or_else(|| InferError::NotFound(format!("program output '{}'", name)))
    }

    fn hidden_values(&self) -> Result<Vec<f32>> {
        let hidden = self
            .hidden
            .as_ref()
            .ok_or_else(|| InferError::Runtime("program has not run".to_string()))?;
        Ok(hidden.flatten_all()?.to_vec1::<f32>()?)
    }

    fn slice_output(&self, name: &str, values: &[f32]) -> Result<TensorValue> {
        let output = self.output_descriptor(name)?;
        let window = values
            .get(output.offset..output.offset + output.len)
            .ok_or_else(|| InferError::Shape(format!("output '{}' out of range", name)))?
            .to_vec();
        Ok(match output.dtype {
            OutputType::F32 => TensorValue::F32(Tensor::from_vec(window)),
            OutputType::I64 => {
                TensorValue::I64(Tensor::from_vec(window.iter().map(|v| v.round() as i64).collect()))
            }
        })
    }
}

impl TensorProgram for CandleProgram {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn bind(&mut self, name: &str, value: &TensorValue) -> Result<()> {
        if !self.input_names.iter().any(|input| input == name) {
            return Err(InferError::NotFound(format!("program input '{}'", name)));
        }
        let values = value.to_f32().data;
        let len = values.len();
        let tensor = candle_core::Tensor::from_vec(values, (1, len), &self.device)?;
        self.bound.insert(name.to_string(), tensor);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let mut parts = Vec::with_capacity(self.input_names.len());
        for name in &self.input_names {
            let tensor = self
                .bound
                .get(name)
                .ok_or_else(|| InferError::NotFound(format!("unbound input '{}'", name)))?;
            parts.push(tensor.clone());
        }
        self.hidden = Some(candle_core::Tensor::cat(&parts, 1)?);
        self.readback.clear();
        self.cursor = 0;
        Ok(())
    }

    fn step(&mut self) -> Result<bool> {
        let Some((linear, activation)) = self.layers.get(self.cursor) else {
            return Ok(false);
        };
        let hidden = self
            .hidden
            .as_ref()
            .ok_or_else(|| InferError::Runtime("step before start".to_string()))?;
        let out = linear.forward(hidden)?;
        let out = match activation {
            Activation::None => out,
            Activation::Relu => out.relu()?,
            Activation::Tanh => out.tanh()?,
        };
        self.hidden = Some(out);
        self.cursor += 1;
        Ok(self.cursor < self.layers.len())
    }

    fn current_layer(&self) -> usize {
        self.cursor
    }

    fn output(&mut self, name: &str) -> Result<TensorValue> {
        let values = self.hidden_values()?;
        self.slice_output(name, &values)
    }

    fn request_output(&mut self, name: &str) -> Result<()> {
        self.output_descriptor(name)?;
        if !self.readback.contains_key(name) {
            let values = self.hidden_values()?;
            self.readback.insert(name.to_string(), values);
        }
        Ok(())
    }

    fn poll_output(&mut self, name: &str) -> Result<Option<TensorValue>> {
        match self.readback.remove(name) {
            Some(values) => self.slice_output(name, &values).map(Some),
            None => Ok(None),
        }
    }

    fn dispose(&mut self) {
        self.bound.clear();
        self.readback.clear();
        self.hidden = None;
    }
}
