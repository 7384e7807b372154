use crate::{error::Result, tensor_pool::TensorValue};

/// A compiled tensor program that can be executed one layer at a time.
///
/// A pass is `bind` for every input, `start`, then `step` until it returns
/// `false`, then `output` (or the `request_output`/`poll_output` pair) for
/// every output.
pub trait TensorProgram: Send {
    fn input_names(&self) -> &[String];

    fn output_names(&self) -> &[String];

    fn layer_count(&self) -> usize;

    fn bind(&mut self, name: &str, value: &TensorValue) -> Result<()>;

    /// Reset the layer cursor for a new pass over the bound inputs.
    fn start(&mut self) -> Result<()>;

    /// Execute the layer at `current_layer()`. Returns true while layers remain.
    fn step(&mut self) -> Result<bool>;

    /// Index of the next layer `step` will execute.
    fn current_layer(&self) -> usize;

    fn output(&mut self, name: &str) -> Result<TensorValue>;

    /// Begin reading an output back from the device.
    fn request_output(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Returns the output once its readback completed.
    fn poll_output(&mut self, name: &str) -> Result<Option<TensorValue>> {
        self.output(name).map(Some)
    }

    /// Release device memory held by the program.
    fn dispose(&mut self) {}
}
