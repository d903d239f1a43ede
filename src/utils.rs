/// Utility functions
use candle_core::{Device, Tensor, Var};

use crate::{Result, TaggerError};

/// Calculate the number of parameters in a tensor
pub fn count_parameters(tensor: &Tensor) -> usize {
    tensor.dims().iter().product()
}

/// Total number of trainable scalars across variables
pub fn count_var_parameters(vars: &[Var]) -> usize {
    vars.iter().map(|v| count_parameters(v.as_tensor())).sum()
}

/// Parse an execution target: `cpu`, `cuda`, `cuda:N`, `metal` or `metal:N`
pub fn parse_device(spec: &str) -> Result<Device> {
    let spec = spec.trim().to_ascii_lowercase();
    let (kind, ordinal) = match spec.split_once(':') {
        Some((kind, ordinal)) => {
            let ordinal = ordinal
                .parse::<usize>()
                .map_err(|_| TaggerError::Config(format!("invalid device ordinal in {:?}", spec)))?;
            (kind.to_string(), ordinal)
        }
        None => (spec.clone(), 0),
    };

    match kind.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::new_cuda(ordinal)?),
        "metal" => Ok(Device::new_metal(ordinal)?),
        other => Err(TaggerError::Config(format!(
            "Invalid device: {}. Must be 'cpu', 'cuda[:N]' or 'metal[:N]'",
            other
        ))),
    }
}
