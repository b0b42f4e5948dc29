use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tch::Tensor;

pub fn _gelu(x: &Tensor) -> Tensor {
    x * 0.5 * (1.0 + (x / ((2.0_f64).sqrt())).erf())
}

pub fn _relu(x: &Tensor) -> Tensor {
    x.relu()
}

pub fn _gelu_new(x: &Tensor) -> Tensor {
    x * 0.5 * (((x.pow(3.0f64) * 0.044715 + x) * ((2f64 / PI).sqrt())).tanh() + 1.0)
}

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
/// # Activation function used in the feed-forward blocks
pub enum Activation {
    /// Rectified Linear Unit
    relu,
    /// Gaussian Error Linear Unit
    gelu,
    /// Tanh approximation of the Gaussian Error Linear Unit
    gelu_new,
}

impl Default for Activation {
    fn default() -> Self {
        Activation::relu
    }
}

impl Activation {
    pub fn get_function(&self) -> fn(&Tensor) -> Tensor {
        match self {
            Activation::relu => _relu,
            Activation::gelu => _gelu,
            Activation::gelu_new => _gelu_new,
        }
    }
}
