/// Neural network layer primitives
///
/// - Activations (tanh, ReLU) with their derivatives, and softmax
/// - Dense layers with Xavier initialization and dtype casting

pub mod activations;
pub mod linear;

pub use activations::Activation;
pub use linear::DenseLayer;
