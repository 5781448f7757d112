// ============================================================
// Layer 5: ML / Model Layer (Burn)
// ============================================================
// Everything that runs tensors: the model, losses, optimizers,
// the training loop and both inference paths (native and ONNX).
//
// What's in this layer:
//
//   protocol.rs    ModelProtocol, Loss and Trainer contracts
//   model.rs       fully connected network (fcnn / linear)
//   loss.rs        mae, mse, cross_entropy
//   metrics.rs     host-side metrics and their weighted score
//   monitor.rs     snapshot / early-stop policies
//   callback.rs    metrics logging and optimizer defaults
//   optim.rs       burn optimizers behind one step function,
//                  plus learning-rate schedules
//   trainer.rs     the epoch loop and checkpointing
//   inference.rs   loader → outputs, in dataset order
//   registries.rs  name → factory tables for all of the above
//   onnx/          graph export and a small runtime for it
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Model, loss and trainer contracts
pub mod protocol;

/// Fully connected network
pub mod model;

pub mod loss;
pub mod metrics;
pub mod monitor;
pub mod callback;
pub mod optim;

/// Epoch loop with evaluation, monitors and checkpointing
pub mod trainer;

/// Native and ONNX-backed batch inference
pub mod inference;

pub mod registries;

/// ONNX export and runtime
pub mod onnx;

pub use inference::{GetOutputsOptions, Inference, InferenceOutputs};
pub use model::{Fcnn, FcnnConfig};
pub use protocol::{Loss, ModelProtocol, Trainer};
pub use registries::Registries;
pub use trainer::LoopTrainer;
