// ============================================================
// Layer 5: Optimizers and learning-rate schedules
// ============================================================
// An OptimizerPack ({optimizer, scheduler, *_config}) is turned
// into a type-erased step function plus a scheduler, so the
// trainer loop does not care which burn optimizer it drives.
//
//   adam   m = β1·m + (1-β1)·g ; v = β2·v + (1-β2)·g²
//          θ = θ - lr · m / (√v + ε)
//   adamw  adam with decoupled weight decay
//   sgd    θ = θ - lr · (g + momentum buffer)
//
// `clip_norm > 0` clips gradients by global norm before the step.
//
// Schedules map (base lr, global step) → lr:
//
//   constant  lr
//   warmup    ramps linearly from lr / multiplier up to lr over
//             `warmup_step` steps, then stays at lr
//   step      lr · gamma^(step / step_size)
//
// Reference: Burn Book §5 (Training), Kingma & Ba (2015) Adam

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, AdamWConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::settings::OptimizerPack;
use crate::error::{Error, Result};

pub const ADAM: &str = "adam";
pub const ADAMW: &str = "adamw";
pub const SGD: &str = "sgd";

pub const OPTIMIZERS: [&str; 3] = [ADAM, ADAMW, SGD];

/// Default learning rate per optimizer.
pub fn default_lr(optimizer: &str) -> f64 {
    match optimizer {
        SGD => 1e-2,
        _ => 1e-3,
    }
}

fn parse<T: for<'de> Deserialize<'de> + Default>(field: &str, config: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(config.clone())).map_err(|e| Error::config(field, e.to_string()))
}

/// Check one scope's names and configs without building an optimizer.
/// An unset optimizer or scheduler is left for `_default_opt_settings`.
pub fn check_pack(scope: &str, pack: &OptimizerPack) -> Result<()> {
    let field = format!("trainer.optimizer_settings.{scope}");
    if let Some(name) = pack.optimizer.as_deref() {
        if !OPTIMIZERS.contains(&name) {
            return Err(Error::config(
                format!("{field}.optimizer"),
                format!("unknown optimizer '{name}' (known: {})", OPTIMIZERS.join(", ")),
            ));
        }
    }
    parse::<OptimizerConfig>(&format!("{field}.optimizer_config"), &pack.optimizer_config)?;
    if pack.scheduler.is_some() {
        LrScheduler::from_pack(pack.scheduler.as_deref(), &pack.scheduler_config)
            .map_err(|e| Error::config(format!("{field}.scheduler"), e.to_string()))?;
    }
    Ok(())
}

// ─── Schedulers ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct WarmupConfig {
    multiplier:  f64,
    warmup_step: usize,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self { multiplier: 3.0, warmup_step: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StepConfig {
    step_size: usize,
    gamma:     f64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self { step_size: 1000, gamma: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LrScheduler {
    Constant,
    Warmup { multiplier: f64, warmup_step: usize },
    Step { step_size: usize, gamma: f64 },
}

impl LrScheduler {
    pub fn from_pack(name: Option<&str>, config: &Map<String, Value>) -> Result<Self> {
        match name.unwrap_or("constant") {
            "constant" => Ok(LrScheduler::Constant),
            "warmup" => {
                let c: WarmupConfig = parse("scheduler_config", config)?;
                if c.multiplier < 1.0 || c.warmup_step == 0 {
                    return Err(Error::config(
                        "scheduler_config",
                        "warmup needs multiplier >= 1 and a positive warmup_step",
                    ));
                }
                Ok(LrScheduler::Warmup { multiplier: c.multiplier, warmup_step: c.warmup_step })
            }
            "step" => {
                let c: StepConfig = parse("scheduler_config", config)?;
                if c.step_size == 0 {
                    return Err(Error::config("scheduler_config.step_size", "must be positive"));
                }
                Ok(LrScheduler::Step { step_size: c.step_size, gamma: c.gamma })
            }
            other => Err(Error::config("scheduler", format!("unknown scheduler '{other}'"))),
        }
    }

    pub fn lr(&self, base: f64, step: usize) -> f64 {
        match *self {
            LrScheduler::Constant => base,
            LrScheduler::Warmup { multiplier, warmup_step } => {
                let progress = step.min(warmup_step) as f64 / warmup_step as f64;
                let start    = 1.0 / multiplier;
                base * (start + (1.0 - start) * progress)
            }
            LrScheduler::Step { step_size, gamma } => base * gamma.powi((step / step_size) as i32),
        }
    }
}

// ─── Optimizers ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct OptimizerConfig {
    lr:           Option<f64>,
    beta_1:       Option<f32>,
    beta_2:       Option<f32>,
    epsilon:      Option<f32>,
    weight_decay: Option<f32>,
    momentum:     Option<f64>,
}

type StepFn<M> = Box<dyn FnMut(f64, M, GradientsParams) -> M>;

fn boxed<B, M, O>(mut optim: O) -> StepFn<M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B> + 'static,
{
    Box::new(move |lr, module, grads| optim.step(lr, module, grads))
}

/// A ready-to-step optimizer with its schedule.
pub struct ScheduledOptimizer<M> {
    name:      String,
    base_lr:   f64,
    scheduler: LrScheduler,
    step_fn:   StepFn<M>,
}

impl<M> std::fmt::Debug for ScheduledOptimizer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledOptimizer")
            .field("name", &self.name)
            .field("base_lr", &self.base_lr)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl<M: 'static> ScheduledOptimizer<M> {
    pub fn build<B>(pack: &OptimizerPack, clip_norm: f64) -> Result<Self>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let name     = pack.optimizer.clone().unwrap_or_else(|| ADAM.to_string());
        let config: OptimizerConfig = parse("optimizer_config", &pack.optimizer_config)?;
        let base_lr  = config.lr.unwrap_or_else(|| default_lr(&name));
        if !(base_lr.is_finite() && base_lr > 0.0) {
            return Err(Error::config("optimizer_config.lr", format!("{base_lr} is not a positive learning rate")));
        }
        let clipping = (clip_norm > 0.0).then(|| GradientClippingConfig::Norm(clip_norm as f32));

        let step_fn = match name.as_str() {
            ADAM => {
                let mut c = AdamConfig::new().with_grad_clipping(clipping);
                if let Some(b) = config.beta_1 { c = c.with_beta_1(b); }
                if let Some(b) = config.beta_2 { c = c.with_beta_2(b); }
                if let Some(e) = config.epsilon { c = c.with_epsilon(e); }
                if let Some(w) = config.weight_decay { c = c.with_weight_decay(Some(WeightDecayConfig::new(w))); }
                boxed::<B, M, _>(c.init::<B, M>())
            }
            ADAMW => {
                let mut c = AdamWConfig::new().with_grad_clipping(clipping);
                if let Some(b) = config.beta_1 { c = c.with_beta_1(b); }
                if let Some(b) = config.beta_2 { c = c.with_beta_2(b); }
                if let Some(e) = config.epsilon { c = c.with_epsilon(e); }
                if let Some(w) = config.weight_decay { c = c.with_weight_decay(w); }
                boxed::<B, M, _>(c.init::<B, M>())
            }
            SGD => {
                let mut c = SgdConfig::new().with_gradient_clipping(clipping);
                if let Some(m) = config.momentum { c = c.with_momentum(Some(MomentumConfig::new().with_momentum(m))); }
                if let Some(w) = config.weight_decay { c = c.with_weight_decay(Some(WeightDecayConfig::new(w))); }
                boxed::<B, M, _>(c.init::<B, M>())
            }
            other => return Err(Error::config("optimizer", format!("unknown optimizer '{other}'"))),
        };
        let scheduler = LrScheduler::from_pack(pack.scheduler.as_deref(), &pack.scheduler_config)?;
        tracing::debug!("Optimizer '{}' (lr {:e}) with {:?}", name, base_lr, scheduler);
        Ok(Self { name, base_lr, scheduler, step_fn })
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        self.scheduler.lr(self.base_lr, step)
    }

    /// Apply one update at global step `step`, returning the lr used.
    pub fn step(&mut self, step: usize, module: M, grads: GradientsParams) -> (M, f64) {
        let lr = self.lr_at(step);
        ((self.step_fn)(lr, module, grads), lr)
    }
}
