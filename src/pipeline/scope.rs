// Temporary device moves for a model held in an `Option` slot.
//
//   {
//       let scope = DeviceScope::enter(&mut self.model, original, cpu);
//       export(scope.model()?)?;          // may fail
//   }                                     // back on `original` either way
//
// burn modules move by value, so the guard borrows the slot
// itself and swaps the model in and out of it.

use burn::prelude::*;

use crate::error::{Error, Result};

pub struct DeviceScope<'a, B: Backend, M: Module<B>> {
    slot:     &'a mut Option<M>,
    original: B::Device,
}

impl<'a, B: Backend, M: Module<B>> DeviceScope<'a, B, M> {
    pub fn enter(slot: &'a mut Option<M>, original: B::Device, target: B::Device) -> Self {
        if let Some(model) = slot.take() {
            tracing::debug!("Moving model to {:?}", target);
            *slot = Some(model.to_device(&target));
        }
        Self { slot, original }
    }

    pub fn model(&self) -> Result<&M> {
        self.slot
            .as_ref()
            .ok_or_else(|| Error::config("model", "no model in this pipeline yet"))
    }
}

impl<B: Backend, M: Module<B>> Drop for DeviceScope<'_, B, M> {
    fn drop(&mut self) {
        if let Some(model) = self.slot.take() {
            *self.slot = Some(model.to_device(&self.original));
            tracing::debug!("Model restored to {:?}", self.original);
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::{Fcnn, FcnnConfig};
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn test_model_returns_after_failed_work() {
        let device = Default::default();
        let mut slot: Option<Fcnn<B>> = Some(FcnnConfig::linear().init(2, 1, &device));

        let result: Result<()> = (|| {
            let scope = DeviceScope::<B, _>::enter(&mut slot, device, device);
            scope.model()?;
            Err(Error::config("export", "boom"))
        })();

        assert!(result.is_err());
        assert!(slot.is_some());
        assert_eq!(slot.unwrap().devices(), vec![device]);
    }

    #[test]
    fn test_empty_slot_is_config_error() {
        let device = Default::default();
        let mut slot: Option<Fcnn<B>> = None;
        let scope = DeviceScope::<B, _>::enter(&mut slot, device, device);
        assert!(scope.model().is_err());
    }
}
