use std::path::Path;

use candle_core::{Device, Tensor};

use crate::config::ModelConfig;
use crate::error::DistillError;
use crate::loader::{load_model_and_config, LoadedModel};
use crate::model::PretrainedModel;

/// Per-layer activations harvested from one teacher forward pass.
///
/// `layer_outputs` holds one entry per encoder layer in execution order
/// (layer 0 first); entries are reference clones of the layer outputs, not
/// copies. `hidden` is the final batch-major encoder output.
#[derive(Debug, Clone)]
pub struct ExtractedFeatures {
    pub layer_outputs: Vec<Tensor>,
    pub hidden: Tensor,
}

impl ExtractedFeatures {
    pub fn num_layers(&self) -> usize {
        self.layer_outputs.len()
    }
}

/// A pretrained teacher whose intermediate representations guide student
/// training.
///
/// The wrapper is purely observational: weights and forward semantics of the
/// wrapped model are untouched, and the capture list is built locally per
/// call and returned by value, so consecutive calls cannot leak activations
/// into each other. For a CTC fine-tuned model the trunk under the task head
/// is observed; the head itself is not applied.
pub struct TeacherModel {
    model: PretrainedModel,
    config: ModelConfig,
}

impl TeacherModel {
    pub fn new(loaded: LoadedModel) -> Self {
        if !loaded.task_agnostic {
            tracing::debug!(
                model_type = loaded.model.model_type().as_str(),
                "teacher has a task head; distilling from its trunk"
            );
        }
        Self {
            model: loaded.model,
            config: loaded.config,
        }
    }

    pub fn from_checkpoint(checkpoint_dir: &Path, device: &Device) -> Result<Self, DistillError> {
        Ok(Self::new(load_model_and_config(checkpoint_dir, None, device)?))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn model(&self) -> &PretrainedModel {
        &self.model
    }

    pub fn num_layers(&self) -> usize {
        self.model.num_layers()
    }

    /// Run the teacher on `source` `(B, samples)` with an optional padding
    /// mask of matching shape (1.0 at pad) and return every encoder layer's
    /// output plus the final hidden states.
    pub fn extract_features(
        &self,
        source: &Tensor,
        padding_mask: Option<&Tensor>,
    ) -> Result<ExtractedFeatures, DistillError> {
        let mut layer_outputs = Vec::with_capacity(self.num_layers());
        let hidden = self
            .model
            .backbone()
            .extract_features(source, padding_mask, |_, out| {
                layer_outputs.push(out.clone());
            })
            .map_err(|e| DistillError::model("teacher forward pass", e))?;
        Ok(ExtractedFeatures {
            layer_outputs,
            hidden,
        })
    }
}
