pub mod collate;
pub mod config;
pub mod ctc;
pub mod distill;
pub mod error;
pub mod loader;
pub mod model;
pub mod vocab;

pub use collate::{collate_sources, PaddedBatch};
pub use config::{ModelConfig, ModelType};
pub use ctc::collapse::{collapse_ids, CollapseMode, CollapsedSequence, CtcCollapser};
pub use ctc::decode::TextDecoder;
pub use distill::{ExtractedFeatures, TeacherModel};
pub use error::DistillError;
pub use loader::{load_model_and_config, LoadedModel};
pub use model::{HubertModel, PretrainedModel, Wav2Vec2ForCtc, Wav2Vec2Model};
