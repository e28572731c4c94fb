#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod policy;

pub mod util {
    pub mod le;
}

pub mod delivery {
    pub mod sinogram;
    pub mod timeline;
}

pub mod engine;
pub mod stage;

pub mod job {
    pub mod orchestrator;
    pub mod resample;
    pub mod result;
}

// Re-exports: stable API surface
pub use config::EngineConfig;
pub use delivery::sinogram::{ActiveWindow, LeafSinogram, decode};
pub use delivery::timeline::{EventKind, EventTimeline, EventValue, RawActions, TimelineEvent, build};
pub use domain::{DoseVolume, ImageVolume, PlanRecord, RegistrationCorrection};
pub use engine::{EngineGateway, EngineHandle, EngineKind};
pub use job::orchestrator::{DoseJobOrchestrator, DoseJobRequest, DoseOptions, JobState};
pub use stage::{InputStager, StagedInputs};
