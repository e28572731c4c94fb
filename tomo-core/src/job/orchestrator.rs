use super::result;
use crate::config::EngineConfig;
use crate::delivery::sinogram::{LeafSinogram, decode_plan};
use crate::delivery::timeline::{EventTimeline, build};
use crate::domain::{DoseVolume, ImageVolume, PlanRecord};
use crate::engine::EngineGateway;
use crate::error::{Result, TomoError};
use crate::stage::InputStager;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Speed/quality knobs passed through to the solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoseOptions {
    /// Transverse downsample factor of the dose grid.
    pub downsample: usize,
    pub azimuths: u32,
    pub ray_steps: u32,
    pub super_sample: bool,
    /// Prefer the CPU solver over the GPU one.
    pub use_secondary_engine: bool,
}

impl Default for DoseOptions {
    fn default() -> Self {
        Self {
            downsample: 2,
            azimuths: 5,
            ray_steps: 1,
            super_sample: true,
            use_secondary_engine: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DoseJobRequest<'a> {
    pub image: &'a ImageVolume,
    pub plan: &'a PlanRecord,
    pub timeline: &'a EventTimeline,
    pub sinogram: &'a LeafSinogram,
    pub options: &'a DoseOptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Validating,
    Staging,
    Dispatching,
    Succeeded,
    Failed,
}

/// Runs dose jobs one at a time against a lazily discovered engine,
/// keeping the staging directory between jobs.
pub struct DoseJobOrchestrator {
    gateway: EngineGateway,
    stager: InputStager,
    state: JobState,
    completed: u64,
}

impl DoseJobOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_gateway(EngineGateway::new(config))
    }

    pub fn with_gateway(gateway: EngineGateway) -> Self {
        Self {
            stager: InputStager::new(gateway.config()),
            gateway,
            state: JobState::Idle,
            completed: 0,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn gateway(&self) -> &EngineGateway {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut EngineGateway {
        &mut self.gateway
    }

    pub fn stager(&self) -> &InputStager {
        &self.stager
    }

    /// Successful jobs so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    fn enter(&mut self, state: JobState) {
        debug!(from = ?self.state, to = ?state, "job state");
        self.state = state;
    }

    pub fn submit(&mut self, request: &DoseJobRequest<'_>) -> Result<DoseVolume> {
        match self.execute(request) {
            Ok(dose) => {
                self.enter(JobState::Succeeded);
                self.completed += 1;
                info!(
                    plan = %request.plan.uid,
                    image = %request.image.uid,
                    max = dose.max(),
                    "dose job succeeded"
                );
                Ok(dose)
            }
            Err(e) => {
                self.enter(JobState::Failed);
                warn!(plan = %request.plan.uid, image = %request.image.uid, error = %e, "dose job failed");
                Err(TomoError::Job {
                    plan_uid: request.plan.uid.clone(),
                    image_uid: request.image.uid.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn execute(&mut self, request: &DoseJobRequest<'_>) -> Result<DoseVolume> {
        self.enter(JobState::Validating);
        if !self.gateway.discover().is_available() {
            return Err(TomoError::EngineUnavailable);
        }
        InputStager::validate(request)?;

        self.enter(JobState::Staging);
        let staged = self.stager.stage(request)?;

        self.enter(JobState::Dispatching);
        let run = self.gateway.run(&staged, request.options)?;
        if !run.ok {
            return Err(TomoError::ExternalEngine { output: run.output });
        }
        result::load(&run.result, request.image, request.options.downsample)
    }

    /// Decode the plan's sinogram, build its timeline and submit.
    pub fn submit_plan(
        &mut self,
        image: &ImageVolume,
        plan: &PlanRecord,
        options: &DoseOptions,
    ) -> Result<DoseVolume> {
        let policy = self.gateway.config().midpoint_policy;
        let (sinogram, timeline) = decode_plan(plan, policy)
            .and_then(|s| Ok((s, build(&plan.actions, plan.total_tau)?)))
            .map_err(|e| TomoError::Job {
                plan_uid: plan.uid.clone(),
                image_uid: image.uid.clone(),
                source: Box::new(e),
            })?;
        self.submit(&DoseJobRequest {
            image,
            plan,
            timeline: &timeline,
            sinogram: &sinogram,
            options,
        })
    }
}
