use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tomo_core::DoseOptions;
use tomo_core::policy::MidpointPolicy;

#[derive(Parser)]
#[command(author, version, about = "tomodev CLI (alpha)", long_about = None)]
pub struct Cli {
    /// Engine configuration (JSON); defaults plus TOMO_* environment when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    Reject,
    Clamp,
    Drop,
}

impl From<PolicyArg> for MidpointPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Reject => MidpointPolicy::Reject,
            PolicyArg::Clamp => MidpointPolicy::Clamp,
            PolicyArg::Drop => MidpointPolicy::Drop,
        }
    }
}

/// Plan and image inputs shared by the staging commands.
#[derive(Args)]
pub struct JobInputs {
    /// Plan record (JSON); a relative sinogram path resolves against its directory
    pub plan: PathBuf,
    /// Image geometry header (JSON)
    pub image: PathBuf,
    /// Raw u16 voxel grid for the image
    pub voxels: PathBuf,
}

#[derive(Args)]
pub struct SolverArgs {
    #[arg(long, default_value_t = 2)]
    pub downsample: usize,
    #[arg(long, default_value_t = 5)]
    pub azimuths: u32,
    #[arg(long = "ray-steps", default_value_t = 1)]
    pub ray_steps: u32,
    #[arg(long = "no-super-sample")]
    pub no_super_sample: bool,
    /// Run the CPU solver even when the GPU one is installed
    #[arg(long)]
    pub secondary: bool,
}

impl From<&SolverArgs> for DoseOptions {
    fn from(a: &SolverArgs) -> Self {
        DoseOptions {
            downsample: a.downsample,
            azimuths: a.azimuths,
            ray_steps: a.ray_steps,
            super_sample: !a.no_super_sample,
            use_secondary_engine: a.secondary,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode a plan's leaf sinogram and print the active window
    Decode {
        plan: PathBuf,
        /// Override the configured out-of-range midpoint handling
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
        /// Also print every non-zero leaf row
        #[arg(long)]
        rows: bool,
    },

    /// Print a plan's delivery timeline
    Timeline { plan: PathBuf },

    /// Write engine inputs into a staging directory and keep it
    Stage {
        #[command(flatten)]
        inputs: JobInputs,
        #[command(flatten)]
        solver: SolverArgs,
    },

    /// Probe for a local or remote dose engine
    Discover,

    /// Run a full dose calculation
    Calc {
        #[command(flatten)]
        inputs: JobInputs,
        #[command(flatten)]
        solver: SolverArgs,
        /// Output path for the f32 dose grid
        #[arg(long, default_value = "dose.raw")]
        out: PathBuf,
    },
}
