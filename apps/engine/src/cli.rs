use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "ats-engine",
    about = "Submit tailored job applications through applicant tracking systems",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply to one job, or to the oldest docs_ready jobs
    Apply(ApplyArgs),
    /// Show jobs waiting for an application
    List(ListArgs),
}

#[derive(Args, Debug, Default)]
pub struct ApplyArgs {
    /// Apply to this job only
    #[arg(conflicts_with_all = ["batch", "max_jobs"])]
    pub job_id: Option<String>,
    /// Pick the job from a list on the console
    #[arg(long, short, conflicts_with = "no_intervention")]
    pub interactive: bool,
    /// Apply to the N oldest docs_ready jobs
    #[arg(long, value_name = "N", conflicts_with = "max_jobs")]
    pub batch: Option<usize>,
    /// Upper bound on jobs taken from the queue (defaults to MAX_JOBS_PER_RUN)
    #[arg(long, value_name = "N")]
    pub max_jobs: Option<usize>,
    /// Jobs applied to concurrently (defaults to WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,
    /// Never wait for a human; stopped jobs become application_failed_ats
    #[arg(long)]
    pub no_intervention: bool,
}

impl ApplyArgs {
    /// How many queued jobs to take when no job id is given.
    pub fn queue_limit(&self, default: usize) -> usize {
        self.batch.or(self.max_jobs).unwrap_or(default)
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
