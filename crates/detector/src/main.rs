//! Instrumentation detector
//!
//! Runs inside a short-lived pod on the target's node with the host PID
//! namespace, detects the language and application of each requested
//! container and writes the result to the termination-message path.

use anyhow::{Context, Result};
use clap::Parser;
use instrumentor_lib::consts::TERMINATION_MESSAGE_PATH;
use instrumentor_lib::detection::{
    detect_pod, publish_result, DetectionRunner, ElfRuntimeIntrospector, ProcessSampler,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Language and application detector for instrumentation
#[derive(Parser, Debug)]
#[command(name = "instrumentation-detector")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// UID of the pod to inspect
    #[arg(long)]
    pub pod_uid: String,

    /// Containers of the pod to inspect
    #[arg(long, value_delimiter = ',')]
    pub container_names: Vec<String>,

    /// Where the detection result is written
    #[arg(long, default_value = TERMINATION_MESSAGE_PATH)]
    pub output: PathBuf,

    /// Mount point of the host's procfs
    #[arg(long, env = "HOST_PROC", default_value = "/proc")]
    pub proc_root: PathBuf,
}

fn main() -> Result<()> {
    // Logs go to stderr; the result file is the only output that matters
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    info!(
        pod_uid = %args.pod_uid,
        containers = ?args.container_names,
        proc_root = %args.proc_root.display(),
        "Starting detection"
    );

    let sampler = ProcessSampler::new(&args.proc_root);
    let runner = DetectionRunner::new(&args.proc_root, Box::new(ElfRuntimeIntrospector));

    let result = detect_pod(&sampler, &runner, &args.pod_uid, &args.container_names)
        .context("could not find processes")?;
    publish_result(&args.output, &result).context("could not publish detection result")?;

    info!(
        languages = result.language_by_container.len(),
        applications = result.application_by_container.len(),
        output = %args.output.display(),
        "Detection result published"
    );
    Ok(())
}
