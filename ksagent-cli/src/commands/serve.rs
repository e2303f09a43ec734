//! Serves one agent connection over stdio
//!
//! Each stdin line is one inbound command; each outbound frame is written to
//! stdout as one line. End of stdin is treated as connection loss.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use ksagent_core::{AgentRouter, MemoryCluster};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{info, warn};

use crate::config::{ConfigLoader, KsagentConfig};

/// Cluster served when no fixture is given
const DEMO_FIXTURE: &str = include_str!("../../fixtures/demo.json");

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// JSON fixture to seed the in-memory cluster from
    #[arg(long, value_name = "FILE")]
    pub fixture: Option<PathBuf>,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let cluster = load_cluster(args.fixture.as_ref())?;
    let router = build_router(cluster, &config)?;

    let inbound = LinesStream::new(BufReader::new(tokio::io::stdin()).lines())
        .map_while(|line| match line {
            Ok(line) => Some(line),
            Err(err) => {
                warn!("Failed to read stdin: {}", err);
                None
            }
        })
        .filter(|line| !line.trim().is_empty());

    let outbound = Box::pin(futures::sink::unfold(
        tokio::io::stdout(),
        |mut stdout, frame: String| async move {
            stdout.write_all(frame.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
            Ok::<_, std::io::Error>(stdout)
        },
    ));

    let connection = router.connection();
    info!(connection_id = %connection.id(), "Serving on stdio");
    let torn_down = connection.serve(inbound, outbound).await;
    info!(sessions = torn_down, "Input closed");
    Ok(())
}

fn load_cluster(fixture: Option<&PathBuf>) -> Result<Arc<MemoryCluster>> {
    let cluster = match fixture {
        Some(path) => MemoryCluster::from_fixture_file(path)
            .with_context(|| format!("loading fixture {}", path.display()))?,
        None => MemoryCluster::from_fixture(DEMO_FIXTURE).context("loading demo fixture")?,
    };
    Ok(Arc::new(cluster))
}

fn build_router(cluster: Arc<MemoryCluster>, config: &KsagentConfig) -> Result<AgentRouter> {
    Ok(AgentRouter::new(
        cluster,
        config.router.clone(),
        config.sessions.clone(),
    )?)
}
