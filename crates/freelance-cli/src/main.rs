//! Freelance CLI: an echo server and a one-shot request client.
//!
//! Start a few servers, then point `request` at all of them and stop the
//! servers one by one to watch the client fail over.

mod cli;

use crate::cli::{Cli, Commands};
use clap::Parser;
use freelance::{
    load_config, ClientFrontend, FreelanceConfig, FreelanceError, FreelanceResult, Message,
    ServerFrontend,
};
use tracing::info;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let config = load_config(cli.config.as_deref());
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start the async runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async move {
        match cli.command {
            Commands::Serve { bind, identity } => cmd_serve(config, &bind, identity).await,
            Commands::Request { connect, frames } => cmd_request(config, &connect, frames).await,
        }
    });

    match result {
        Ok(()) => {}
        Err(FreelanceError::RequestTimeout) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn cmd_serve(
    config: FreelanceConfig,
    bind: &str,
    identity: Option<String>,
) -> FreelanceResult<()> {
    let mut server = ServerFrontend::new(config)?;
    if let Some(identity) = identity {
        server.set_identity(identity).await?;
    }
    let bound = server.bind(bind).await?;
    println!("{bound}");
    info!(endpoint = %bound, "Echo server ready");

    loop {
        tokio::select! {
            request = server.receive() => {
                let request = request?;
                server.send(request).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    server.destroy().await;
    Ok(())
}

async fn cmd_request(
    config: FreelanceConfig,
    endpoints: &[String],
    frames: Vec<String>,
) -> FreelanceResult<()> {
    let mut client = ClientFrontend::new(config)?;
    for endpoint in endpoints {
        client.connect(endpoint).await?;
    }

    let result = client.request(Message::from_frames(frames)).await;
    client.destroy().await;

    match result {
        Ok(reply) => {
            for frame in reply.iter() {
                println!("{}", String::from_utf8_lossy(frame));
            }
            Ok(())
        }
        Err(FreelanceError::RequestTimeout) => {
            println!("FAILED");
            Err(FreelanceError::RequestTimeout)
        }
        Err(e) => Err(e),
    }
}
