mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ferroposh_core::{
    default_pipe_name, Connection, OutOfProcTransport, PipeConnection, ShimEngine,
    StdioConnection,
};
use tracing::info;

use config::{init_logging, Args};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(log_file) = &args.log_file {
        init_logging(log_file, args.log_level).context("Failed to initialize logging")?;
    }

    let conn: Box<dyn Connection> = if args.pipe {
        let pipe_name = match args.pipe_name {
            Some(path) => path,
            None => default_pipe_name().context("Failed to derive the default pipe name")?,
        };
        // The banner goes to stdout on purpose: in pipe mode stdout is
        // free, and callers scrape the path from it.
        println!(
            "Starting ferroposh PSRP server [PID {} - Pipe {}]",
            std::process::id(),
            pipe_name.display()
        );
        Box::new(PipeConnection::new(pipe_name))
    } else {
        Box::new(StdioConnection::new())
    };

    info!("starting ferroposh PSRP server");
    let transport = OutOfProcTransport::new(conn, Arc::new(ShimEngine::new()));
    transport.run().context("PSRP server failed")?;

    Ok(())
}
