use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `linegrant-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a single-instance
/// deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "linegrant-server",
    version,
    about = "An HTTP service that grants each submitted line to at most one caller"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:3000"))]
    pub server_addr: String,

    /// Path of the append-only log holding every granted line.
    ///
    /// The parent directory and an empty log are created on startup if
    /// missing. Only one server instance may own a given log: serialization
    /// is per process.
    ///
    /// Environment variable: `LINES_FILE`
    #[arg(long, env = "LINES_FILE", default_value = "data/lines.txt")]
    pub lines_file: PathBuf,

    /// Optional auxiliary text file (e.g. a key or license file) exposed
    /// read-only at `GET /aux`. Seeded out of band.
    ///
    /// Environment variable: `AUX_FILE`
    #[arg(long, env = "AUX_FILE")]
    pub aux_file: Option<PathBuf>,

    /// Maximum number of non-blank lines accepted in one claim or append
    /// request.
    ///
    /// Environment variable: `MAX_BATCH_LINES`
    #[arg(long, env = "MAX_BATCH_LINES", default_value_t = 100_000)]
    pub max_batch_lines: usize,

    /// Maximum request body size in bytes.
    ///
    /// Environment variable: `MAX_BODY_BYTES`
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_body_bytes: usize,

    /// Keep the granted set in memory between claims instead of re-reading
    /// the log on every cycle. Only safe while nothing else writes the log.
    ///
    /// Environment variable: `CACHE_GRANTED`
    #[arg(long, env = "CACHE_GRANTED", default_value_t = false)]
    pub cache_granted: bool,

    /// Seconds to wait for in-flight claims to finish during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub lines_file: PathBuf,
    pub aux_file: Option<PathBuf>,
    pub max_batch_lines: usize,
    pub max_body_bytes: usize,
    pub cache_granted: bool,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.lines_file.as_os_str().is_empty() {
            bail!("LINES_FILE must not be empty");
        }

        if args.max_batch_lines == 0 {
            bail!("MAX_BATCH_LINES must be greater than 0");
        }

        if args.max_body_bytes == 0 {
            bail!("MAX_BODY_BYTES must be greater than 0");
        }

        Ok(Self {
            server_addr: args.server_addr,
            lines_file: args.lines_file,
            aux_file: args.aux_file,
            max_batch_lines: args.max_batch_lines,
            max_body_bytes: args.max_body_bytes,
            cache_granted: args.cache_granted,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
