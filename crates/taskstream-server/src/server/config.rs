use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use taskstream_core::ChunkLimit;

/// Runtime configuration for the `taskstream-server` binary.
///
/// These settings control the advertised chunk size, payload limits,
/// concurrency and buffering of the service. All values are parsed from CLI
/// arguments or environment variables (a `.env` file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskstream-server",
    version,
    about = "A loopback gRPC service for chunked task submission and result streaming"
)]
pub struct CliArgs {
    /// Maximum number of payload bytes per data chunk.
    ///
    /// Advertised to clients through `GetServiceConfiguration`. Submission
    /// chunks larger than this are rejected, and results are streamed back in
    /// chunks of this size.
    ///
    /// Environment variable: `DATA_CHUNK_MAX_SIZE`
    #[arg(long, env = "DATA_CHUNK_MAX_SIZE", default_value_t = 81_920)]
    pub data_chunk_max_size: i32,

    /// Maximum size of a single task payload once reassembled.
    ///
    /// Environment variable: `MAX_PAYLOAD_BYTES`
    #[arg(long, env = "MAX_PAYLOAD_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub max_payload_bytes: usize,

    /// Number of worker tasks executing accepted tasks.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Number of tasks that may queue on each worker.
    ///
    /// Environment variable: `WORK_QUEUE_SIZE`
    #[arg(long, env = "WORK_QUEUE_SIZE", default_value_t = 64)]
    pub work_queue_size: usize,

    /// Capacity of the response buffer between a result feeder and its gRPC
    /// stream.
    ///
    /// Lower values increase backpressure responsiveness; higher values
    /// enable deeper pipelining.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight streams to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/taskstream.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a
    /// file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_chunk_max_size: i32,
    pub chunk_limit: ChunkLimit,
    pub max_payload_bytes: usize,
    pub num_workers: usize,
    pub work_queue_size: usize,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub server_addr: String,
    pub uds: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let Ok(chunk_limit) = ChunkLimit::try_from(args.data_chunk_max_size) else {
            bail!(
                "DATA_CHUNK_MAX_SIZE must be greater than 0 (got {})",
                args.data_chunk_max_size
            );
        };

        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.work_queue_size == 0 {
            bail!("WORK_QUEUE_SIZE must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        Ok(Self {
            data_chunk_max_size: args.data_chunk_max_size,
            chunk_limit,
            max_payload_bytes: args.max_payload_bytes,
            num_workers: args.num_workers,
            work_queue_size: args.work_queue_size,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}
