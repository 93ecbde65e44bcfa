use bytes::Bytes;
use core::{fmt, hint::black_box};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::stream::{FuturesUnordered, StreamExt};
use std::{
    net::TcpStream,
    process::{Command, Stdio},
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::{Duration, Instant},
};
use taskstream_core::{
    Error, WorkItem,
    client::Submitter,
    proto::{ResultRequest, submitter_client::SubmitterClient},
};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tonic::{
    codec::CompressionEncoding,
    transport::{Channel, Uri},
};

#[derive(Clone, Copy, Debug)]
enum Compression {
    None,
    Deflate,
    Gzip,
    Zstd,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Deflate => write!(f, "deflate"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

impl From<Compression> for Option<CompressionEncoding> {
    fn from(value: Compression) -> Self {
        match value {
            Compression::None => None,
            Compression::Deflate => Some(CompressionEncoding::Deflate),
            Compression::Gzip => Some(CompressionEncoding::Gzip),
            Compression::Zstd => Some(CompressionEncoding::Zstd),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RoundTripParams {
    payload_bytes: usize,
    concurrency: usize,
    compression: Compression,
}

// Every round trip submits into its own session so task ids never collide.
static SESSIONS: AtomicU64 = AtomicU64::new(0);

fn grpc_bench(c: &mut Criterion) {
    let uri = Uri::try_from("http://127.0.0.1:50051").expect("Invalid URI");
    // Start the server. This may require a full compilation so set the timeout
    // high. Adjust features and CLI args to the server as necessary.
    let mut server = Command::new("cargo")
        .args([
            "run",
            "--bin",
            "taskstream-server",
            "--release",
            "--",
            "--num-workers",
            "16",
            "--server-addr",
            "127.0.0.1:50051",
        ])
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("Failed to start taskstream-server");
    wait_for_port(uri.authority().expect("missing authority").as_str(), 300);

    let payload_cases = [64 * 1024, 1024 * 1024, 8 * 1024 * 1024];
    let concurrency_cases = [1, 4, 16];
    let compression_cases = [
        Compression::None,
        Compression::Zstd,
        Compression::Gzip,
        Compression::Deflate,
    ];

    let mut cases = Vec::new();
    for &payload_bytes in &payload_cases {
        for &concurrency in &concurrency_cases {
            for &compression in &compression_cases {
                cases.push(RoundTripParams {
                    payload_bytes,
                    concurrency,
                    compression,
                });
            }
        }
    }
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();

    for params in &cases {
        let mut group = c.benchmark_group("grpc/submit_and_fetch");
        group.throughput(Throughput::Bytes(
            (params.payload_bytes * params.concurrency) as u64,
        ));

        group.bench_function(
            format!(
                "bytes/{}/conc/{}/comp/{}",
                params.payload_bytes, params.concurrency, params.compression,
            ),
            |b| {
                b.to_async(&rt).iter_custom(|iters| {
                    let uri = uri.clone();
                    async move {
                        let channel = Channel::builder(uri)
                            .connect()
                            .await
                            .expect("Failed to connect to server");

                        let start = Instant::now();

                        for _ in 0..iters {
                            run_round_trips(&channel, params).await;
                        }

                        start.elapsed()
                    }
                });
            },
        );

        group.finish();
    }

    if server.kill().is_err() {
        eprintln!("failed to kill server");
    }
}

async fn run_round_trips(channel: &Channel, params: &RoundTripParams) {
    let mut tasks = FuturesUnordered::new();

    for _ in 0..params.concurrency {
        let channel = channel.clone();
        let compression = params.compression;
        let payload = Bytes::from(vec![0xA5_u8; params.payload_bytes]);

        tasks.push(tokio::spawn(async move {
            let mut client = SubmitterClient::new(channel);
            if let Some(encoding) = compression.into() {
                client = client.accept_compressed(encoding).send_compressed(encoding);
            }
            let submitter = Submitter::from_client(client);
            let cancel = CancellationToken::new();
            let session = format!("bench-{}", SESSIONS.fetch_add(1, Ordering::Relaxed));

            let item = WorkItem::new("task", payload.clone()).with_expected_output_keys(["out"]);
            submitter
                .submit(&session, None, [item], &cancel)
                .await
                .expect("submit failed");

            let request = ResultRequest {
                session,
                result_id: "out".to_string(),
            };
            loop {
                match submitter.fetch_result(request.clone(), &cancel).await {
                    Ok(result) => {
                        assert_eq!(result.len(), payload.len(), "Corrupt result");
                        black_box(result);
                        break;
                    }
                    Err(Error::TaskIncomplete { .. }) => tokio::task::yield_now().await,
                    Err(e) => panic!("fetch failed: {e}"),
                }
            }
        }));
    }

    while let Some(res) = tasks.next().await {
        res.unwrap();
    }
}

pub fn wait_for_port(addr: &str, timeout_secs: u64) {
    let start = Instant::now();
    while start.elapsed().as_secs() < timeout_secs {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Server did not start listening on {}", addr);
}

criterion_group!(grpc_benches, grpc_bench);
criterion_main!(grpc_benches);
