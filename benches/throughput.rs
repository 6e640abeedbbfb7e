// benches/throughput.rs

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ipcsvc::protocol::{encode, FrameDecoder};
use ipcsvc::{IpcConfig, IpcService, IpcSocket, Recv, ServiceClass, Timeout};
use std::thread;
use std::time::Duration;

// --- Benchmarking Constants ---
const NUM_MESSAGES: usize = 1000;
const MESSAGE_SIZES: [usize; 4] = [16, 256, 4096, 65536];
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CODE: u32 = 10001;

fn codec_decode(c: &mut Criterion) {
  let mut group = c.benchmark_group("Codec_Decode");

  for size in MESSAGE_SIZES.iter() {
    let payload = vec![0xa5u8; *size];
    let mut wire = BytesMut::new();
    for _ in 0..NUM_MESSAGES {
      encode(CODE, &payload, &mut wire).unwrap();
    }
    let wire = wire.freeze();

    group.throughput(Throughput::Bytes((NUM_MESSAGES * size) as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
      b.iter(|| {
        let mut decoder = FrameDecoder::new();
        let mut src = wire.clone();
        let mut count = 0;
        while let Some(message) = decoder.decode(&mut src) {
          black_box(message);
          count += 1;
        }
        assert_eq!(count, NUM_MESSAGES);
      });
    });
  }

  group.finish();
}

// --- Socket to service round trips ---
// One echo service on a background thread; each iteration sends a batch and
// waits for every reply.
fn service_round_trip(c: &mut Criterion) {
  let root = tempfile::Builder::new().prefix("ipcb").tempdir_in("/tmp").unwrap();
  let config = IpcConfig::new(root.path(), ServiceClass::None).unwrap();
  let mut service = IpcService::start(&config, "bench").unwrap();
  let alerter = service.alerter();
  let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
  let stop_flag = stop.clone();

  let echo = thread::spawn(move || {
    while !stop_flag.load(std::sync::atomic::Ordering::Relaxed) {
      if let Ok(Recv::Immediate(d) | Recv::Wait(d)) = service.recv(Timeout::Forever) {
        if let Some(message) = d.message {
          let _ = service.send(&d.client, message.code(), message.data());
        }
      }
    }
  });

  let mut group = c.benchmark_group("Service_RoundTrip");
  for size in MESSAGE_SIZES.iter() {
    let payload = vec![0x5au8; *size];
    let mut socket = IpcSocket::open(&config, "bench", CONNECT_TIMEOUT).unwrap();

    group.throughput(Throughput::Bytes((NUM_MESSAGES * size) as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
      b.iter(|| {
        for _ in 0..NUM_MESSAGES {
          socket.write(CODE, &payload).unwrap();
          black_box(socket.read().unwrap());
        }
      });
    });
  }
  group.finish();

  stop.store(true, std::sync::atomic::Ordering::Relaxed);
  alerter.alert();
  echo.join().unwrap();
}

criterion_group!(benches, codec_decode, service_round_trip);
criterion_main!(benches);
