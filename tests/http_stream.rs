// 该文件是 Xingren （行人计数） 项目的一部分。
// tests/http_stream.rs - HTTP 推流测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  convert::Infallible,
  io::{Read, Write},
  net::{SocketAddr, TcpStream},
  sync::{Arc, atomic::AtomicBool},
  time::Duration,
};

use crossbeam_channel::{Receiver, Sender, bounded};

use xingren::{
  config::PipelineConfig,
  frame::{FramePool, PixelFormat, RawFrame},
  input::FrameSource,
  model::NullDetector,
  server::StreamServer,
  stream::BOUNDARY,
  task::{PipelineTask, Task},
};

/// 每收到一个令牌产出一帧，令牌通道关闭后结束
struct GatedSource {
  pool: FramePool,
  gate: Receiver<()>,
}

impl FrameSource for GatedSource {
  type Error = Infallible;

  fn acquire(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    match self.gate.recv() {
      Ok(()) => Ok(self.pool.acquire(Duration::from_secs(2))),
      Err(_) => Ok(None),
    }
  }

  fn width(&self) -> u32 {
    self.pool.width()
  }

  fn height(&self) -> u32 {
    self.pool.height()
  }

  fn format(&self) -> PixelFormat {
    self.pool.format()
  }
}

fn connect(addr: SocketAddr, request: &str) -> TcpStream {
  let mut stream = TcpStream::connect(addr).unwrap();
  stream
    .set_read_timeout(Some(Duration::from_secs(10)))
    .unwrap();
  stream.write_all(request.as_bytes()).unwrap();
  stream
}

fn fetch(addr: SocketAddr, request: &str) -> String {
  let mut stream = connect(addr, request);
  let mut response = String::new();
  stream.read_to_string(&mut response).unwrap();
  response
}

/// 读到空行为止，返回响应头
fn read_head(stream: &mut TcpStream) -> String {
  let mut head = Vec::new();
  let mut byte = [0u8; 1];
  while !head.ends_with(b"\r\n\r\n") {
    stream.read_exact(&mut byte).unwrap();
    head.push(byte[0]);
  }
  String::from_utf8(head).unwrap()
}

fn dechunk(mut data: &[u8]) -> (Vec<u8>, bool) {
  let mut body = Vec::new();
  while let Some(pos) = data.windows(2).position(|w| w == b"\r\n") {
    let size = usize::from_str_radix(std::str::from_utf8(&data[..pos]).unwrap(), 16).unwrap();
    data = &data[pos + 2..];
    if size == 0 {
      return (body, data == b"\r\n");
    }
    body.extend_from_slice(&data[..size]);
    data = &data[size + 2..];
  }
  (body, false)
}

fn setup() -> (
  Sender<()>,
  xingren::task::Pipeline,
  xingren::server::ServerHandle,
) {
  let (gate_tx, gate_rx) = bounded(4);
  let source = GatedSource {
    pool: FramePool::new(2, 64, 48, PixelFormat::Rgb565),
    gate: gate_rx,
  };
  let running = Arc::new(AtomicBool::new(true));
  let pipeline = PipelineTask::new(PipelineConfig::default())
    .with_running(running.clone())
    .run_task(source, NullDetector)
    .unwrap();
  let server = StreamServer::bind("127.0.0.1:0", pipeline.frames(), running)
    .unwrap()
    .spawn()
    .unwrap();
  (gate_tx, pipeline, server)
}

#[test]
fn index_and_error_routes() {
  let (gate, pipeline, server) = setup();
  let addr = server.local_addr();

  let index = fetch(addr, "GET / HTTP/1.1\r\nHost: cam\r\n\r\n");
  assert!(index.starts_with("HTTP/1.1 200 OK\r\n"));
  assert!(index.contains("Content-Type: text/html"));
  assert!(index.contains("<img src='/stream'"));

  let missing = fetch(addr, "GET /capture HTTP/1.1\r\n\r\n");
  assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));

  let wrong_method = fetch(addr, "POST /stream HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
  assert!(wrong_method.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));

  drop(gate);
  server.stop();
  pipeline.join();
}

#[test]
fn stream_delivers_multipart_jpeg_frames() {
  let (gate, pipeline, server) = setup();
  let mut client = connect(server.local_addr(), "GET /stream HTTP/1.1\r\nHost: cam\r\n\r\n");

  let head = read_head(&mut client);
  assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
  assert!(head.contains(&format!(
    "Content-Type: multipart/x-mixed-replace;boundary={}\r\n",
    BOUNDARY
  )));
  assert!(head.contains("Transfer-Encoding: chunked\r\n"));

  gate.send(()).unwrap();
  drop(gate);

  let mut wire = Vec::new();
  client.read_to_end(&mut wire).unwrap();
  let (body, finished) = dechunk(&wire);
  assert!(finished);

  let delimiter = format!("\r\n--{}\r\n", BOUNDARY);
  assert!(body.starts_with(delimiter.as_bytes()));
  let rest = &body[delimiter.len()..];
  let header_end = rest.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
  let headers = std::str::from_utf8(&rest[..header_end]).unwrap();
  assert!(headers.starts_with("Content-Type: image/jpeg\r\nContent-Length: "));
  let length: usize = headers.rsplit(' ').next().unwrap().parse().unwrap();
  let jpeg = &rest[header_end + 4..];
  assert_eq!(jpeg.len(), length);
  assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
  assert_eq!(&jpeg[length - 2..], &[0xFF, 0xD9]);

  server.stop();
  let stats = pipeline.join();
  assert_eq!(stats.encoded(), 1);
}
