// 该文件是 Xingren （行人计数） 项目的一部分。
// src/server.rs - HTTP 服务：首页与 MJPEG 推流
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
  io::{self, Read, Write},
  net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::EncodedFrame,
  stream::{STREAM_CONTENT_TYPE, SinkExit, StreamingSink},
  task::queue::OutputReceiver,
};

pub const INDEX_HTML: &str = concat!(
  "<!doctype html><html><head><meta name='viewport' ",
  "content='width=device-width,initial-scale=1'/>",
  "<title>Xingren 行人计数</title></head><body style='margin:0;",
  "background:#000;display:flex;justify-content:center;align-items:center;",
  "height:100vh'>",
  "<img src='/stream' style='max-width:100%;height:auto;object-fit:contain'/>",
  "</body></html>"
);

/// 收发超时
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
  #[error("请求格式错误: {0}")]
  BadRequest(&'static str),
  #[error("请求过大")]
  RequestTooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: String,
  /// 不含查询串
  pub path: String,
}

/// 只读取请求行和头部，忽略请求体
pub fn read_request<R: Read>(reader: &mut R) -> Result<HttpRequest, ServerError> {
  let mut buf = [0u8; 1024];
  let mut data = Vec::new();
  loop {
    let n = reader.read(&mut buf)?;
    if n == 0 {
      break;
    }
    data.extend_from_slice(&buf[..n]);
    if data.len() > MAX_REQUEST_BYTES {
      return Err(ServerError::RequestTooLarge);
    }
    if data.windows(4).any(|w| w == b"\r\n\r\n") {
      break;
    }
  }

  let text = String::from_utf8_lossy(&data);
  let request_line = text
    .split("\r\n")
    .next()
    .filter(|l| !l.is_empty())
    .ok_or(ServerError::BadRequest("空请求"))?;
  let mut parts = request_line.split_whitespace();
  let method = parts.next().ok_or(ServerError::BadRequest("缺少方法"))?;
  let raw_path = parts.next().ok_or(ServerError::BadRequest("缺少路径"))?;
  let path = raw_path.split('?').next().unwrap_or(raw_path);

  Ok(HttpRequest {
    method: method.to_string(),
    path: path.to_string(),
  })
}

fn status_line(status: u16) -> &'static str {
  match status {
    200 => "HTTP/1.1 200 OK",
    400 => "HTTP/1.1 400 Bad Request",
    404 => "HTTP/1.1 404 Not Found",
    405 => "HTTP/1.1 405 Method Not Allowed",
    _ => "HTTP/1.1 500 Internal Server Error",
  }
}

pub fn write_response<W: Write>(
  writer: &mut W,
  status: u16,
  content_type: &str,
  body: &[u8],
) -> io::Result<()> {
  let allow = if status == 405 { "Allow: GET\r\n" } else { "" };
  let header = format!(
    "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
    status_line(status),
    content_type,
    body.len(),
    allow
  );
  writer.write_all(header.as_bytes())?;
  writer.write_all(body)?;
  writer.flush()
}

fn write_stream_header<W: Write>(writer: &mut W) -> io::Result<()> {
  let header = format!(
    "{}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nCache-Control: no-cache\r\nAccess-Control-Allow-Origin: *\r\n\r\n",
    status_line(200),
    STREAM_CONTENT_TYPE
  );
  writer.write_all(header.as_bytes())?;
  writer.flush()
}

/// `/stream` 推流连接计数，析构时减一
struct ActiveStream(Arc<AtomicUsize>);

impl ActiveStream {
  fn enter(counter: &Arc<AtomicUsize>) -> Self {
    let previous = counter.fetch_add(1, Ordering::SeqCst);
    if previous > 0 {
      warn!(
        "已有 {} 个推流连接，新连接将与其瓜分帧序列，画面会不连续",
        previous
      );
    }
    Self(counter.clone())
  }
}

impl Drop for ActiveStream {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

#[derive(Clone)]
struct Shared {
  frames: OutputReceiver<EncodedFrame>,
  running: Arc<AtomicBool>,
  active_streams: Arc<AtomicUsize>,
}

pub struct StreamServer {
  listener: TcpListener,
  shared: Shared,
}

impl StreamServer {
  pub fn bind<A: ToSocketAddrs>(
    addr: A,
    frames: OutputReceiver<EncodedFrame>,
    running: Arc<AtomicBool>,
  ) -> Result<Self, ServerError> {
    let listener = TcpListener::bind(addr)?;
    Ok(Self {
      listener,
      shared: Shared {
        frames,
        running,
        active_streams: Arc::new(AtomicUsize::new(0)),
      },
    })
  }

  pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
    Ok(self.listener.local_addr()?)
  }

  /// 在独立线程中接受连接，每个连接一个线程
  pub fn spawn(self) -> Result<ServerHandle, ServerError> {
    let addr = self.listener.local_addr()?;
    self.listener.set_nonblocking(true)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let stop = shutdown.clone();
    let active_streams = self.shared.active_streams.clone();
    let join = thread::Builder::new()
      .name("xingren-http".into())
      .spawn(move || accept_loop(&self.listener, self.shared, stop))?;

    info!("HTTP 服务监听 http://{}", addr);
    Ok(ServerHandle {
      addr,
      shutdown,
      active_streams,
      join: Some(join),
    })
  }
}

pub struct ServerHandle {
  addr: SocketAddr,
  shutdown: Arc<AtomicBool>,
  active_streams: Arc<AtomicUsize>,
  join: Option<JoinHandle<()>>,
}

impl ServerHandle {
  pub fn local_addr(&self) -> SocketAddr {
    self.addr
  }

  /// 当前推流连接数
  pub fn active_streams(&self) -> usize {
    self.active_streams.load(Ordering::SeqCst)
  }

  /// 停止接受新连接；已有推流连接随 `running` 标志或队列关闭结束
  pub fn stop(mut self) {
    self.shutdown.store(true, Ordering::SeqCst);
    if let Some(join) = self.join.take()
      && join.join().is_err()
    {
      error!("HTTP 线程异常退出");
    }
  }
}

/// 非阻塞地接受连接
trait Accept {
  fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Accept for TcpListener {
  fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
    TcpListener::accept(self)
  }
}

/// 单次 accept 失败（客户端提前断开、文件描述符耗尽等）只记录日志，服务继续
fn accept_loop<L: Accept>(listener: &L, shared: Shared, shutdown: Arc<AtomicBool>) {
  while !shutdown.load(Ordering::SeqCst) && shared.running.load(Ordering::Relaxed) {
    match listener.accept() {
      Ok((stream, peer)) => {
        let shared = shared.clone();
        let spawned = thread::Builder::new()
          .name("xingren-conn".into())
          .spawn(move || {
            if let Err(e) = handle_connection(stream, &shared) {
              warn!("处理 {} 的请求失败: {}", peer, e);
            }
          });
        if let Err(e) = spawned {
          error!("无法创建连接线程: {}", e);
        }
      }
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        thread::sleep(ACCEPT_POLL);
      }
      Err(e) => {
        warn!("接受连接失败: {}", e);
        thread::sleep(ACCEPT_POLL);
      }
    }
  }
  debug!("HTTP 接受循环退出");
}

fn handle_connection(mut stream: TcpStream, shared: &Shared) -> Result<(), ServerError> {
  stream.set_nonblocking(false)?;
  stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
  stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;

  let request = match read_request(&mut stream) {
    Ok(request) => request,
    Err(e) => {
      write_response(&mut stream, 400, "text/plain", b"bad request")?;
      return Err(e);
    }
  };
  debug!("{} {}", request.method, request.path);

  if request.method != "GET" {
    write_response(&mut stream, 405, "text/plain", b"method not allowed")?;
    return Ok(());
  }

  match request.path.as_str() {
    "/" => write_response(&mut stream, 200, "text/html", INDEX_HTML.as_bytes())?,
    "/stream" => {
      let _active = ActiveStream::enter(&shared.active_streams);
      write_stream_header(&mut stream)?;
      let peer = stream.peer_addr()?;
      info!("开始向 {} 推流", peer);
      let sink = StreamingSink::new(shared.frames.clone(), shared.running.clone());
      let (exit, sent) = sink.run(&mut stream);
      match exit {
        SinkExit::ClientGone(_) => info!("{} 断开，共发送 {} 帧", peer, sent),
        SinkExit::QueueClosed | SinkExit::Shutdown => {
          info!("流水线结束，停止向 {} 推流，共发送 {} 帧", peer, sent)
        }
      }
    }
    _ => write_response(&mut stream, 404, "text/plain", b"not found")?,
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::queue::output_queue;

  /// 总是失败的监听端，失败若干次后请求停止
  struct Flaky {
    failures: AtomicUsize,
    stop_after: usize,
    shutdown: Arc<AtomicBool>,
  }

  impl Accept for Flaky {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
      let n = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
      if n >= self.stop_after {
        self.shutdown.store(true, Ordering::SeqCst);
      }
      Err(io::Error::from(io::ErrorKind::ConnectionAborted))
    }
  }

  #[test]
  fn accept_errors_do_not_stop_the_server() {
    let (_tx, frames) = output_queue::<EncodedFrame>(1);
    let shutdown = Arc::new(AtomicBool::new(false));
    let listener = Flaky {
      failures: AtomicUsize::new(0),
      stop_after: 3,
      shutdown: shutdown.clone(),
    };
    let shared = Shared {
      frames,
      running: Arc::new(AtomicBool::new(true)),
      active_streams: Arc::new(AtomicUsize::new(0)),
    };

    accept_loop(&listener, shared, shutdown);
    assert_eq!(listener.failures.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn parses_request_line() {
    let mut raw: &[u8] = b"GET /stream?x=1 HTTP/1.1\r\nHost: cam\r\n\r\n";
    let request = read_request(&mut raw).unwrap();
    assert_eq!(
      request,
      HttpRequest {
        method: "GET".into(),
        path: "/stream".into()
      }
    );
  }

  #[test]
  fn rejects_empty_request() {
    let mut raw: &[u8] = b"";
    assert!(matches!(
      read_request(&mut raw),
      Err(ServerError::BadRequest(_))
    ));
  }

  #[test]
  fn response_carries_status_and_length() {
    let mut out = Vec::new();
    write_response(&mut out, 405, "text/plain", b"no").unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert!(text.contains("Content-Length: 2\r\n"));
    assert!(text.contains("Allow: GET\r\n"));
    assert!(text.ends_with("\r\n\r\nno"));
  }

  #[test]
  fn index_page_embeds_stream() {
    assert!(INDEX_HTML.contains("<img src='/stream'"));
    assert!(INDEX_HTML.contains("background:#000"));
  }
}
