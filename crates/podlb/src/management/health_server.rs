// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

use std::net::SocketAddr;

use hyper::Request;
use hyper::body::Incoming;
use itertools::Itertools;
use lb_core::drain::DrainWatcher;
use lb_core::readiness;

use super::hyper_helpers;
use crate::http::Response;

/// Liveness/readiness surface: `GET /health` answers 200 once every startup
/// task has completed, 503 with the pending list before that.
pub struct Server {
	s: hyper_helpers::Server<readiness::Ready>,
}

impl Server {
	pub async fn new(
		address: SocketAddr,
		drain_rx: DrainWatcher,
		ready: readiness::Ready,
	) -> anyhow::Result<Self> {
		hyper_helpers::Server::bind("health", address, drain_rx, ready)
			.await
			.map(|s| Server { s })
	}

	pub fn address(&self) -> SocketAddr {
		self.s.address()
	}

	pub fn spawn(self) {
		self.s.spawn(|ready, req| async move {
			match req.uri().path() {
				"/health" => Ok(handle_health(&ready, req)),
				_ => Ok(hyper_helpers::empty_response(hyper::StatusCode::NOT_FOUND)),
			}
		})
	}
}

fn handle_health(ready: &readiness::Ready, req: Request<Incoming>) -> Response {
	match *req.method() {
		hyper::Method::GET => {
			let pending = ready.pending();
			if pending.is_empty() {
				return hyper_helpers::plaintext_response(hyper::StatusCode::OK, "ok\n".into());
			}
			hyper_helpers::plaintext_response(
				hyper::StatusCode::SERVICE_UNAVAILABLE,
				format!(
					"not ready, pending: {}\n",
					pending.into_iter().sorted().join(", ")
				),
			)
		},
		_ => hyper_helpers::empty_response(hyper::StatusCode::METHOD_NOT_ALLOWED),
	}
}

#[cfg(test)]
mod tests {
	use lb_core::{drain, readiness};

	use super::*;

	#[tokio::test]
	async fn health_reports_pending_tasks() {
		let ready = readiness::Ready::new();
		let task = ready.register_task("backend store");
		let (_trigger, watcher) = drain::new();
		let server = Server::new("127.0.0.1:0".parse().unwrap(), watcher, ready.clone())
			.await
			.unwrap();
		let address = server.address();
		server.spawn();

		let body = get(address, "/health").await;
		assert!(body.contains("not ready"), "{body}");
		assert!(body.contains("backend store"), "{body}");

		drop(task);
		let body = get(address, "/health").await;
		assert_eq!(body, "ok\n");
	}

	async fn get(address: SocketAddr, path: &str) -> String {
		use tokio::io::{AsyncReadExt, AsyncWriteExt};
		let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
		stream
			.write_all(
				format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
					.as_bytes(),
			)
			.await
			.unwrap();
		let mut raw = String::new();
		stream.read_to_string(&mut raw).await.unwrap();
		let (_headers, body) = raw
			.split_once("\r\n\r\n")
			.expect("response must have a header/body split");
		body.to_string()
	}
}
