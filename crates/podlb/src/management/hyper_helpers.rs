// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::TryFutureExt;
use hyper::Request;
use hyper::server::conn::http1;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use lb_core::drain::DrainWatcher;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::http::{Response, empty_body, text_body};

pub fn http1_server() -> http1::Builder {
	let mut b = http1::Builder::new();
	b.timer(TokioTimer::new());
	b
}

pub fn pooling_client<B>() -> ::hyper_util::client::legacy::Client<HttpConnector, B>
where
	B: http_body::Body + Send,
	B::Data: Send,
{
	::hyper_util::client::legacy::Client::builder(TokioExecutor::new())
		.timer(TokioTimer::new())
		.build_http()
}

pub fn empty_response(code: hyper::StatusCode) -> Response {
	::http::Response::builder()
		.status(code)
		.body(empty_body())
		.expect("builder with known status code should not fail")
}

pub fn plaintext_response(code: hyper::StatusCode, body: String) -> Response {
	::http::Response::builder()
		.status(code)
		.header(hyper::header::CONTENT_TYPE, "text/plain")
		.body(text_body(body))
		.expect("builder with known status code should not fail")
}

/// Server implements a generic HTTP server with the follow behavior:
/// * HTTP/1.1 plaintext only
/// * Draining
pub struct Server<S> {
	name: String,
	bind: TcpListener,
	drain_rx: DrainWatcher,
	state: S,
}

impl<S> Server<S> {
	pub async fn bind(
		name: &str,
		address: SocketAddr,
		drain_rx: DrainWatcher,
		state: S,
	) -> anyhow::Result<Self> {
		let bind = TcpListener::bind(&address).await?;
		Ok(Server {
			name: name.to_string(),
			bind,
			drain_rx,
			state,
		})
	}

	pub fn address(&self) -> SocketAddr {
		self
			.bind
			.local_addr()
			.expect("local address must be ready")
	}

	pub fn spawn<F, R>(self, f: F)
	where
		S: Send + Sync + 'static,
		F: Fn(Arc<S>, Request<hyper::body::Incoming>) -> R + Send + Sync + 'static,
		R: Future<Output = Result<Response, anyhow::Error>> + Send + 'static,
	{
		use futures_util::StreamExt;
		let address = self.address();
		let drain = self.drain_rx;
		let state = Arc::new(self.state);
		let f = Arc::new(f);
		info!(
			%address,
			component = self.name,
			"listener established",
		);
		let name = self.name;
		let drain_stream = drain.clone();
		tokio::spawn(async move {
			let stream = tokio_stream::wrappers::TcpListenerStream::new(self.bind);
			let mut stream = stream.take_until(Box::pin(drain_stream.wait_for_drain()));
			while let Some(Ok(socket)) = stream.next().await {
				let _ = socket.set_nodelay(true);
				let drain = drain.clone();
				let f = f.clone();
				let state = state.clone();
				tokio::spawn(async move {
					let serve = http1_server()
						.half_close(true)
						.header_read_timeout(Duration::from_secs(2))
						.max_buf_size(8 * 1024)
						.serve_connection(
							hyper_util::rt::TokioIo::new(socket),
							hyper::service::service_fn(move |req| {
								let state = state.clone();

								// Failures would abort the whole connection; we just want to return an HTTP error
								f(state, req).or_else(|err| async move {
									Ok::<_, Infallible>(
										::http::Response::builder()
											.status(hyper::StatusCode::INTERNAL_SERVER_ERROR)
											.body(text_body(err.to_string()))
											.expect("builder with known status code should not fail"),
									)
								})
							}),
						);
					// Wait for drain to signal or connection serving to complete
					match futures_util::future::select(Box::pin(drain.wait_for_drain()), serve).await {
						// We got a shutdown request. Start graceful shutdown and wait for the pending requests to complete.
						futures_util::future::Either::Left((release, mut serve)) => {
							let drain = std::pin::Pin::new(&mut serve);
							drain.graceful_shutdown();
							let _ = serve.await;
							drop(release);
						},
						// Serving finished, just log the result.
						futures_util::future::Either::Right((served, _shutdown)) => {
							if let Err(err) = served {
								debug!(%err, "connection closed with error");
							}
						},
					}
				});
			}
			info!(
				%address,
				component = name,
				"listener drained",
			);
		});
	}
}
