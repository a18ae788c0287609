use std::convert::Infallible;

use futures_util::StreamExt;
use futures_util::future::Either;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use lb_core::drain::DrainWatcher;
use lb_core::prelude::*;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

use super::{Pool, ProxyError};
use crate::http::{HeaderMap, HeaderName, Response, StatusCode, header};
use crate::management::hyper_helpers;

/// Hop-by-hop headers are a contract between the client and this proxy; they
/// must not travel on to the backend.
const HOP_BY_HOP: [HeaderName; 8] = [
	header::CONNECTION,
	HeaderName::from_static("keep-alive"),
	header::PROXY_AUTHENTICATE,
	header::PROXY_AUTHORIZATION,
	header::TE,
	header::TRAILER,
	header::TRANSFER_ENCODING,
	header::UPGRADE,
];

/// Gateway is the proxy listener: it accepts client connections, runs each
/// request through [`Pool::direct`], forwards it over the shared pooling
/// client, and settles the accounting through [`Pool::modify_response`].
pub struct Gateway {
	pool: Arc<Pool>,
	client: Client<HttpConnector, Incoming>,
	bind: TcpListener,
	drain: DrainWatcher,
}

impl Gateway {
	pub async fn bind(
		address: SocketAddr,
		pool: Arc<Pool>,
		drain: DrainWatcher,
	) -> anyhow::Result<Gateway> {
		let bind = TcpListener::bind(address).await?;
		Ok(Gateway {
			pool,
			client: hyper_helpers::pooling_client(),
			bind,
			drain,
		})
	}

	pub fn address(&self) -> SocketAddr {
		self
			.bind
			.local_addr()
			.expect("local address must be ready")
	}

	pub fn spawn(self) {
		let address = self.address();
		let Gateway {
			pool,
			client,
			bind,
			drain,
		} = self;
		info!(%address, component = "proxy", "listener established");
		tokio::spawn(async move {
			let drain_connections = drain.clone();
			let stream = TcpListenerStream::new(bind);
			let mut stream = stream.take_until(Box::pin(drain.wait_for_drain()));
			while let Some(Ok(socket)) = stream.next().await {
				let _ = socket.set_nodelay(true);
				let drain = drain_connections.clone();
				let pool = pool.clone();
				let client = client.clone();
				tokio::spawn(async move {
					let serve = hyper_helpers::http1_server()
						.half_close(true)
						.header_read_timeout(Duration::from_secs(30))
						.serve_connection(
							TokioIo::new(socket),
							service_fn(move |req| {
								let pool = pool.clone();
								let client = client.clone();
								async move { Ok::<_, Infallible>(handle(pool, client, req).await) }
							}),
						);
					// Serve until done, or gracefully wind the connection down
					// once a drain is signaled.
					match futures_util::future::select(Box::pin(drain.wait_for_drain()), serve).await {
						Either::Left((release, mut serve)) => {
							Pin::new(&mut serve).graceful_shutdown();
							let _ = serve.await;
							drop(release);
						},
						Either::Right((served, _)) => {
							if let Err(err) = served {
								debug!(%err, "connection closed with error");
							}
						},
					}
				});
			}
			info!(%address, component = "proxy", "listener drained");
		});
	}
}

async fn handle(
	pool: Arc<Pool>,
	client: Client<HttpConnector, Incoming>,
	mut req: ::http::Request<Incoming>,
) -> Response {
	match pool.direct(&mut req).await {
		Ok(_) => {},
		Err(ProxyError::NoBackends) => {
			debug!("no backends available");
			return hyper_helpers::plaintext_response(
				StatusCode::SERVICE_UNAVAILABLE,
				"no backends available\n".to_string(),
			);
		},
		Err(err) => {
			warn!(%err, "failed to direct request");
			return hyper_helpers::empty_response(StatusCode::INTERNAL_SERVER_ERROR);
		},
	}

	// The rewritten authority carries the elected identity; it is all
	// modify_response needs once the response (or failure) comes back.
	let upstream_host = req
		.uri()
		.authority()
		.map(|authority| authority.as_str().to_string())
		.unwrap_or_default();
	strip_hop_by_hop(req.headers_mut());

	match client.request(req).await {
		Ok(response) => {
			pool.modify_response(&upstream_host).await;
			response.map(|body| body.boxed())
		},
		Err(err) => {
			warn!(host = upstream_host, %err, "upstream call failed");
			// The request is over either way; release the charge.
			pool.modify_response(&upstream_host).await;
			hyper_helpers::empty_response(StatusCode::BAD_GATEWAY)
		},
	}
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
	for name in &HOP_BY_HOP {
		headers.remove(name);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hop_by_hop_headers_are_stripped() {
		let mut headers = HeaderMap::new();
		headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
		headers.insert(header::TE, "trailers".parse().unwrap());
		headers.insert(header::ACCEPT, "*/*".parse().unwrap());
		strip_hop_by_hop(&mut headers);
		assert!(headers.get(header::CONNECTION).is_none());
		assert!(headers.get(header::TE).is_none());
		assert!(headers.get(header::ACCEPT).is_some());
	}
}
