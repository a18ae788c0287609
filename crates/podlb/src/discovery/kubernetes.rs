use futures::stream::BoxStream;
use futures_util::StreamExt;
use ::http::uri::Scheme;
use ::http::{HeaderValue, Uri, header};
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, WatchEvent, WatchParams};
use lb_core::prelude::*;

use super::{PodEvent, PodSnapshot};
use crate::backend::Backend;
use crate::config::{Config, SpecConfig};

/// Kubernetes-backed pod discovery: a raw watch over the service's pods,
/// narrowed by label selector and to the Running phase.
pub struct KubeDiscovery {
	api: Api<Pod>,
	params: WatchParams,
}

impl KubeDiscovery {
	pub async fn connect(config: &Config) -> anyhow::Result<Self> {
		let client = Client::try_default()
			.await
			.context("connecting to the orchestrator")?;
		Ok(Self::with_client(client, config))
	}

	pub fn with_client(client: Client, config: &Config) -> Self {
		let api = Api::namespaced(client, &config.specs.namespace);
		let params = WatchParams::default()
			.labels(&config.specs.selector)
			.fields("status.phase=Running");
		KubeDiscovery { api, params }
	}

	/// events translates the raw watch stream into pod events. Bookmarks and
	/// error frames are logged and dropped; the stream ends when the watch
	/// does.
	pub async fn events(&self) -> anyhow::Result<BoxStream<'static, PodEvent>> {
		let watch = self
			.api
			.watch(&self.params, "0")
			.await
			.context("watching pods")?;
		Ok(
			watch
				.filter_map(|event| async move { translate(event) })
				.boxed(),
		)
	}
}

fn translate(event: kube::Result<WatchEvent<Pod>>) -> Option<PodEvent> {
	match event {
		Ok(WatchEvent::Added(pod)) => Some(PodEvent::Added(snapshot(pod))),
		Ok(WatchEvent::Modified(pod)) => Some(PodEvent::Modified(snapshot(pod))),
		Ok(WatchEvent::Deleted(pod)) => Some(PodEvent::Deleted(snapshot(pod))),
		Ok(WatchEvent::Bookmark(_)) => None,
		Ok(WatchEvent::Error(status)) => {
			warn!(?status, "watch produced an error frame");
			None
		},
		Err(err) => {
			warn!(%err, "pod watch stream error");
			None
		},
	}
}

fn snapshot(pod: Pod) -> PodSnapshot {
	PodSnapshot {
		address: strng::new(
			pod
				.status
				.as_ref()
				.and_then(|status| status.pod_ip.as_deref())
				.unwrap_or_default(),
		),
		name: strng::new(pod.metadata.name.as_deref().unwrap_or_default()),
		terminating: pod.metadata.deletion_timestamp.is_some(),
	}
}

/// direct_request rewrites the outbound request so it targets the elected
/// backend through the headless-service DNS convention. Dots in the pod
/// address become dashes, which encodes the identity into the first DNS
/// label; [`backend_from_host`] reverses it on the response path.
pub fn direct_request<B>(
	req: &mut ::http::Request<B>,
	backend: &Backend,
	specs: &SpecConfig,
) -> Result<(), ::http::Error> {
	let authority = format!(
		"{}.{}.{}.svc.cluster.local:{}",
		backend.address().replace('.', "-"),
		specs.service_name,
		specs.namespace,
		specs.container_port,
	);
	let path_and_query = req
		.uri()
		.path_and_query()
		.map(|pq| pq.as_str())
		.unwrap_or("/");
	let uri = Uri::builder()
		.scheme(Scheme::HTTP)
		.authority(authority.as_str())
		.path_and_query(path_and_query)
		.build()?;
	// The Host must follow the rewritten authority; the attributor reads the
	// identity back out of it.
	req
		.headers_mut()
		.insert(header::HOST, HeaderValue::from_str(&authority)?);
	*req.uri_mut() = uri;
	Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum AttributionError {
	#[error("host '{0}' carries no encoded identity label")]
	MissingLabel(String),
	#[error("could not parse ip '{0}'")]
	NotAnAddress(String),
}

/// backend_from_host recovers the backend identity from the host a response's
/// request was sent to, reversing the dash encoding of [`direct_request`].
pub fn backend_from_host(host: &str) -> Result<Strng, AttributionError> {
	// The host may arrive as a full URL or as a bare authority.
	let authority = host
		.parse::<Uri>()
		.ok()
		.and_then(|uri| uri.host().map(str::to_string))
		.unwrap_or_else(|| host.to_string());
	match authority.split_once('.') {
		Some((label, _)) => {
			let ip = label.replace('-', ".");
			if ip.parse::<IpAddr>().is_err() {
				return Err(AttributionError::NotAnAddress(ip));
			}
			Ok(strng::new(ip))
		},
		None => Err(AttributionError::MissingLabel(authority)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn specs() -> SpecConfig {
		SpecConfig {
			namespace: "default".to_string(),
			service_name: "server-service".to_string(),
			selector: "app=server".to_string(),
			container_port: 8080,
		}
	}

	#[test]
	fn rewrite_targets_the_backend() {
		let backend = Backend::new(strng::new("10.244.0.6"), strng::new("server-0"));
		let mut req = ::http::Request::builder()
			.method("GET")
			.uri("http://proxy.example.com/x?q=1")
			.body(())
			.unwrap();
		direct_request(&mut req, &backend, &specs()).unwrap();
		assert_eq!(
			req.uri().to_string(),
			"http://10-244-0-6.server-service.default.svc.cluster.local:8080/x?q=1"
		);
		assert_eq!(
			req.headers().get(header::HOST).unwrap(),
			"10-244-0-6.server-service.default.svc.cluster.local:8080"
		);
	}

	#[test]
	fn rewrite_without_path_defaults_to_root() {
		let backend = Backend::new(strng::new("10.0.0.1"), strng::new("server-0"));
		let mut req = ::http::Request::builder()
			.uri("http://proxy.example.com")
			.body(())
			.unwrap();
		direct_request(&mut req, &backend, &specs()).unwrap();
		assert_eq!(
			req.uri().to_string(),
			"http://10-0-0-1.server-service.default.svc.cluster.local:8080/"
		);
	}

	#[test]
	fn host_round_trips_for_every_request() {
		for ip in ["10.244.0.6", "10.0.0.1", "192.168.1.254"] {
			let backend = Backend::new(strng::new(ip), strng::new("server-0"));
			let mut req = ::http::Request::builder()
				.uri("http://proxy.example.com/x")
				.body(())
				.unwrap();
			direct_request(&mut req, &backend, &specs()).unwrap();
			let host = req.uri().authority().unwrap().as_str().to_string();
			assert_eq!(backend_from_host(&host).unwrap(), ip);
		}
	}

	#[test]
	fn extracts_from_full_url() {
		assert_eq!(
			backend_from_host("http://10-244-0-6.server-service.default.svc.cluster.local:8080/")
				.unwrap(),
			"10.244.0.6"
		);
	}

	#[test]
	fn extracts_from_bare_authority() {
		assert_eq!(
			backend_from_host("10-244-0-6.server-service.default.svc.cluster.local:8080").unwrap(),
			"10.244.0.6"
		);
	}

	#[test]
	fn rejects_non_address_labels() {
		assert!(matches!(
			backend_from_host("server-service.default.svc.cluster.local:8080"),
			Err(AttributionError::NotAnAddress(_))
		));
	}

	#[test]
	fn rejects_hosts_without_labels() {
		assert!(matches!(
			backend_from_host("localhost"),
			Err(AttributionError::MissingLabel(_))
		));
	}
}
