// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

/// Shutdown completes when the process is asked to terminate.
pub struct Shutdown(());

impl Shutdown {
	pub fn new() -> Self {
		Shutdown(())
	}

	/// Wait completes when a shutdown has been requested
	pub async fn wait(self) {
		imp::shutdown().await
	}
}

impl Default for Shutdown {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(unix)]
mod imp {
	use tokio::signal::unix::{SignalKind, signal};

	pub(super) async fn shutdown() {
		tokio::select! {
			_ = watch_signal(SignalKind::interrupt(), "SIGINT") => {}
			_ = watch_signal(SignalKind::terminate(), "SIGTERM") => {}
		};
	}

	async fn watch_signal(kind: SignalKind, name: &'static str) {
		signal(kind)
			.expect("Failed to register signal handler")
			.recv()
			.await;
		tracing::info!("received signal {}, starting shutdown", name);
	}
}

#[cfg(not(unix))]
mod imp {
	pub(super) async fn shutdown() {
		tokio::signal::windows::ctrl_c()
			.expect("Failed to register signal handler")
			.recv()
			.await;
		tracing::info!("received signal, starting shutdown");
	}
}
