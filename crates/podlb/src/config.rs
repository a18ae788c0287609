use std::env;
use std::str::FromStr;

use anyhow::anyhow;
use lb_core::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Runtime configuration, assembled from environment variables layered over
/// an optional YAML file in the working directory. Environment variables win.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
	pub specs: SpecConfig,
	pub store: StoreConfig,
	pub strategy: StrategyKind,
	pub refresh_rate: Duration,
	pub lock_ttl: Duration,
	pub proxy_addr: SocketAddr,
	pub health_addr: SocketAddr,
	pub instance_id: Strng,
	pub termination_deadline: Duration,
}

/// Where and how the proxied service runs in the cluster.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecConfig {
	pub namespace: String,
	pub service_name: String,
	pub selector: String,
	pub container_port: u16,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StoreConfig {
	Memory,
	Redis(RedisConfig),
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
	pub addr: String,
	pub username: Option<String>,
	#[serde(skip_serializing)]
	pub password: Option<String>,
	pub db: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
	Memory,
	Redis,
}

impl FromStr for StoreKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"memory" => Ok(StoreKind::Memory),
			"redis" => Ok(StoreKind::Redis),
			other => Err(format!("unknown store type '{other}'")),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
	LeastLoaded,
	RoundRobin,
}

impl FromStr for StrategyKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"least_loaded" => Ok(StrategyKind::LeastLoaded),
			"round_robin" => Ok(StrategyKind::RoundRobin),
			other => Err(format!("unknown strategy '{other}'")),
		}
	}
}

/// The file-level view of the configuration. Every field is optional; the
/// merge in [`parse_config`] applies environment overrides and defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
struct RawConfig {
	namespace: Option<String>,
	service_name: Option<String>,
	selector: Option<String>,
	container_port: Option<u16>,
	store_type: Option<StoreKind>,
	store_addr: Option<String>,
	store_username: Option<String>,
	store_password: Option<String>,
	store_db: Option<i64>,
	strategy: Option<StrategyKind>,
	#[serde(deserialize_with = "duration_str::deserialize_option_duration")]
	refresh_rate: Option<Duration>,
	#[serde(deserialize_with = "duration_str::deserialize_option_duration")]
	lock_ttl: Option<Duration>,
	proxy_port: Option<u16>,
	health_port: Option<u16>,
	instance_id: Option<String>,
}

pub fn parse_config(contents: String) -> anyhow::Result<Config> {
	let raw: RawConfig = serde_yaml::from_str(&contents)?;

	let specs = SpecConfig {
		namespace: parse("SPEC_NAMESPACE")?
			.or(raw.namespace)
			.context("SPEC_NAMESPACE is required")?,
		service_name: parse("SPEC_SERVICE_NAME")?
			.or(raw.service_name)
			.context("SPEC_SERVICE_NAME is required")?,
		selector: parse("SPEC_SELECTOR")?
			.or(raw.selector)
			.context("SPEC_SELECTOR is required")?,
		container_port: parse("SPEC_CONTAINER_PORT")?
			.or(raw.container_port)
			.unwrap_or(8080),
	};

	let store = match parse("STORE_TYPE")?
		.or(raw.store_type)
		.unwrap_or(StoreKind::Memory)
	{
		StoreKind::Memory => StoreConfig::Memory,
		StoreKind::Redis => StoreConfig::Redis(RedisConfig {
			addr: parse("STORE_ADDR")?
				.or(raw.store_addr)
				.context("STORE_ADDR is required for the redis store")?,
			username: parse("STORE_USERNAME")?.or(raw.store_username),
			password: parse("STORE_PASSWORD")?.or(raw.store_password),
			db: parse("STORE_DB")?.or(raw.store_db).unwrap_or(0),
		}),
	};

	let proxy_port: u16 = parse("PROXY_PORT")?.or(raw.proxy_port).unwrap_or(8080);
	let health_port: u16 = parse("HEALTH_PORT")?.or(raw.health_port).unwrap_or(8081);

	Ok(Config {
		specs,
		store,
		strategy: parse("STRATEGY")?
			.or(raw.strategy)
			.unwrap_or(StrategyKind::LeastLoaded),
		refresh_rate: parse_duration("REFRESH_RATE")?
			.or(raw.refresh_rate)
			.unwrap_or(Duration::from_secs(10)),
		lock_ttl: parse_duration("LOCK_TTL")?
			.or(raw.lock_ttl)
			.unwrap_or(Duration::from_secs(10)),
		proxy_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), proxy_port),
		health_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), health_port),
		instance_id: parse("HOSTNAME")?
			.or(raw.instance_id)
			.map(strng::new)
			.unwrap_or_else(|| strng::format!("podlb-{:08x}", rand::rng().random::<u32>())),
		termination_deadline: Duration::from_secs(5),
	})
}

fn parse<T: FromStr>(env: &str) -> anyhow::Result<Option<T>>
where
	<T as FromStr>::Err: ToString,
{
	match env::var(env) {
		Ok(val) if val.is_empty() => Ok(None),
		Ok(val) => val
			.parse()
			.map(Some)
			.map_err(|e: <T as FromStr>::Err| {
				anyhow!("invalid env var {}={} ({})", env, val, e.to_string())
			}),
		Err(_) => Ok(None),
	}
}

fn parse_duration(env: &str) -> anyhow::Result<Option<Duration>> {
	match env::var(env) {
		Ok(val) if val.is_empty() => Ok(None),
		Ok(val) => duration_str::parse(&val)
			.map(Some)
			.map_err(|e| anyhow!("invalid env var {}={} ({})", env, val, e)),
		Err(_) => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const FILE: &str = r#"
namespace: default
serviceName: server-service
selector: app=server
containerPort: 9090
storeType: redis
storeAddr: redis:6379
storeDb: 2
strategy: round_robin
refreshRate: 5s
lockTtl: 30s
instanceId: proxy-0
"#;

	#[test]
	fn parses_full_file() {
		let cfg = parse_config(FILE.to_string()).unwrap();
		assert_eq!(cfg.specs.namespace, "default");
		assert_eq!(cfg.specs.service_name, "server-service");
		assert_eq!(cfg.specs.selector, "app=server");
		assert_eq!(cfg.specs.container_port, 9090);
		assert_eq!(cfg.strategy, StrategyKind::RoundRobin);
		assert_eq!(cfg.refresh_rate, Duration::from_secs(5));
		assert_eq!(cfg.lock_ttl, Duration::from_secs(30));
		match cfg.store {
			StoreConfig::Redis(redis) => {
				assert_eq!(redis.addr, "redis:6379");
				assert_eq!(redis.db, 2);
				assert_eq!(redis.username, None);
			},
			other => panic!("expected redis store, got {other:?}"),
		}
	}

	#[test]
	fn defaults_apply() {
		let cfg = parse_config(
			r#"
namespace: default
serviceName: server-service
selector: app=server
"#
			.to_string(),
		)
		.unwrap();
		assert_eq!(cfg.specs.container_port, 8080);
		assert_eq!(cfg.strategy, StrategyKind::LeastLoaded);
		assert_eq!(cfg.refresh_rate, Duration::from_secs(10));
		assert!(matches!(cfg.store, StoreConfig::Memory));
		assert_eq!(cfg.proxy_addr.port(), 8080);
		assert_eq!(cfg.health_addr.port(), 8081);
		// HOSTNAME leaks in from the environment when set, so only the
		// fallback shape is asserted.
		assert!(!cfg.instance_id.is_empty());
	}

	#[test]
	fn kinds_parse_from_strings() {
		assert_eq!("memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
		assert_eq!("redis".parse::<StoreKind>().unwrap(), StoreKind::Redis);
		assert!("mongo".parse::<StoreKind>().is_err());
		assert_eq!(
			"least_loaded".parse::<StrategyKind>().unwrap(),
			StrategyKind::LeastLoaded
		);
		assert_eq!(
			"round_robin".parse::<StrategyKind>().unwrap(),
			StrategyKind::RoundRobin
		);
		assert!("random".parse::<StrategyKind>().is_err());
	}

	#[test]
	fn missing_required_field_fails() {
		let err = parse_config("namespace: default".to_string()).unwrap_err();
		assert!(err.to_string().contains("SPEC_SERVICE_NAME"));
	}

	#[test]
	fn redis_store_requires_addr() {
		let err = parse_config(
			r#"
namespace: default
serviceName: server-service
selector: app=server
storeType: redis
"#
			.to_string(),
		)
		.unwrap_err();
		assert!(err.to_string().contains("STORE_ADDR"));
	}

	#[test]
	fn unknown_fields_are_rejected() {
		let err = parse_config("bogusField: true".to_string()).unwrap_err();
		assert!(err.to_string().contains("bogusField"));
	}
}
