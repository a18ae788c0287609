pub mod health_server;
pub mod hyper_helpers;
