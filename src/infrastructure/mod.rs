// Infrastructure layer - External dependencies and adapters
pub mod chunked_json;
pub mod config;
pub mod http_response;
pub mod influx_archive;
pub mod sysinfo_source;

/// Host names that refer to the machine this service runs on.
pub const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];
