// Resource telemetry - Live and archived host metrics behind walking plots
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

#[cfg(test)]
mod testing;
