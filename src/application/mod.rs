// Application layer - Sampling, merging and plot state
pub mod aggregator;
pub mod archive_reader;
pub mod clock;
pub mod dashboard_service;
pub mod fill;
pub mod metrics_source;
pub mod plot_controller;
pub mod registry;
pub mod ring_buffer;
pub mod sampler;
