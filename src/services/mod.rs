pub mod camera_client;
pub mod consumption_aggregator;
pub mod meter_monitor;
pub mod orchestrator;
pub mod reading_parser;
pub mod reading_validator;
pub mod snapshot_archive;
pub mod snapshot_prune;
pub mod timeseries_writer;
pub mod vision;
