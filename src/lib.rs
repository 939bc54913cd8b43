pub mod activation;
pub mod bulk_download;
pub mod coordinates;
pub mod error;
pub mod geo_query;
pub mod link_sink;
pub mod orchestrator;
pub mod planet;
pub mod progress;
pub mod settings;

#[cfg(test)]
mod testing;
