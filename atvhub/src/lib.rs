// Library interface for the atvhub modules
// This allows tests and the helper binaries to import modules

pub mod blob;
pub mod consultation;
pub mod content;
pub mod discovery;
pub mod ingestion;
pub mod leads;
pub mod llm;
pub mod naver;
pub mod notify;
pub mod scraping;
pub mod server;
pub mod stats;
pub mod storage;
