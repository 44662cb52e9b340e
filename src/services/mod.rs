pub mod analysis;
pub mod encryption;
pub mod extraction;
pub mod fingerprint;
pub mod llm;
pub mod memory_queue;
pub mod memory_store;
pub mod queue;
pub mod retention;
pub mod retry;
pub mod storage;
pub mod store;
pub mod worker;
