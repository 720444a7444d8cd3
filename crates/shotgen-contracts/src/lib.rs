pub mod api;
pub mod ids;
pub mod storage;
