pub mod error;
pub mod file_service;
pub mod image_processor;
pub mod storage;
