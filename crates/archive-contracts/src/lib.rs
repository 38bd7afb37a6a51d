pub mod chat;
pub mod download;
pub mod events;
pub mod inline_image;
pub mod models;
pub mod records;
pub mod storage;
