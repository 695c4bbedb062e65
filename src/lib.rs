pub mod archive;
pub mod compositor;
pub mod config;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod export;
pub mod fetch;
pub mod fs_util;
pub mod layout;
pub mod metadata;
pub mod output;
pub mod tools;
