pub mod app;
pub mod codec;
pub mod config;
pub mod convert;
pub mod db;
pub mod download;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod layout;
pub mod record;
pub mod source;
