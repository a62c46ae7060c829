pub mod app;
pub mod archive;
pub mod codes;
pub mod config;
pub mod domain;
pub mod error;
pub mod normalize;
pub mod output;
pub mod pug;
pub mod record;
pub mod store;
pub mod substance;
pub mod table;
pub mod target;
