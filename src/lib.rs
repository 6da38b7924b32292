pub mod aggregate;
pub mod blocks;
pub mod config;
pub mod error;
pub mod features;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod plot;
pub mod report;
pub mod sdi;
pub mod summary;
pub mod table;
pub mod timing;
pub mod windows;
