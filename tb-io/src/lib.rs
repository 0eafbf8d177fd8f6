// tb-io/src/lib.rs
//! Synchronous IO primitives for tb (filesystem, json, checksums, processes, removal)

pub mod checksum;
pub mod fs;
pub mod json_io;
pub mod process;
pub mod remove;

pub use checksum::{sha256_bytes, sha256_file, verify_checksum};
pub use fs::*;
pub use json_io::{read_json, write_json};
pub use process::run_command;
pub use remove::remove_path;
