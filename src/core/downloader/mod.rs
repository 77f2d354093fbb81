mod client;

pub use client::{read_verified, write_file, Downloader};
