use std::io::{Read, Write};

use anyhow::{Context, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .context("failed to write gzip stream")?;
    encoder.finish().context("failed to finish gzip stream")
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .context("corrupt gzip data")?;
    Ok(out)
}
