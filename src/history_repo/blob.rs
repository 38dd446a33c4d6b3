// Archive BLOB codec: [version: u8][gzip(wincode payload)].
// Unknown versions are rejected; an unreadable archive is a persistence failure.

use std::io::{Read, Write};

use anyhow::Context;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::archive::MonthArchive;

pub(super) const ARCHIVE_BLOB_VERSION: u8 = 1;

pub(super) fn with_version_prefix(version: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(version);
    out.extend_from_slice(&payload);
    out
}

pub(super) fn blob_version(bytes: &[u8]) -> u8 {
    if bytes.is_empty() { 0 } else { bytes[0] }
}

pub(super) fn encode_archive(archive: &MonthArchive) -> anyhow::Result<Vec<u8>> {
    let raw = wincode::serialize(archive).map_err(|e| anyhow::anyhow!("wincode: {}", e))?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    encoder.write_all(&raw).context("gzip write")?;
    let compressed = encoder.finish().context("gzip finish")?;
    Ok(with_version_prefix(ARCHIVE_BLOB_VERSION, compressed))
}

pub(super) fn decode_archive(bytes: &[u8]) -> anyhow::Result<MonthArchive> {
    let version = blob_version(bytes);
    anyhow::ensure!(
        version == ARCHIVE_BLOB_VERSION,
        "unsupported archive blob version {}",
        version
    );
    let mut raw = Vec::new();
    GzDecoder::new(&bytes[1..])
        .read_to_end(&mut raw)
        .context("gzip read")?;
    wincode::deserialize(&raw).map_err(|e| anyhow::anyhow!("wincode deserialize archive: {}", e))
}
