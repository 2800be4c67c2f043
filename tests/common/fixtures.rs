//! Archive fixtures and test content generators

use std::io::{Cursor, Write};
use std::time::Duration;

use modfetch::{DownloadConfig, RetryConfig};

/// Deterministic pseudo-random payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}

/// Build a zip archive in memory; names ending in `/` become directories
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// A mod jar whose single class file is derived from `seed`
pub fn mod_jar(modid: &str, seed: u8) -> Vec<u8> {
    let class = payload(2_048, seed);
    let name = format!("{modid}/Main.class");
    zip_archive(&[
        (name.as_str(), class.as_slice()),
        ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n"),
    ])
}

/// A modpack with a manifest and an `overrides/` tree
pub fn modpack() -> Vec<u8> {
    zip_archive(&[
        ("manifest.json", br#"{"name":"test pack"}"#),
        ("overrides/", b""),
        ("overrides/config/", b""),
        ("overrides/config/jei.cfg", b"hide=false"),
        ("overrides/options.txt", b"fov:90"),
    ])
}

/// Download settings tuned for fast local tests
pub fn test_download_config() -> DownloadConfig {
    DownloadConfig {
        block_size: 4096,
        user_agent: "modfetch-it".into(),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Retry settings with short delays
pub fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}
