//! Outbound byte tap for replay captures.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::config::TAP_ENV;

/// Mirrors outbound bytes to a capture file.
///
/// Enabled by setting `CCN_TAP` to a path prefix; the file is named
/// `<prefix>-<pid>-<sec>-<usec>`. Only *outbound* bytes are captured;
/// inbound traffic never touches the tap.
#[derive(Debug)]
pub struct Tap {
    file: File,
}

impl Tap {
    /// Open a tap if `CCN_TAP` is set; errors are logged, never fatal.
    pub fn from_env() -> Option<Tap> {
        let prefix = std::env::var(TAP_ENV).ok()?;
        if prefix.is_empty() {
            return None;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let path = format!(
            "{}-{}-{}-{}",
            prefix,
            std::process::id(),
            now.as_secs(),
            now.subsec_micros()
        );
        match OpenOptions::new().append(true).create(true).open(&path) {
            Ok(file) => {
                info!("tap writing to {path}");
                Some(Tap { file })
            }
            Err(e) => {
                warn!("unable to open tap file {path}: {e}");
                None
            }
        }
    }

    /// Record outbound bytes; tap failures are logged and ignored.
    pub fn write(&mut self, bytes: &[u8]) {
        if let Err(e) = self.file.write_all(bytes) {
            warn!("tap write failed: {e}");
        }
    }
}
