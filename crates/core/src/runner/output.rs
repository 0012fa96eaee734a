//! Output image discovery.

use std::path::Path;
use std::time::Duration;

/// Wait until `path` exists, checking every `interval`.
///
/// There is no timeout. The runner abandons the wait if the process exits
/// unsuccessfully; a script that exits cleanly without writing the image
/// keeps its worker slot until an operator intervenes.
pub async fn wait_for_file(path: &Path, interval: Duration) {
    let mut attempts: u64 = 0;
    loop {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return;
        }
        attempts += 1;
        if attempts % 50 == 0 {
            tracing::warn!(path = %path.display(), attempts, "Still waiting for output image");
        }
        tokio::time::sleep(interval).await;
    }
}
