use std::sync::LazyLock;

use futures_lite::StreamExt;
use regex::Regex;
use tokio::task::JoinHandle;

use crate::logger::ServiceLogger;
use crate::oci::LogStream;

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").expect("timestamp regex should be valid")
});

/// Clean one line of container output.
///
/// Drops any bytes before the engine timestamp (stream headers or terminal
/// control sequences) and removes non-printable characters. Returns `None`
/// for lines left empty.
pub fn clean_log_line(line: &str) -> Option<String> {
    let line = match TIMESTAMP_RE.find(line) {
        Some(ts) => &line[ts.start()..],
        None => line,
    };

    let cleaned: String = line
        .chars()
        .filter(|c| *c == '\t' || !c.is_control())
        .collect();
    let cleaned = cleaned.trim_end();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_owned())
    }
}

/// Forward a log stream to the logger until it ends
pub(super) fn spawn_log_task(mut stream: LogStream, logger: ServiceLogger) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in chunk.lines().filter_map(clean_log_line) {
                        logger.output(&line);
                    }
                }
                Err(e) => {
                    logger.debug(&format!("log stream closed: {e}"));
                    break;
                }
            }
        }
    })
}
