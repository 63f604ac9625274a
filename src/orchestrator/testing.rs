use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use tempfile::TempDir;

use super::Orchestrator;
use crate::config::Config;

/// Shell snippet that leaves `$out` holding the engine's `-o` value with
/// `%(ext)s` resolved to `mp4`.
pub const OUTPUT_PRELUDE: &str = r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
out=$(printf '%s' "$out" | sed 's/%(ext)s/mp4/')
"#;

/// Orchestrator whose engine binary is a shell script with `body`.
pub fn fake_engine(body: &str) -> (TempDir, Arc<Orchestrator>) {
    fake_engine_with(body, |_| {})
}

pub fn fake_engine_with(body: &str, tweak: impl FnOnce(&mut Config)) -> (TempDir, Arc<Orchestrator>) {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("fake-engine");
    fs::write(&script, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = Config::default();
    config.engine.binary = script.to_string_lossy().into_owned();
    config.engine.stream_chunk_size = crate::humanize::ByteSize(64 * 1024);
    tweak(&mut config);

    (dir, Arc::new(Orchestrator::new(&config)))
}
