use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::EngineConfig;

/// Merged downloads always land in this container.
pub const MERGE_CONTAINER: &str = "mp4";

/// Argument lists for every way the engine is invoked.
pub struct CommandBuilder<'a> {
    config: &'a EngineConfig,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    fn push_opt(args: &mut Vec<String>, flag: &str, value: Option<&String>) {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            args.push(flag.to_string());
            args.push(value.clone());
        }
    }

    /// Network and retry tuning shared by every fetch mode.
    fn tuning(&self, args: &mut Vec<String>, prefer_free_formats: bool) {
        let c = self.config;
        args.extend([
            "--no-playlist".to_string(),
            "--concurrent-fragments".to_string(),
            c.concurrent_fragments.to_string(),
            "--throttled-rate".to_string(),
            c.throttled_rate.clone(),
            "--buffer-size".to_string(),
            c.buffer_size.clone(),
            "--socket-timeout".to_string(),
            c.socket_timeout_secs.to_string(),
            "--retries".to_string(),
            c.retries.to_string(),
            "--fragment-retries".to_string(),
            c.fragment_retries.to_string(),
            "--extractor-retries".to_string(),
            c.extractor_retries.to_string(),
            "--file-access-retries".to_string(),
            c.file_access_retries.to_string(),
        ]);

        if c.sleep_requests > 0.0 {
            args.push("--sleep-requests".to_string());
            args.push(c.sleep_requests.to_string());
        }
        Self::push_opt(args, "--user-agent", c.user_agent.as_ref());
        if prefer_free_formats && c.prefer_free_formats {
            args.push("--prefer-free-formats".to_string());
        }
        Self::push_opt(args, "--http-chunk-size", c.http_chunk_size.as_ref());
        Self::push_opt(args, "--sponsorblock-remove", c.sponsorblock_remove.as_ref());
        self.identity(args);
    }

    fn identity(&self, args: &mut Vec<String>) {
        Self::push_opt(args, "--cookies-from-browser", self.config.cookies_from_browser.as_ref());
        Self::push_opt(args, "--proxy", self.config.proxy.as_ref());
    }

    /// Metadata query: one JSON document on stdout, nothing downloaded.
    pub fn metadata_args(&self, url: &str) -> Vec<String> {
        let c = self.config;
        let mut args: Vec<String> = [
            "--dump-single-json",
            "--skip-download",
            "--no-playlist",
            "--no-warnings",
        ]
        .map(String::from)
        .to_vec();
        args.extend([
            "--socket-timeout".to_string(),
            c.socket_timeout_secs.to_string(),
            "--extractor-retries".to_string(),
            c.extractor_retries.to_string(),
        ]);
        Self::push_opt(&mut args, "--user-agent", c.user_agent.as_ref());
        if c.prefer_free_formats {
            args.push("--prefer-free-formats".to_string());
        }
        self.identity(&mut args);
        args.push(url.to_string());
        args
    }

    /// Single-stream fetch written to stdout.
    pub fn stream_args(&self, url: &str, format_id: &str) -> Vec<String> {
        let mut args: Vec<String> = ["-f", format_id, "-o", "-", "-c", "--no-warnings", "--quiet"]
            .map(String::from)
            .to_vec();
        self.tuning(&mut args, true);
        args.push(url.to_string());
        args
    }

    /// Merged fetch into `output_template`. With `progress`, the engine prints
    /// one progress line per update instead of staying quiet.
    pub fn merge_args(&self, url: &str, format_id: &str, output_template: &Path, progress: bool) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            format_id.to_string(),
            "-o".to_string(),
            output_template.to_string_lossy().into_owned(),
            "--merge-output-format".to_string(),
            MERGE_CONTAINER.to_string(),
            "--no-part".to_string(),
        ];
        if progress {
            args.push("--newline".to_string());
            args.push("--progress".to_string());
        } else {
            args.push("--no-warnings".to_string());
            args.push("--quiet".to_string());
        }
        self.tuning(&mut args, false);
        args.push(url.to_string());
        args
    }

    /// Process for `args`, in its own process group and killed if dropped.
    pub fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .env("PYTHONUNBUFFERED", "1")
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(args: &[String], flag: &str) -> Option<usize> {
        args.iter().position(|a| a == flag)
    }

    #[test]
    fn test_stream_args_write_to_stdout() {
        let config = EngineConfig::default();
        let args = CommandBuilder::new(&config).stream_args("https://example.com/v", "22");

        assert_eq!(&args[..5], ["-f", "22", "-o", "-", "-c"]);
        assert!(position(&args, "--quiet").is_some());
        assert!(position(&args, "--prefer-free-formats").is_some());
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/v"));

        let idx = position(&args, "--concurrent-fragments").unwrap();
        assert_eq!(args[idx + 1], "8");
        let idx = position(&args, "--http-chunk-size").unwrap();
        assert_eq!(args[idx + 1], "50M");
        assert!(position(&args, "--sleep-requests").is_none());
        assert!(position(&args, "--proxy").is_none());
    }

    #[test]
    fn test_merge_args_progress_mode() {
        let config = EngineConfig {
            sleep_requests: 1.5,
            proxy: Some("socks5://proxy:1080".to_string()),
            cookies_from_browser: Some("firefox".to_string()),
            ..EngineConfig::default()
        };
        let builder = CommandBuilder::new(&config);
        let template = Path::new("/tmp/ytdl_x/abc.%(ext)s");

        let quiet = builder.merge_args("https://example.com/v", "137+140", template, false);
        assert!(position(&quiet, "--quiet").is_some());
        assert!(position(&quiet, "--newline").is_none());
        assert!(position(&quiet, "--prefer-free-formats").is_none());

        let tracked = builder.merge_args("https://example.com/v", "137+140", template, true);
        assert!(position(&tracked, "--newline").is_some());
        assert!(position(&tracked, "--progress").is_some());
        assert!(position(&tracked, "--quiet").is_none());
        assert_eq!(tracked[3], "/tmp/ytdl_x/abc.%(ext)s");
        assert_eq!(tracked[position(&tracked, "--merge-output-format").unwrap() + 1], "mp4");
        assert_eq!(tracked[position(&tracked, "--sleep-requests").unwrap() + 1], "1.5");
        assert_eq!(tracked[position(&tracked, "--proxy").unwrap() + 1], "socks5://proxy:1080");
        assert_eq!(tracked[position(&tracked, "--cookies-from-browser").unwrap() + 1], "firefox");
    }

    #[test]
    fn test_metadata_args() {
        let config = EngineConfig {
            user_agent: Some("Mozilla/5.0".to_string()),
            ..EngineConfig::default()
        };
        let args = CommandBuilder::new(&config).metadata_args("https://example.com/v");
        assert_eq!(args[0], "--dump-single-json");
        assert!(position(&args, "--skip-download").is_some());
        assert_eq!(args[position(&args, "--user-agent").unwrap() + 1], "Mozilla/5.0");
        assert!(position(&args, "-f").is_none());
    }

    #[test]
    fn test_blank_optional_values_are_skipped() {
        let config = EngineConfig {
            http_chunk_size: Some("  ".to_string()),
            ..EngineConfig::default()
        };
        let args = CommandBuilder::new(&config).stream_args("https://example.com/v", "22");
        assert!(position(&args, "--http-chunk-size").is_none());
    }
}
