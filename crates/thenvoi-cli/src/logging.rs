//! Tracing setup for the CLI.
//!
//! Console logs go to stderr at a level chosen by the verbosity flags
//! (`RUST_LOG` overrides it). `--log-file` adds a second sink that always
//! records debug output. Both sinks run through [`Redacting`] so API keys
//! and passwords never reach a terminal or a file.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{LazyLock, Mutex};

use anyhow::Context;
use regex::Regex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Console log level derived from the global flags.
pub fn console_level(verbose: u8, quiet: bool, debug: bool) -> LevelFilter {
    if quiet {
        LevelFilter::ERROR
    } else if debug {
        LevelFilter::DEBUG
    } else {
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            _ => LevelFilter::DEBUG,
        }
    }
}

static PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"sk-[A-Za-z0-9_-]{20,}", "[REDACTED_API_KEY]"),
        (r#"(?i)api_key[=:]\s*['"]?[\w-]+['"]?"#, "api_key=[REDACTED]"),
        (r#"(?i)password[=:]\s*['"]?[\w-]+['"]?"#, "password=[REDACTED]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

static ANSI_ESCAPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").ok());

fn contains_secret(text: &str) -> bool {
    PATTERNS.iter().any(|(re, _)| re.is_match(text))
}

fn mask(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}

/// Mask API keys and `api_key=` / `password=` assignments in `text`.
///
/// Coloured output puts escape codes between a field name and its `=`, so
/// matching happens on the text with escapes removed. A line that needed
/// masking loses its colour; any other line is returned untouched.
pub fn redact(text: &str) -> String {
    let plain = match ANSI_ESCAPE.as_ref() {
        Some(re) => re.replace_all(text, ""),
        None => text.into(),
    };
    if !contains_secret(&plain) {
        return text.to_string();
    }
    mask(&plain)
}

/// [`MakeWriter`] adapter that redacts everything written through it.
pub struct Redacting<M> {
    inner: M,
}

impl<M> Redacting<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for Redacting<M> {
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: self.inner.make_writer(),
        }
    }
}

/// Writer half of [`Redacting`].
///
/// The fmt layer writes each event with a single call, so redacting per
/// write sees whole lines.
pub struct RedactingWriter<W> {
    inner: W,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&text).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Install the global subscriber.
pub fn init(level: LevelFilter, log_file: Option<&Path>) -> anyhow::Result<()> {
    let ansi = std::env::var_os("NO_COLOR").is_none();
    let console_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let console = fmt::layer()
        .with_writer(Redacting::new(io::stderr))
        .with_ansi(ansi)
        .with_target(level >= LevelFilter::DEBUG)
        .with_filter(console_filter);

    let file = match log_file {
        Some(path) => {
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Redacting::new(Mutex::new(handle)))
                    .with_ansi(false)
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_mapping() {
        assert_eq!(console_level(0, false, false), LevelFilter::WARN);
        assert_eq!(console_level(1, false, false), LevelFilter::INFO);
        assert_eq!(console_level(2, false, false), LevelFilter::DEBUG);
        assert_eq!(console_level(0, false, true), LevelFilter::DEBUG);
        assert_eq!(console_level(3, true, true), LevelFilter::ERROR);
    }

    #[test]
    fn redacts_sk_keys() {
        assert_eq!(
            redact("using key sk-abcdefghijklmnopqrstuvwxyz now"),
            "using key [REDACTED_API_KEY] now"
        );
        // Too short to look like a real key.
        assert_eq!(redact("sk-short"), "sk-short");
    }

    #[test]
    fn redacts_assignments_case_insensitively() {
        assert_eq!(redact("API_KEY=hunter2"), "api_key=[REDACTED]");
        assert_eq!(redact("password: 'swordfish'"), "password=[REDACTED]");
        assert_eq!(redact("nothing to see"), "nothing to see");
    }

    #[test]
    fn redacts_through_colour_codes() {
        assert_eq!(
            redact("\x1b[3mapi_key\x1b[0m\x1b[2m=\x1b[0m\"secret1\" done"),
            "api_key=[REDACTED] done"
        );
        let coloured = "\x1b[32m INFO\x1b[0m connected";
        assert_eq!(redact(coloured), coloured);
    }

    #[derive(Clone, Default)]
    struct Capture(std::sync::Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn ansi_console_layer_never_prints_secrets() {
        let capture = Capture::default();
        let sink = capture.clone();
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(Redacting::new(move || sink.clone()))
                .with_ansi(true),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(api_key = "hunter2", password = "swordfish", "connecting");
        });

        let out = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("connecting"), "{out}");
        assert!(!out.contains("hunter2"), "{out}");
        assert!(!out.contains("swordfish"), "{out}");
        assert!(out.contains("api_key=[REDACTED]"), "{out}");
    }

    #[test]
    fn writer_redacts_before_inner_sink() {
        let mut writer = RedactingWriter { inner: Vec::new() };
        let line = b"connecting with api_key=abc123\n";
        assert_eq!(writer.write(line).unwrap(), line.len());
        assert_eq!(
            String::from_utf8(writer.inner).unwrap(),
            "connecting with api_key=[REDACTED]\n"
        );
    }
}
