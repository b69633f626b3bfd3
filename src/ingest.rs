//! Purpose: Stream line-delimited records through a pipeline with an explicit failure policy.
//! Exports: `ErrorPolicy`, `IngestConfig`, `IngestOutcome`, `IngestFailure`, `ingest`, `ingest_file`.
//! Role: Adapter between byte streams (stdin or batch files) and `Pipeline::run_line`.
//! Invariants: Records are processed and written in arrival order, one output line per record.
//! Invariants: Blank lines are not records; invalid UTF-8 is decoded lossily.
//! Invariants: Skip mode only continues at record boundaries; per-record buffering is capped.
use std::path::Path;

use bstr::ByteSlice;
use serde_json::Value;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter,
};
use tracing::debug;
use zerda::api::{Error, ErrorKind, Pipeline};

pub const DEFAULT_MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_SNIPPET_BYTES: usize = 160;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorPolicy {
    Stop,
    Skip,
}

#[derive(Copy, Clone, Debug)]
pub struct IngestConfig {
    pub errors: ErrorPolicy,
    pub max_record_bytes: usize,
    pub max_snippet_bytes: usize,
}

impl IngestConfig {
    pub fn new(errors: ErrorPolicy) -> Self {
        Self {
            errors,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            max_snippet_bytes: DEFAULT_MAX_SNIPPET_BYTES,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IngestOutcome {
    pub records_total: u64,
    pub ok: u64,
    pub failed: u64,
}

impl IngestOutcome {
    pub fn absorb(&mut self, other: IngestOutcome) {
        self.records_total += other.records_total;
        self.ok += other.ok;
        self.failed += other.failed;
    }
}

/// A record skipped under `ErrorPolicy::Skip`.
#[derive(Clone, Debug)]
pub struct IngestFailure {
    pub index: u64,
    pub line: u64,
    pub message: String,
    pub error_kind: String,
    pub stage: Option<usize>,
    pub identity: Option<String>,
    pub snippet: Option<String>,
}

pub async fn ingest<R, W, N>(
    reader: R,
    pipeline: &Pipeline,
    config: IngestConfig,
    writer: &mut W,
    mut on_failure: N,
) -> Result<IngestOutcome, Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    N: FnMut(IngestFailure),
{
    let mut reader = BufReader::new(reader);
    let mut outcome = IngestOutcome::default();
    let mut buf = Vec::new();
    let mut line_no = 0u64;

    while let Some(oversize) = read_record(&mut reader, &mut buf, config.max_record_bytes).await? {
        line_no += 1;
        let text = buf.to_str_lossy();
        let record = text.trim();
        if record.is_empty() {
            continue;
        }
        outcome.records_total += 1;
        let index = outcome.records_total;

        let result = if oversize {
            Err(Error::new(ErrorKind::Usage).with_message(format!(
                "record exceeds {} bytes",
                config.max_record_bytes
            )))
        } else {
            pipeline.run_line(record).await
        };

        match result {
            Ok(values) => {
                write_record(writer, &Value::Array(values)).await?;
                outcome.ok += 1;
            }
            Err(err) => match config.errors {
                ErrorPolicy::Stop => return Err(with_skip_hint(err)),
                ErrorPolicy::Skip => {
                    outcome.failed += 1;
                    debug!(index, line = line_no, error = %err, "skipping record");
                    on_failure(IngestFailure {
                        index,
                        line: line_no,
                        message: err.message().unwrap_or("record failed").to_string(),
                        error_kind: if oversize {
                            "Oversize".to_string()
                        } else {
                            format!("{:?}", err.kind())
                        },
                        stage: err.stage(),
                        identity: err.identity().map(str::to_string),
                        snippet: Some(truncate_snippet(record, config.max_snippet_bytes)),
                    });
                }
            },
        }
    }

    writer
        .flush()
        .await
        .map_err(|err| io_error(err, "failed to flush output"))?;
    Ok(outcome)
}

/// Process one batch file, writing its records to `output` (parent directories created).
pub async fn ingest_file<N>(
    input: &Path,
    output: &Path,
    pipeline: &Pipeline,
    config: IngestConfig,
    on_failure: N,
) -> Result<IngestOutcome, Error>
where
    N: FnMut(IngestFailure),
{
    let source = tokio::fs::File::open(input).await.map_err(|err| {
        io_error(err, "failed to open input file").with_path(input)
    })?;
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|err| {
            io_error(err, "failed to create output directory").with_path(parent)
        })?;
    }
    let sink = tokio::fs::File::create(output).await.map_err(|err| {
        io_error(err, "failed to create output file").with_path(output)
    })?;
    let mut writer = BufWriter::new(sink);
    let outcome = ingest(source, pipeline, config, &mut writer, on_failure)
        .await
        .map_err(|err| if err.path().is_none() { err.with_path(input) } else { err })?;
    debug!(
        input = %input.display(),
        output = %output.display(),
        records = outcome.records_total,
        "batch file processed"
    );
    Ok(outcome)
}

// `None` at end of input; `Some(true)` when the line was cut at `max` and the rest discarded.
async fn read_record<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> Result<Option<bool>, Error>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(max as u64 + 1)
        .read_until(b'\n', buf)
        .await
        .map_err(|err| io_error(err, "failed to read input"))?;
    if read == 0 {
        return Ok(None);
    }
    let content = buf.strip_suffix(b"\n").unwrap_or(buf);
    if content.len() <= max {
        return Ok(Some(false));
    }
    loop {
        let (used, done) = {
            let available = reader
                .fill_buf()
                .await
                .map_err(|err| io_error(err, "failed to read input"))?;
            if available.is_empty() {
                break;
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        if done {
            break;
        }
    }
    Ok(Some(true))
}

async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> Result<(), Error> {
    let mut line = serde_json::to_vec(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode output record")
            .with_source(err)
    })?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .map_err(|err| io_error(err, "failed to write output"))?;
    writer
        .flush()
        .await
        .map_err(|err| io_error(err, "failed to flush output"))
}

fn with_skip_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    err.with_hint("Use --errors skip to continue past failing records.")
}

fn io_error(err: std::io::Error, message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_source(err)
}

fn truncate_snippet(input: &str, max: usize) -> String {
    if input.len() <= max {
        return input.to_string();
    }
    let suffix = "...";
    let mut take = max.saturating_sub(suffix.len());
    while !input.is_char_boundary(take) {
        take -= 1;
    }
    format!("{}{suffix}", &input[..take])
}

#[cfg(test)]
mod tests {
    use super::{ErrorPolicy, IngestConfig, IngestFailure, ingest, ingest_file, truncate_snippet};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;
    use zerda::api::{Error, ErrorKind, Pipeline, Plugin, StageOutput};

    #[derive(Debug)]
    struct Increment;

    #[async_trait]
    impl Plugin for Increment {
        fn identity(&self) -> &str {
            "increment"
        }

        async fn call(&self, input: Vec<Value>) -> Result<StageOutput, Error> {
            let mut out = Vec::with_capacity(input.len());
            for value in input {
                let Some(n) = value.as_i64() else {
                    return Err(Error::new(ErrorKind::Stage).with_message("expected a number"));
                };
                out.push(Value::from(n + 1));
            }
            Ok(StageOutput::Sequence(out))
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new().with_stage(Arc::new(Increment))
    }

    fn output_lines(out: &[u8]) -> Vec<&str> {
        std::str::from_utf8(out).expect("utf8").lines().collect()
    }

    #[tokio::test]
    async fn records_stream_in_order() {
        let input = b"3\n\n[1,2]\n  \n10";
        let mut out = Vec::new();
        let outcome = ingest(
            &input[..],
            &pipeline(),
            IngestConfig::new(ErrorPolicy::Stop),
            &mut out,
            |_| panic!("no failures expected"),
        )
        .await
        .expect("ingest");

        assert_eq!(outcome.records_total, 3);
        assert_eq!(outcome.ok, 3);
        assert_eq!(output_lines(&out), vec!["[4]", "[2,3]", "[11]"]);
    }

    #[tokio::test]
    async fn stop_policy_fails_on_first_bad_record() {
        let input = b"1\n\"x\"\n2\n";
        let mut out = Vec::new();
        let err = ingest(
            &input[..],
            &pipeline(),
            IngestConfig::new(ErrorPolicy::Stop),
            &mut out,
            |_| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Stage);
        assert_eq!(err.identity(), Some("increment"));
        assert!(err.hint().is_some_and(|hint| hint.contains("--errors skip")));
        assert_eq!(output_lines(&out), vec!["[2]"]);
    }

    #[tokio::test]
    async fn skip_policy_reports_and_continues() {
        let input = b"1\nhello\n2\n";
        let mut out = Vec::new();
        let mut failures: Vec<IngestFailure> = Vec::new();
        let outcome = ingest(
            &input[..],
            &pipeline(),
            IngestConfig::new(ErrorPolicy::Skip),
            &mut out,
            |failure| failures.push(failure),
        )
        .await
        .expect("ingest");

        assert_eq!(outcome.records_total, 3);
        assert_eq!(outcome.failed, 1);
        assert_eq!(output_lines(&out), vec!["[2]", "[3]"]);
        let failure = failures.first().expect("failure");
        assert_eq!(failure.index, 2);
        assert_eq!(failure.line, 2);
        assert_eq!(failure.stage, Some(0));
        assert_eq!(failure.error_kind, "Stage");
        assert_eq!(failure.snippet.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn oversized_records_are_skipped_whole() {
        let input = b"[1,1,1,1,1,1]\n5\n";
        let mut config = IngestConfig::new(ErrorPolicy::Skip);
        config.max_record_bytes = 8;
        let mut out = Vec::new();
        let mut kinds = Vec::new();
        let outcome = ingest(&input[..], &pipeline(), config, &mut out, |failure| {
            kinds.push(failure.error_kind)
        })
        .await
        .expect("ingest");

        assert_eq!(outcome.failed, 1);
        assert_eq!(kinds, vec!["Oversize".to_string()]);
        assert_eq!(output_lines(&out), vec!["[6]"]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let input = b"\xffabc\n";
        let mut out = Vec::new();
        let outcome = ingest(
            &input[..],
            &Pipeline::new(),
            IngestConfig::new(ErrorPolicy::Stop),
            &mut out,
            |_| {},
        )
        .await
        .expect("ingest");
        assert_eq!(outcome.ok, 1);
        assert_eq!(output_lines(&out), vec!["[\"\u{fffd}abc\"]"]);
    }

    #[tokio::test]
    async fn batch_files_write_next_to_output_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("in.jsonl");
        let output = temp.path().join("out/nested/in.jsonl");
        std::fs::write(&input, "1\n2\n").expect("write");

        let outcome = ingest_file(
            &input,
            &output,
            &pipeline(),
            IngestConfig::new(ErrorPolicy::Stop),
            |_| {},
        )
        .await
        .expect("ingest");
        assert_eq!(outcome.ok, 2);
        assert_eq!(std::fs::read_to_string(&output).expect("read"), "[2]\n[3]\n");
    }

    #[test]
    fn snippets_truncate_on_char_boundaries() {
        assert_eq!(truncate_snippet("short", 10), "short");
        assert_eq!(truncate_snippet("abcdefghij", 6), "abc...");
        assert_eq!(truncate_snippet("ééééé", 6), "é...");
    }
}
