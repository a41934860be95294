//! Pipes configured from YAML files

mod common;

use anyhow::{Context, Result};
use command_pipe::{AggType, Pipe, PipeConfig};
use common::Observer;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_pipe_runs_with_file_config() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "agg_type: JSON\nverbose: true\nread_timeout_ms: 50")?;

    let config = PipeConfig::from_file(file.path()).context("loading pipe config")?;
    assert_eq!(config.agg_type, Some(AggType::Json));

    let mut pipe = Pipe::new("bash", ["-c", "printf '{\\n  \"gpu\": 42\\n}\\n'"]);
    pipe.configure(config);
    let observer = Observer::new();

    smol::block_on(async {
        let cancel = pipe.start(observer.on_result(), observer.on_exit())?;
        let exit = observer.next_exit(Duration::from_secs(10)).await;
        cancel.cancel();

        assert_eq!(exit, Some(true));
        let results = observer.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_json().context("expected a JSON record")?["gpu"], 42);
        Ok::<_, anyhow::Error>(())
    })
}

#[test]
fn test_invalid_config_file_is_rejected() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "agg_type: XML")?;

    let err = PipeConfig::from_file(file.path()).unwrap_err();
    assert!(err.to_string().starts_with("invalid pipe configuration"));
    Ok(())
}
