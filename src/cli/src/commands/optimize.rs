//! `a3s-stargz optimize` command: rewrite an image or index as eStargz.

use std::path::{Path, PathBuf};

use clap::Args;

use a3s_stargz_core::log::init_tracing;
use a3s_stargz_core::{LogFormat, LogLevel, OptimizeConfig, OptimizeError, PrioritySet, Result};
use a3s_stargz_runtime::{Optimizer, Platform, RegistryAuth, RegistryClient, StargzEncoder};

#[derive(Args)]
pub struct OptimizeArgs {
    /// Source image or index reference (e.g., "ghcr.io/org/app:v1")
    pub src: String,

    /// Destination reference
    pub dst: String,

    /// File that must be prefetchable from the result (repeatable)
    #[arg(long = "prioritize", value_name = "PATH")]
    pub prioritize: Vec<String>,

    /// Read prioritized files from FILE, one path per line
    #[arg(long, value_name = "FILE")]
    pub prioritize_file: Option<PathBuf>,

    /// Only optimize the image for this platform (os/arch[/variant])
    #[arg(long)]
    pub platform: Option<String>,

    /// Reach this registry over plain HTTP (repeatable)
    #[arg(long = "insecure-registry", value_name = "HOST")]
    pub insecure_registries: Vec<String>,

    /// Config file (default: ~/.a3s/stargz.yaml when present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Gzip level for eStargz members (0-9)
    #[arg(long)]
    pub compression_level: Option<u32>,

    /// Split regular files into chunks of this many bytes
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<usize>,

    /// Only print the digest of the published manifest
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: OptimizeArgs,
    log_level: Option<LogLevel>,
    log_format: LogFormat,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args)?;
    init_tracing(log_level.unwrap_or(config.log_level), log_format);

    let platform = config.platform.as_deref().map(Platform::parse).transpose()?;
    let prioritize: PrioritySet = config.prioritize.iter().cloned().collect();

    let client = RegistryClient::with_auth(RegistryAuth::from_env(), &config.insecure_registries);
    let optimizer = Optimizer::new(StargzEncoder::from_config(&config)).with_platform(platform);

    if !args.quiet {
        println!("Optimizing {} -> {}...", args.src, args.dst);
    }

    let result = optimizer
        .optimize(&client, &client, &args.src, &args.dst, &prioritize)
        .await?;

    if args.quiet {
        println!("{}", result.digest);
    } else {
        println!("Optimized: {} ({})", args.dst, result.digest);
    }

    Ok(())
}

/// Merge the config file with command-line flags. Flags win for scalar
/// settings; list settings from both sources are combined.
pub fn resolve_config(args: &OptimizeArgs) -> Result<OptimizeConfig> {
    let mut config = OptimizeConfig::load(args.config.as_deref())?;

    config.prioritize.extend(args.prioritize.iter().cloned());
    if let Some(path) = &args.prioritize_file {
        config.prioritize.extend(read_prioritize_file(path)?);
    }
    config
        .insecure_registries
        .extend(args.insecure_registries.iter().cloned());

    if args.platform.is_some() {
        config.platform = args.platform.clone();
    }
    if let Some(level) = args.compression_level {
        config.compression_level = level;
    }
    if let Some(size) = args.chunk_size {
        config.chunk_size = size;
    }

    config.validate()?;
    Ok(config)
}

/// One path per line; blank lines and `#` comments are skipped.
fn read_prioritize_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        OptimizeError::ConfigError(format!(
            "Failed to read prioritize file {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn args(dir: &TempDir, config_yaml: &str) -> OptimizeArgs {
        let config = dir.path().join("stargz.yaml");
        fs::write(&config, config_yaml).unwrap();
        OptimizeArgs {
            src: "example.com/app:v1".to_string(),
            dst: "example.com/app:v1-esgz".to_string(),
            prioritize: Vec::new(),
            prioritize_file: None,
            platform: None,
            insecure_registries: Vec::new(),
            config: Some(config),
            compression_level: None,
            chunk_size: None,
            quiet: false,
        }
    }

    #[test]
    fn test_resolve_config_from_file() {
        let dir = TempDir::new().unwrap();
        let args = args(
            &dir,
            "platform: linux/amd64\nprioritize: [/bin/sh]\ncompression_level: 6\nlog_level: debug\n",
        );

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.platform.as_deref(), Some("linux/amd64"));
        assert_eq!(config.prioritize, vec!["/bin/sh"]);
        assert_eq!(config.compression_level, 6);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let mut args = args(
            &dir,
            "platform: linux/amd64\nprioritize: [/bin/sh]\ninsecure_registries: [a:5000]\nchunk_size: 1024\n",
        );
        args.platform = Some("linux/arm64".to_string());
        args.prioritize = vec!["/etc/hosts".to_string()];
        args.insecure_registries = vec!["b:5000".to_string()];
        args.chunk_size = Some(4096);

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.platform.as_deref(), Some("linux/arm64"));
        assert_eq!(config.prioritize, vec!["/bin/sh", "/etc/hosts"]);
        assert_eq!(config.insecure_registries, vec!["a:5000", "b:5000"]);
        assert_eq!(config.chunk_size, 4096);
    }

    #[test]
    fn test_prioritize_file() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("prioritize.txt");
        fs::write(&list, "# startup files\n/bin/sh\n\n  /lib/ld.so  \n").unwrap();
        let mut args = args(&dir, "{}\n");
        args.prioritize_file = Some(list);

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.prioritize, vec!["/bin/sh", "/lib/ld.so"]);
    }

    #[test]
    fn test_prioritize_file_missing() {
        let dir = TempDir::new().unwrap();
        let mut args = args(&dir, "{}\n");
        args.prioritize_file = Some(dir.path().join("nope.txt"));

        let err = resolve_config(&args).unwrap_err();
        assert!(matches!(err, OptimizeError::ConfigError(_)));
    }

    #[test]
    fn test_flag_fixes_invalid_file_value() {
        let dir = TempDir::new().unwrap();
        let mut args = args(&dir, "compression_level: 12\n");
        assert!(resolve_config(&args).is_err());

        args.compression_level = Some(6);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.compression_level, 6);
    }

    #[test]
    fn test_invalid_compression_level_flag() {
        let dir = TempDir::new().unwrap();
        let mut args = args(&dir, "{}\n");
        args.compression_level = Some(12);
        assert!(resolve_config(&args).is_err());
    }
}
