use std::sync::Arc;

use ballast_common::config::AppConfig;
use ballast_common::runtime::RuntimeManager;
use ballast_execution::codec::ProstTaskCodec;
use ballast_execution::executor::fetch::MemoryBlockFetcher;
use ballast_execution::executor::task_runner::DigestTaskProcessor;
use ballast_execution::executor::ExecutorOptions;
use ballast_execution::id::ExecutorId;
use log::info;

use crate::ExecutorArgs;

pub fn run_executor(args: ExecutorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let runtime = RuntimeManager::try_new(&config.runtime)?;
    runtime.block_on(serve(config, args))
}

async fn serve(config: AppConfig, args: ExecutorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (driver_host, driver_port) = parse_endpoint(&args.driver_url)?;
    if let Some(worker_url) = &args.worker_url {
        info!("executor is supervised by worker at {worker_url}");
    }
    if !args.user_class_path.is_empty() {
        info!(
            "user class path entries: {}",
            args.user_class_path.join(", ")
        );
    }
    let mut options = ExecutorOptions::new(
        &config,
        ExecutorId::from(args.executor_id.as_str()),
        args.app_id,
        args.cores,
        driver_host,
        driver_port,
        Arc::new(ProstTaskCodec),
        Arc::new(MemoryBlockFetcher::new()),
        Arc::new(DigestTaskProcessor::new()),
    );
    options.external_host = args.hostname;
    ballast_execution::run_executor(options).await?;
    Ok(())
}

/// Accepts `scheme://host:port` or plain `host:port`.
fn parse_endpoint(url: &str) -> Result<(String, u16), Box<dyn std::error::Error>> {
    let rest = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };
    let rest = rest.trim_end_matches('/');
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid driver url: {url}"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid driver port in url: {url}"))?;
    if host.is_empty() {
        return Err(format!("invalid driver url: {url}").into());
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("http://10.0.0.1:7077").unwrap(),
            ("10.0.0.1".to_string(), 7077)
        );
        assert_eq!(
            parse_endpoint("10.0.0.1:7077").unwrap(),
            ("10.0.0.1".to_string(), 7077)
        );
        assert!(parse_endpoint("10.0.0.1").is_err());
        assert!(parse_endpoint("host:notaport").is_err());
    }
}
