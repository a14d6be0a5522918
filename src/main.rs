use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use swcache::cache::{CacheStorage, SqliteStorage};
use swcache::fetch::{HttpNetwork, Network, Request};
use swcache::lifecycle::RegistrationStore;
use swcache::{logging, ActivateReport, Config, Host, InstallOutcome, OfflineCacheAgent};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline caching agent with versioned cache generations")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./swcache.yaml or $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured cache generation and activate it
  Install,
  /// Re-run activation for the active generation (removes stale generations)
  Activate,
  /// Run the fetch policy for one request
  Fetch {
    /// Absolute URL or path relative to the origin
    target: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// HTTP method
    #[arg(long, default_value = "GET")]
    method: String,
    /// Print the response body
    #[arg(long)]
    body: bool,
  },
  /// List cache generations
  Caches,
  /// List entries stored in a generation (default: the active one)
  Entries { name: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let storage = Arc::new(SqliteStorage::open_at(&config.storage_path()?)?);
  let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(&config.network)?);
  let agent = Arc::new(OfflineCacheAgent::new(
    config.agent_config()?,
    storage.clone() as Arc<dyn CacheStorage>,
    network,
  ));
  let host = Host::new(storage.clone() as Arc<dyn RegistrationStore>);

  match args.command {
    Command::Install => match host.register(agent).await {
      InstallOutcome::Activated(report) => {
        println!("Installed and activated {}", config.cache_name);
        print_report(&report);
      }
      InstallOutcome::Waiting => {
        println!("Installed {}; waiting for open pages to close", config.cache_name);
      }
      InstallOutcome::Failed(e) => {
        return Err(eyre!("Install of {} failed: {}", config.cache_name, e));
      }
    },
    Command::Activate => {
      host.resume(agent)?;
      let report = host.reactivate().await?;
      print_report(&report);
    }
    Command::Fetch {
      target,
      navigate,
      method,
      body,
    } => {
      host.resume(agent)?;

      let url = config.resolve(&target)?;
      let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let request = match navigate {
        true => Request::navigate(url),
        false => Request::get(url),
      };
      let request = request.with_method(method);

      let response = host.dispatch_fetch(request).await?;
      host.settle().await;

      println!(
        "{} {} ({} bytes)",
        response.status,
        response.status_text,
        response.body.len()
      );
      if let Some(content_type) = response.content_type() {
        println!("Content-Type: {}", content_type);
      }
      if body {
        println!();
        println!("{}", response.text());
      }
    }
    Command::Caches => {
      let active = storage.active_generation()?;
      for name in storage.keys()? {
        let marker = if active.as_deref() == Some(name.as_str()) {
          "*"
        } else {
          " "
        };
        println!("{} {} ({} entries)", marker, name, storage.entries(&name)?.len());
      }
    }
    Command::Entries { name } => {
      let name = match name {
        Some(name) => name,
        None => storage
          .active_generation()?
          .ok_or_else(|| eyre!("No active generation; run `swcache install` first"))?,
      };
      if !storage.has(&name)? {
        return Err(eyre!("No cache named {}", name));
      }
      for entry in storage.entries(&name)? {
        println!(
          "{} {:>8} {} {}",
          entry.status,
          entry.size,
          entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
          entry.url
        );
      }
    }
  }

  info!("Done");
  Ok(())
}

fn print_report(report: &ActivateReport) {
  for name in &report.deleted {
    println!("Deleted old cache {}", name);
  }
  for name in &report.failed {
    println!("Could not delete old cache {}", name);
  }
  if let Some(claimed) = report.claimed {
    println!("Controlling {} client(s)", claimed);
  }
}
