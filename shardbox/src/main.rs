//! Server entry point: load configuration, unlock encryption, bring the
//! storage engine up, spawn background tasks, listen, then tear down in
//! order on shutdown.

use std::sync::Arc;

use clap::Parser;
use tokio::runtime::Builder;
use tokio::time::timeout;
use tracing::{info, warn};

use shardbox::auth::UserStore;
use shardbox::cli::{Cli, Commands};
use shardbox::config::{self, ConfigAndUsers};
use shardbox::crypt::Crypt;
use shardbox::dispatch::Context;
use shardbox::frontend::{comms, Listener};
use shardbox::ipfilter::IpFilter;
use shardbox::limiter::RateLimits;
use shardbox::net::tls;
use shardbox::storage::{maintenance, settings, tokens, CacheStore, Registry};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    shardbox::logger();

    let config = config::load(&cli.config, &cli.users)?;

    if let Some(Commands::Configcheck) = cli.command {
        println!("configuration ok");
        return Ok(());
    }

    tls::load()?;
    settings::seed(&config.config);

    // The passphrase prompt has to happen on the console, before the
    // runtime takes over.
    let crypt = Arc::new(Crypt::load(&config.config.general.config_dir)?);
    crypt.unlock_interactive()?;

    let workers = config.config.general.workers;
    let runtime = if workers == 0 {
        Builder::new_current_thread().enable_all().build()?
    } else {
        Builder::new_multi_thread()
            .worker_threads(workers)
            .enable_all()
            .build()?
    };

    runtime.block_on(run(config, crypt))?;
    Ok(())
}

async fn run(
    config: Arc<ConfigAndUsers>,
    crypt: Arc<Crypt>,
) -> Result<(), Box<dyn std::error::Error>> {
    let general = &config.config.general;

    let registry = Arc::new(Registry::new(&general.data_root, crypt.clone()));
    {
        let registry = registry.clone();
        tokio::task::spawn_blocking(move || registry.init()).await??;
    }

    let limits = Arc::new(RateLimits::new(
        config.config.rate_limit.window,
        config.config.rate_limit.default_max_uses,
    ));
    let users = Arc::new(UserStore::load(&config.users, limits.clone()));
    if users.is_empty() {
        warn!("no users configured; every request will fail authentication");
    }

    let ip_filter = Arc::new(IpFilter::load(
        &general.config_dir,
        config.config.ip_filter.ban_after_flags,
    ));

    let ctx = Context {
        registry: registry.clone(),
        caches: Arc::new(CacheStore::new()),
        users,
        limits,
        ip_filter: ip_filter.clone(),
        crypt,
    };

    // Background tasks: token deadlines, flag decay, ban cleaning, idle
    // shard eviction, shard compaction. One task per concern.
    let shutdown = comms().shutdown_token();
    tokens::spawn_reaper(shutdown.clone());
    ip_filter.spawn_tasks(
        config.config.ip_filter.decay_interval(),
        config.config.ip_filter.clean_interval(),
        shutdown.clone(),
    );
    maintenance::spawn_idle_sweeper(
        registry.clone(),
        config.config.storage.sweep_interval(),
        config.config.storage.idle_unload_after(),
        shutdown.clone(),
    );
    maintenance::spawn_optimizer(
        registry.clone(),
        config.config.storage.optimize_interval(),
        shutdown,
    );

    let mut listener = Listener::new(format!("{}:{}", general.host, general.port));
    listener.listen(ctx).await?;

    // Teardown: stop background tasks, wait for in-flight clients (they
    // are never forcibly cancelled), then persist everything.
    comms().shutdown();
    comms().tracker().close();

    let grace = general.shutdown_timeout();
    if timeout(grace, comms().tracker().wait()).await.is_err() {
        warn!(
            "{} client(s) still connected after {:.1}s, persisting anyway",
            comms().tracker().len(),
            grace.as_secs_f64()
        );
    }

    maintenance::persist_all(&registry).await;
    registry.shutdown();

    if let Err(err) = ip_filter.persist() {
        warn!("ipbanmanager persist failed: {}", err);
    }

    info!("goodbye");
    Ok(())
}
