//! Command handlers. `Session` owns the opened cache for the lifetime of
//! the process and prints results to stdout.

use std::future::Future;
use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use questcache_core::api::ReplayClient;
use questcache_core::config::ENV_API_TOKEN;
use questcache_core::utils::truncate_string;
use questcache_core::{
    Config, Connectivity, FileBackend, HttpMethod, NewPendingUpdate, OfflineCache,
    ProgressSnapshot, SyncEngine, SyncEvent, SyncOutcome,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Maximum characters of a JSON body shown in list output
const BODY_PREVIEW_LEN: usize = 60;

/// Buffer size for sync events in watch mode
const CHANNEL_BUFFER_SIZE: usize = 16;

pub struct Session {
    config: Config,
    cache: OfflineCache,
}

impl Session {
    pub async fn open(config: Config) -> Result<Self> {
        let dir = config.store_dir()?;
        let backend = Arc::new(FileBackend::new(&dir));
        let connectivity = Connectivity::new(!config.start_offline);
        let cache = OfflineCache::open(backend, connectivity)
            .await
            .with_context(|| format!("Store at {}", dir.display()))?;
        Ok(Self { config, cache })
    }

    pub async fn status(&self) -> Result<()> {
        let stats = self.cache.stats().await?;
        println!("{}", stats.summary_line());
        println!("  store:              {}", self.config.store_dir()?.display());
        println!("  progress snapshots: {}", stats.progress_snapshots);
        println!("  cached entries:     {}", stats.cached_entries);
        if let Some(oldest) = stats.oldest_pending {
            println!("  oldest pending:     {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        Ok(())
    }

    pub async fn progress_get(&self, user_id: &str) -> Result<()> {
        match self.cache.get_progress(user_id).await? {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => println!("No progress stored for {}", user_id),
        }
        Ok(())
    }

    pub async fn progress_save(&self, file: &str) -> Result<()> {
        let input = read_input(file)?;
        let snapshot: ProgressSnapshot =
            serde_json::from_str(&input).context("Input is not a progress snapshot")?;
        self.cache.save_progress(&snapshot).await?;
        println!(
            "Saved progress for {} ({} missions completed)",
            snapshot.user_id,
            snapshot.completed_missions_count()
        );
        Ok(())
    }

    pub async fn queue_list(&self) -> Result<()> {
        let pending = self.cache.list_pending().await?;
        if pending.is_empty() {
            println!("No pending updates");
            return Ok(());
        }
        for update in pending {
            let body = if update.data.is_null() {
                String::new()
            } else {
                truncate_string(&update.data.to_string(), BODY_PREVIEW_LEN)
            };
            println!(
                "{:>6}  {}  {:<32} {}",
                update.id,
                update.timestamp.format("%Y-%m-%d %H:%M"),
                update.request_line(),
                body
            );
        }
        Ok(())
    }

    pub async fn queue_add(&self, method: HttpMethod, url: String, data: Option<&str>) -> Result<()> {
        let data = match data {
            Some(raw) => parse_json(raw)?,
            None => Value::Null,
        };
        let update = self.cache.enqueue(NewPendingUpdate::new(method, url, data)).await?;
        println!("Queued #{} {}", update.id, update.request_line());
        Ok(())
    }

    pub async fn queue_remove(&self, id: u64) -> Result<()> {
        self.cache.remove(id).await?;
        println!("Removed #{}", id);
        Ok(())
    }

    pub async fn content_put(&self, key: &str, json: &str) -> Result<()> {
        let data = parse_json(json)?;
        self.cache.put(key, &data).await?;
        println!("Cached {}", key);
        Ok(())
    }

    pub async fn content_get(&self, key: &str) -> Result<()> {
        match self.cache.get_entry(key).await? {
            Some(entry) => {
                println!("{}", serde_json::to_string_pretty(&entry.data)?);
                eprintln!("(cached {})", entry.age_display());
            }
            None => println!("Nothing cached for {}", key),
        }
        Ok(())
    }

    pub async fn content_list(&self) -> Result<()> {
        let entries = self.cache.list_all().await?;
        if entries.is_empty() {
            println!("Content cache is empty");
            return Ok(());
        }
        for entry in entries {
            println!("{:<32} {}", entry.key, entry.age_display());
        }
        Ok(())
    }

    pub async fn evict(&self, older_than_days: Option<u32>, max_entries: Option<usize>) -> Result<()> {
        if older_than_days.is_none() && max_entries.is_none() {
            bail!("Nothing to evict: pass --older-than-days and/or --max-entries");
        }
        let mut removed = 0;
        if let Some(days) = older_than_days {
            let max_age = chrono::Duration::try_days(i64::from(days))
                .with_context(|| format!("--older-than-days {} is out of range", days))?;
            removed += self.cache.evict_older_than(max_age).await?;
        }
        if let Some(max) = max_entries {
            removed += self.cache.evict_to_capacity(max).await?;
        }
        println!("Evicted {} entries", removed);
        Ok(())
    }

    /// Engine configured from the replay policy and retry cadence in config.
    fn sync_engine(&self) -> Result<SyncEngine<ReplayClient>> {
        Ok(SyncEngine::new(self.cache.clone(), self.replay_client()?)
            .with_policy(self.config.replay_policy)
            .with_retry_interval(self.config.retry_interval()))
    }

    pub async fn sync(&self) -> Result<()> {
        let outcome = self.sync_engine()?.sync_once().await?;
        print_outcome(&outcome);
        Ok(())
    }

    /// Keep syncing in the background until `stop` resolves, printing each run.
    pub async fn sync_watch<S: Future<Output = ()>>(&self, stop: S) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let task = self.sync_engine()?.spawn(Some(tx));
        info!(retry_interval = ?self.config.retry_interval(), "Watching pending updates");

        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => break,
                event = rx.recv() => match event {
                    Some(SyncEvent::Finished(outcome)) => print_outcome(&outcome),
                    Some(SyncEvent::StoreFailed(e)) => eprintln!("Sync aborted: {}", e),
                    None => break,
                },
            }
        }

        task.shutdown().await;
        Ok(())
    }

    fn replay_client(&self) -> Result<ReplayClient> {
        let mut client = ReplayClient::with_timeout(self.config.request_timeout())?;
        match self.config.api_base_url {
            Some(ref base) => client = client.with_base_url(base.as_str()),
            None => warn!("No API base url configured; relative update urls cannot be sent"),
        }
        if let Ok(token) = std::env::var(ENV_API_TOKEN) {
            client = client.with_token(Arc::new(token));
        }
        Ok(client)
    }

    pub async fn clear(&self, yes: bool) -> Result<()> {
        if !yes {
            let pending = self.cache.pending_count().await?;
            print!(
                "This erases all offline progress, cached content and {} unsent update(s). Type 'yes' to continue: ",
                pending
            );
            io::stdout().flush()?;
            let mut answer = String::new();
            io::stdin().lock().read_line(&mut answer)?;
            if !is_confirmed(&answer) {
                println!("Aborted");
                return Ok(());
            }
        }
        self.cache.clear_all().await?;
        info!("Offline storage cleared from the command line");
        println!("All offline data cleared");
        Ok(())
    }
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Offline => println!("Offline - nothing sent"),
        SyncOutcome::AlreadyRunning => println!("A sync is already running"),
        SyncOutcome::Completed(report) if report.attempted == 0 => println!("Nothing to sync"),
        SyncOutcome::Completed(report) => {
            println!(
                "Delivered {} of {} updates, {} still pending{}",
                report.delivered,
                report.attempted,
                report.remaining,
                if report.halted { " (stopped at first failure)" } else { "" }
            );
        }
    }
}

fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read stdin")?;
        Ok(input)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))
    }
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON: {}", truncate_string(raw, BODY_PREVIEW_LEN)))
}

fn is_confirmed(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("yes")
}
