// d365fo-cache-cli/src/commands/environment.rs
//
// USE CASE: Report what the cache knows about one environment.

use crate::context;

pub fn info(env: &str) -> anyhow::Result<()> {
    let core = context::open(env)?;
    let (environment, active) = core.environment_info()?;

    println!("Environment: {}", environment.base_url);
    println!("  id:            {}", environment.id);
    println!("  created:       {}", environment.created_at);
    match environment.last_sync_at {
        Some(t) => println!("  last sync:     {t}"),
        None => println!("  last sync:     never"),
    }

    match active {
        Some(ev) => {
            println!("  global version: {}", ev.global_version_id);
            println!("  sync status:    {:?}", ev.sync_status);
            if let Some(ms) = ev.last_sync_duration_ms {
                println!("  last duration:  {ms} ms");
            }
        }
        None => println!("  no completed sync yet"),
    }

    let info = core.environment_info_full()?;
    if info.app_version.is_some() || info.platform_version.is_some() {
        println!("  app version:     {}", info.app_version.as_deref().unwrap_or("-"));
        println!("  platform version:{}", info.platform_version.as_deref().unwrap_or("-"));
    }
    println!(
        "  counts:          entities={} actions={} enums={} labels={}",
        info.counts.entities, info.counts.actions, info.counts.enums, info.counts.labels
    );

    Ok(())
}
