// d365fo-cache-cli/src/commands/label.rs
//
// USE CASE: `GetLabel`/`GetLabelsBatch`.

use crate::context;

pub async fn get(env: &str, label_id: &str, language: &str) -> anyhow::Result<()> {
    let core = context::open(env)?;
    match core.get_label(label_id, language).await? {
        Some(text) => println!("{text}"),
        None => {
            eprintln!("label '{label_id}' could not be resolved in '{language}'");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn batch(env: &str, label_ids: &[String], language: &str) -> anyhow::Result<()> {
    let core = context::open(env)?;
    let resolved = core.get_labels_batch(label_ids, language).await?;
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}
