// d365fo-cache-cli/src/commands/enumeration.rs
//
// USE CASE: `GetEnumeration`.

use crate::context;

pub fn get(env: &str, name: &str) -> anyhow::Result<()> {
    let core = context::open(env)?;
    match core.get_enumeration(name)? {
        Some(enumeration) => println!("{}", serde_json::to_string_pretty(&enumeration)?),
        None => {
            eprintln!("enumeration '{name}' not found for the active version");
            std::process::exit(1);
        }
    }
    Ok(())
}
