//! Initialize command.

use console::style;

use crate::cli::helpers::open_store;
use crate::config::Settings;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let existed = settings.database_exists();
    open_store(settings).await?;

    if existed {
        println!(
            "{} Database at {} is up to date",
            style("✓").green(),
            settings.database_path().display()
        );
    } else {
        println!(
            "{} Initialized farmdoc in {}",
            style("✓").green(),
            settings.data_dir.display()
        );
    }
    Ok(())
}
