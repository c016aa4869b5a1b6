//! Show command - displays information.

use anyhow::{Context, Result};

use oracle_image::config::Config;
use oracle_image::image::ImageState;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the last build's image state
    State,
}

/// Execute the show command.
pub fn cmd_show(config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::State => {
            let image_root = config.image_root()?;
            let state = ImageState::load(image_root)
                .with_context(|| format!("No image state in {}. Run 'oracle-image build' first.", image_root.display()))?;
            let json = serde_json::to_string_pretty(&state).context("Failed to serialize image state")?;
            println!("{}", json);
        }
    }
    Ok(())
}
