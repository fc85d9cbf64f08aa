use crate::commands::load_bar_series;
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn run(input: &Path, output: &Path) -> Result<()> {
    info!(
        "Converting bars from {} into snapshot {}",
        input.display(),
        output.display()
    );

    let series = load_bar_series(input).await?;
    series.save_to_file(output)?;
    info!(
        "Bar snapshot with {} bar(s) successfully written to {}",
        series.len(),
        output.display()
    );

    Ok(())
}
