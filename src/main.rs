use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;

use runplot::{load_uri, Experiment};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (source, output) = match args.as_slice() {
        [source] => (source.as_str(), None),
        [source, output] => (source.as_str(), Some(output.as_str())),
        _ => bail!("usage: runplot <csv|json|log path, or demo name> [output.csv|output.json]"),
    };

    let xp = load_uri(source)
        .with_context(|| format!("loading '{source}'"))?
        .validate()
        .context("loaded experiment is inconsistent")?;

    info!(
        "loaded '{source}': {} datapoints, {} columns",
        xp.len(),
        xp.column_names.len()
    );
    println!("{} datapoints", xp.len());
    println!("columns: {}", xp.column_names.join(", "));

    if let Some(output) = output {
        export(&xp, output)?;
        println!("wrote {output}");
    }
    Ok(())
}

/// Export by extension: `.csv` via the experiment's CSV dump, `.json` as the
/// front-end payload.
fn export(xp: &Experiment, output: &str) -> Result<()> {
    let ext = Path::new(output)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let file = File::create(output).with_context(|| format!("creating {output}"))?;
    let writer = BufWriter::new(file);
    match ext.as_str() {
        "csv" => xp.to_csv(writer)?,
        "json" => serde_json::to_writer_pretty(writer, xp)
            .with_context(|| format!("writing {output}"))?,
        other => bail!("unsupported output extension: .{other}"),
    }
    Ok(())
}
