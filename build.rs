//! Renders the `jupyfly(1)` manual page from the same clap definitions the
//! binary parses, so every subcommand added to the CLI shows up in the page.
//!
//! The page lands in `OUT_DIR/jupyfly.1`. Its path is exported as
//! `JUPYFLY_MAN_PAGE` for packaging and for the CLI tests.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

const MAN_PAGE: &str = "jupyfly.1";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;
    let page = render_man_page(&out_dir)?;
    writeln!(stdout, "cargo:rustc-env=JUPYFLY_MAN_PAGE={}", page.display())?;
    Ok(())
}

fn render_man_page(out_dir: &Path) -> io::Result<PathBuf> {
    let mut rendered = Vec::new();
    Man::new(Cli::command()).render(&mut rendered)?;
    let page = out_dir.join(MAN_PAGE);
    fs::write(&page, rendered)?;
    Ok(page)
}
