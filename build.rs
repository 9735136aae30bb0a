use clap::CommandFactory;
use clap_complete::{generate_to, shells::Bash};
use std::io::Error;
use std::{env, fs};

include!("src/cli.rs");

fn main() -> Result<(), Error> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    let outdir = match env::var_os("COMPLETION_OUT_DIR") {
        None => return Ok(()),
        Some(outdir) => outdir,
    };
    fs::create_dir_all(&outdir)?;

    let mut cmd = Args::command();
    let path = generate_to(Bash, &mut cmd, env!("CARGO_PKG_NAME"), outdir)?;

    println!("cargo:warning=completion file is generated: {path:?}");

    Ok(())
}
