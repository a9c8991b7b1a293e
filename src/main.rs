use std::fs::File;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;

use tmixdynld_core::entry::EntryFn;
use tmixdynld_core::{LoaderError, LoadedImage, inspect, load_and_link, map};
use tmixdynld_hostlib::HostContext;

#[derive(Parser, Debug)]
#[command(name = "tmixdynld")]
#[command(version, about = "standalone ELF loader")]
struct Args {
    /// Print the parsed descriptor before loading
    #[arg(short, long)]
    dump: bool,

    /// Path to the ELF shared object to load
    path: String,
}

fn main() -> ExitCode {
    env_logger::builder()
        .parse_env(env_logger::Env::new().filter_or("TMIXDYNLD_LOG", "info"))
        .format_timestamp(None)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut file = File::open(&args.path)
        .with_context(|| format!("error opening ELF file {}", args.path))?;

    let image = inspect::inspect(&mut file).with_context(|| {
        format!(
            "error parsing {}; it may not be a valid ELF, or may be incompatible with this machine",
            args.path
        )
    })?;

    if args.dump {
        print!("{image}");
    }

    if image.entry_offset == 0 {
        bail!("ELF entrypoint is unknown");
    }

    let host = HostContext::open();
    if !host.is_available() {
        bail!(LoaderError::ResolverUnavailable);
    }

    let mut loaded = LoadedImage::default();
    if let Err(e) = load_and_link(&mut loaded, &file, &image, &host) {
        // The image may still be mapped (a relocation failure leaves it
        // partially linked rather than unmapped); the process is exiting
        // either way, so no explicit unload is needed here.
        return Err(e).context("error linking ELF");
    }

    drop(file);

    // SAFETY: relocation and RELRO freezing completed above; `entry_offset`
    // was checked non-zero.
    let entry = unsafe { loaded.entry_ptr() }.expect("checked above") as EntryFn;

    log::info!("transferring control to {:?}", entry as *const ());

    // SAFETY: the loaded image was fully relocated and its RELRO ranges
    // frozen before this call; `entry` is typed to the calling convention
    // the loaded object expects (see `tmixdynld_core::entry`).
    unsafe {
        entry();
    }

    eprintln!("[program returned to loader unexpectedly]");
    map::unload(&mut loaded);
    bail!("loaded program returned control to the loader")
}
