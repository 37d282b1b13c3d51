use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use patcher_core::{
    convert_archive_to_psp, DiscImage, Element, NeverCancel, Outcome, PatchContainer,
    PatcherError, PatcherSettings, Platform, Result, TextSet,
};

#[derive(Debug, Parser)]
#[command(name = "patcher", version, about = "Patch and text editor for both game releases")]
struct Args {
    /// Settings file (JSON).
    #[arg(long, global = true, default_value = "patcher.json")]
    config: PathBuf,

    /// Log debug output.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a patch holding every default for a platform.
    New {
        #[arg(long)]
        platform: Option<Platform>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Show what a patch file contains.
    Info { patch: PathBuf },
    /// Read every element from a disc image into a new patch.
    Extract {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Convert a PSX patch file into a PSP one.
    Convert { input: PathBuf, output: PathBuf },
    /// Re-save a patch, optionally for the other platform.
    SaveAs {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        platform: Option<Platform>,
    },
    /// Write a patch's elements into a disc image.
    Apply {
        patch: PathBuf,
        #[arg(long)]
        image: PathBuf,
    },
    /// Export all decoded text of a disc image.
    TextExport {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Import a text document into a disc image.
    TextImport {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        input: PathBuf,
    },
    /// Set one entry of a quick-edit field and every mirror of it.
    QuickEdit {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        field: String,
        #[arg(long)]
        index: usize,
        #[arg(long)]
        text: String,
    },
}

fn setup_logging(verbose: bool) -> std::result::Result<(), fern::InitError> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn open_image(path: &Path, writable: bool) -> Result<DiscImage<fs::File>> {
    let image = DiscImage::open_path(path, writable)?;
    log::info!("{} is a {} image", path.display(), image.platform());
    Ok(image)
}

fn load_text(settings: &PatcherSettings, image: &mut DiscImage<fs::File>) -> Result<TextSet> {
    let platform = image.platform();
    let manifest = settings.layout(platform)?;
    let charmap = settings.charmap(platform)?;
    match TextSet::load(image, manifest, charmap, &NeverCancel)? {
        Outcome::Completed(text) => Ok(text),
        Outcome::Cancelled => Err(PatcherError::Format("text load was cancelled".to_string())),
    }
}

fn run(command: Command, settings: &PatcherSettings) -> Result<()> {
    match command {
        Command::New { platform, output } => {
            let platform = settings
                .platform_or_default(platform)
                .ok_or_else(|| PatcherError::Config("no --platform given and no default set".to_string()))?;
            PatchContainer::new(platform)?.save_file(&output, platform)?;
            println!("Wrote {platform} defaults to {}", output.display());
        }
        Command::Info { patch } => {
            let patch = PatchContainer::load_file(&patch)?;
            println!("platform: {}", patch.platform());
            println!("version:  {}", patch.version());
            for element in Element::ALL {
                match patch.bytes(element) {
                    Some(bytes) => println!("  {:<18} {:>6} bytes", element.name(), bytes.len()),
                    None => println!("  {:<18} (not on {})", element.name(), patch.platform()),
                }
            }
        }
        Command::Extract { image, output } => {
            let patch = PatchContainer::from_disc_path(&image)?;
            patch.save_file(&output, patch.platform())?;
            println!("Extracted {} patch to {}", patch.platform(), output.display());
        }
        Command::Convert { input, output } => {
            let converted = convert_archive_to_psp(&fs::read(&input)?)?;
            fs::write(&output, converted)?;
            println!("Converted {} to {}", input.display(), output.display());
        }
        Command::SaveAs {
            input,
            output,
            platform,
        } => {
            let patch = PatchContainer::load_file(&input)?;
            let destination = platform.unwrap_or(patch.platform());
            patch.save_file(&output, destination)?;
            println!("Saved {destination} patch to {}", output.display());
        }
        Command::Apply { patch, image } => {
            let patch = PatchContainer::load_file(&patch)?;
            let mut disc = open_image(&image, true)?;
            if disc.platform() != patch.platform() {
                return Err(PatcherError::Unsupported(format!(
                    "{} patch on a {} image",
                    patch.platform(),
                    disc.platform()
                )));
            }
            let writes = patch.apply_to_disc(&mut disc)?;
            println!("Wrote {writes} tables to {}", image.display());
        }
        Command::TextExport { image, output } => {
            let mut disc = open_image(&image, false)?;
            let text = load_text(settings, &mut disc)?;
            text.export(fs::File::create(&output)?)?;
            println!("Exported {} files to {}", text.files().len(), output.display());
        }
        Command::TextImport { image, input } => {
            let xml = fs::read_to_string(&input)?;
            let mut disc = open_image(&image, true)?;
            let mut text = load_text(settings, &mut disc)?;
            let changed = text.apply_export(&xml)?;
            let written = text.save(&mut disc)?;
            println!("Changed {changed} entries across {written} files");
        }
        Command::QuickEdit {
            image,
            field,
            index,
            text: value,
        } => {
            let mut disc = open_image(&image, true)?;
            let mut text = load_text(settings, &mut disc)?;
            let old = text.quick_edit_get(&field, index)?.to_string();
            text.quick_edit_set(&field, index, &value)?;
            let written = text.save(&mut disc)?;
            println!("{field}[{index}]: {old:?} -> {value:?} ({written} files)");
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = setup_logging(args.verbose) {
        eprintln!("Failed to set up logging: {err}");
    }

    let settings = match PatcherSettings::load_or_default(&args.config) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(args.command, &settings) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
