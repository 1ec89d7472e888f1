use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::SizeClass;

#[derive(Parser, Debug)]
#[command(
    name = "lextract",
    version,
    about = "Extracts market definitions from European Commission decision PDFs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve spreadsheet rows into decision links
    Links(LinksArgs),
    /// Download decisions, apply the admission policy and write size buckets
    Admit(AdmitArgs),
    /// Isolate the market-definition section of each batch file
    Sections(SectionsArgs),
    /// Split isolated sections into JSON topic records
    Definitions(DefinitionsArgs),
    /// Strip markdown fences from record files
    Clean(CleanArgs),
    /// Merge record files into one corpus
    Merge(MergeArgs),
    /// Run every stage in order, skipping stages whose inputs are missing
    Pipeline,
    /// Report artifact counts without running anything
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct LinksArgs {
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct AdmitArgs {
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(long, default_value = "data")]
    pub datadir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SectionsArgs {
    #[arg(long, default_value = "data/extracted_batches")]
    pub indir: PathBuf,

    #[arg(long, default_value = "data/extracted_sections")]
    pub outdir: PathBuf,

    #[arg(long, value_enum, default_value_t = SizeSelection::Both)]
    pub size: SizeSelection,

    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DefinitionsArgs {
    #[arg(long, default_value = "data/extracted_sections")]
    pub indir: PathBuf,

    #[arg(long, default_value = "json")]
    pub outdir: PathBuf,

    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    #[arg(long, default_value = "json")]
    pub indir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    #[arg(long, default_value = "json")]
    pub indir: PathBuf,

    #[arg(long, default_value = "data/output.json")]
    pub output: PathBuf,
}

/// Which batch size classes the section stage touches.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum SizeSelection {
    #[value(name = "79")]
    Small,
    #[value(name = "80")]
    Large,
    Both,
}

impl SizeSelection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Small => "79",
            Self::Large => "80",
            Self::Both => "both",
        }
    }

    pub fn size_classes(self) -> Vec<SizeClass> {
        match self {
            Self::Small => vec![SizeClass::Small],
            Self::Large => vec![SizeClass::Large],
            Self::Both => vec![SizeClass::Small, SizeClass::Large],
        }
    }
}
