use clap::{Parser, ValueEnum};
use cwl_rewrite::EvalLanguage;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name="unjsify", about="Rewrites CWL workflows so that tool documents no longer contain inline javascript expressions", long_about=None, version)]
pub struct Cli {
    #[arg(help = "Initial CWL workflow file to rewrite, optionally with a #fragment into a $graph bundle")]
    pub cwl_workflow: PathBuf,

    #[arg(short = 'b', long = "base-dir", help = "Directory the output tree mirrors [default: directory of the workflow]")]
    pub base_dir: Option<PathBuf>,

    #[arg(short = 'o', long = "output", help = "Output directory for the rewritten documents")]
    pub output: PathBuf,

    #[arg(long = "language", value_enum, default_value = "js", help = "Script engine of the installed evaluation template")]
    pub language: Language,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Js,
    Python,
}

impl From<Language> for EvalLanguage {
    fn from(language: Language) -> Self {
        match language {
            Language::Js => EvalLanguage::Js,
            Language::Python => EvalLanguage::Python,
        }
    }
}
