//! Source-to-source rewriter lifting embedded javascript expressions out of
//! CWL documents. CommandLineTools lose their `InlineJavascriptRequirement`;
//! every lifted expression is evaluated by an auxiliary step running the
//! installed `eval_exprs.cwl` template and injected back through a
//! synthesized array input.

use cwl_doc::{DocumentCache, DocumentRef, OutputEmitter};
use log::info;
use std::{fs, path::Path};

pub mod error;
pub mod expr;
pub mod scanner;
pub mod tool;
pub mod workflow;

pub use error::RewriteError;
pub use expr::{ExpressionCollector, ExpressionSite, SiteKind};
pub use scanner::{Span, is_parameter_reference, scan_expression};
pub use tool::{RewrittenTool, rewrite_tool, transmute_expression_tool};
pub use workflow::WorkflowRewriter;

/// Dialect of the evaluation template installed into the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalLanguage {
    #[default]
    Js,
    Python,
}

impl EvalLanguage {
    fn template(self) -> &'static str {
        match self {
            EvalLanguage::Js => include_str!("../templates/eval_exprs_js.cwl"),
            EvalLanguage::Python => include_str!("../templates/eval_exprs_python.cwl"),
        }
    }
}

/// Rewrites the workflow rooted at `workflow` into `outdir`.
///
/// Installs the evaluation template for the chosen language, then descends
/// the workflow tree; every document below `base_dir` is written to its
/// mirrored location in the output tree. The root path may carry a
/// `#fragment` into a `$graph` bundle.
pub fn unjsify(workflow: &Path, base_dir: &Path, outdir: &Path, language: EvalLanguage) -> Result<(), RewriteError> {
    fs::create_dir_all(outdir)?;
    let template = outdir.join(workflow::EVAL_TEMPLATE);
    fs::write(&template, language.template())?;
    info!("Installed evaluation template at {}", template.display());

    let mut cache = DocumentCache::new();
    let emitter = OutputEmitter::new(base_dir, outdir);
    let mut rewriter = WorkflowRewriter::new(&mut cache, &emitter);
    rewriter.rewrite(&DocumentRef::parse(workflow.to_string_lossy()))
}
