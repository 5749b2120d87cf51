use crate::{
    error::RewriteError,
    expr::{ExpressionCollector, ExpressionSite, SiteKind},
    tool::{self, EMIT_JSON_SCRIPT, EXPR_INPUT, OUTPUT_STASH_PREFIX, RewrittenTool, any_nullable},
};
use cwl_doc::{DocumentCache, DocumentRef, IdMap, OutputEmitter, key};
use log::info;
use serde_yaml::{Mapping, Value};
use std::{collections::HashSet, path::Path};

/// Helper step evaluating lifted workflow-level `valueFrom` expressions.
pub const EVAL_WORKFLOW_EXPRS: &str = "__eval_workflow_exprs";
/// Helper step distributing evaluated workflow expressions to named outputs.
pub const PROCESS_WORKFLOW_EXPRS: &str = "__process_workflow_exprs";
/// Helper step evaluating the expressions consumed by the rewritten tool.
pub const EVAL_INPUT_EXPRS: &str = "__eval_input_exprs";
/// Helper step evaluating lifted `outputEval` expressions.
pub const EVAL_OUTPUT_EXPRS: &str = "__eval_output_exprs";
/// Array input feeding evaluated workflow expressions back in.
pub const OUTPUT_EXPRS_INPUT: &str = "__output_exprs";
/// File name of the installed evaluation template.
pub const EVAL_TEMPLATE: &str = "eval_exprs.cwl";

const RESERVED: [&str; 6] = [
    EVAL_WORKFLOW_EXPRS,
    PROCESS_WORKFLOW_EXPRS,
    EVAL_INPUT_EXPRS,
    EVAL_OUTPUT_EXPRS,
    EXPR_INPUT,
    OUTPUT_EXPRS_INPUT,
];

const FEATURE_REQUIREMENTS: [&str; 3] = [
    "MultipleInputFeatureRequirement",
    "SubworkflowFeatureRequirement",
    "StepInputExpressionRequirement",
];

/// Recursive-descent rewriter over a workflow tree.
///
/// Each step of a workflow is inspected; expression-bearing steps are
/// replaced by an inner sub-workflow scaffolding the evaluation helpers
/// around the rewritten tool. Nested workflows are processed recursively,
/// every visited document ends up in the output tree.
pub struct WorkflowRewriter<'a> {
    cache: &'a mut DocumentCache,
    emitter: &'a OutputEmitter,
    in_progress: Vec<DocumentRef>,
    done: HashSet<DocumentRef>,
}

impl<'a> WorkflowRewriter<'a> {
    pub fn new(cache: &'a mut DocumentCache, emitter: &'a OutputEmitter) -> Self {
        Self {
            cache,
            emitter,
            in_progress: Vec::new(),
            done: HashSet::new(),
        }
    }

    /// Rewrites the referenced document and everything it runs.
    pub fn rewrite(&mut self, reference: &DocumentRef) -> Result<(), RewriteError> {
        if self.done.contains(reference) {
            return Ok(());
        }
        if self.in_progress.contains(reference) {
            return Err(RewriteError::CycleDetected(reference.path.clone()));
        }

        self.in_progress.push(reference.clone());
        let result = self.rewrite_document(reference);
        self.in_progress.pop();
        result?;

        self.done.insert(reference.clone());
        Ok(())
    }

    fn rewrite_document(&mut self, reference: &DocumentRef) -> Result<(), RewriteError> {
        let document = self.cache.get(reference)?;

        // a $graph bundle root has no class of its own, descend into main
        if document.get("class").is_none() && document.get("$graph").is_some() && reference.fragment.is_none() {
            return self.rewrite(&DocumentRef::with_fragment(reference.path.clone(), "main"));
        }

        info!("Processing {reference}");

        let class = document.get("class").and_then(Value::as_str).unwrap_or_default().to_string();
        let mut workflow = match class.as_str() {
            "Workflow" => document,
            "CommandLineTool" | "ExpressionTool" => self.wrap_bare_tool(reference, document),
            other => return Err(RewriteError::UnsupportedStepClass(other.to_string())),
        };

        // the workflow's own javascript requirement goes away, its library
        // is forwarded to every evaluator synthesized below
        let workflow_lib = tool::take_expression_lib(&mut workflow);
        ensure_feature_requirements(&mut workflow);

        let template = self.template_reference(&reference.path)?;

        let mut steps_value = match workflow.as_mapping_mut() {
            Some(map) => map.remove(&key("steps")).unwrap_or(Value::Null),
            None => Value::Null,
        };

        let step_ids = id_keys(Some(&steps_value), "id");
        for step_id in &step_ids {
            let mut steps = IdMap::new(&mut steps_value);
            let Some(step) = steps.get_mut(step_id) else { continue };
            self.rewrite_step(reference, step_id, step, &workflow_lib, &template)?;
        }

        if let Some(map) = workflow.as_mapping_mut()
            && !steps_value.is_null()
        {
            map.insert(key("steps"), steps_value);
        }

        self.emitter.write(reference, &workflow, self.cache)?;
        Ok(())
    }

    /// Synthesizes a one-step wrapper workflow around a bare tool so the
    /// remaining pipeline only ever sees workflows. The tool itself moves to
    /// a `__`-prefixed sibling path served from the cache.
    fn wrap_bare_tool(&mut self, reference: &DocumentRef, tool: Value) -> Value {
        let file_name = reference.path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let wrapped_name = format!("__{file_name}");
        self.cache.insert(reference.path.with_file_name(&wrapped_name), tool.clone());

        let input_ids = id_keys(tool.get("inputs"), "id");
        let output_ids = id_keys(tool.get("outputs"), "id");

        let mut inputs = Mapping::new();
        let mut step_in = Mapping::new();
        for id in &input_ids {
            inputs.insert(key(id), any_nullable());
            step_in.insert(key(id), key(id));
        }

        let mut outputs = Mapping::new();
        for id in &output_ids {
            let mut entry = Mapping::new();
            entry.insert(key("type"), any_nullable());
            entry.insert(key("outputSource"), key(&format!("cmdline_tool/{id}")));
            outputs.insert(key(id), Value::Mapping(entry));
        }

        let mut step = Mapping::new();
        step.insert(key("run"), key(&wrapped_name));
        step.insert(key("in"), Value::Mapping(step_in));
        step.insert(key("out"), Value::Sequence(output_ids.iter().map(|id| key(id)).collect()));

        let mut steps = Mapping::new();
        steps.insert(key("cmdline_tool"), Value::Mapping(step));

        let mut workflow = Mapping::new();
        workflow.insert(key("class"), key("Workflow"));
        if let Some(version) = tool.get("cwlVersion") {
            workflow.insert(key("cwlVersion"), version.clone());
        }
        workflow.insert(key("inputs"), Value::Mapping(inputs));
        workflow.insert(key("outputs"), Value::Mapping(outputs));
        workflow.insert(key("steps"), Value::Mapping(steps));
        Value::Mapping(workflow)
    }

    fn rewrite_step(
        &mut self,
        wf_ref: &DocumentRef,
        step_id: &str,
        step: &mut Value,
        workflow_lib: &[String],
        template: &str,
    ) -> Result<(), RewriteError> {
        if RESERVED.contains(&step_id) {
            return Err(RewriteError::NameCollision {
                name: step_id.to_string(),
                context: wf_ref.to_string(),
            });
        }

        let Some(run_raw) = step.get("run").and_then(Value::as_str).map(str::to_string) else {
            return Err(RewriteError::UnsupportedBinding(format!("step `{step_id}` does not run a document reference")));
        };
        let run_ref = wf_ref.resolve(&run_raw);
        let mut target = self.cache.get(&run_ref)?;

        let target_class = target.get("class").and_then(Value::as_str).unwrap_or_default().to_string();
        let was_expression_tool = target_class == "ExpressionTool";
        if !matches!(target_class.as_str(), "Workflow" | "CommandLineTool" | "ExpressionTool") {
            return Err(RewriteError::UnsupportedStepClass(target_class));
        }

        if let Some(in_value) = step.get_mut("in") {
            promote_step_inputs(in_value);
        }
        let in_ids = id_keys(step.get("in"), "id");
        for in_id in &in_ids {
            if RESERVED.contains(&in_id.as_str()) {
                return Err(RewriteError::NameCollision {
                    name: in_id.clone(),
                    context: format!("{wf_ref} step `{step_id}`"),
                });
            }
        }

        // workflow-level lift of step input valueFrom expressions
        let mut wf_exprs = ExpressionCollector::new("inputs.__output_exprs");
        let mut lifted: Vec<(String, String)> = Vec::new();
        if let Some(in_value) = step.get_mut("in") {
            let mut in_map = IdMap::new(in_value);
            for in_id in &in_ids {
                let Some(entry) = in_map.get_mut(in_id) else { continue };
                let Some(value_from) = entry.get("valueFrom") else { continue };
                let Value::String(text) = value_from else {
                    return Err(RewriteError::UnsupportedBinding(format!("non-string valueFrom on step input `{in_id}`")));
                };

                let before = wf_exprs.len();
                let rewritten = wf_exprs.rewrite(&text.clone(), SiteKind::WorkflowValueFrom, Some(in_id))?;
                if wf_exprs.len() > before {
                    lifted.push((in_id.clone(), rewritten));
                    if let Some(map) = entry.as_mapping_mut() {
                        map.remove(&key("valueFrom"));
                    }
                }
            }
        }

        // nested workflows are rewritten in place and keep their reference;
        // tools carrying the javascript requirement get rewritten, everything
        // else passes through into the output tree untouched
        let rewritten = if target_class == "Workflow" {
            self.rewrite(&run_ref)?;
            None
        } else {
            if was_expression_tool {
                target = tool::transmute_expression_tool(&target)?;
            }
            let rewritten = if was_expression_tool || tool::has_inline_javascript(&target) {
                Some(tool::rewrite_tool(&target)?)
            } else {
                None
            };
            let emitted = rewritten.as_ref().map_or(&target, |r| &r.tool);
            self.emitter.write(&run_ref, emitted, self.cache)?;
            rewritten
        };

        let needs_scaffold = !wf_exprs.is_empty()
            || rewritten
                .as_ref()
                .is_some_and(|r| !r.input_expressions.is_empty() || !r.output_expressions.is_empty());
        if !needs_scaffold {
            return Ok(());
        }

        let mut lib = workflow_lib.to_vec();
        if let Some(r) = &rewritten {
            lib.extend(r.expression_lib.clone());
        }
        let lib = (!lib.is_empty()).then(|| lib.join(";"));

        let inner = assemble_inner_workflow(InnerWorkflow {
            step_id,
            run: &run_raw,
            in_ids: &in_ids,
            out_ids: &step_out_ids(step),
            wf_exprs: &wf_exprs,
            lifted: &lifted,
            rewritten: rewritten.as_ref(),
            expression_lib: lib.as_deref(),
            template,
        });

        if let Some(map) = step.as_mapping_mut() {
            map.insert(key("run"), inner);
        }
        Ok(())
    }

    /// Relative reference from the rewritten document to the evaluation
    /// template installed at the output root.
    fn template_reference(&self, document: &Path) -> Result<String, RewriteError> {
        let relative = self.emitter.relative(document)?;
        let mut reference = String::new();
        for _ in relative.parent().unwrap_or_else(|| Path::new("")).components() {
            reference.push_str("../");
        }
        reference.push_str(EVAL_TEMPLATE);
        Ok(reference)
    }
}

struct InnerWorkflow<'a> {
    step_id: &'a str,
    run: &'a str,
    in_ids: &'a [String],
    out_ids: &'a [String],
    wf_exprs: &'a ExpressionCollector,
    lifted: &'a [(String, String)],
    rewritten: Option<&'a RewrittenTool>,
    expression_lib: Option<&'a str>,
    template: &'a str,
}

/// Builds the inline sub-workflow replacing an expression-bearing step: up to
/// four helper steps around the tool step, inputs mirroring the outer step's
/// inputs as nullable Any, outputs passing through or reapplying memoized
/// output evals.
fn assemble_inner_workflow(spec: InnerWorkflow<'_>) -> Value {
    let mut steps = Mapping::new();

    let lifted_ids: Vec<String> = spec.lifted.iter().map(|(id, _)| id.clone()).collect();
    let tool_source = |id: &str| {
        if lifted_ids.iter().any(|l| l == id) {
            format!("{PROCESS_WORKFLOW_EXPRS}/{id}")
        } else {
            id.to_string()
        }
    };

    if !spec.wf_exprs.is_empty() {
        steps.insert(
            key(EVAL_WORKFLOW_EXPRS),
            evaluator_step(spec.template, spec.in_ids, spec.in_ids, &spec.wf_exprs.sites, spec.expression_lib),
        );
        steps.insert(key(PROCESS_WORKFLOW_EXPRS), process_step(spec.lifted));
    }

    let input_sites = spec.rewritten.map(|r| r.input_expressions.as_slice()).unwrap_or_default();
    if !input_sites.is_empty() {
        let sources: Vec<String> = spec.in_ids.iter().map(|id| tool_source(id)).collect();
        steps.insert(
            key(EVAL_INPUT_EXPRS),
            evaluator_step(spec.template, &sources, spec.in_ids, input_sites, spec.expression_lib),
        );
    }

    // the tool step keeps its original run target
    let memo = spec.rewritten.map(|r| &r.output_type_memo);
    let mut tool_out: Vec<String> = spec.out_ids.to_vec();
    if let Some(memo) = memo {
        for id in memo.keys() {
            if !tool_out.contains(id) {
                tool_out.push(id.clone());
            }
        }
    }

    let mut tool_in = Mapping::new();
    for id in spec.in_ids {
        tool_in.insert(key(id), key(&tool_source(id)));
    }
    if !input_sites.is_empty() {
        tool_in.insert(key(EXPR_INPUT), key(&format!("{EVAL_INPUT_EXPRS}/output")));
    }
    let mut tool_step = Mapping::new();
    tool_step.insert(key("run"), key(spec.run));
    tool_step.insert(key("in"), Value::Mapping(tool_in));
    tool_step.insert(key("out"), Value::Sequence(tool_out.iter().map(|id| key(id)).collect()));
    steps.insert(key(spec.step_id), Value::Mapping(tool_step));

    let output_sites = spec.rewritten.map(|r| r.output_expressions.as_slice()).unwrap_or_default();
    if !output_sites.is_empty() {
        let mut sources: Vec<String> = spec.in_ids.iter().map(|id| tool_source(id)).collect();
        let mut names: Vec<String> = spec.in_ids.to_vec();
        if let Some(memo) = memo {
            let mut memo_ids: Vec<&String> = memo.keys().collect();
            memo_ids.sort();
            for id in memo_ids {
                sources.push(format!("{}/{id}", spec.step_id));
                names.push(format!("{OUTPUT_STASH_PREFIX}{id}"));
            }
        }
        steps.insert(
            key(EVAL_OUTPUT_EXPRS),
            evaluator_step(spec.template, &sources, &names, output_sites, spec.expression_lib),
        );
    }

    // inner workflow inputs mirror the outer step inputs as nullable Any
    let mut inputs = Mapping::new();
    for id in spec.in_ids {
        inputs.insert(key(id), any_nullable());
    }

    let mut outputs = Mapping::new();
    for out_id in spec.out_ids {
        let mut entry = Mapping::new();
        match memo.and_then(|m| m.get(out_id)) {
            Some(memo) => {
                let declared = if memo.declared_type.is_null() {
                    any_nullable()
                } else {
                    memo.declared_type.clone()
                };
                entry.insert(key("type"), declared);
                entry.insert(key("outputSource"), key(&format!("{EVAL_OUTPUT_EXPRS}/output")));
                entry.insert(key("outputEval"), key(&memo.output_eval));
            }
            None => {
                entry.insert(key("type"), any_nullable());
                entry.insert(key("outputSource"), key(&format!("{}/{out_id}", spec.step_id)));
            }
        }
        outputs.insert(key(out_id), Value::Mapping(entry));
    }

    let mut inner = Mapping::new();
    inner.insert(key("class"), key("Workflow"));
    inner.insert(key("requirements"), feature_requirements());
    inner.insert(key("inputs"), Value::Mapping(inputs));
    inner.insert(key("outputs"), Value::Mapping(outputs));
    inner.insert(key("steps"), Value::Mapping(steps));
    Value::Mapping(inner)
}

/// One evaluator invocation: values and names feed the `inputs` object, the
/// expression list rides along as a default, `output` is the result array
/// with one element per expression.
fn evaluator_step(template: &str, sources: &[String], names: &[String], sites: &[ExpressionSite], lib: Option<&str>) -> Value {
    let mut step_in = Mapping::new();

    let mut input_values = Mapping::new();
    input_values.insert(key("source"), Value::Sequence(sources.iter().map(|s| key(s)).collect()));
    step_in.insert(key("input_values"), Value::Mapping(input_values));

    step_in.insert(key("input_names"), default_entry(Value::Sequence(names.iter().map(|n| key(n)).collect())));
    step_in.insert(
        key("expressions"),
        default_entry(Value::Sequence(sites.iter().map(|s| key(&s.expression)).collect())),
    );
    step_in.insert(
        key("self_names"),
        default_entry(Value::Sequence(
            sites.iter().map(|s| s.self_name.as_ref().map_or(Value::Null, |n| key(n))).collect(),
        )),
    );
    if let Some(lib) = lib {
        step_in.insert(key("expression_lib"), default_entry(key(lib)));
    }

    let mut step = Mapping::new();
    step.insert(key("run"), key(template));
    step.insert(key("in"), Value::Mapping(step_in));
    step.insert(key("out"), Value::Sequence(vec![key("output")]));
    Value::Mapping(step)
}

/// The identity sub-workflow turning the evaluator's result array back into
/// named values, one output per lifted step input.
fn process_step(lifted: &[(String, String)]) -> Value {
    let ids: Vec<&String> = lifted.iter().map(|(id, _)| id).collect();

    let mut emit_in = Mapping::new();
    let mut source = Mapping::new();
    source.insert(key("source"), key(OUTPUT_EXPRS_INPUT));
    emit_in.insert(key(OUTPUT_EXPRS_INPUT), Value::Mapping(source));
    for (id, value_from) in lifted {
        let mut entry = Mapping::new();
        entry.insert(key("valueFrom"), key(value_from));
        emit_in.insert(key(id), Value::Mapping(entry));
    }

    let mut emit = Mapping::new();
    emit.insert(key("run"), json_emitter_tool(&ids, Some(OUTPUT_EXPRS_INPUT)));
    emit.insert(key("in"), Value::Mapping(emit_in));
    emit.insert(key("out"), Value::Sequence(ids.iter().map(|id| key(id)).collect()));

    let mut steps = Mapping::new();
    steps.insert(key("__emit"), Value::Mapping(emit));

    let mut inputs = Mapping::new();
    inputs.insert(key(OUTPUT_EXPRS_INPUT), any_nullable());

    let mut outputs = Mapping::new();
    for id in &ids {
        let mut entry = Mapping::new();
        entry.insert(key("type"), any_nullable());
        entry.insert(key("outputSource"), key(&format!("__emit/{id}")));
        outputs.insert(key(id), Value::Mapping(entry));
    }

    let mut requirement = Mapping::new();
    requirement.insert(key("class"), key("StepInputExpressionRequirement"));

    let mut inner = Mapping::new();
    inner.insert(key("class"), key("Workflow"));
    inner.insert(key("requirements"), Value::Sequence(vec![Value::Mapping(requirement)]));
    inner.insert(key("inputs"), Value::Mapping(inputs));
    inner.insert(key("outputs"), Value::Mapping(outputs));
    inner.insert(key("steps"), Value::Mapping(steps));

    let mut step_in = Mapping::new();
    let mut source = Mapping::new();
    source.insert(key("source"), key(&format!("{EVAL_WORKFLOW_EXPRS}/output")));
    step_in.insert(key(OUTPUT_EXPRS_INPUT), Value::Mapping(source));

    let mut step = Mapping::new();
    step.insert(key("run"), Value::Mapping(inner));
    step.insert(key("in"), Value::Mapping(step_in));
    step.insert(key("out"), Value::Sequence(ids.iter().map(|id| key(id)).collect()));
    Value::Mapping(step)
}

/// A CommandLineTool passing its inputs through `cwl.output.json` as a JSON
/// object keyed by input id.
fn json_emitter_tool(ids: &[&String], extra_input: Option<&str>) -> Value {
    let mut inputs = Mapping::new();
    if let Some(extra) = extra_input {
        inputs.insert(key(extra), any_nullable());
    }
    let mut outputs = Mapping::new();
    for id in ids {
        inputs.insert(key(id), any_nullable());
        outputs.insert(key(id), any_nullable());
    }

    let fields: Vec<String> = ids
        .iter()
        .map(|id| format!("{}: $(inputs.{id})", serde_json::to_string(id).unwrap()))
        .collect();
    let payload = format!("|{{{}}}", fields.join(", "));

    let mut tool = Mapping::new();
    tool.insert(key("class"), key("CommandLineTool"));
    tool.insert(key("inputs"), Value::Mapping(inputs));
    tool.insert(key("outputs"), Value::Mapping(outputs));
    tool.insert(
        key("arguments"),
        Value::Sequence(vec![key("bash"), key("-c"), key(EMIT_JSON_SCRIPT), Value::String(payload)]),
    );
    Value::Mapping(tool)
}

fn default_entry(value: Value) -> Value {
    let mut entry = Mapping::new();
    entry.insert(key("default"), value);
    Value::Mapping(entry)
}

fn feature_requirements() -> Value {
    Value::Sequence(
        FEATURE_REQUIREMENTS
            .iter()
            .map(|name| {
                let mut requirement = Mapping::new();
                requirement.insert(key("class"), key(name));
                Value::Mapping(requirement)
            })
            .collect(),
    )
}

fn ensure_feature_requirements(workflow: &mut Value) {
    if workflow.get("requirements").is_none()
        && let Some(map) = workflow.as_mapping_mut()
    {
        map.insert(key("requirements"), Value::Sequence(Vec::new()));
    }
    if let Some(requirements) = workflow.get_mut("requirements") {
        let mut requirements = IdMap::keyed_on(requirements, "class");
        for feature in FEATURE_REQUIREMENTS {
            if !requirements.contains(feature) {
                requirements.add(feature, Value::Mapping(Mapping::new()));
            }
        }
    }
}

/// Promotes bare-string and list-valued step input entries to their object
/// form, `{source: ...}`, so the lifting pass sees a uniform shape.
fn promote_step_inputs(in_value: &mut Value) {
    if let Value::Mapping(map) = in_value {
        for (_, v) in map.iter_mut() {
            if matches!(v, Value::String(_) | Value::Sequence(_)) {
                let source = std::mem::take(v);
                let mut entry = Mapping::new();
                entry.insert(key("source"), source);
                *v = Value::Mapping(entry);
            }
        }
    }
}

fn id_keys(value: Option<&Value>, id_field: &str) -> Vec<String> {
    match value {
        Some(Value::Mapping(map)) => map.keys().filter_map(|k| k.as_str().map(str::to_string)).collect(),
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|entry| entry.get(id_field).and_then(Value::as_str).map(str::to_string))
            .collect(),
        _ => vec![],
    }
}

fn step_out_ids(step: &Value) -> Vec<String> {
    match step.get("out") {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|entry| match entry {
                Value::String(id) => Some(id.clone()),
                other => other.get("id").and_then(Value::as_str).map(str::to_string),
            })
            .collect(),
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, path::PathBuf};
    use tempfile::{TempDir, tempdir};

    fn rewrite_fixture(files: &[(&str, &str)], root: &str) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let base = dir.path().join("project");
        let out = dir.path().join("out");
        fs::create_dir_all(&base).unwrap();
        for (name, contents) in files {
            fs::write(base.join(name), contents).unwrap();
        }

        let mut cache = DocumentCache::new();
        let emitter = OutputEmitter::new(&base, &out);
        let mut rewriter = WorkflowRewriter::new(&mut cache, &emitter);
        rewriter.rewrite(&DocumentRef::parse(base.join(root).to_string_lossy())).unwrap();
        (dir, out)
    }

    fn read(path: &Path) -> Value {
        serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    const PLAIN_TOOL: &str = r"class: CommandLineTool
cwlVersion: v1.0
baseCommand: echo
inputs:
  foo: int
outputs:
  result: stdout
";

    #[test]
    fn test_workflow_value_from_is_scaffolded() {
        let workflow = r"class: Workflow
cwlVersion: v1.0
inputs:
  bar: int
outputs:
  final:
    type: File
    outputSource: work/result
steps:
  work:
    run: tool.cwl
    in:
      foo:
        source: bar
        valueFrom: $(inputs.bar + 1)
    out: [result]
";
        let (_dir, out) = rewrite_fixture(&[("wf.cwl", workflow), ("tool.cwl", PLAIN_TOOL)], "wf.cwl");
        let rewritten = read(&out.join("wf.cwl"));

        let step = &rewritten["steps"]["work"];
        assert!(step["in"]["foo"].get("valueFrom").is_none());

        let inner = &step["run"];
        assert_eq!(inner["class"].as_str(), Some("Workflow"));
        let inner_steps = inner["steps"].as_mapping().unwrap();
        assert!(inner_steps.contains_key(&key(EVAL_WORKFLOW_EXPRS)));
        assert!(inner_steps.contains_key(&key(PROCESS_WORKFLOW_EXPRS)));

        // the lifted expression rides along as the evaluator default
        let exprs = &inner["steps"][EVAL_WORKFLOW_EXPRS]["in"]["expressions"]["default"];
        assert_eq!(exprs[0].as_str(), Some("$(inputs.bar + 1)"));

        // the tool step sources the processed value
        assert_eq!(
            inner["steps"]["work"]["in"]["foo"].as_str(),
            Some("__process_workflow_exprs/foo")
        );

        // feature requirements are present on the outer workflow
        let class_names: Vec<&str> = rewritten["requirements"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|r| r.get("class").and_then(Value::as_str))
            .collect();
        for feature in FEATURE_REQUIREMENTS {
            assert!(class_names.contains(&feature), "{feature} missing");
        }
    }

    #[test]
    fn test_tool_with_inline_javascript_gets_evaluator() {
        let workflow = r"class: Workflow
cwlVersion: v1.0
inputs:
  x: int
outputs: []
steps:
  calc:
    run: calc.cwl
    in:
      x: x
    out: [result]
";
        let tool = r"class: CommandLineTool
cwlVersion: v1.0
baseCommand: echo
requirements:
  - class: InlineJavascriptRequirement
inputs:
  x:
    type: int
    inputBinding:
      valueFrom: ${ return inputs.x + 1; }
outputs:
  result: stdout
";
        let (_dir, out) = rewrite_fixture(&[("wf.cwl", workflow), ("calc.cwl", tool)], "wf.cwl");

        let rewritten_tool = read(&out.join("calc.cwl"));
        assert!(rewritten_tool["inputs"].get(EXPR_INPUT).is_some());
        assert!(rewritten_tool.get("requirements").map_or(true, |r| r.as_sequence().is_none_or(|s| s.is_empty())));

        let rewritten = read(&out.join("wf.cwl"));
        let inner = &rewritten["steps"]["calc"]["run"];
        let inner_steps = inner["steps"].as_mapping().unwrap();
        assert!(inner_steps.contains_key(&key(EVAL_INPUT_EXPRS)));
        assert!(!inner_steps.contains_key(&key(EVAL_WORKFLOW_EXPRS)));

        // the tool step still names the original document
        assert_eq!(inner["steps"]["calc"]["run"].as_str(), Some("calc.cwl"));
        assert_eq!(inner["steps"]["calc"]["in"][EXPR_INPUT].as_str(), Some("__eval_input_exprs/output"));
    }

    #[test]
    fn test_nested_workflow_is_recursed_and_lifted() {
        let outer = r"class: Workflow
cwlVersion: v1.0
inputs:
  bar: int
outputs:
  final:
    type: Any
    outputSource: nested/result
steps:
  nested:
    run: sub.cwl
    in:
      foo:
        source: bar
        valueFrom: ${ return inputs.foo + 1; }
    out: [result]
";
        let sub = r"class: Workflow
cwlVersion: v1.0
inputs:
  foo: int
outputs:
  result:
    type: Any
    outputSource: work/result
steps:
  work:
    run: tool.cwl
    in:
      foo: foo
    out: [result]
";
        let tool = r"class: CommandLineTool
cwlVersion: v1.0
baseCommand: echo
requirements:
  - class: InlineJavascriptRequirement
inputs:
  foo:
    type: int
    inputBinding:
      valueFrom: ${ return inputs.foo * 2; }
outputs:
  result: stdout
";
        let (_dir, out) = rewrite_fixture(&[("wf.cwl", outer), ("sub.cwl", sub), ("tool.cwl", tool)], "wf.cwl");

        // the sub-workflow is rewritten at its mirrored location
        let sub_out = read(&out.join("sub.cwl"));
        assert_eq!(sub_out["class"].as_str(), Some("Workflow"));
        assert!(sub_out["steps"]["work"]["run"].is_mapping());
        assert_eq!(sub_out["steps"]["work"]["run"]["steps"]["work"]["run"].as_str(), Some("tool.cwl"));

        let tool_out = read(&out.join("tool.cwl"));
        assert!(tool_out["inputs"].get(EXPR_INPUT).is_some());

        // the lifted valueFrom is scaffolded around the sub-workflow step
        let outer_out = read(&out.join("wf.cwl"));
        let step = &outer_out["steps"]["nested"];
        assert!(step["in"]["foo"].get("valueFrom").is_none());

        let inner = &step["run"];
        let inner_steps = inner["steps"].as_mapping().unwrap();
        assert!(inner_steps.contains_key(&key(EVAL_WORKFLOW_EXPRS)));
        assert!(inner_steps.contains_key(&key(PROCESS_WORKFLOW_EXPRS)));
        assert!(!inner_steps.contains_key(&key(EVAL_INPUT_EXPRS)));
        assert_eq!(inner["steps"]["nested"]["run"].as_str(), Some("sub.cwl"));
        assert_eq!(inner["steps"]["nested"]["in"]["foo"].as_str(), Some("__process_workflow_exprs/foo"));
    }

    #[test]
    fn test_bare_tool_gets_wrapper_workflow() {
        let (_dir, out) = rewrite_fixture(&[("tool.cwl", PLAIN_TOOL)], "tool.cwl");

        let wrapper = read(&out.join("tool.cwl"));
        assert_eq!(wrapper["class"].as_str(), Some("Workflow"));
        assert_eq!(wrapper["steps"]["cmdline_tool"]["run"].as_str(), Some("__tool.cwl"));
        assert_eq!(wrapper["outputs"]["result"]["outputSource"].as_str(), Some("cmdline_tool/result"));

        let moved = read(&out.join("__tool.cwl"));
        assert_eq!(moved["class"].as_str(), Some("CommandLineTool"));
    }

    #[test]
    fn test_graph_bundle_rewrites_only_referenced_entry() {
        let bundle = r"cwlVersion: v1.0
$graph:
  - id: main
    class: Workflow
    inputs:
      x: int
    outputs: []
    steps:
      run_a:
        run: '#tool_a'
        in:
          x: x
        out: []
  - id: tool_a
    class: CommandLineTool
    baseCommand: echo
    requirements:
      - class: InlineJavascriptRequirement
    inputs:
      x:
        type: int
        inputBinding:
          valueFrom: ${ return inputs.x * 2; }
    outputs: {}
  - id: tool_b
    class: CommandLineTool
    baseCommand: echo
    inputs: {}
    outputs: {}
";
        let (_dir, out) = rewrite_fixture(&[("bundle.cwl", bundle)], "bundle.cwl");

        let root = read(&out.join("bundle.cwl"));
        let graph = root["$graph"].as_sequence().unwrap();

        let tool_a = graph.iter().find(|e| e["id"].as_str() == Some("tool_a")).unwrap();
        assert!(tool_a["inputs"].get(EXPR_INPUT).is_some());

        let tool_b = graph.iter().find(|e| e["id"].as_str() == Some("tool_b")).unwrap();
        assert!(tool_b["inputs"].get(EXPR_INPUT).is_none());

        let main = graph.iter().find(|e| e["id"].as_str() == Some("main")).unwrap();
        assert!(main["steps"]["run_a"]["run"].is_mapping());
    }

    #[test]
    fn test_cycle_is_detected() {
        let looping = r"class: Workflow
cwlVersion: v1.0
inputs: []
outputs: []
steps:
  again:
    run: loop.cwl
    in: {}
    out: []
";
        let dir = tempdir().unwrap();
        let base = dir.path().join("project");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("loop.cwl"), looping).unwrap();

        let mut cache = DocumentCache::new();
        let emitter = OutputEmitter::new(&base, dir.path().join("out"));
        let mut rewriter = WorkflowRewriter::new(&mut cache, &emitter);

        let result = rewriter.rewrite(&DocumentRef::new(base.join("loop.cwl")));
        assert!(matches!(result, Err(RewriteError::CycleDetected(_))));
    }

    #[test]
    fn test_unsupported_step_class() {
        let workflow = r"class: Workflow
cwlVersion: v1.0
inputs: []
outputs: []
steps:
  odd:
    run: odd.cwl
    in: {}
    out: []
";
        let dir = tempdir().unwrap();
        let base = dir.path().join("project");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("wf.cwl"), workflow).unwrap();
        fs::write(base.join("odd.cwl"), "class: Operation\ninputs: []\noutputs: []\n").unwrap();

        let mut cache = DocumentCache::new();
        let emitter = OutputEmitter::new(&base, dir.path().join("out"));
        let mut rewriter = WorkflowRewriter::new(&mut cache, &emitter);

        let result = rewriter.rewrite(&DocumentRef::new(base.join("wf.cwl")));
        assert!(matches!(result, Err(RewriteError::UnsupportedStepClass(class)) if class == "Operation"));
    }

    #[test]
    fn test_reserved_step_input_collides() {
        let workflow = r"class: Workflow
cwlVersion: v1.0
inputs:
  x: int
outputs: []
steps:
  work:
    run: tool.cwl
    in:
      __exprs: x
    out: []
";
        let dir = tempdir().unwrap();
        let base = dir.path().join("project");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("wf.cwl"), workflow).unwrap();
        fs::write(base.join("tool.cwl"), PLAIN_TOOL).unwrap();

        let mut cache = DocumentCache::new();
        let emitter = OutputEmitter::new(&base, dir.path().join("out"));
        let mut rewriter = WorkflowRewriter::new(&mut cache, &emitter);

        let result = rewriter.rewrite(&DocumentRef::new(base.join("wf.cwl")));
        assert!(matches!(result, Err(RewriteError::NameCollision { .. })));
    }
}
