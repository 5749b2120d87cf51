use crate::{
    error::RewriteError,
    expr::{ExpressionCollector, ExpressionSite, SiteKind},
};
use cwl_doc::{IdMap, key};
use serde_yaml::Value;
use std::collections::HashMap;

/// Synthesized array input carrying the evaluated input expressions.
pub const EXPR_INPUT: &str = "__exprs";
/// Prefix for the `self` stash names of lifted output expressions.
pub const OUTPUT_STASH_PREFIX: &str = "__output_";

/// Shell one-liner that turns its `|`-shielded argument into
/// `cwl.output.json`.
pub const EMIT_JSON_SCRIPT: &str = "echo $0 | cut -c 2- > cwl.output.json";

/// Original shape of a tool output whose `outputEval` was lifted.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputMemo {
    /// The eval string with every lifted span replaced by `$(self[k])`.
    pub output_eval: String,
    /// The originally declared type, Null if none was given.
    pub declared_type: Value,
}

/// Result of rewriting a single CommandLineTool.
pub struct RewrittenTool {
    pub tool: Value,
    pub input_expressions: Vec<ExpressionSite>,
    pub output_expressions: Vec<ExpressionSite>,
    pub output_type_memo: HashMap<String, OutputMemo>,
    /// `expressionLib` snippets of the removed InlineJavascriptRequirement.
    pub expression_lib: Vec<String>,
}

/// The nullable permissive type, `["Any", "null"]`.
pub fn any_nullable() -> Value {
    Value::Sequence(vec![key("Any"), key("null")])
}

/// Declared type of the synthesized `__exprs` input.
pub fn exprs_input_type() -> Value {
    let mut array = serde_yaml::Mapping::new();
    array.insert(key("type"), key("array"));
    array.insert(key("items"), any_nullable());
    let mut entry = serde_yaml::Mapping::new();
    entry.insert(key("type"), Value::Mapping(array));
    Value::Mapping(entry)
}

/// Checks requirements and hints for an InlineJavascriptRequirement.
pub fn has_inline_javascript(document: &Value) -> bool {
    ["requirements", "hints"]
        .iter()
        .any(|section| document.get(section).is_some_and(|value| section_has_class(value, "InlineJavascriptRequirement")))
}

fn section_has_class(value: &Value, class: &str) -> bool {
    match value {
        Value::Mapping(map) => map.contains_key(&key(class)),
        Value::Sequence(seq) => seq.iter().any(|entry| entry.get("class").and_then(Value::as_str) == Some(class)),
        _ => false,
    }
}

/// Removes the InlineJavascriptRequirement from requirements and hints,
/// returning its `expressionLib` snippets for use by the evaluator steps.
pub fn take_expression_lib(document: &mut Value) -> Vec<String> {
    let mut lib = Vec::new();
    for section in ["requirements", "hints"] {
        let Some(value) = document.get_mut(section) else { continue };
        if let Some(removed) = IdMap::keyed_on(value, "class").remove("InlineJavascriptRequirement")
            && let Some(snippets) = removed.get("expressionLib").and_then(Value::as_sequence)
        {
            lib.extend(snippets.iter().filter_map(Value::as_str).map(str::to_string));
        }
    }
    lib
}

/// Rewrites a CommandLineTool so that no script expressions remain.
///
/// Expressions in input bindings and free text are replaced by references
/// into the synthesized `__exprs` array input; lifted `outputEval` strings
/// are moved into the memo and their outputs demoted to nullable Any. Site
/// numbering is deterministic: input bindings in `inputs` order, then output
/// evals in `outputs` order, then free text in depth-first document order.
pub fn rewrite_tool(document: &Value) -> Result<RewrittenTool, RewriteError> {
    let mut tool = document.clone();
    let mut input_exprs = ExpressionCollector::new("inputs.__exprs");
    let mut output_exprs = ExpressionCollector::new("self");
    let mut output_type_memo = HashMap::new();

    let context = tool.get("id").and_then(Value::as_str).unwrap_or("tool").to_string();

    if let Some(inputs) = tool.get_mut("inputs")
        && IdMap::new(inputs).contains(EXPR_INPUT)
    {
        return Err(RewriteError::NameCollision {
            name: EXPR_INPUT.to_string(),
            context,
        });
    }

    // input bindings, in declaration order
    if let Some(inputs) = tool.get_mut("inputs") {
        let mut inputs = IdMap::new(inputs);
        for id in inputs.keys() {
            let Some(entry) = inputs.get_mut(&id) else { continue };
            let Some(Value::String(text)) = entry.get_mut("inputBinding").and_then(|b| b.get_mut("valueFrom")) else {
                continue;
            };
            *text = input_exprs.rewrite(text, SiteKind::InputBinding, Some(&id))?;
        }
    }

    // output evals, in declaration order
    if let Some(outputs) = tool.get_mut("outputs") {
        let mut outputs = IdMap::new(outputs);
        for id in outputs.keys() {
            let stash = format!("{OUTPUT_STASH_PREFIX}{id}");
            let Some(entry) = outputs.get_mut(&id) else { continue };

            let rewritten = {
                let Some(Value::String(text)) = entry.get_mut("outputBinding").and_then(|b| b.get_mut("outputEval")) else {
                    continue;
                };
                let before = output_exprs.len();
                let rewritten = output_exprs.rewrite(text, SiteKind::OutputEval, Some(&stash))?;
                if output_exprs.len() == before {
                    // nothing lifted, the eval stays in place
                    continue;
                }
                rewritten
            };

            let declared_type = entry.get("type").cloned().unwrap_or(Value::Null);
            if let Some(binding) = entry.get_mut("outputBinding").and_then(Value::as_mapping_mut) {
                binding.remove(&key("outputEval"));
            }
            if let Some(map) = entry.as_mapping_mut() {
                map.insert(key("type"), any_nullable());
            }
            output_type_memo.insert(
                id.clone(),
                OutputMemo {
                    output_eval: rewritten,
                    declared_type,
                },
            );
        }
    }

    // the requirement goes before the free-text walk, otherwise library
    // snippets would be scanned and recorded without ever being referenced
    let expression_lib = take_expression_lib(&mut tool);

    walk_strings(&mut tool, &mut input_exprs)?;

    if !input_exprs.is_empty() {
        match tool.get_mut("inputs") {
            Some(inputs) => IdMap::new(inputs).add(EXPR_INPUT, exprs_input_type()),
            None => {
                if let Some(map) = tool.as_mapping_mut() {
                    let mut inputs = serde_yaml::Mapping::new();
                    inputs.insert(key(EXPR_INPUT), exprs_input_type());
                    map.insert(key("inputs"), Value::Mapping(inputs));
                }
            }
        }
    }

    Ok(RewrittenTool {
        tool,
        input_expressions: input_exprs.sites,
        output_expressions: output_exprs.sites,
        output_type_memo,
        expression_lib,
    })
}

/// Depth-first pass over every string leaf. Strings already rewritten by the
/// binding passes only contain parameter references at this point and fall
/// through unchanged; identifier fields are never touched.
fn walk_strings(value: &mut Value, collector: &mut ExpressionCollector) -> Result<(), RewriteError> {
    match value {
        Value::String(text) => {
            *text = collector.rewrite(text, SiteKind::FreeText, None)?;
        }
        Value::Sequence(seq) => {
            for item in seq {
                walk_strings(item, collector)?;
            }
        }
        Value::Mapping(map) => {
            for (k, v) in map.iter_mut() {
                if k.as_str() == Some("id") || k.as_str() == Some("class") {
                    continue;
                }
                walk_strings(v, collector)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Turns an ExpressionTool into a CommandLineTool that emits the evaluated
/// expression as `cwl.output.json`. The leading `|` shields the payload from
/// the shell, `cut` strips it again.
pub fn transmute_expression_tool(document: &Value) -> Result<Value, RewriteError> {
    let mut tool = document.clone();
    let Some(map) = tool.as_mapping_mut() else {
        return Err(RewriteError::UnsupportedBinding("expression tool is not a mapping".to_string()));
    };
    let Some(Value::String(expression)) = map.remove(&key("expression")) else {
        return Err(RewriteError::UnsupportedBinding("expression tool without a string `expression`".to_string()));
    };

    map.insert(key("class"), key("CommandLineTool"));
    map.insert(
        key("arguments"),
        Value::Sequence(vec![key("bash"), key("-c"), key(EMIT_JSON_SCRIPT), Value::String(format!("|{expression}"))]),
    );
    Ok(tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    const PLAIN_TOOL: &str = r"class: CommandLineTool
cwlVersion: v1.0
baseCommand: echo
inputs:
  x:
    type: string
    inputBinding:
      valueFrom: prefix-$(inputs.x.path)-suffix
outputs:
  out:
    type: stdout
";

    #[test]
    fn test_parameter_references_stay_in_place() {
        let tool = parse(PLAIN_TOOL);
        let rewritten = rewrite_tool(&tool).unwrap();

        assert_eq!(rewritten.tool, tool);
        assert!(rewritten.input_expressions.is_empty());
        assert!(rewritten.output_expressions.is_empty());
    }

    #[test]
    fn test_length_reference_is_lifted() {
        let tool = parse(
            r"class: CommandLineTool
cwlVersion: v1.0
baseCommand: echo
requirements:
  - class: InlineJavascriptRequirement
inputs:
  x:
    type: string
    inputBinding:
      valueFrom: prefix-$(inputs.x.length)-suffix
outputs: {}
",
        );
        let rewritten = rewrite_tool(&tool).unwrap();

        let value_from = rewritten.tool["inputs"]["x"]["inputBinding"]["valueFrom"].as_str().unwrap();
        assert_eq!(value_from, "prefix-$(inputs.__exprs[0])-suffix");
        assert_eq!(rewritten.input_expressions[0].expression, "$(inputs.x.length)");
    }

    #[test]
    fn test_script_block_in_binding() {
        let tool = parse(
            r"class: CommandLineTool
cwlVersion: v1.0
baseCommand: echo
requirements:
  - class: InlineJavascriptRequirement
inputs:
  x:
    type: int
    inputBinding:
      valueFrom: a-${ return inputs.x + 1; }-b
outputs: {}
",
        );
        let rewritten = rewrite_tool(&tool).unwrap();

        let value_from = rewritten.tool["inputs"]["x"]["inputBinding"]["valueFrom"].as_str().unwrap();
        assert_eq!(value_from, "a-$(inputs.__exprs[0])-b");

        let site = &rewritten.input_expressions[0];
        assert_eq!(site.self_name.as_deref(), Some("x"));
        assert_eq!(site.expression, "${ return inputs.x + 1; }");

        let exprs = rewritten.tool["inputs"][EXPR_INPUT].clone();
        assert_eq!(exprs, exprs_input_type());
        assert!(!has_inline_javascript(&rewritten.tool));
    }

    #[test]
    fn test_output_eval_is_memoized() {
        let tool = parse(
            r#"class: CommandLineTool
cwlVersion: v1.0
baseCommand: wc
requirements:
  - class: InlineJavascriptRequirement
inputs: {}
outputs:
  count:
    type: int
    outputBinding:
      glob: "*.txt"
      outputEval: ${ return parseInt(self[0].contents); }
"#,
        );
        let rewritten = rewrite_tool(&tool).unwrap();

        let output = &rewritten.tool["outputs"]["count"];
        assert_eq!(output["type"], any_nullable());
        assert!(output["outputBinding"].get("outputEval").is_none());
        assert_eq!(output["outputBinding"]["glob"].as_str(), Some("*.txt"));

        let memo = &rewritten.output_type_memo["count"];
        assert_eq!(memo.output_eval, "$(self[0])");
        assert_eq!(memo.declared_type, parse("int"));

        let site = &rewritten.output_expressions[0];
        assert_eq!(site.self_name.as_deref(), Some("__output_count"));
    }

    #[test]
    fn test_site_numbering_order() {
        let tool = parse(
            r"class: CommandLineTool
cwlVersion: v1.0
baseCommand: echo
requirements:
  - class: InlineJavascriptRequirement
inputs:
  a:
    type: int
    inputBinding:
      valueFrom: ${ return inputs.a * 2; }
  b:
    type: int
    inputBinding:
      valueFrom: ${ return inputs.b * 3; }
outputs:
  out:
    type: int
    outputBinding:
      outputEval: ${ return 7; }
stdout: file-${ return inputs.a; }.txt
",
        );
        let rewritten = rewrite_tool(&tool).unwrap();

        // input bindings first, free text appended after them
        let inputs: Vec<_> = rewritten.input_expressions.iter().map(|s| (s.kind, s.index)).collect();
        assert_eq!(
            inputs,
            vec![(SiteKind::InputBinding, 0), (SiteKind::InputBinding, 1), (SiteKind::FreeText, 2)]
        );
        assert_eq!(rewritten.tool["stdout"].as_str(), Some("file-$(inputs.__exprs[2]).txt"));

        // output expressions are numbered independently
        assert_eq!(rewritten.output_expressions[0].index, 0);
        assert_eq!(rewritten.tool["outputs"]["out"].get("outputBinding").unwrap().get("outputEval"), None);
    }

    #[test]
    fn test_idempotent_without_expressions() {
        let tool = parse(PLAIN_TOOL);
        let once = rewrite_tool(&tool).unwrap();
        let twice = rewrite_tool(&once.tool).unwrap();
        assert_eq!(once.tool, twice.tool);
        assert!(twice.input_expressions.is_empty());
    }

    #[test]
    fn test_reserved_input_name_collides() {
        let tool = parse(
            r"class: CommandLineTool
cwlVersion: v1.0
baseCommand: echo
inputs:
  __exprs: string
outputs: {}
",
        );
        let result = rewrite_tool(&tool);
        assert!(matches!(result, Err(RewriteError::NameCollision { .. })));
    }

    #[test]
    fn test_expression_lib_is_collected() {
        let tool = parse(
            r"class: CommandLineTool
cwlVersion: v1.0
baseCommand: echo
requirements:
  - class: InlineJavascriptRequirement
    expressionLib:
      - function double(x) { return 2 * x; }
      - function triple(x) { return 3 * x; }
inputs: {}
outputs: {}
",
        );
        let rewritten = rewrite_tool(&tool).unwrap();
        assert_eq!(rewritten.expression_lib.len(), 2);
        // library snippets are forwarded, never recorded as sites
        assert!(rewritten.input_expressions.is_empty());
    }

    #[test]
    fn test_transmute_expression_tool() {
        let tool = parse(
            r"class: ExpressionTool
cwlVersion: v1.0
requirements:
  - class: InlineJavascriptRequirement
inputs: {}
outputs:
  out: Any
expression: '${ return {out: 42}; }'
",
        );
        let transmuted = transmute_expression_tool(&tool).unwrap();

        assert_eq!(transmuted["class"].as_str(), Some("CommandLineTool"));
        assert!(transmuted.get("expression").is_none());
        let arguments = transmuted["arguments"].as_sequence().unwrap();
        let arguments: Vec<_> = arguments.iter().filter_map(Value::as_str).collect();
        assert_eq!(
            arguments,
            vec!["bash", "-c", "echo $0 | cut -c 2- > cwl.output.json", "|${ return {out: 42}; }"]
        );
    }
}
