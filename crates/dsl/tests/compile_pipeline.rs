//! End-to-end compile pipeline scenarios.

use std::sync::Arc;

use sr_dsl::errors::ErrorCode;
use sr_dsl::DslCompiler;

#[test]
fn compile_twice_hits_cache_with_identical_program() {
    let compiler = DslCompiler::default();
    let src = "streetrace v1\nflow main:\n    log \"hi\"\n";

    let first = compiler.compile(src, "main.sr").unwrap();
    assert!(!first.cache_hit);
    assert_eq!(compiler.cache().len(), 1);

    let second = compiler.compile(src, "main.sr").unwrap();
    assert!(second.cache_hit);
    assert!(Arc::ptr_eq(&first.program, &second.program));
}

#[test]
fn missing_instruction_produces_exactly_e0010() {
    let compiler = DslCompiler::default();
    let src = "streetrace v1\n\
               tool fs = builtin streetrace.fs\n\
               agent helper:\n    tools fs\n";
    let err = compiler.compile(src, "main.sr").unwrap_err();
    assert_eq!(err.diagnostics.len(), 1);
    let diag = &err.diagnostics[0];
    assert_eq!(diag.code, ErrorCode::E0010);
    assert!(diag.message.contains("instruction"));
    assert!(diag.message.contains("helper"));
}

#[test]
fn full_workflow_compiles_with_all_constructs() {
    let compiler = DslCompiler::default();
    let src = "\
streetrace v1

model fast = anthropic claude-3-5-haiku
    max_input_tokens 200000
    history summarize

tool fs = builtin streetrace.fs
tool docs = mcp stdio \"npx -y server .\"
    allow read_file, list_*

schema Finding:
    title: string
    score: float
    tags: list[string]
    note: string?

prompt summarize_diff:
    Summarize the change in ${file} touching ${len(hunks)} hunks.

agent reviewer:
    model fast
    instruction \"You review code changes.\"
    tools fs, docs
    output Finding

flow main:
    $file = \"changes.diff\"
    $hunks = [1, 2, 3]
    $diff = call tool fs.read_file with $file
    log \"loaded ${len(diff)} entries\"
    run reviewer with $diff -> $finding
    call llm summarize_diff -> $summary
    parallel:
        $a = run reviewer with \"part a\"
        $b = run reviewer with \"part b\"
    for chunk in $hunks:
        log \"chunk ${chunk}\"
    match $summary:
        \"clean\" -> return \"no findings\"
        _ -> return $finding

on before model:
    mask pii
    warn \"long input\" if $file
";
    let out = compiler.compile(src, "code_review.sr").unwrap();
    let program = &out.program;
    assert_eq!(program.class_name, "CodeReviewWorkflow");
    assert_eq!(program.models.len(), 1);
    assert_eq!(program.tools.len(), 2);
    assert_eq!(program.schemas.len(), 1);
    assert_eq!(program.prompts.len(), 1);
    assert_eq!(program.agents.len(), 1);
    assert_eq!(program.flows.len(), 1);
    assert_eq!(program.handlers.len(), 1);
    assert!(out.warnings.is_empty());
}

#[test]
fn every_op_translates_back_to_a_source_line() {
    let compiler = DslCompiler::default();
    let src = "streetrace v1\nflow main:\n    $x = 1\n    $y = 2\n    return $x + $y\n";
    let out = compiler.compile(src, "sums.sr").unwrap();

    let flow = out.program.flows.get("main").unwrap();
    for op in &flow.body {
        let mapping = compiler
            .translate(&out.program.class_name, op.generated_line)
            .expect("generated line must map back");
        assert_eq!(mapping.source_line, op.source_line);
        assert_eq!(mapping.source_file, "sums.sr");
    }
}

#[test]
fn indentation_error_is_distinct_from_syntax_error() {
    let compiler = DslCompiler::default();

    let indent_err = compiler
        .compile("streetrace v1\nflow main:\n    $a = 1\n  $b = 2\n", "bad.sr")
        .unwrap_err();
    assert_eq!(indent_err.diagnostics[0].code, ErrorCode::E0008);

    let syntax_err = compiler
        .compile("streetrace v1\nflow main:\n    widget wobble\n", "bad.sr")
        .unwrap_err();
    assert_eq!(syntax_err.diagnostics[0].code, ErrorCode::E0007);
}

#[test]
fn delegate_use_and_cycles_diagnose_independently() {
    let compiler = DslCompiler::default();
    // delegate+use is only a warning; the cycle is the error.
    let src = "streetrace v1\n\
               agent a:\n    instruction \"x\"\n    delegate b\n    use b\n\
               agent b:\n    instruction \"y\"\n    delegate a\n";
    let err = compiler.compile(src, "cyclic.sr").unwrap_err();
    let codes: Vec<ErrorCode> = err.diagnostics.iter().map(|d| d.code).collect();
    assert!(codes.contains(&ErrorCode::E0011));
    assert!(codes.contains(&ErrorCode::W0002));
}
