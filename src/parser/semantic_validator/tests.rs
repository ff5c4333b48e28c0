//! Tests for the semantic validation system

use super::*;
use crate::parser::parse_module;

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse source and validate, returning errors
fn validate(source: &str) -> Vec<ValidationError> {
    let module = parse_module(source, "main").expect("Parse should succeed");
    validate_module(&module, source)
}

/// Get errors for a specific rule
fn for_rule<'a>(errors: &'a [ValidationError], rule_id: &str) -> Vec<&'a ValidationError> {
    errors.iter().filter(|e| e.rule_id == rule_id).collect()
}

fn has_rule(errors: &[ValidationError], rule_id: &str) -> bool {
    !for_rule(errors, rule_id).is_empty()
}

// ============================================================================
// Undefined Variable Tests
// ============================================================================

#[test]
fn test_undefined_variable_in_condition() {
    let errors = validate("activity Main() { await (speed > 10) }");
    let undef = for_rule(&errors, "undefined-variable");
    assert_eq!(undef.len(), 1);
    assert!(undef[0].message.contains("'speed'"));
    assert!(undef[0].is_error());
}

#[test]
fn test_params_outs_and_vars_are_defined() {
    let source = r#"
activity Drive(speed) out (sample) {
    var heading = 90
    run Roll(speed, heading, "forward")
    sample = heading
}
"#;
    assert!(!has_rule(&validate(source), "undefined-variable"));
}

#[test]
fn test_var_is_activity_scoped() {
    // declared in a later trail, still visible in the first one
    let source = r#"
activity Main() {
    cobegin {
        weak { await (ready) }
        strong { var ready = true }
    }
}
"#;
    assert!(!has_rule(&validate(source), "undefined-variable"));
}

#[test]
fn test_builtins_are_defined() {
    let source = r#"
activity Main() {
    await (input.pressedIn("qx") || clock.ticks > 3 || device.failed)
    exec { log.info(str(pi)) }
}
"#;
    assert!(!has_rule(&validate(source), "undefined-variable"));
}

#[test]
fn test_assigning_a_builtin() {
    let errors = validate("activity Main() { input = 3 }");
    let undef = for_rule(&errors, "undefined-variable");
    assert_eq!(undef.len(), 1);
    assert!(undef[0].message.contains("builtin"));
}

#[test]
fn test_undefined_location_argument() {
    let errors = validate(r#"activity Main() { run SensorStreamer(10, ["yaw"]) out (sample) }"#);
    assert!(has_rule(&errors, "undefined-variable"));
}

// ============================================================================
// Instant Body Tests
// ============================================================================

#[test]
fn test_await_inside_exec() {
    let errors = validate("activity Main() { exec { await (input.pressed) } }");
    let instant = for_rule(&errors, "instant-body");
    assert_eq!(instant.len(), 1);
    assert!(instant[0].message.contains("'await'"));
}

#[test]
fn test_defer_allows_device_commands() {
    let source = r#"
activity Main() {
    defer {
        run StopRoll()
        run SetMainLED("black")
        log.note("stopped")
    }
    halt
}
"#;
    assert!(!has_rule(&validate(source), "instant-body"));
}

#[test]
fn test_defer_rejects_waits_and_activities() {
    let source = r#"
activity Blink() { halt }
activity Main() {
    defer {
        run WaitSeconds(1)
        run Blink()
    }
    halt
}
"#;
    let errors = validate(source);
    assert_eq!(for_rule(&errors, "instant-body").len(), 2);
}

#[test]
fn test_nested_if_inside_exec() {
    let source = r#"
activity Main() {
    var n = 0
    exec {
        if (n > 1) { n = 0 } else { halt }
    }
}
"#;
    let errors = validate(source);
    let instant = for_rule(&errors, "instant-body");
    assert_eq!(instant.len(), 1);
    assert!(instant[0].message.contains("'halt'"));
}

// ============================================================================
// Return Outside Flow Tests
// ============================================================================

#[test]
fn test_return_inside_defer() {
    let errors = validate("activity Main() { defer { return } halt }");
    assert!(has_rule(&errors, "return-outside-flow"));
    assert!(!has_rule(&errors, "instant-body"));
}

#[test]
fn test_return_in_flow_is_fine() {
    let errors = validate("activity Main() { when (input.pressed) abort { halt } exit 3 }");
    assert!(!has_rule(&errors, "return-outside-flow"));
}

// ============================================================================
// Unreachable Code Tests
// ============================================================================

#[test]
fn test_code_after_halt() {
    let source = r#"
activity Main() {
    halt
    log.info("never")
}
"#;
    let errors = validate(source);
    let unreachable = for_rule(&errors, "unreachable-code");
    assert_eq!(unreachable.len(), 1);
    assert_eq!(unreachable[0].span.start_line, 3);
    assert!(!unreachable[0].is_error());
}

#[test]
fn test_code_after_await_false_and_infinite_repeat() {
    let errors = validate(
        r#"
activity A() { await (false) log.info("a") }
activity B() { repeat { run WaitTicks(1) } log.info("b") }
activity C() { repeat { run WaitTicks(1) } until (true) log.info("c") }
"#,
    );
    let unreachable = for_rule(&errors, "unreachable-code");
    assert_eq!(unreachable.len(), 2);
    assert!(unreachable[0].message.contains("await (false)"));
    assert!(unreachable[1].message.contains("repeat"));
}

// ============================================================================
// Unused Variable Tests
// ============================================================================

#[test]
fn test_unused_variable() {
    let errors = validate("activity Main() { var x = 1; var _y = 2; x = 3 }");
    let unused = for_rule(&errors, "unused-variable");
    assert_eq!(unused.len(), 1);
    assert!(unused[0].message.contains("'x'"));
}

#[test]
fn test_location_counts_as_use() {
    let source = r#"
activity Main() {
    var sample
    run SensorStreamer(10, ["location"]) out (sample)
}
"#;
    assert!(!has_rule(&validate(source), "unused-variable"));
}

// ============================================================================
// Validator
// ============================================================================

#[test]
fn test_errors_sorted_and_reported() {
    let source = "activity Main() {\n  halt\n  await (nope)\n}";
    let errors = validate(source);
    assert!(has_errors(
        &parse_module(source, "main").unwrap(),
        source
    ));
    let lines: Vec<_> = errors.iter().map(|e| e.span.start_line).collect();
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);
    assert!(errors[0].to_string().starts_with("warning at line 3"));
}

#[test]
fn test_rule_listing() {
    let ids: Vec<_> = Validator::new().rules().map(|(id, _)| id).collect();
    assert_eq!(
        ids,
        vec![
            "undefined-variable",
            "instant-body",
            "return-outside-flow",
            "unreachable-code",
            "unused-variable"
        ]
    );
}
