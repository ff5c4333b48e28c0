//! Tests for module linking and name resolution

use super::helpers::{link, Harness};
use crate::executor::{DefinitionError, Status, Val, VmOptions};

#[test]
fn test_link_resolves_imports_and_entry() {
    let registry = link(&[
        (
            "main",
            "//! Drives around.\nimport lights\nactivity Main() { run Blink() }",
        ),
        ("lights", "activity Blink() { run SetMainLED(\"red\") }"),
    ])
    .unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.main_module(), "main");
    assert_eq!(registry.explanation(), Some("Drives around."));
    assert_eq!(registry.find("main", "Main"), Some(registry.entry()));
    assert!(registry.find("main", "Blink").is_none());
    assert!(registry.find("lights", "Blink").is_some());
}

#[test]
fn test_own_activity_shadows_primitive() {
    let mut h = Harness::new(
        r#"
activity SetMainLED(color) { log.info("custom " + color) }
activity Main() { run SetMainLED("red") }
"#,
    );
    assert_eq!(h.start(), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["custom red"]);
    assert!(h.device.issued().is_empty());
}

#[test]
fn test_own_activity_shadows_import() {
    let mut h = Harness::with_modules(
        &[
            (
                "main",
                "import lib\nactivity Hello() { log.info(\"own\") }\nactivity Main() { run Hello() }",
            ),
            ("lib", "activity Hello() { log.info(\"imported\") }"),
        ],
        VmOptions::default(),
    );
    h.start();
    assert_eq!(h.messages(), vec!["own"]);
}

#[test]
fn test_imports_are_not_transitive() {
    let err = link(&[
        ("main", "import a\nactivity Main() { run Deep() }"),
        ("a", "import b\nactivity Shallow() { run Deep() }"),
        ("b", "activity Deep() { halt }"),
    ])
    .unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::UnknownActivity { ref caller, ref name, .. } if caller == "Main" && name == "Deep"
    ));
}

#[test]
fn test_same_name_from_two_imports_collides() {
    let err = link(&[
        ("main", "import a\nimport b\nactivity Main() { halt }"),
        ("a", "activity Blink() { halt }"),
        ("b", "activity Blink() { halt }"),
    ])
    .unwrap_err();
    assert_eq!(
        err,
        DefinitionError::NameCollision {
            module: "main".into(),
            name: "Blink".into(),
            first: "a".into(),
            second: "b".into(),
        }
    );
}

#[test]
fn test_unknown_import() {
    let err = link(&[("main", "import nowhere\nactivity Main() { halt }")]).unwrap_err();
    assert_eq!(
        err,
        DefinitionError::UnknownModule {
            name: "nowhere".into(),
            from: Some("main".into()),
        }
    );
}

#[test]
fn test_duplicates() {
    let err = link(&[
        ("main", "activity Main() { halt }"),
        ("main", "activity Other() { halt }"),
    ])
    .unwrap_err();
    assert_eq!(err, DefinitionError::DuplicateModule("main".into()));

    let err = link(&[("main", "activity Main() { halt }\nactivity Main() { halt }")]).unwrap_err();
    assert!(matches!(err, DefinitionError::DuplicateActivity { .. }));

    let err = link(&[("main", "activity Main() { var x = 1; var x = 2 }")]).unwrap_err();
    assert!(matches!(err, DefinitionError::DuplicateVariable { ref name, .. } if name == "x"));
}

#[test]
fn test_arity_must_match() {
    let err = link(&[(
        "main",
        "activity Drive(speed) out (done) { halt }\nactivity Main() { var d; run Drive(1, 2) out (d) }",
    )])
    .unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::ArityMismatch {
            expected_args: 1,
            got_args: 2,
            expected_outs: 1,
            got_outs: 1,
            ..
        }
    ));

    let err = link(&[("main", "activity Main() { run WaitTicks() }")]).unwrap_err();
    assert!(matches!(err, DefinitionError::ArityMismatch { expected_args: 1, .. }));
}

#[test]
fn test_undeclared_and_builtin_locations() {
    let err = link(&[("main", "activity Main() { await (missing) }")]).unwrap_err();
    assert!(matches!(err, DefinitionError::UndeclaredVariable { ref name, .. } if name == "missing"));

    let err = link(&[(
        "main",
        "activity Fill() out (v) { v = 1 }\nactivity Main() { run Fill() out (input) }",
    )])
    .unwrap_err();
    assert!(matches!(err, DefinitionError::LocationNotVariable { ref name, .. } if name == "input"));
}

#[test]
fn test_entry_checks() {
    let err = link(&[("main", "activity Start() { halt }")]).unwrap_err();
    assert_eq!(
        err,
        DefinitionError::MissingEntry {
            module: "main".into(),
            entry: "Main".into(),
        }
    );

    let err = link(&[("main", "activity Main(speed) { halt }")]).unwrap_err();
    assert!(matches!(err, DefinitionError::EntryHasParameters { .. }));
}

#[test]
fn test_error_messages_name_the_culprit() {
    let err = link(&[("main", "activity Main() { run Fly() }")]).unwrap_err();
    assert_eq!(err.to_string(), "unknown activity 'Fly' called from 'Main'");
}
