//! Tests for `when ... abort` and `when ... reset`

use super::helpers::Harness;
use crate::device::Command;
use crate::executor::{Status, Val};

#[test]
fn test_guard_true_on_entry_skips_body() {
    let mut h = Harness::new(
        r#"
activity Main() {
    when (true) abort { log.info("body") }
    log.info("after")
}
"#,
    );
    assert_eq!(h.start(), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["after"]);
}

#[test]
fn test_guard_true_when_reached_later() {
    let mut h = Harness::started(
        r#"
activity Main() {
    await (input.pressed)
    when (input.key == "q") abort {
        log.info("body")
        halt
    }
    log.info("after")
}
"#,
    );
    assert_eq!(h.tick_key("q"), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["after"]);
}

#[test]
fn test_abort_on_key_finishes_in_same_tick() {
    let mut h = Harness::started(
        r#"
activity Blink() {
    repeat {
        run SetMainLED("red")
        run WaitTicks(1)
        run SetMainLED("black")
        run WaitTicks(1)
    }
}
activity Main() {
    when (input.key == "q") abort {
        run Blink()
    }
    log.info("stopped at " + str(clock.ticks))
}
"#,
    );
    assert_eq!(h.ticks(4), Status::Suspended);
    assert!(h.messages().is_empty());

    assert_eq!(h.tick_key("q"), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["stopped at 5"]);
    // Nothing of the blink loop ran on tick 5
    assert!(h.device.issued().iter().all(|c| c.clock < 5));
}

#[test]
fn test_reset_restarts_body() {
    let mut h = Harness::started(
        r#"
activity Main() {
    var n = 0
    when (input.key == "r") reset {
        n += 1
        log.info("pass " + str(n))
        halt
    }
}
"#,
    );
    assert_eq!(h.messages(), vec!["pass 1"]);
    h.tick();
    h.tick_key("x");
    assert_eq!(h.messages(), vec!["pass 1"]);
    assert_eq!(h.tick_key("r"), Status::Suspended);
    assert_eq!(h.messages(), vec!["pass 1", "pass 2"]);
    h.tick_key("r");
    assert_eq!(h.messages(), vec!["pass 1", "pass 2", "pass 3"]);
}

#[test]
fn test_outermost_guard_wins() {
    let mut h = Harness::started(
        r#"
activity Main() {
    when (input.key == "q") abort {
        when (input.pressed) abort {
            halt
        }
        log.info("inner done")
        halt
    }
    log.info("outer done")
}
"#,
    );
    assert_eq!(h.tick_key("q"), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["outer done"]);
}

#[test]
fn test_inner_guard_alone() {
    let mut h = Harness::started(
        r#"
activity Main() {
    when (input.key == "q") abort {
        when (input.pressed) abort {
            halt
        }
        log.info("inner done")
        halt
    }
    log.info("outer done")
}
"#,
    );
    assert_eq!(h.tick_key("x"), Status::Suspended);
    assert_eq!(h.messages(), vec!["inner done"]);
}

#[test]
fn test_guard_in_callee_sees_callee_scope() {
    let mut h = Harness::started(
        r#"
activity Until(limit) {
    var n = 0
    when (n >= limit) abort {
        repeat { run WaitTicks(1); n += 1 }
    }
    log.info("reached " + str(n))
}
activity Main() {
    run Until(3)
}
"#,
    );
    assert_eq!(h.ticks(3), Status::Suspended);
    assert_eq!(h.tick(), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["reached 3"]);
}

#[test]
fn test_abort_cancels_rolling() {
    let mut h = Harness::started(
        r#"
activity Main() {
    when (input.key == "s") abort {
        run RollForSeconds(100, 0, "forward", 5)
    }
    halt
}
"#,
    );
    h.tick();
    assert!(h.device.is_rolling());
    h.tick_key("s");
    assert!(!h.device.is_rolling());
    assert_eq!(h.device.commands().last(), Some(&Command::StopRoll));
}

#[test]
fn test_reset_guard_true_on_entry_holds_body_back() {
    let mut h = Harness::new(
        r#"
activity Main() {
    when (true) reset {
        log.info("body ran")
        halt
    }
}
"#,
    );
    assert_eq!(h.start(), Status::Suspended);
    assert!(h.messages().is_empty());
    h.ticks(3);
    assert!(h.messages().is_empty());
}

#[test]
fn test_reset_body_starts_once_guard_clears() {
    let mut h = Harness::started(
        r#"
activity Main() {
    var armed = true
    cobegin {
        weak {
            run WaitTicks(2)
            armed = false
        }
        weak {
            when (armed) reset {
                log.info("started at " + str(clock.ticks))
                halt
            }
        }
    }
}
"#,
    );
    assert!(h.messages().is_empty());
    h.tick();
    assert!(h.messages().is_empty());
    h.tick();
    assert_eq!(h.messages(), vec!["started at 2"]);
    h.ticks(2);
    assert_eq!(h.messages(), vec!["started at 2"]);
}
