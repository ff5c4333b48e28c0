//! Tests for input and location bindings between caller and callee

use super::helpers::Harness;
use crate::device::Command;
use crate::executor::{errors, ReactionKind, Status, Val};

#[test]
fn test_location_write_is_visible_in_same_tick() {
    let mut h = Harness::started(
        r#"
activity Counter() out (value) {
    value = 0
    repeat {
        run WaitTicks(1)
        value += 1
    }
}
activity Main() {
    var count = 0
    cobegin {
        weak { run Counter() out (count) }
        strong { await (count >= 3) }
    }
    log.info("count=" + str(count) + " at " + str(clock.ticks))
}
"#,
    );
    assert_eq!(h.ticks(2), Status::Suspended);
    assert_eq!(h.tick(), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["count=3 at 3"]);
}

#[test]
fn test_nested_locations_reach_the_owner() {
    let mut h = Harness::new(
        r#"
activity Fill(v) out (target) { target = v }
activity Relay() out (slot) { run Fill("relayed") out (slot) }
activity Main() {
    var result
    run Relay() out (result)
    log.info(result)
}
"#,
    );
    assert_eq!(h.start(), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["relayed"]);
}

#[test]
fn test_input_reads_through_to_caller() {
    let mut h = Harness::started(
        r#"
activity Watch(speed) {
    await (speed > 5)
    log.info("fast " + str(speed))
}
activity Main() {
    var speed = 0
    cobegin {
        strong { run Watch(speed) }
        weak { repeat { run WaitTicks(1); speed += 2 } }
    }
}
"#,
    );
    assert_eq!(h.ticks(3), Status::Suspended);
    assert_eq!(h.tick(), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["fast 6"]);
}

#[test]
fn test_input_cannot_be_passed_as_location() {
    let mut h = Harness::new(
        r#"
activity Fill() out (v) { v = 1 }
activity Pass(x) { run Fill() out (x) }
activity Main() {
    var a = 0
    run Pass(a)
}
"#,
    );
    let err = h.react(ReactionKind::Start, "").unwrap_err();
    assert_eq!(err.code, errors::READ_ONLY_BINDING);
    assert!(err.message.contains("'x'"));
}

#[test]
fn test_bound_result_and_location_together() {
    let mut h = Harness::new(
        r#"
activity Measure() out (peak) {
    peak = 42
    return "ok"
}
activity Main() {
    var status
    var peak = 0
    status = run Measure() out (peak)
    log.info(status + " " + str(peak))
}
"#,
    );
    h.start();
    assert_eq!(h.messages(), vec!["ok 42"]);
}

#[test]
fn test_sensor_streamer_writes_location() {
    let mut h = Harness::started(
        r#"
activity Main() {
    var sample
    run Roll(255, 0, "forward")
    cobegin {
        weak { run SensorStreamer(10, ["location"]) out (sample) }
        strong { await (clock.ticks == 5) }
    }
    log.info("y=" + str(round(sample.y * 10)))
}
"#,
    );
    assert!(h.device.is_streaming());
    assert_eq!(h.ticks(5), Status::Finished(Val::Null));
    assert_eq!(h.messages(), vec!["y=5"]);
    // Preempted streamer stops the stream
    assert!(!h.device.is_streaming());
    assert_eq!(h.device.commands().last(), Some(&Command::StopStreaming));
}
