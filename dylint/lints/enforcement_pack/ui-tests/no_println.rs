// Test cases for NO_PRINTLN and NO_BLOCKING_SLEEP

use std::time::Duration;

fn bad_println(principal_id: &str) {
    println!("revalidating {principal_id}");
}

fn bad_eprintln() {
    eprintln!("group fetch failed");
}

fn bad_dbg() {
    let token = "a1b2c3";
    dbg!(token);
}

fn bad_sleep() {
    std::thread::sleep(Duration::from_millis(1));
}

// Good: structured logging
fn good_tracing(principal_id: &str) {
    tracing::warn!(principal_id, "access revoked");
}

fn main() {
    bad_println("amir");
    bad_eprintln();
    bad_dbg();
    bad_sleep();
    good_tracing("amir");
}
