//! Fuzz target for SSH exec command parsing.
//!
//! Parsing arbitrary command lines must never panic.

#![no_main]

use gitd_node::ssh::{split_words, GitCommand};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    let _ = split_words(&line);
    let _ = GitCommand::parse(&line);
});
