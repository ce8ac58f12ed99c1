//! Fuzz target for repository identifier sanitization.
//!
//! Any identifier that is accepted must land strictly inside the root, and
//! only its final segment may name a repository directory.

#![no_main]

use gitd_repo::RepositoryRoot;
use libfuzzer_sys::fuzz_target;
use std::path::Component;

fuzz_target!(|data: &[u8]| {
    let root = RepositoryRoot::new("/srv/gitd/repositories").unwrap();
    let identifier = String::from_utf8_lossy(data);

    if let Ok(path) = root.sanitize(&identifier) {
        assert!(path.absolute().starts_with(root.path()));
        assert_ne!(path.absolute(), root.path());
        assert!(path
            .relative()
            .components()
            .all(|c| matches!(c, Component::Normal(_))));
        assert!(path.relative().to_string_lossy().ends_with(".git"));
        if let Some(parent) = path.relative().parent() {
            assert!(parent
                .components()
                .all(|c| !c.as_os_str().to_string_lossy().ends_with(".git")));
        }
    }
});
