use std::fs;
use std::path::{Path, PathBuf};

/// The only module allowed to deliver raw signals
const SIGNAL_ADAPTER: &str = "src/adapters/signals.rs";

/// Modules allowed to launch external programs
const ALLOWED_SPAWNERS: &[&str] = &[
    "src/supervisor/process_supervisor.rs",
    "src/adapters/service_manager.rs",
];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

/// Source files with their repo-relative path and the lines before any test module
fn production_sources() -> Vec<(String, Vec<String>)> {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);

    files
        .into_iter()
        .map(|file| {
            let rel = file
                .strip_prefix(repo_root)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            let content = fs::read_to_string(&file).unwrap_or_default();
            let lines = content
                .lines()
                .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
                .map(str::to_string)
                .collect();
            (rel, lines)
        })
        .collect()
}

#[test]
fn raw_signal_delivery_is_limited_to_the_signal_adapter() {
    let mut offenders = Vec::new();
    for (rel, lines) in production_sources() {
        if rel == SIGNAL_ADAPTER {
            continue;
        }
        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.contains("nix::sys::signal") || trimmed.contains("libc::kill") {
                offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "signal delivery outside {SIGNAL_ADAPTER}:\n{}",
        offenders.join("\n")
    );
}

#[test]
fn child_processes_are_spawned_only_by_supervisor_and_service_manager() {
    let mut offenders = Vec::new();
    for (rel, lines) in production_sources() {
        if ALLOWED_SPAWNERS.iter().any(|allowed| *allowed == rel) {
            continue;
        }
        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.contains("Command::new(") {
                offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "external program launched outside the allowed modules:\n{}",
        offenders.join("\n")
    );
}
