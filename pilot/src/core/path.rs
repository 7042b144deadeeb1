//! Helpers for deterministic artifact file names.

/// Replace characters that are unsafe inside a single file name component.
///
/// Branch names such as `feature/issue-12` must not introduce directories.
/// The mapping is idempotent: sanitizing an already sanitized name is a no-op.
pub fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '-',
            c if c.is_whitespace() || c.is_control() => '-',
            c => c,
        })
        .collect();
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        // `.` and `..` would resolve to directories.
        return sanitized.replace('.', "-") + "-";
    }
    sanitized
}

/// File name of the failure report for a given branch and attempt.
pub fn failure_details_file_name(branch_name: &str, attempt: u32) -> String {
    format!(
        "{}_failure_details_{attempt}.txt",
        sanitize_component(branch_name)
    )
}

/// File name of the plan for an objective.
pub fn plan_file_name(identifier: &str) -> String {
    format!("plan_{}.md", sanitize_component(identifier))
}

/// File name of a downloaded objective.
pub fn objective_file_name(identifier: &str) -> String {
    format!("{}.md", sanitize_component(identifier))
}
