/// Session formatting applied before any caller statement, so the session
/// output can be consumed line-by-line.
pub(crate) const SESSION_FORMAT: &[&str] = &[
    "set echo off",
    "set verify off",
    "set pagesize 999",
    "set linesize 300",
    "set feedback off",
    "set heading off",
];

/// Assemble the stdin script for one `sqlplus -s /nolog` session: the
/// connect line, the formatting preamble, the caller's statements, exit.
pub(crate) fn session_script(connect: &str, statements: &[String]) -> String {
    let mut script = String::new();
    script.push_str(connect);
    script.push('\n');
    for setting in SESSION_FORMAT {
        script.push_str(setting);
        script.push('\n');
    }
    for statement in statements {
        script.push_str(statement);
        script.push('\n');
    }
    script.push_str("exit\n");
    script
}

/// Trim the session output and drop blank lines.
pub(crate) fn clean_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
