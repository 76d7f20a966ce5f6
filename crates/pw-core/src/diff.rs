use similar::{ChangeTag, TextDiff};

/// `+`/`-` line diff of two renderings, or `None` when they match.
pub fn line_diff(before: &str, after: &str) -> Option<String> {
    if before == after {
        return None;
    }

    let diff = TextDiff::from_lines(before, after);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        output.push_str(sign);
        output.push_str(change.value());
        if !change.value().ends_with('\n') {
            output.push('\n');
        }
    }
    Some(output)
}
