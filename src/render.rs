//! Markdown rendering of an ordered record sequence.
//!
//! Text records pass through with `\\` line breaks expanded. Math records
//! become inline images served by the CodeCogs LaTeX renderer.

use crate::pipeline::types::Record;

/// Prefix of the equation image URL; the URL-escaped LaTeX follows.
pub const EQUATION_IMAGE_BASE: &str = "http://latex.codecogs.com/gif.latex?";

/// Render records to GitHub-flavored markdown.
///
/// Toggle records switch math mode and emit nothing. An empty record
/// closes the preceding paragraph with a blank line, once.
pub fn render_markdown<'a>(records: impl IntoIterator<Item = &'a Record>) -> String {
    let mut out = String::new();
    let mut math = false;
    let mut pending_newline = false;

    for record in records {
        if record.toggle_math_mode {
            math = !math;
            continue;
        }
        if record.data.is_empty() {
            if pending_newline {
                out.push('\n');
                pending_newline = false;
            }
            continue;
        }
        if math {
            out.push_str("![equation](");
            out.push_str(EQUATION_IMAGE_BASE);
            out.push_str(&escape_equation(&record.data));
            out.push_str(")\n\n");
        } else {
            out.push_str(&record.data.replace("\\\\", "\n"));
            out.push('\n');
        }
        pending_newline = true;
    }
    out
}

fn escape_equation(latex: &str) -> String {
    latex
        .replace(' ', "%20")
        .replace('&', "%20")
        .replace('$', "%20")
        .replace("\\sfrac", "\\frac")
}
